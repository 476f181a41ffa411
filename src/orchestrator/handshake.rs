use crate::callback::{bool_field, obj};
use crate::engine::RawCallback;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Code of the `AsyncCallInfo` callback.
const ASYNC_CALL_INFO: i32 = 4;

/// Single-slot completion cell for the engine's connect acknowledgement.
///
/// `start()` arms the slot before issuing `async_connect`; the callback pump
/// offers every callback and the first `AsyncCallInfo` carrying a boolean
/// `details.ret` resolves it.
#[derive(Default)]
pub struct ConnectHandshake {
    slot: Mutex<Option<oneshot::Sender<bool>>>,
}

impl ConnectHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh slot, dropping any stale one.
    pub fn arm(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        if self.lock().replace(tx).is_some() {
            tracing::debug!("replacing an unresolved connect handshake");
        }
        rx
    }

    /// Returns true if the callback resolved a pending handshake.
    pub fn offer(&self, callback: &RawCallback) -> bool {
        if callback.code != ASYNC_CALL_INFO {
            return false;
        }
        let Some(ret) = callback.json.as_deref().and_then(connect_ret) else {
            return false;
        };
        match self.lock().take() {
            Some(tx) => tx.send(ret).is_ok(),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<bool>>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn connect_ret(json: &str) -> Option<bool> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    bool_field(obj(&value, "details")?, "ret")
}
