use crate::model::ExecutionState;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared execution state. Any holder may write; the last write wins.
#[derive(Clone)]
pub struct ExecutionStateCell {
    tx: Arc<watch::Sender<ExecutionState>>,
}

impl Default for ExecutionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ExecutionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: ExecutionState) {
        let prev = self.tx.send_replace(state);
        if prev != state {
            tracing::debug!(from = %prev, to = %state, "execution state");
        }
    }

    pub fn get(&self) -> ExecutionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writers_share_one_value() {
        let cell = ExecutionStateCell::new();
        let other = cell.clone();
        let mut rx = cell.subscribe();
        assert_eq!(cell.get(), ExecutionState::Idle);

        other.set(ExecutionState::Running);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ExecutionState::Running);
        assert_eq!(cell.get(), ExecutionState::Running);
    }
}
