//! Remote engine surface.
//!
//! The automation engine lives in another process behind a remote service.
//! Everything here is an interface boundary: the supervisor only calls these
//! traits and listens on the callback channel handed to `create_instance`.

mod simulated;

pub use simulated::{ConnectAck, SimulatedEngine, SimulatedFailures};

use crate::error::ServiceError;
use crate::model::ScreenSize;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

/// How long to wait for the remote service before giving up.
const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// One callback as emitted by the engine: an integer code and an optional JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCallback {
    pub code: i32,
    #[serde(default)]
    pub json: Option<String>,
}

impl RawCallback {
    pub fn new(code: i32, json: impl Into<String>) -> Self {
        Self {
            code,
            json: Some(json.into()),
        }
    }
}

pub type CallbackSender = mpsc::UnboundedSender<RawCallback>;

/// Instance options accepted by `set_instance_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOption {
    TouchMode,
}

impl InstanceOption {
    pub fn key(self) -> i32 {
        match self {
            InstanceOption::TouchMode => 2,
        }
    }
}

/// Touch-input backend used on the sandboxed device.
pub const TOUCH_MODE_ANDROID: &str = "android";

/// RPC surface of the engine itself.
#[async_trait]
pub trait EngineCore: Send + Sync {
    async fn has_instance(&self) -> bool;
    async fn create_instance(&self, callbacks: CallbackSender) -> bool;
    async fn set_instance_option(&self, option: InstanceOption, value: &str) -> bool;
    async fn load_resource(&self, path: &Path) -> bool;
    /// The result arrives later as an `AsyncCallInfo` callback.
    async fn async_connect(&self, address: &str, protocol: &str, config: &str, confirm: bool);
    async fn append_task(&self, task_type: &str, params: &str);
    async fn start(&self) -> bool;
    async fn stop(&self) -> bool;
    async fn running(&self) -> bool;
    async fn version(&self) -> String;
}

/// The privileged service process hosting the engine and the virtual display.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn setup(&self, root: &Path) -> Result<(), ServiceError>;
    fn core(&self) -> &dyn EngineCore;
    async fn set_virtual_display_mode(&self, mode: i32) -> bool;
    /// Display id, or `DISPLAY_NONE` on failure.
    async fn start_virtual_display(&self) -> i32;
    async fn stop_virtual_display(&self);
}

/// Connectivity of the remote service as seen by the binder.
#[derive(Clone)]
pub enum ServiceState {
    Connecting,
    Connected(Arc<dyn RemoteService>),
    Disconnected,
    /// The service process died unexpectedly.
    Died,
    Error(String),
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Connecting => f.write_str("Connecting"),
            ServiceState::Connected(_) => f.write_str("Connected"),
            ServiceState::Disconnected => f.write_str("Disconnected"),
            ServiceState::Died => f.write_str("Died"),
            ServiceState::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// Binds to the remote service.
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteService>, ServiceError>;
    /// Stream of connectivity transitions, starting from the next change.
    fn connectivity(&self) -> BoxStream<'static, ServiceState>;
}

/// Source of the physical screen size.
pub trait DisplayProbe: Send + Sync {
    fn screen_size(&self) -> ScreenSize;
}

impl DisplayProbe for ScreenSize {
    fn screen_size(&self) -> ScreenSize {
        *self
    }
}

/// The single handle to the remote engine. Holding a [`ServiceLease`] is the
/// mutual-exclusion scope for engine calls.
pub struct EngineHandle {
    connector: Arc<dyn ServiceConnector>,
    lock: Arc<Mutex<()>>,
    timeout: Duration,
}

impl EngineHandle {
    pub fn new(connector: Arc<dyn ServiceConnector>) -> Self {
        Self {
            connector,
            lock: Arc::new(Mutex::new(())),
            timeout: SERVICE_TIMEOUT,
        }
    }

    pub async fn acquire(&self) -> Result<ServiceLease, ServiceError> {
        let guard = self.lock.clone().lock_owned().await;
        let service = tokio::time::timeout(self.timeout, self.connector.connect())
            .await
            .map_err(|_| ServiceError::Timeout(self.timeout))??;
        Ok(ServiceLease {
            service,
            _guard: guard,
        })
    }

    pub fn connectivity(&self) -> BoxStream<'static, ServiceState> {
        self.connector.connectivity()
    }
}

pub struct ServiceLease {
    service: Arc<dyn RemoteService>,
    _guard: OwnedMutexGuard<()>,
}

impl Deref for ServiceLease {
    type Target = dyn RemoteService;

    fn deref(&self) -> &Self::Target {
        self.service.as_ref()
    }
}
