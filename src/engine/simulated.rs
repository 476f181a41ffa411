//! In-process stand-in for the remote engine.
//!
//! Implements the service, engine and connector traits with switchable
//! failures, a configurable connect acknowledgement and a callback script
//! replayed after `start`. Used by the CLI demo and by tests.

use super::{
    CallbackSender, EngineCore, InstanceOption, RawCallback, RemoteService, ServiceConnector,
    ServiceState,
};
use crate::error::ServiceError;
use crate::model::{TaskParams, DISPLAY_NONE};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How the simulated engine answers `async_connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAck {
    Accept,
    Reject,
    /// Never answer.
    Silent,
    /// Accept after a delay.
    After(Duration),
}

/// Which calls should report failure.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFailures {
    pub unavailable: bool,
    pub setup: bool,
    pub load_resource: bool,
    pub create_instance: bool,
    pub touch_mode: bool,
    pub display_mode: bool,
    pub virtual_display: bool,
    pub start: bool,
    pub stop: bool,
}

struct Inner {
    failures: Mutex<SimulatedFailures>,
    ack: Mutex<ConnectAck>,
    script: Mutex<Vec<RawCallback>>,
    script_delay: Duration,
    callbacks: Mutex<Option<CallbackSender>>,
    calls: Mutex<Vec<String>>,
    tasks: Mutex<Vec<(String, String)>>,
    running: AtomicBool,
    watchers: Mutex<Vec<mpsc::UnboundedSender<ServiceState>>>,
    display_id: i32,
}

#[derive(Clone)]
pub struct SimulatedEngine {
    inner: Arc<Inner>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                failures: Mutex::new(SimulatedFailures::default()),
                ack: Mutex::new(ConnectAck::Accept),
                script: Mutex::new(Vec::new()),
                script_delay: Duration::from_millis(20),
                callbacks: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                watchers: Mutex::new(Vec::new()),
                display_id: 7,
            }),
        }
    }

    pub fn set_failures(&self, failures: SimulatedFailures) {
        *lock(&self.inner.failures) = failures;
    }

    pub fn set_connect_ack(&self, ack: ConnectAck) {
        *lock(&self.inner.ack) = ack;
    }

    /// Callbacks emitted after a successful `start`.
    pub fn set_script(&self, script: Vec<RawCallback>) {
        *lock(&self.inner.script) = script;
    }

    /// Journal of calls received, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.inner.calls).clone()
    }

    pub fn appended_tasks(&self) -> Vec<(String, String)> {
        lock(&self.inner.tasks).clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        lock(&self.inner.calls)
            .iter()
            .filter(|c| c.split(' ').next() == Some(name))
            .count()
    }

    /// Push a connectivity transition to every subscriber.
    pub fn announce(&self, state: ServiceState) {
        lock(&self.inner.watchers).retain(|tx| tx.send(state.clone()).is_ok());
    }

    pub fn announce_connected(&self) {
        self.announce(ServiceState::Connected(Arc::new(self.clone())));
    }

    /// Simulate the service process dying: the instance is gone.
    pub fn kill(&self) {
        lock(&self.inner.callbacks).take();
        self.inner.running.store(false, Ordering::SeqCst);
        self.announce(ServiceState::Died);
    }

    /// Send a callback on the instance's channel, as the engine would.
    pub fn emit(&self, callback: RawCallback) -> bool {
        match lock(&self.inner.callbacks).as_ref() {
            Some(tx) => tx.send(callback).is_ok(),
            None => false,
        }
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.inner.calls).push(call.into());
    }

    fn fails(&self, pick: impl FnOnce(&SimulatedFailures) -> bool) -> bool {
        pick(&lock(&self.inner.failures))
    }

    /// A plausible callback sequence for running `tasks` to completion.
    pub fn default_script(tasks: &[TaskParams]) -> Vec<RawCallback> {
        let mut script = vec![RawCallback::new(
            2,
            json!({"what": "ScreencapCost", "details": {"min": 12, "avg": 25, "max": 60}})
                .to_string(),
        )];
        for task in tasks {
            let chain = task.task_type.as_str();
            script.push(RawCallback::new(
                10001,
                json!({"taskchain": chain}).to_string(),
            ));
            script.push(RawCallback::new(
                20001,
                json!({"subtask": "ProcessTask", "taskchain": chain,
                       "details": {"task": "StartButton2", "exec_times": 1}})
                .to_string(),
            ));
            script.push(RawCallback::new(
                10002,
                json!({"taskchain": chain}).to_string(),
            ));
        }
        script.push(RawCallback::new(3, json!({"finished_tasks": []}).to_string()));
        script
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn connect_ack(ret: bool) -> RawCallback {
    RawCallback::new(
        4,
        json!({"what": "Connect", "async_call_id": 1, "details": {"ret": ret, "cost": 42}})
            .to_string(),
    )
}

#[async_trait]
impl EngineCore for SimulatedEngine {
    async fn has_instance(&self) -> bool {
        lock(&self.inner.callbacks).is_some()
    }

    async fn create_instance(&self, callbacks: CallbackSender) -> bool {
        self.record("create_instance");
        if self.fails(|f| f.create_instance) {
            return false;
        }
        *lock(&self.inner.callbacks) = Some(callbacks);
        true
    }

    async fn set_instance_option(&self, option: InstanceOption, value: &str) -> bool {
        self.record(format!("set_instance_option {}={value}", option.key()));
        !self.fails(|f| f.touch_mode)
    }

    async fn load_resource(&self, path: &Path) -> bool {
        self.record(format!("load_resource {}", path.display()));
        !self.fails(|f| f.load_resource)
    }

    async fn async_connect(&self, address: &str, protocol: &str, config: &str, _confirm: bool) {
        self.record(format!("async_connect {address}|{protocol}|{config}"));
        let ack = *lock(&self.inner.ack);
        match ack {
            ConnectAck::Accept => {
                self.emit(connect_ack(true));
            }
            ConnectAck::Reject => {
                self.emit(connect_ack(false));
            }
            ConnectAck::Silent => {}
            ConnectAck::After(delay) => {
                let engine = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    engine.emit(connect_ack(true));
                });
            }
        }
    }

    async fn append_task(&self, task_type: &str, params: &str) {
        self.record(format!("append_task {task_type}"));
        lock(&self.inner.tasks).push((task_type.to_string(), params.to_string()));
    }

    async fn start(&self) -> bool {
        self.record("start");
        if self.fails(|f| f.start) {
            return false;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let script = lock(&self.inner.script).clone();
        if !script.is_empty() {
            let engine = self.clone();
            let delay = self.inner.script_delay;
            tokio::spawn(async move {
                for callback in script {
                    tokio::time::sleep(delay).await;
                    engine.emit(callback);
                }
                engine.inner.running.store(false, Ordering::SeqCst);
            });
        }
        true
    }

    async fn stop(&self) -> bool {
        self.record("stop");
        if self.fails(|f| f.stop) {
            return false;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        true
    }

    async fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn version(&self) -> String {
        "v5.0.0-sim".to_string()
    }
}

#[async_trait]
impl RemoteService for SimulatedEngine {
    async fn setup(&self, root: &Path) -> Result<(), ServiceError> {
        self.record(format!("setup {}", root.display()));
        if self.fails(|f| f.setup) {
            return Err(ServiceError::Call("setup failed".into()));
        }
        Ok(())
    }

    fn core(&self) -> &dyn EngineCore {
        self
    }

    async fn set_virtual_display_mode(&self, mode: i32) -> bool {
        self.record(format!("set_virtual_display_mode {mode}"));
        !self.fails(|f| f.display_mode)
    }

    async fn start_virtual_display(&self) -> i32 {
        self.record("start_virtual_display");
        if self.fails(|f| f.virtual_display) {
            DISPLAY_NONE
        } else {
            self.inner.display_id
        }
    }

    async fn stop_virtual_display(&self) {
        self.record("stop_virtual_display");
    }
}

#[async_trait]
impl ServiceConnector for SimulatedEngine {
    async fn connect(&self) -> Result<Arc<dyn RemoteService>, ServiceError> {
        if self.fails(|f| f.unavailable) {
            return Err(ServiceError::Unavailable("service not bound".into()));
        }
        Ok(Arc::new(self.clone()))
    }

    fn connectivity(&self) -> BoxStream<'static, ServiceState> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.watchers).push(tx);
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|s| (s, rx)) }).boxed()
    }
}
