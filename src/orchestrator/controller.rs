//! Engine lifecycle controller.
//!
//! Owns the start/stop handshake with the engine and the callback pump that
//! feeds engine callbacks into the connect handshake and the dispatcher.

use super::{ConnectHandshake, ExecutionStateCell};
use crate::callback::strings::{tr, tr_args};
use crate::callback::CallbackDispatcher;
use crate::engine::{
    CallbackSender, DisplayProbe, EngineHandle, InstanceOption, RawCallback, TOUCH_MODE_ANDROID,
};
use crate::logs::LogAggregator;
use crate::model::{
    ConnectPhase, ExecutionState, InitPhase, LogLevel, RunMode, ScreenSize, SessionStatus,
    StartResult, StopResult, SupervisorConfig, TaskParams, DISPLAY_NONE,
};
use crate::resource::ResourceLoadCoordinator;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Connect-config JSON handed to `async_connect`.
pub fn build_connect_config(width: u32, height: u32, display_id: i32) -> String {
    let mut config = json!({
        "screen_resolution": { "width": width, "height": height },
        "display_id": display_id,
    });
    if display_id != 0 {
        config["force_stop"] = json!(true);
    }
    config.to_string()
}

/// Drives the engine through start and stop.
///
/// `start()` and `stop()` take turns: a `stop()` issued while a `start()` is
/// in flight runs once that start has returned.
pub struct ExecutionOrchestrator {
    engine: Arc<EngineHandle>,
    resources: Arc<ResourceLoadCoordinator>,
    logs: LogAggregator,
    display: Arc<dyn DisplayProbe>,
    run_mode: RunMode,
    connect_timeout: Duration,
    state: ExecutionStateCell,
    handshake: Arc<ConnectHandshake>,
    callbacks: CallbackSender,
    lifecycle: Mutex<()>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionOrchestrator {
    /// Must be called from within a Tokio runtime; spawns the callback pump.
    pub fn new(
        engine: Arc<EngineHandle>,
        resources: Arc<ResourceLoadCoordinator>,
        logs: LogAggregator,
        display: Arc<dyn DisplayProbe>,
        config: &SupervisorConfig,
    ) -> Self {
        let state = ExecutionStateCell::new();
        let handshake = Arc::new(ConnectHandshake::new());
        let (callbacks, callback_rx) = mpsc::unbounded_channel();
        let dispatcher = CallbackDispatcher::new(logs.clone(), state.clone());
        let pump = tokio::spawn(pump_callbacks(callback_rx, handshake.clone(), dispatcher));

        Self {
            engine,
            resources,
            logs,
            display,
            run_mode: config.run_mode,
            connect_timeout: config.connect_timeout,
            state,
            handshake,
            callbacks,
            lifecycle: Mutex::new(()),
            workers: std::sync::Mutex::new(vec![pump]),
        }
    }

    pub fn state(&self) -> &ExecutionStateCell {
        &self.state
    }

    pub fn logs(&self) -> &LogAggregator {
        &self.logs
    }

    /// Mark the run as failed every time the remote service dies.
    pub fn watch_service_died(&self, mut died: mpsc::Receiver<()>) {
        let state = self.state.clone();
        let watcher = tokio::spawn(async move {
            while died.recv().await.is_some() {
                tracing::warn!("remote service died; marking execution as failed");
                state.set(ExecutionState::Error);
            }
        });
        self.lock_workers().push(watcher);
    }

    pub async fn start(&self, tasks: &[TaskParams]) -> StartResult {
        let _turn = self.lifecycle.lock().await;

        self.state.set(ExecutionState::Starting);
        let names = tasks
            .iter()
            .map(|t| t.task_type.as_str().to_string())
            .collect();
        if !self.logs.start_session_and_wait(names).await {
            tracing::warn!("session log could not be opened; continuing without it");
        }
        let starting = tr_args("StartingTasks", &[&tasks.len()]);
        self.logs
            .append_line_and_wait(starting, LogLevel::Info)
            .await;

        if let Err(e) = self.resources.ensure_loaded().await {
            return self.fail(StartResult::ResourceError(Some(e))).await;
        }

        let resolution = match self.run_mode {
            RunMode::Foreground => {
                let screen = self.display.screen_size();
                if screen.is_portrait() {
                    return self.fail(StartResult::PortraitOrientationError).await;
                }
                screen
            }
            RunMode::Background => ScreenSize::default(),
        };

        let service = match self.engine.acquire().await {
            Ok(service) => service,
            Err(e) => return self.fail(StartResult::ResourceError(Some(e.into()))).await,
        };
        let core = service.core();

        if !core.has_instance().await {
            if !core.create_instance(self.callbacks.clone()).await {
                return self
                    .fail(StartResult::InitializationError(InitPhase::CreateInstance))
                    .await;
            }
            if !core
                .set_instance_option(InstanceOption::TouchMode, TOUCH_MODE_ANDROID)
                .await
            {
                return self
                    .fail(StartResult::InitializationError(InitPhase::SetTouchMode))
                    .await;
            }
        }

        if !service
            .set_virtual_display_mode(self.run_mode.display_mode())
            .await
        {
            return self
                .fail(StartResult::ConnectionError(ConnectPhase::DisplayMode))
                .await;
        }
        let display_id = service.start_virtual_display().await;
        if display_id == DISPLAY_NONE {
            return self
                .fail(StartResult::ConnectionError(ConnectPhase::VirtualDisplay))
                .await;
        }

        let config = build_connect_config(resolution.width, resolution.height, display_id);
        let ack = self.handshake.arm();
        core.async_connect("", "Android", &config, false).await;
        let connected = tokio::time::timeout(self.connect_timeout, ack).await;
        self.handshake.clear();
        match connected {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Ok(Err(_)) => {
                tracing::error!("engine rejected the connect request");
                return self
                    .fail(StartResult::ConnectionError(ConnectPhase::MaaConnect))
                    .await;
            }
            Err(_) => {
                tracing::error!(timeout = ?self.connect_timeout, "no connect acknowledgement");
                return self
                    .fail(StartResult::ConnectionError(ConnectPhase::MaaConnect))
                    .await;
            }
        }

        for task in tasks {
            core.append_task(task.task_type.as_str(), &task.params).await;
        }
        if !core.start().await {
            return self.fail(StartResult::StartError).await;
        }

        self.state.set(ExecutionState::Running);
        self.logs
            .append_line_and_wait(tr("TasksRunning"), LogLevel::Success)
            .await;
        let version = core.version().await;
        tracing::info!(%version, tasks = tasks.len(), "engine running");
        StartResult::Success(version)
    }

    pub async fn stop(&self) -> StopResult {
        let _turn = self.lifecycle.lock().await;

        let result = match self.engine.acquire().await {
            Ok(service) => {
                let core = service.core();
                let result = if !core.running().await || core.stop().await {
                    StopResult::Success
                } else {
                    StopResult::Failed
                };
                service.stop_virtual_display().await;
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot reach the remote service to stop the engine");
                StopResult::Failed
            }
        };

        self.state.set(ExecutionState::Idle);
        let (status, level) = match result {
            StopResult::Success => (SessionStatus::Stopped, LogLevel::Info),
            StopResult::Failed => (SessionStatus::StopFailed, LogLevel::Error),
        };
        self.logs
            .append_line(format!("Tasks stopped, status: {status}"), level);
        self.logs.end_session(status);
        result
    }

    /// Record a failed start and hand the result back.
    async fn fail(&self, result: StartResult) -> StartResult {
        self.state.set(ExecutionState::Error);
        tracing::error!(%result, "start failed");
        self.logs
            .append_line_and_wait(result.to_string(), LogLevel::Error)
            .await;
        if let Some(status) = result.session_status() {
            self.logs.end_session_and_wait(status).await;
        }
        result
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ExecutionOrchestrator {
    fn drop(&mut self) {
        for worker in self.lock_workers().drain(..) {
            worker.abort();
        }
    }
}

async fn pump_callbacks(
    mut rx: mpsc::UnboundedReceiver<RawCallback>,
    handshake: Arc<ConnectHandshake>,
    dispatcher: CallbackDispatcher,
) {
    while let Some(callback) = rx.recv().await {
        if handshake.offer(&callback) {
            tracing::debug!("connect handshake resolved");
        }
        dispatcher.dispatch(callback.code, callback.json.as_deref());
    }
}
