//! Remote service connectivity watcher.

use crate::engine::ServiceState;
use crate::model::RunMode;
use crate::resource::ResourceLoadCoordinator;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reacts to connectivity transitions of the remote service on one task, so
/// transitions are handled in the order they were reported.
///
/// When the service dies the resource state is reset and a died signal is
/// raised. At most one signal is pending; repeats before it is consumed are
/// folded into it.
pub struct ConnectionHealthMonitor {
    worker: JoinHandle<()>,
}

impl ConnectionHealthMonitor {
    pub fn spawn(
        connectivity: BoxStream<'static, ServiceState>,
        resources: Arc<ResourceLoadCoordinator>,
        run_mode: RunMode,
    ) -> (Self, mpsc::Receiver<()>) {
        let (died_tx, died_rx) = mpsc::channel(1);
        let worker = tokio::spawn(watch(connectivity, resources, run_mode, died_tx));
        (Self { worker }, died_rx)
    }
}

impl Drop for ConnectionHealthMonitor {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn watch(
    mut connectivity: BoxStream<'static, ServiceState>,
    resources: Arc<ResourceLoadCoordinator>,
    run_mode: RunMode,
    died: mpsc::Sender<()>,
) {
    while let Some(state) = connectivity.next().await {
        match state {
            ServiceState::Connecting => tracing::debug!("remote service connecting"),
            ServiceState::Connected(service) => {
                tracing::info!(?run_mode, "remote service connected");
                if !service
                    .set_virtual_display_mode(run_mode.display_mode())
                    .await
                {
                    tracing::warn!(?run_mode, "failed to apply display mode");
                }
                // Failures are recorded in the resource state.
                let _ = resources.load().await;
            }
            ServiceState::Disconnected => {
                tracing::info!("remote service disconnected");
                resources.reset();
            }
            ServiceState::Died => {
                tracing::error!("remote service died");
                resources.reset();
                signal(&died);
            }
            ServiceState::Error(msg) => {
                tracing::error!(error = %msg, "remote service error");
                resources.reset();
                signal(&died);
            }
        }
    }
    tracing::debug!("connectivity stream ended");
}

fn signal(died: &mpsc::Sender<()>) {
    // Full means a signal is already pending.
    let _ = died.try_send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineHandle, ServiceConnector, SimulatedEngine};
    use crate::model::ResourceLoadState;
    use std::time::Duration;

    fn setup(engine: &SimulatedEngine) -> (ConnectionHealthMonitor, mpsc::Receiver<()>, Arc<ResourceLoadCoordinator>) {
        let handle = Arc::new(EngineHandle::new(Arc::new(engine.clone())));
        let resources = Arc::new(ResourceLoadCoordinator::new(handle, "/res"));
        let (monitor, died) =
            ConnectionHealthMonitor::spawn(engine.connectivity(), resources.clone(), RunMode::Background);
        (monitor, died, resources)
    }

    #[tokio::test]
    async fn connected_applies_display_mode_then_loads() {
        let engine = SimulatedEngine::new();
        let (_monitor, _died, resources) = setup(&engine);
        let mut state = resources.subscribe();

        engine.announce_connected();
        state
            .wait_for(|s| *s == ResourceLoadState::Ready)
            .await
            .unwrap();

        let calls = engine.calls();
        let mode = calls
            .iter()
            .position(|c| c == "set_virtual_display_mode 1")
            .unwrap();
        let load = calls
            .iter()
            .position(|c| c.starts_with("load_resource"))
            .unwrap();
        assert!(mode < load);
    }

    #[tokio::test]
    async fn died_signals_coalesce() {
        let engine = SimulatedEngine::new();
        let (_monitor, mut died, resources) = setup(&engine);
        resources.load().await.unwrap();

        engine.kill();
        engine.announce(ServiceState::Error("binder gone".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(resources.state(), ResourceLoadState::NotLoaded);
        assert!(died.recv().await.is_some());
        assert!(died.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_resets_without_signalling() {
        let engine = SimulatedEngine::new();
        let (_monitor, mut died, resources) = setup(&engine);
        resources.load().await.unwrap();

        engine.announce(ServiceState::Connecting);
        engine.announce(ServiceState::Disconnected);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(resources.state(), ResourceLoadState::NotLoaded);
        assert!(died.try_recv().is_err());
    }
}
