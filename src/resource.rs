//! Engine resource loading.

use crate::engine::EngineHandle;
use crate::error::ResourceError;
use crate::model::ResourceLoadState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Makes sure the engine has its resource files loaded before tasks run.
///
/// Loads are serialized; the state check and the transition to `Loading`
/// happen inside the same critical section.
pub struct ResourceLoadCoordinator {
    engine: Arc<EngineHandle>,
    root_dir: PathBuf,
    state: watch::Sender<ResourceLoadState>,
    load_lock: Mutex<()>,
}

impl ResourceLoadCoordinator {
    pub fn new(engine: Arc<EngineHandle>, root_dir: impl Into<PathBuf>) -> Self {
        let (state, _) = watch::channel(ResourceLoadState::NotLoaded);
        Self {
            engine,
            root_dir: root_dir.into(),
            state,
            load_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ResourceLoadState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceLoadState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), ResourceLoadState::Ready)
    }

    /// Load resources unless already loaded.
    pub async fn load(&self) -> Result<(), ResourceError> {
        let _guard = self.load_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        self.state.send_replace(ResourceLoadState::loading());

        match self.load_inner().await {
            Ok(()) => {
                tracing::info!(root = %self.root_dir.display(), "engine resources loaded");
                self.state.send_replace(ResourceLoadState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "engine resource load failed");
                self.state.send_replace(ResourceLoadState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn load_inner(&self) -> Result<(), ResourceError> {
        let service = self.engine.acquire().await?;
        service.setup(&self.root_dir).await?;
        if service.core().load_resource(&self.root_dir).await {
            Ok(())
        } else {
            Err(ResourceError::LoadFailed)
        }
    }

    /// Succeed if resources are usable now, loading them if nobody else is.
    ///
    /// While another load is in flight this samples the state once and
    /// returns without waiting for it.
    pub async fn ensure_loaded(&self) -> Result<(), ResourceError> {
        match self.state() {
            ResourceLoadState::Ready => Ok(()),
            ResourceLoadState::Loading(_) | ResourceLoadState::Reloading(_) => {
                match self.state() {
                    ResourceLoadState::Ready => Ok(()),
                    ResourceLoadState::Failed(msg) => Err(ResourceError::Failed(msg)),
                    _ => Err(ResourceError::NotLoaded),
                }
            }
            ResourceLoadState::NotLoaded | ResourceLoadState::Failed(_) => self.load().await,
        }
    }

    pub fn reset(&self) {
        self.state.send_replace(ResourceLoadState::NotLoaded);
    }

    /// Resource files changed on disk. `load()` moves this to `Loading`.
    pub fn mark_reloading(&self) {
        self.state.send_replace(ResourceLoadState::reloading());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        RemoteService, ServiceConnector, ServiceState, SimulatedEngine, SimulatedFailures,
    };
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Holds `connect()` until the test opens the gate.
    struct Gated {
        engine: SimulatedEngine,
        open: Arc<Notify>,
    }

    #[async_trait]
    impl ServiceConnector for Gated {
        async fn connect(&self) -> Result<Arc<dyn RemoteService>, ServiceError> {
            self.open.notified().await;
            self.engine.connect().await
        }

        fn connectivity(&self) -> BoxStream<'static, ServiceState> {
            self.engine.connectivity()
        }
    }

    fn coordinator(engine: &SimulatedEngine) -> ResourceLoadCoordinator {
        let handle = Arc::new(EngineHandle::new(Arc::new(engine.clone())));
        ResourceLoadCoordinator::new(handle, "/res")
    }

    #[tokio::test]
    async fn load_is_idempotent_once_ready() {
        let engine = SimulatedEngine::new();
        let resources = coordinator(&engine);
        resources.load().await.unwrap();
        resources.load().await.unwrap();
        resources.ensure_loaded().await.unwrap();
        assert!(resources.is_ready());
        assert_eq!(engine.call_count("load_resource"), 1);
        assert_eq!(engine.call_count("setup"), 1);
    }

    #[tokio::test]
    async fn failed_load_records_the_message() {
        let engine = SimulatedEngine::new();
        engine.set_failures(SimulatedFailures {
            load_resource: true,
            ..Default::default()
        });
        let resources = coordinator(&engine);
        assert_eq!(resources.load().await, Err(ResourceError::LoadFailed));
        assert_eq!(
            resources.state(),
            ResourceLoadState::Failed(ResourceError::LoadFailed.to_string())
        );

        engine.set_failures(SimulatedFailures::default());
        resources.ensure_loaded().await.unwrap();
        assert!(resources.is_ready());
    }

    #[tokio::test]
    async fn unavailable_service_fails_the_load() {
        let engine = SimulatedEngine::new();
        engine.set_failures(SimulatedFailures {
            unavailable: true,
            ..Default::default()
        });
        let resources = coordinator(&engine);
        assert!(matches!(
            resources.load().await,
            Err(ResourceError::Service(_))
        ));
        assert!(matches!(resources.state(), ResourceLoadState::Failed(_)));
    }

    #[tokio::test]
    async fn ensure_loaded_does_not_wait_for_an_in_flight_load() {
        let engine = SimulatedEngine::new();
        let resources = coordinator(&engine);
        resources.mark_reloading();
        assert_eq!(
            resources.ensure_loaded().await,
            Err(ResourceError::NotLoaded)
        );
        assert_eq!(engine.call_count("load_resource"), 0);

        resources.load().await.unwrap();
        assert!(resources.is_ready());
    }

    #[tokio::test]
    async fn reload_reports_loading_while_in_flight() {
        let engine = SimulatedEngine::new();
        let open = Arc::new(Notify::new());
        let connector = Gated {
            engine: engine.clone(),
            open: open.clone(),
        };
        let handle = Arc::new(EngineHandle::new(Arc::new(connector)));
        let resources = Arc::new(ResourceLoadCoordinator::new(handle, "/res"));
        resources.mark_reloading();

        let mut rx = resources.subscribe();
        let loader = {
            let resources = resources.clone();
            tokio::spawn(async move { resources.load().await })
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| matches!(s, ResourceLoadState::Loading(_))),
        )
        .await
        .expect("reload never reported Loading")
        .unwrap();

        open.notify_one();
        loader.await.unwrap().unwrap();
        assert!(resources.is_ready());
        assert_eq!(engine.call_count("load_resource"), 1);
    }

    #[tokio::test]
    async fn reset_forgets_readiness() {
        let engine = SimulatedEngine::new();
        let resources = coordinator(&engine);
        let mut rx = resources.subscribe();
        resources.load().await.unwrap();
        rx.changed().await.unwrap();
        resources.reset();
        assert_eq!(resources.state(), ResourceLoadState::NotLoaded);
        resources.ensure_loaded().await.unwrap();
        assert_eq!(engine.call_count("load_resource"), 2);
    }
}
