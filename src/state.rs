use crate::config::AppConfig;
use crate::gateway::Gateway;
use crate::images::ImageService;
use crate::service::GameService;
use crate::store::RoomStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn RoomStore>,
    pub service: GameService,
    pub gateway: Gateway,
    pub images: Arc<ImageService>,
    ready: AtomicBool,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn RoomStore>, images: ImageService) -> Self {
        Self {
            config,
            service: GameService::new(store.clone()),
            store,
            gateway: Gateway::new(),
            images: Arc::new(images),
            ready: AtomicBool::new(false),
        }
    }

    /// Flip the readiness probe once the store is initialized.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
