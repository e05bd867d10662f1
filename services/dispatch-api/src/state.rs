use std::sync::{Mutex, MutexGuard};

use skyhaul_core::Config;
use skyhaul_fleet::{EntityStore, FleetError};

use crate::error::ApiError;

pub struct AppState {
    pub config: Config,
    store: Mutex<EntityStore>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, FleetError> {
        let store = if config.is_in_memory() {
            EntityStore::open_in_memory()?
        } else {
            EntityStore::open(&config.database.path)?
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: EntityStore) -> Self {
        AppState {
            config,
            store: Mutex::new(store),
        }
    }

    /// Exclusive access to the store for the duration of one request
    pub fn store(&self) -> Result<MutexGuard<'_, EntityStore>, ApiError> {
        self.store
            .lock()
            .map_err(|_| ApiError::internal("entity store lock poisoned"))
    }
}
