//! Shared state for handlers: the store, the read-only registry and settings.

use crate::config::{EngineSettings, SchemaRegistry};
use crate::query::QueryComposer;
use crate::service::CrudService;
use crate::store::StorageAdapter;
use std::sync::Arc;

pub struct AppState<S: ?Sized> {
    pub store: Arc<S>,
    /// Built once at startup; never mutated.
    pub registry: Arc<SchemaRegistry>,
    pub settings: Arc<EngineSettings>,
}

impl<S: ?Sized> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S: StorageAdapter + ?Sized> AppState<S> {
    pub fn new(store: Arc<S>, registry: SchemaRegistry, settings: EngineSettings) -> Self {
        AppState {
            store,
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        }
    }

    pub fn crud(&self) -> CrudService<S> {
        CrudService::new(Arc::clone(&self.store))
    }

    pub fn composer(&self) -> QueryComposer<'_> {
        QueryComposer::new(&self.registry).with_max_depth(self.settings.max_include_depth)
    }
}
