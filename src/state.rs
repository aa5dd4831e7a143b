use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::dispatcher::SessionHandle;
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::observability::metrics::Metrics;
use crate::service::memory::InMemoryBackend;

pub struct AppState {
    pub backend: Arc<InMemoryBackend>,
    pub sessions: DashMap<Uuid, SessionHandle>,
    pub metrics: Arc<Metrics>,
    session_queue_size: usize,
    event_buffer_size: usize,
}

impl AppState {
    pub fn new(backend: Arc<InMemoryBackend>, config: &Config) -> Self {
        Self {
            backend,
            sessions: DashMap::new(),
            metrics: Arc::new(Metrics::new()),
            session_queue_size: config.session_queue_size,
            event_buffer_size: config.event_buffer_size,
        }
    }

    pub async fn open_session(&self, user: Identity) -> SessionHandle {
        let handle = SessionHandle::spawn(
            self.backend.clone(),
            user,
            self.metrics.clone(),
            self.session_queue_size,
            self.event_buffer_size,
        )
        .await;
        self.sessions.insert(handle.id(), handle.clone());
        handle
    }

    pub fn session(&self, id: Uuid) -> Result<SessionHandle, AppError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }

    pub fn close_session(&self, id: Uuid) -> Result<(), AppError> {
        self.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }
}
