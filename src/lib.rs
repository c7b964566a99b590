pub mod appresult;
pub mod chat;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod message;

use std::sync::Arc;

use axum::extract::FromRef;

pub use appresult::{AppError, AppResult};

use chat::BroadcasterHandle;
use domain::Registry;
use message::HistoryStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub history: Arc<dyn HistoryStore>,
    pub broadcaster: BroadcasterHandle,
}
