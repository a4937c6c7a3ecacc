//! Application state shared by HTTP handlers.

use crate::dispatcher::Dispatcher;
use crate::upload::UploadPipeline;
use secstore_core::Config;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
    pub uploads: Arc<UploadPipeline>,
    /// Bearer key required on `POST /commands`, when configured.
    pub service_api_key: Option<String>,
}
