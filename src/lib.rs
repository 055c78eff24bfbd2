pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod fallback;
pub mod keycheck;
pub mod platform;
pub mod poll;

use std::sync::Arc;
use config::Config;
use fallback::ActiveJobs;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// In-flight fallback conversions, deduplicated across requests.
    pub active_jobs: ActiveJobs,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            config: Arc::new(config),
            active_jobs: fallback::new_active_jobs(),
        }
    }
}
