use std::sync::Arc;

use cr_domain::config::Config;
use cr_runners::Runner;
use cr_sessions::{CurrentTokenStore, SessionStore};

use crate::dispatch::Dispatcher;

/// Shared application state passed to all API handlers and CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub current: Arc<CurrentTokenStore>,
    pub runner: Arc<dyn Runner>,
    pub dispatcher: Arc<Dispatcher>,
}
