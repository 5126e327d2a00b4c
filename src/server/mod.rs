//! Listening, admission and the shared state every connection sees.

pub mod admission;
pub mod listener;
pub mod socket;

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::handler::HandlerRegistry;
use crate::http::body::ReadSettings;

pub use listener::Server;

/// Read-only state shared by all connections of one server.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub handlers: Arc<HandlerRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub read_settings: ReadSettings,
}
