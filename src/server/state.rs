//! Shared application state handed to every actix-web handler.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::core::GatewayCore;

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<GatewayCore>,
    pub config: Arc<GatewayConfig>,
}
