//! Cross-cutting helpers shared by the config, core and server layers.

pub mod error;
pub mod logging;

pub use error::{GatewayError, Result};
