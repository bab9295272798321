//! Error types for the gateway

use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration is missing, malformed or fails validation
    #[error("configuration error: {0}")]
    Config(String),

    /// No endpoints are configured at all
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Request body exceeded the configured cap
    #[error("request body too large")]
    RequestTooLarge,

    /// Outer bearer-auth check failed
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A terminal upstream response (forwarded verbatim to the client)
    #[error("upstream returned terminal status {status}")]
    Upstream { status: u16, body: Vec<u8> },

    /// Every candidate endpoint was exhausted without a success
    #[error("all endpoints exhausted, last attempted: {last_endpoint}")]
    AllEndpointsExhausted { last_endpoint: String },

    /// YAML parsing failure
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error, e.g. reading the config file
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure talking to an upstream endpoint
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Catch-all for conditions that should not normally arise
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::NoEndpoints => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::AllEndpointsExhausted { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Yaml(_) | GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
            GatewayError::Io(_) | GatewayError::Http(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let GatewayError::Upstream { status, body } = self {
            let status = actix_web::http::StatusCode::from_u16(*status)
                .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
            return HttpResponse::build(status).body(body.clone());
        }

        let code = match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::NoEndpoints => "NO_ENDPOINTS",
            GatewayError::RequestTooLarge => "REQUEST_TOO_LARGE",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Upstream { .. } => "UPSTREAM_ERROR",
            GatewayError::AllEndpointsExhausted { .. } => "ALL_ENDPOINTS_EXHAUSTED",
            GatewayError::Yaml(_) => "YAML_ERROR",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Http(_) => "HTTP_CLIENT_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Standard error body shape for JSON responses
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
