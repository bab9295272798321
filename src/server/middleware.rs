//! Outer bearer-auth middleware, built on actix-web's Transform/Service
//! pair for request-time middleware. Checks the caller's own
//! `Authorization: Bearer <token>` against `auth.token` before the request
//! reaches the proxy route; this is distinct from (and runs before) the
//! per-endpoint bearer overlay the core applies to the upstream request.

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::web;
use futures_util::future::{ready, LocalBoxFuture, Ready};

use crate::server::state::AppState;
use crate::utils::error::GatewayError;

const PUBLIC_PATHS: &[&str] = &["/health", "/health/detailed", "/metrics"];

pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService { service }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if PUBLIC_PATHS.contains(&req.path()) {
            return Box::pin(self.service.call(req));
        }

        let state = req.app_data::<web::Data<AppState>>().cloned();
        let auth_header = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let Some(state) = state else {
            return Box::pin(self.service.call(req));
        };

        if !state.config.auth.enabled {
            return Box::pin(self.service.call(req));
        }

        let expected = state.config.auth.token.clone().unwrap_or_default();
        let presented = auth_header
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .unwrap_or("");

        if presented == expected && !expected.is_empty() {
            Box::pin(self.service.call(req))
        } else {
            Box::pin(async move {
                Err(GatewayError::Unauthorized("missing or invalid bearer token".into()).into())
            })
        }
    }
}
