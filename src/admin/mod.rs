//! Admin API for runtime route management.
//!
//! Every endpoint requires `Authorization: Bearer <api_key>`.
//!
//! | Method | Path            | Body                                |
//! |--------|-----------------|-------------------------------------|
//! | GET    | /admin/status   |                                     |
//! | GET    | /admin/routes   |                                     |
//! | POST   | /admin/routes   | `{source, target, options?}`        |
//! | DELETE | /admin/routes   | `{source, target?}`                 |

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::Shutdown;
use crate::proxy::ReverseProxy;

#[derive(Clone)]
pub struct AdminState {
    pub proxy: Arc<ReverseProxy>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route(
            "/admin/routes",
            get(get_routes).post(register_route).delete(unregister_route),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve_admin(listener: TcpListener, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown.signalled())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyOptions;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        AdminState {
            proxy: Arc::new(ReverseProxy::new(ProxyOptions::default())),
            api_key: Arc::from("secret"),
        }
    }

    fn request(method: Method, body: Option<serde_json::Value>, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/admin/routes");
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_requires_api_key() {
        let app = setup_admin_router(state());
        let response = app.clone().oneshot(request(Method::GET, None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request(Method::GET, None, Some("wrong"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_list_unregister() {
        let state = state();
        let app = setup_admin_router(state.clone());

        let body = serde_json::json!({ "source": "example.com/api", "target": "127.0.0.1:3000" });
        let response = app
            .clone()
            .oneshot(request(Method::POST, Some(body), Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(state.proxy.routing().lookup("example.com", "/api/x").is_some());

        let response = app
            .clone()
            .oneshot(request(Method::GET, None, Some("secret")))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let routes: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(routes[0]["host"], "example.com");
        assert_eq!(routes[0]["path"], "/api");

        let body = serde_json::json!({ "source": "example.com/api" });
        let response = app
            .oneshot(request(Method::DELETE, Some(body), Some("secret")))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let outcome: UnregisterResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            outcome,
            UnregisterResponse {
                removed: 1,
                host_emptied: true
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_registration_is_bad_request() {
        let app = setup_admin_router(state());
        let body = serde_json::json!({ "source": "example.com", "target": "http://bad host" });
        let response = app
            .oneshot(request(Method::POST, Some(body), Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
