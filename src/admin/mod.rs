//! Administrative HTTP API.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.
//!
//! | route | action |
//! |---|---|
//! | `GET /admin/status` | ping and statistics |
//! | `GET /admin/mode`, `PUT /admin/mode` | read or switch mode |
//! | `GET /admin/sources`, `PUT /admin/sources` | read or replace sources (flushes) |
//! | `GET /admin/cache[?full=true]` | list cached configs |
//! | `POST /admin/cache/invalidate` | clear the cache |
//! | `POST /admin/cache/dump` | write the cache to a JSON file |

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::signalled;
use crate::server::ProxyServer;

const ADMIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AdminState {
    pub proxy: Arc<ProxyServer>,
    pub api_key: Arc<str>,
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/mode", get(get_mode).put(put_mode))
        .route("/admin/sources", get(get_sources).put(put_sources))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/invalidate", post(post_invalidate))
        .route("/admin/cache/dump", post(post_dump))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(TimeoutLayer::new(ADMIN_REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

/// Admin API listener.
pub struct AdminServer {
    router: Router,
}

impl AdminServer {
    pub fn new(proxy: Arc<ProxyServer>) -> Self {
        let api_key: Arc<str> = Arc::from(proxy.config().admin.api_key.as_str());
        Self {
            router: setup_admin_router(AdminState { proxy, api_key }),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %listener.local_addr()?, "Admin API starting");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(signalled(shutdown))
            .await?;
        tracing::info!("Admin API stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::protocol::{ConfigKey, RawConfig};
    use crate::server::Mode;
    use crate::source::ChannelUpstream;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn admin() -> (Arc<ProxyServer>, Router) {
        let mut config = ProxyConfig::default();
        config.admin.api_key = "secret".to_string();
        let proxy = Arc::new(ProxyServer::new(config, Arc::new(ChannelUpstream::new())).unwrap());
        let router = AdminServer::new(proxy.clone()).router();
        (proxy, router)
    }

    fn request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", "Bearer secret");
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_api_key() {
        let (_proxy, router) = admin();
        let response = router
            .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status() {
        let (_proxy, router) = admin();
        let response = router.oneshot(request("GET", "/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["mode"], "default");
        assert_eq!(body["cache_entries"], 0);
        assert_eq!(body["active_source"], "in-process");
    }

    #[tokio::test]
    async fn test_switch_mode() {
        let (proxy, router) = admin();
        let response = router
            .clone()
            .oneshot(request("PUT", "/admin/mode", Some(r#"{"mode":"memorycache"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["changed"], true);
        assert_eq!(proxy.get_mode(), Mode::MemoryCache);

        let response = router
            .oneshot(request("PUT", "/admin/mode", Some(r#"{"mode":"turbo"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_sources() {
        let (proxy, router) = admin();
        let response = router
            .clone()
            .oneshot(request("PUT", "/admin/sources", Some(r#"{"sources":["tcp/cfg1:19070"]}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(proxy.configured_sources().specs(), ["tcp/cfg1:19070".to_string()]);

        let response = router
            .oneshot(request("PUT", "/admin/sources", Some(r#"{"sources":[]}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_invalidate_and_dump_cache() {
        let (proxy, router) = admin();
        let key = ConfigKey::new("sentinel", "cloud.config", "", "hosts/foo");
        proxy.cache().update(RawConfig::new(key, 3, "c3", "three"));

        let body = json(router.clone().oneshot(request("GET", "/admin/cache", None)).await.unwrap()).await;
        assert_eq!(body[0]["generation"], 3);
        assert!(body[0].get("payload").is_none());

        let body = json(
            router
                .clone()
                .oneshot(request("GET", "/admin/cache?full=true", None))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body[0]["payload"], "three");

        let path = std::env::temp_dir().join(format!("config-proxy-dump-{}.json", uuid::Uuid::new_v4()));
        let dump = format!(r#"{{"path":{}}}"#, serde_json::to_string(&path).unwrap());
        let response = router
            .clone()
            .oneshot(request("POST", "/admin/cache/dump", Some(&dump)))
            .await
            .unwrap();
        assert_eq!(json(response).await["entries"], 1);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);

        let response = router
            .oneshot(request("POST", "/admin/cache/invalidate", None))
            .await
            .unwrap();
        assert_eq!(json(response).await["cleared"], 1);
        assert!(proxy.cache().is_empty());
    }
}
