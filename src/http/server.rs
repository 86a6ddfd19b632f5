//! Config RPC front door.
//!
//! # Responsibilities
//! - Create the Axum router for `POST /config/v1/resolve`
//! - Wire up middleware (request id, tracing)
//! - Hand each request to `ProxyServer::resolve_config` and wait for its one reply
//!
//! # Design Decisions
//! - The handler awaits a oneshot, never the proxy: parking costs no thread
//! - A reply is bounded by the client timeout plus two sweep intervals;
//!   past that, or if the proxy drops the request at shutdown, answer 503

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::request::{ResolveRequest, RESOLVE_PATH, X_REQUEST_ID};
use crate::lifecycle::signalled;
use crate::protocol::ConfigRequest;
use crate::server::ProxyServer;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyServer>,
    /// Extra wait past the client timeout for the sweeper to answer.
    pub reply_slack: Duration,
}

/// HTTP server for config requests.
pub struct RpcServer {
    router: Router,
}

impl RpcServer {
    pub fn new(proxy: Arc<ProxyServer>) -> Self {
        let reply_slack = Duration::from_millis(proxy.config().sweeper.interval_ms.saturating_mul(2));
        let state = AppState { proxy, reply_slack };
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route(&format!("/{}", RESOLVE_PATH), post(resolve_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the shutdown signal, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Config RPC server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signalled(shutdown))
            .await?;

        tracing::info!("Config RPC server stopped");
        Ok(())
    }
}

async fn resolve_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Undecodable resolve request");
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    let http_request_id = headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let (request, rx) =
        ConfigRequest::new(body.key(), body.generation, body.checksum.clone(), body.timeout());
    tracing::debug!(
        http_request_id = %http_request_id,
        request_id = %request.id(),
        key = %request.key(),
        generation = body.generation,
        timeout_ms = body.timeout_ms,
        "Resolving config"
    );

    if let Some(answer) = state.proxy.resolve_config(&request) {
        request.respond(&answer);
    }
    drop(request);

    match tokio::time::timeout(body.timeout() + state.reply_slack, rx).await {
        Ok(Ok(reply)) => Json(reply).into_response(),
        Ok(Err(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Config proxy is shutting down").into_response()
        }
        Err(_) => {
            tracing::warn!(
                http_request_id = %http_request_id,
                timeout_ms = body.timeout_ms,
                "No answer to config request before deadline"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "No answer before deadline").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::protocol::{ConfigKey, ConfigReply, ErrorCode, RawConfig};
    use crate::source::ChannelUpstream;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn server(mode: &str) -> (Arc<ProxyServer>, RpcServer) {
        let config = ProxyConfig {
            mode: mode.to_string(),
            ..ProxyConfig::default()
        };
        let proxy = Arc::new(ProxyServer::new(config, Arc::new(ChannelUpstream::new())).unwrap());
        let server = RpcServer::new(proxy.clone());
        (proxy, server)
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/config/v1/resolve")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn reply(response: Response) -> ConfigReply {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_cached_answer() {
        let (proxy, server) = server("default");
        let key = ConfigKey::new("sentinel", "cloud.config", "", "hosts/foo");
        proxy.cache().update(RawConfig::new(key, 4, "c4", "four"));

        let response = server
            .router()
            .oneshot(post(
                r#"{"def_name":"sentinel","def_namespace":"cloud.config","config_id":"hosts/foo","generation":3,"checksum":"c3"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
        assert_eq!(
            reply(response).await,
            ConfigReply::Changed {
                generation: 4,
                checksum: "c4".to_string(),
                payload: "four".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_key_is_error_reply() {
        let (_proxy, server) = server("default");
        let response = server
            .router()
            .oneshot(post(r#"{"def_name":"9lives","config_id":"x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        match reply(response).await {
            ConfigReply::Error { code, .. } => assert_eq!(code, ErrorCode::IllegalDefinition),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_body_is_bad_request() {
        let (_proxy, server) = server("default");
        let response = server.router().oneshot(post("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_timeout_past_u32_is_bad_request() {
        let (proxy, server) = server("default");
        let response = server
            .router()
            .oneshot(post(
                r#"{"def_name":"sentinel","config_id":"hosts/foo","timeout_ms":18446744073709551615}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(proxy.registry().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_request_is_unavailable() {
        let (proxy, server) = server("default");
        let router = server.router();
        let call = tokio::spawn(async move {
            router
                .oneshot(post(r#"{"def_name":"sentinel","config_id":"hosts/foo","timeout_ms":60000}"#))
                .await
                .unwrap()
        });

        while proxy.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        proxy.registry().cancel_all();
        assert_eq!(call.await.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
