use std::future::Future;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowMethods, AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, warn};

use crate::auth;
use crate::config::{CorsWhitelist, ServerConfig};
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let server = state.config.server.clone();
    Router::new()
        .route("/ping", get(auth::handlers::ping))
        .merge(auth::router())
        .with_state(state)
        .layer(middleware::from_fn(supervise))
        .layer(TimeoutLayer::new(server.request_timeout))
        .layer(cors_layer(&server))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = res.status();
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

/// Last line of defence for every request: whatever produced a 5xx, the client
/// only ever sees an opaque body.
async fn supervise(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;

    let status = response.status();
    if status.is_server_error() {
        error!(%method, %uri, %status, "request failed");
        return (status, "Internal server error").into_response();
    }
    response
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let methods: Vec<Method> = server
        .cors_allowed_methods
        .iter()
        .filter_map(|m| match m.parse::<Method>() {
            Ok(method) => Some(method),
            Err(_) => {
                warn!(method = %m, "ignoring invalid CORS method");
                None
            }
        })
        .collect();

    match &server.cors_whitelist {
        // Credentials are never allowed together with a wildcard origin.
        CorsWhitelist::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(AllowMethods::list(methods))
            .allow_headers([header::CONTENT_TYPE]),
        CorsWhitelist::Origins(origins) if origins.is_empty() => CorsLayer::new(),
        CorsWhitelist::Origins(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        warn!(origin = %o, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(AllowMethods::list(methods))
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true)
        }
    }
}

pub async fn serve<F>(app: Router, server: &ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = server.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
