//! HTTP listener exposing the orchestrator.

use crate::error::EvaluateError;
use crate::orchestrator::Orchestrator;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Header set when a verdict could not be cached.
pub const CACHE_STATUS_HEADER: &str = "x-analysis-cache";

#[derive(Debug, Deserialize)]
struct EvaluateParams {
    ip: Option<String>,
}

impl IntoResponse for EvaluateError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = json!({
            "error": true,
            "kind": self.kind(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

/// Build the router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/", get(evaluate))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Serve until the listener fails or ctrl-c is received.
pub async fn serve(listener: TcpListener, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "Listening for evaluation requests");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn evaluate(
    State(orchestrator): State<Arc<Orchestrator>>,
    params: Result<Query<EvaluateParams>, QueryRejection>,
) -> Result<Response, EvaluateError> {
    let Query(params) = params.map_err(|e| EvaluateError::InvalidAddress(e.body_text()))?;
    let address = params.ip.unwrap_or_default();
    let evaluation = orchestrator.evaluate(&address).await?;

    let save_failed = evaluation.save_failed();
    let mut response = Json(evaluation.analysis).into_response();
    if save_failed {
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("save-failed"));
    }

    Ok(response)
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "providers": orchestrator.providers().names(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache, ResultCache};
    use crate::providers::{DetectionProvider, ProviderError, ProviderRegistry};
    use crate::record::{AnalysisRecord, Fingerprint, RecommendedAction};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::net::IpAddr;
    use tower::ServiceExt;

    struct ResidentialProvider;

    #[async_trait]
    impl DetectionProvider for ResidentialProvider {
        fn name(&self) -> &str {
            "residential"
        }

        async fn scan(
            &self,
            ip: &IpAddr,
            _previous: Option<&AnalysisRecord>,
        ) -> Result<AnalysisRecord, ProviderError> {
            Ok(AnalysisRecord::new(
                ip.to_string(),
                Fingerprint::Residential,
                RecommendedAction::Whitelist,
                false,
            )
            .with_country(Some("NL".to_string())))
        }
    }

    struct ReadOnlyCache;

    #[async_trait]
    impl ResultCache for ReadOnlyCache {
        async fn get_record(&self, _key: &str) -> Result<String, CacheError> {
            Err(CacheError::RecordNotFound)
        }

        async fn set_record(&self, _key: &str, _value: String) -> Result<(), CacheError> {
            Err(CacheError::SaveFailure("read only".to_string()))
        }

        fn name(&self) -> &str {
            "read-only"
        }
    }

    fn app_with(providers: ProviderRegistry, cache: Arc<dyn ResultCache>) -> Router {
        router(Arc::new(Orchestrator::new(providers, cache)))
    }

    fn app() -> Router {
        app_with(
            ProviderRegistry::new().with(Arc::new(ResidentialProvider)),
            Arc::new(MemoryCache::new(60, 10)),
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap();
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_evaluate_returns_record() {
        let (status, headers, body) = get(app(), "/?ip=1.2.3.4").await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(CACHE_STATUS_HEADER).is_none());
        assert_eq!(body["target_address"], "1.2.3.4");
        assert_eq!(body["fingerprint"], "residential");
        assert_eq!(body["recommended_action"], "whitelist");
        assert_eq!(body["requires_rescan"], false);
        assert_eq!(body["origin_country"], "NL");
    }

    #[tokio::test]
    async fn test_evaluate_invalid_address() {
        let (status, _, body) = get(app(), "/?ip=not-an-ip").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["kind"], "invalid_address");
    }

    #[tokio::test]
    async fn test_evaluate_missing_parameter() {
        let (status, _, body) = get(app(), "/").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_address");
    }

    #[tokio::test]
    async fn test_evaluate_malformed_query_is_json() {
        let (status, _, body) = get(app(), "/?ip=1.2.3.4&ip=5.6.7.8").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["kind"], "invalid_address");
        assert!(body["message"].as_str().unwrap().contains("duplicate field"));
    }

    #[tokio::test]
    async fn test_evaluate_without_providers() {
        let app = app_with(ProviderRegistry::new(), Arc::new(MemoryCache::new(60, 10)));
        let (status, _, body) = get(app, "/?ip=1.2.3.4").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], true);
        assert_eq!(body["kind"], "no_provider_configured");
    }

    #[tokio::test]
    async fn test_evaluate_save_failure_still_answers() {
        let app = app_with(
            ProviderRegistry::new().with(Arc::new(ResidentialProvider)),
            Arc::new(ReadOnlyCache),
        );
        let (status, headers, body) = get(app, "/?ip=1.2.3.4").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(CACHE_STATUS_HEADER).unwrap(), "save-failed");
        assert_eq!(body["fingerprint"], "residential");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = get(app(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"], json!(["residential"]));
    }
}
