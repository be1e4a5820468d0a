//! HTTP extraction service: fetch one detail page and return its fields.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use url::Url;

use crate::assemble::RecordAssembler;
use crate::config::{FetchConfig, ServerConfig};
use crate::extract::ExtractionEngine;
use crate::fetch::{validate_url, FetchError, HttpFetcher, PageFetcher};
use crate::models::{ExtractRequest, ExtractResponse};
use crate::source::{SourceCatalog, SourceError, SourceProfile};

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<SourceCatalog>,
    fetch: Arc<FetchConfig>,
}

impl AppState {
    pub fn new(catalog: SourceCatalog, fetch: FetchConfig) -> Self {
        Self {
            catalog: Arc::new(catalog),
            fetch: Arc::new(fetch),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources))
        .route("/extract", post(extract_endpoint))
        .with_state(state)
}

pub async fn serve(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("URL host does not belong to source `{0}`")]
    ForeignHost(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Source(SourceError::Unknown(_)) => StatusCode::NOT_FOUND,
            ApiError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ForeignHost(_) | ApiError::Fetch(FetchError::InvalidUrl(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Fetch(FetchError::NotHtml) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Fetch(FetchError::Upstream(_)) | ApiError::Fetch(FetchError::Request(_)) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self {
            ApiError::Fetch(FetchError::Upstream(status)) => {
                format!("Upstream returned an error ({})", status)
            }
            ApiError::Fetch(FetchError::Request(msg)) => format!("Upstream request failed: {}", msg),
            other => other.to_string(),
        };
        (self.status(), Json(json!({"detail": detail}))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn list_sources(State(state): State<AppState>) -> impl IntoResponse {
    let names: Vec<&str> = state.catalog.names().collect();
    Json(json!({"sources": names}))
}

async fn extract_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let source = state.catalog.get(&req.source)?;
    let url = check_target(source, &req.url)?;

    let fetcher = HttpFetcher::new(&state.fetch, &source.session)?;
    Ok(Json(fetch_and_extract(&fetcher, source, url).await?))
}

async fn fetch_and_extract(
    fetcher: &dyn PageFetcher,
    source: &SourceProfile,
    url: Url,
) -> Result<ExtractResponse, FetchError> {
    fetcher.warm_up().await;
    let html = fetcher.fetch(url.as_str()).await?;
    Ok(extract_fields(source, &html, url))
}

/// The URL must be http(s) and on the same host as the source's base URL.
fn check_target(source: &SourceProfile, raw: &str) -> Result<Url, ApiError> {
    let url = validate_url(raw)?;
    let base = source.base()?;
    if url.host_str() != base.host_str() {
        return Err(ApiError::ForeignHost(source.name.clone()));
    }
    Ok(url)
}

fn extract_fields(source: &SourceProfile, html: &str, url: Url) -> ExtractResponse {
    let raw = ExtractionEngine::for_layout(&source.profile).extract_html(html);
    let fields = RecordAssembler::new(source.display_name.clone()).normalize_fields(&raw);
    ExtractResponse {
        source: source.name.clone(),
        source_url: url.to_string(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldKey, SENTINEL};
    use crate::source::{chatpia, dmm_live_chat, madam_live};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_target_must_match_source_host() {
        let source = madam_live();
        assert!(check_target(&source, "https://www.madamlive.tv/profile/1").is_ok());
        assert!(matches!(
            check_target(&source, "https://evil.example/profile/1"),
            Err(ApiError::ForeignHost(_))
        ));
        assert!(matches!(
            check_target(&source, "file:///etc/passwd"),
            Err(ApiError::Fetch(FetchError::InvalidUrl(_)))
        ));
    }

    struct PrimedFetcher {
        warmed: AtomicBool,
    }

    #[async_trait]
    impl PageFetcher for PrimedFetcher {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            if !self.warmed.load(Ordering::SeqCst) {
                return Err(FetchError::Upstream(403));
            }
            Ok(r#"<section class="life-status"><dl><dt>趣味</dt><dd>読書</dd></dl></section>"#
                .to_string())
        }

        async fn warm_up(&self) {
            self.warmed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_extract_warms_session_first() {
        let fetcher = PrimedFetcher {
            warmed: AtomicBool::new(false),
        };
        let source = chatpia();
        let url = check_target(&source, "https://www.chatpia.jp/prof.php?id=1").unwrap();
        let response = fetch_and_extract(&fetcher, &source, url).await.unwrap();
        assert_eq!(response.fields[&FieldKey::Hobby], "読書");
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            ApiError::Source(SourceError::Unknown("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ForeignHost("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Fetch(FetchError::NotHtml).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Fetch(FetchError::Upstream(503)).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_extract_fields_normalized() {
        let html = r#"<table class="cg-data-set">
            <tr><th>年齢</th><td>24歳</td></tr>
            <tr><th>身長</th><td>：165cm</td></tr>
            <tr><th>タイプ</th><td>年上</td></tr>
        </table>"#;
        let source = dmm_live_chat();
        let url = Url::parse("https://www.dmm.co.jp/live/chat/-/character/=/id=1/").unwrap();
        let response = extract_fields(&source, html, url);

        assert_eq!(response.source, "dmm-live-chat");
        assert_eq!(response.fields.len(), FieldKey::ALL.len());
        assert_eq!(response.fields[&FieldKey::Age], "24");
        assert_eq!(response.fields[&FieldKey::Height], "165cm");
        assert_eq!(response.fields[&FieldKey::FavoriteType], "年上");
        assert_eq!(response.fields[&FieldKey::Hobby], SENTINEL);
        assert_eq!(response.fields[&FieldKey::Genre], "FANZA Live Chat");
    }
}
