use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sitesearch_core::{Error, Indexer, IndexStore, PageData, SearchConfig, SearchRequest, Searcher};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: usize,
    pub per_page: Option<usize>,
    #[serde(default, rename = "or")]
    pub or_search: Option<bool>,
    pub fuzzy: Option<bool>,
    pub pid: Option<u64>,
}
fn default_page() -> usize { 1 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub page: usize,
    pub per_page: usize,
    pub results: Vec<HitView>,
}

#[derive(Serialize)]
pub struct HitView {
    pub doc_id: u64,
    pub relevance: f64,
    pub title: String,
    pub url: String,
    pub matches: Vec<String>,
    pub highlights: Vec<String>,
    pub snippet: Option<String>,
}

#[derive(Deserialize)]
pub struct RemoveRequest {
    pub url: String,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IndexStore>,
    pub indexer: Arc<Indexer>,
    pub searcher: Arc<Searcher>,
    pub config: Arc<SearchConfig>,
    pub admin_token: Option<String>,
    /// Index writes assume a single writer per document; serialize them.
    pub write_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: Arc<dyn IndexStore>, config: SearchConfig, admin_token: Option<String>) -> Self {
        Self {
            indexer: Arc::new(Indexer::new(store.clone())),
            searcher: Arc::new(Searcher::new(store.clone())),
            store,
            config: Arc::new(config),
            admin_token,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Run index work on the blocking pool; sled calls block the calling thread.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> sitesearch_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(outcome) => outcome.map_err(internal),
        Err(err) => {
            tracing::error!(error = %err, "index task failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "index task failed"))
        }
    }
}

fn internal(err: Error) -> ApiError {
    match err {
        Error::EmptyQuery => api_error(StatusCode::BAD_REQUEST, "empty query"),
        other => {
            tracing::error!(error = %other, "request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/index", post(index_handler))
        .route("/remove", post(remove_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let per_page = state.config.page_size(params.per_page);
    let page = params.page.max(1);

    let mut request = SearchRequest::from_config(params.q.clone(), &state.config);
    if let Some(or_search) = params.or_search {
        request = request.or_search(or_search);
    }
    if let Some(fuzzy) = params.fuzzy {
        request = request.fuzzy(fuzzy);
    }
    if let Some(pid) = params.pid {
        request = request.with_pids(vec![pid]);
    }

    let searcher = state.searcher.clone();
    let (total_hits, hits) = blocking(move || {
        let mut result = searcher.search(&request)?;
        // anonymous visitors only see public pages
        result.apply_filter(|doc| !doc.protected)?;
        let hits = result.results(per_page, (page - 1) * per_page)?;
        Ok((result.count(), hits))
    })
    .await?;

    let results = hits
        .into_iter()
        .map(|hit| HitView {
            snippet: snippet(&hit.document.text, &hit.highlights),
            doc_id: hit.document.id,
            relevance: hit.relevance,
            title: hit.document.title,
            url: hit.document.url,
            matches: hit.matches,
            highlights: hit.highlights,
        })
        .collect();

    Ok(Json(SearchResponse { query: params.q, took_s: start.elapsed().as_secs_f64(), total_hits, page, per_page, results }))
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<u64>) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.store.clone();
    match blocking(move || store.document(doc_id)).await? {
        Some(doc) if !doc.protected => Ok(Json(serde_json::json!({
            "doc_id": doc.id,
            "title": doc.title,
            "url": doc.url,
            "language": doc.language,
            "filesize": doc.filesize,
            "text": doc.text,
        }))),
        _ => Err(api_error(StatusCode::NOT_FOUND, "not found")),
    }
}

async fn index_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(page): Json<PageData>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let url = page.url.clone();
    let (indexer, write_lock) = (state.indexer.clone(), state.write_lock.clone());
    let indexed = blocking(move || {
        let _guard = write_lock.lock();
        indexer.index_page(&page)
    })
    .await?;
    Ok(Json(serde_json::json!({ "url": url, "indexed": indexed })))
}

async fn remove_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RemoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let url = body.url;
    let (indexer, write_lock, target) = (state.indexer.clone(), state.write_lock.clone(), url.clone());
    let removed = blocking(move || {
        let _guard = write_lock.lock();
        indexer.remove_entry(&target)
    })
    .await?;
    Ok(Json(serde_json::json!({ "url": url, "removed": removed })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err(api_error(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set")),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}

/// Up to ~300 characters of `text` around the first highlighted word, highlights wrapped in `<em>`.
fn snippet(text: &str, terms: &[String]) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    let first_idx = terms.iter().filter_map(|t| lower.find(t.as_str())).min();
    let chars: Vec<char> = text.chars().collect();
    let snippet: String = match first_idx {
        // lowercasing can shift byte offsets; map through the char count of the prefix
        Some(idx) => {
            let at = lower.get(..idx).map(|p| p.chars().count()).unwrap_or(0).min(chars.len());
            let start = at.saturating_sub(100);
            let end = (at + 200).min(chars.len());
            chars[start..end].iter().collect()
        }
        None => chars.iter().take(200).collect(),
    };
    Some(highlight_terms(&snippet, terms))
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        if t.trim().is_empty() { continue; }
        let Ok(pat) = regex::RegexBuilder::new(&format!(r"\b{}\b", regex::escape(t)))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_centres_on_first_highlight() {
        let text = format!("{} Rust appears here", "filler ".repeat(40));
        let s = snippet(&text, &["rust".to_string()]).unwrap();
        assert!(s.contains("<em>Rust</em>"));
        assert!(s.chars().count() < text.chars().count());
    }

    #[test]
    fn snippet_without_matches_takes_the_start() {
        let s = snippet("short text", &[]).unwrap();
        assert_eq!(s, "short text");
        assert!(snippet("", &[]).is_none());
    }
}
