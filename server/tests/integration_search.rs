use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use server::{build_app, AppState};
use sitesearch_core::{IndexStore, PageData, SearchConfig, SledStore};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

const TOKEN: &str = "secret";

fn page(url: &str, title: &str, body: &str, protected: bool) -> PageData {
    PageData {
        url: url.to_string(),
        title: title.to_string(),
        protected,
        pid: 1,
        language: "en".into(),
        content: format!("<html><head></head><body>{body}</body></html>"),
        ..Default::default()
    }
}

fn build_tiny_index() -> (TempDir, AppState) {
    let dir = tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("index")).unwrap());
    let state = AppState::new(store, SearchConfig::default(), Some(TOKEN.to_string()));
    state.indexer.index_page(&page("/rust", "Rust", "Rust is great. rust systems programming.", false)).unwrap();
    state.indexer.index_page(&page("/learn", "Learning", "Learning rust.", false)).unwrap();
    state.indexer.index_page(&page("/members", "Members", "rust for members only", true)).unwrap();
    (dir, state)
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, json: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("X-ADMIN-TOKEN", token);
    }
    builder.body(Body::from(json.to_string())).unwrap()
}

#[tokio::test]
async fn search_returns_ranked_public_results() {
    let (_dir, state) = build_tiny_index();
    let (status, json) = call(build_app(state), get("/search?q=rust")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 2);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr[0]["url"], "/rust");
    assert_eq!(arr[1]["url"], "/learn");
    assert!(arr[0]["relevance"].as_f64().unwrap() > arr[1]["relevance"].as_f64().unwrap());
    assert!(arr[0]["snippet"].as_str().unwrap().contains("<em>"));
}

#[tokio::test]
async fn blank_query_is_a_bad_request() {
    let (_dir, state) = build_tiny_index();
    let (status, json) = call(build_app(state), get("/search?q=%20")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "empty query");
}

#[tokio::test]
async fn pages_are_sliced() {
    let (_dir, state) = build_tiny_index();
    let (_, json) = call(build_app(state), get("/search?q=rust&per_page=1&page=2")).await;
    assert_eq!(json["total_hits"], 2);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["results"][0]["url"], "/learn");
}

#[tokio::test]
async fn admin_endpoints_need_the_token() {
    let (_dir, state) = build_tiny_index();
    let app = build_app(state);
    let body = serde_json::json!({ "url": "/new", "content": "<body>fresh zebra page</body>" });

    let (status, _) = call(app.clone(), post("/index", None, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = call(app.clone(), post("/index", Some(TOKEN), body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["indexed"], true);

    let (_, json) = call(app.clone(), get("/search?q=zebra")).await;
    assert_eq!(json["results"][0]["url"], "/new");

    let (_, json) = call(app.clone(), post("/remove", Some(TOKEN), serde_json::json!({ "url": "/new" }))).await;
    assert_eq!(json["removed"], true);
    let (_, json) = call(app, get("/search?q=zebra")).await;
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn doc_endpoint_hides_protected_pages() {
    let (_dir, state) = build_tiny_index();
    let public = state.store.find_by_url("/rust").unwrap().unwrap().id;
    let protected = state.store.find_by_url("/members").unwrap().unwrap().id;
    let app = build_app(state);
    let (status, json) = call(app.clone(), get(&format!("/doc/{public}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["url"], "/rust");
    let (status, _) = call(app, get(&format!("/doc/{protected}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_searches_and_writes_are_served() {
    let (_dir, state) = build_tiny_index();
    let app = build_app(state);
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..4 {
        let body = serde_json::json!({ "url": format!("/extra{i}"), "content": format!("<body>rust extra{i}</body>") });
        tasks.spawn(call(app.clone(), post("/index", Some(TOKEN), body)));
        tasks.spawn(call(app.clone(), get("/search?q=rust")));
    }
    while let Some(done) = tasks.join_next().await {
        let (status, _) = done.unwrap();
        assert_eq!(status, StatusCode::OK);
    }
    let (_, json) = call(app, get("/search?q=rust&per_page=100")).await;
    assert_eq!(json["total_hits"], 6);
}
