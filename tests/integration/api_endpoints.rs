//! HTTP API against a scanned population

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use pretty_assertions::assert_eq;
use reclaim_watch::{
    api::{ApiState, router},
    config::ApiSettings,
    query::QueryEngine,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::helpers::*;

fn settings(token: Option<&str>) -> ApiSettings {
    ApiSettings {
        bind: "127.0.0.1:0".parse().unwrap(),
        token: token.map(str::to_string),
        enable_cors: false,
    }
}

/// Router over a harness; the population is scanned first if `scan` is set
async fn app(h: &Harness, token: Option<&str>, scan: bool) -> Router {
    if scan {
        h.orchestrator
            .run_scan(&CancellationToken::new())
            .await
            .unwrap();
    }
    let query = Arc::new(QueryEngine::new(
        h.store.clone(),
        Arc::new(h.clock.clone()),
        scenario_table(),
        None,
    ));
    router(&settings(token), ApiState::new(query, h.store.clone()))
}

fn populated() -> Harness {
    let h = Harness::new();
    h.fetcher.owned("a", "Knight", start() - Duration::days(11));
    h.fetcher.with_attribute("a", "size", "40");
    h.fetcher.owned("b", "Druid", start() - Duration::days(15));
    h.fetcher.with_attribute("b", "size", "10");
    h.fetcher.owned("c", "Mage", start() - Duration::days(3));
    h.fetcher.put("d", None, None);
    h.fetcher.put("e", Some("Ghost"), None);
    h
}

async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn ids(body: &Value) -> Vec<&str> {
    body["entities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_data_endpoints_unavailable_before_first_scan() {
    let h = populated();
    let app = app(&h, None, false).await;

    for uri in ["/api/v1/status", "/api/v1/eligible", "/api/v1/top?n=3"] {
        let (status, body) = get(&app, uri, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        assert!(body["error"].is_string());
    }

    let (status, body) = get(&app, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_healthy"], true);
}

#[tokio::test]
async fn test_status_counts() {
    let h = populated();
    let app = app(&h, None, true).await;

    let (status, body) = get(&app, "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["owned"], 4);
    assert_eq!(body["unknown_activity"], 1);
    assert_eq!(body["eligible"], 2);
    assert_eq!(body["cutoff_secs"], Duration::days(10).num_seconds());
    assert_eq!(body["scanning"], false);
}

#[tokio::test]
async fn test_eligible_defaults_to_cutoff() {
    let h = populated();
    let app = app(&h, None, true).await;

    let (status, body) = get(&app, "/api/v1/eligible", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(ids(&body), ["b", "a"]);
    assert_eq!(body["entities"][0]["owner"], "Druid");
    assert_eq!(body["entities"][0]["idle_secs"], Duration::days(15).num_seconds());
    assert_eq!(body["entities"][0]["threshold"], "imminent");
    assert_eq!(body["entities"][1]["threshold"], "warn");
}

#[tokio::test]
async fn test_eligible_with_min_idle_and_filter() {
    let h = populated();
    let app = app(&h, None, true).await;

    let (_, body) = get(&app, "/api/v1/eligible?min_idle=12d", None).await;
    assert_eq!(ids(&body), ["b"]);

    let (_, body) = get(&app, "/api/v1/eligible?min_idle=1d", None).await;
    assert_eq!(ids(&body), ["b", "a", "c"]);

    let (_, body) = get(&app, "/api/v1/eligible?filter=size%3E%3D20", None).await;
    assert_eq!(ids(&body), ["a"]);

    let (_, body) = get(&app, "/api/v1/eligible?min_idle=1d&filter=owner%3DMage", None).await;
    assert_eq!(ids(&body), ["c"]);
}

#[tokio::test]
async fn test_idle_moves_with_clock_between_scans() {
    let h = populated();
    let app = app(&h, None, true).await;

    h.clock.advance(Duration::days(7));
    let (_, body) = get(&app, "/api/v1/eligible", None).await;
    assert_eq!(ids(&body), ["b", "a", "c"]);
    assert_eq!(body["entities"][2]["idle_secs"], Duration::days(10).num_seconds());
}

#[tokio::test]
async fn test_bad_parameters_are_rejected() {
    let h = populated();
    let app = app(&h, None, true).await;

    let (status, body) = get(&app, "/api/v1/eligible?filter=size%3Ebig", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid filter"));

    let (status, body) = get(&app, "/api/v1/eligible?min_idle=soon", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("min_idle"));

    let (status, body) =
        get(&app, "/api/v1/eligible?min_idle=100000000000d100000000000d", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("out of range"));

    let (status, _) = get(&app, "/api/v1/top?n=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_top_n() {
    let h = populated();
    let app = app(&h, None, true).await;

    let (status, body) = get(&app, "/api/v1/top?n=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), ["b", "a"]);

    let (_, body) = get(&app, "/api/v1/top", None).await;
    assert_eq!(ids(&body), ["b", "a", "c"]);

    let (_, body) = get(&app, "/api/v1/top?n=0", None).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_bearer_token_required() {
    let h = populated();
    let app = app(&h, Some("secret"), true).await;

    let (status, _) = get(&app, "/api/v1/status", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(&app, "/api/v1/status", Some("wrong")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = get(&app, "/api/v1/status", Some("secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
}
