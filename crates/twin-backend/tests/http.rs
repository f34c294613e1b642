//! End-to-end tests against a local stand-in for the dashboard backend.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::Router;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use twin_backend::{HttpArtifactFetcher, HttpBackend};
use twin_core::config::{BackendConfig, EngineConfig};
use twin_core::engine::{Artifact, ArtifactFetcher, ArtifactRole};
use twin_core::sources::{DetailSource, SnapshotSource, SourceError};
use twin_types::{ContextKey, EntityId, EntityKind};

async fn realtime(Query(params): Query<HashMap<String, String>>) -> axum::Json<Value> {
    let company = params.get("companyCode").cloned().unwrap_or_default();
    axum::Json(json!({
        "robots": { "R1": { "status": "active", "companyCode": company } },
        "stations": null,
        "lineStatus": { "lineId": "LINE_A" },
        "timestamp": "2025-09-01T10:00:00"
    }))
}

async fn robot(Path(id): Path<String>) -> Result<axum::Json<Value>, (StatusCode, String)> {
    if id == "R1" {
        Ok(axum::Json(json!({ "robotId": "R1", "robotName": "Welder" })))
    } else {
        Err((StatusCode::BAD_REQUEST, format!("Robot not found: {id}")))
    }
}

async fn artifact(Path(name): Path<String>) -> Result<Vec<u8>, StatusCode> {
    if name.ends_with(".wasm") {
        Err(StatusCode::NOT_FOUND)
    } else {
        Ok(name.into_bytes())
    }
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api/unity/realtime-data", get(realtime))
        .route("/api/click/robot/{id}", get(robot))
        .route("/unity3d/{name}", get(artifact));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn backend(base: &str) -> HttpBackend {
    HttpBackend::new(&BackendConfig {
        base_url: format!("{base}/api"),
        ..BackendConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn fetches_scoped_snapshot() {
    let base = serve().await;
    let snapshot = backend(&base)
        .fetch_snapshot(&ContextKey::new("7"))
        .await
        .unwrap();

    assert_eq!(snapshot.robots["R1"]["companyCode"], json!("7"));
    assert!(snapshot.stations.is_empty());
    assert_eq!(snapshot.line_status, Some(json!({ "lineId": "LINE_A" })));
}

#[tokio::test]
async fn fetches_detail_and_maps_errors() {
    let base = serve().await;
    let backend = backend(&base);

    let record = backend
        .fetch_detail(EntityKind::Robot, &EntityId::new("R1"))
        .await
        .unwrap();
    assert_eq!(record["robotName"], json!("Welder"));

    let err = backend
        .fetch_detail(EntityKind::Robot, &EntityId::new("R9"))
        .await
        .unwrap_err();
    assert_eq!(err, SourceError::Status { status: 400 });
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let backend = backend("http://127.0.0.1:9");
    let err = backend
        .fetch_snapshot(&ContextKey::new("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Request(_)));
}

#[tokio::test]
async fn artifact_fetcher_downloads_manifest_entries() {
    let base = serve().await;
    let manifest = EngineConfig {
        artifact_base_url: format!("{base}/unity3d"),
        ..EngineConfig::default()
    }
    .manifest();
    let fetcher = HttpArtifactFetcher::new(&EngineConfig::default()).unwrap();

    let mut results = Vec::new();
    for artifact in manifest.iter() {
        results.push((artifact.name.clone(), fetcher.fetch(artifact).await));
    }

    assert_eq!(results[0].1.as_deref().unwrap(), b"factoryTwin.loader.js");
    let (name, wasm) = &results[3];
    assert_eq!(name, "factoryTwin.wasm");
    assert!(wasm.as_ref().unwrap_err().0.contains("404"));
}

/// Accepts connections and never answers.
async fn stalled_host() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn stalled_artifact_host_times_out() {
    let base = stalled_host().await;
    let config = EngineConfig {
        fetch_timeout_ms: 200,
        ..EngineConfig::default()
    };
    let fetcher = HttpArtifactFetcher::new(&config).unwrap();
    let artifact = Artifact {
        role: ArtifactRole::LoaderScript,
        name: "factoryTwin.loader.js".to_owned(),
        url: format!("{base}/unity3d/factoryTwin.loader.js"),
    };

    let outcome = tokio::time::timeout(Duration::from_secs(5), fetcher.fetch(&artifact))
        .await
        .unwrap();

    let err = outcome.unwrap_err();
    assert!(err.0.contains("request failed"), "{}", err.0);
}
