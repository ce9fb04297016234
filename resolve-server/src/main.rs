use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{MetadataRecord, ResolveRequest, ResolveResponse};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

type Catalog = HashMap<String, MetadataRecord>;

#[derive(Clone)]
struct AppState {
    catalog: Arc<RwLock<Catalog>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("resolve_server=debug,tower_http=debug")
        .init();

    let catalog = match std::env::var("CATALOG_PATH") {
        Ok(path) => load_catalog(&path)?,
        Err(_) => {
            info!("CATALOG_PATH not set, serving the sample catalog");
            sample_catalog()
        }
    };

    let state = AppState {
        catalog: Arc::new(RwLock::new(catalog)),
    };

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;

    info!("Resolve server listening on http://{}", bind);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/resolve-scan", post(resolve_scan))
        .route("/catalog", post(upsert_record))
        .route("/health", get(|| async { StatusCode::OK }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Look up metadata for every object a scanner sent
async fn resolve_scan(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Json<ResolveResponse> {
    let catalog = state.catalog.read().await;
    let response = resolve_objects(&catalog, &request);

    debug!(
        "📡 Resolved {} of {} objects near ({}, {})",
        response.metadata.len(),
        request.objects.len(),
        request.location.lat,
        request.location.lon
    );

    Json(response)
}

/// Add or replace a catalog entry
async fn upsert_record(
    State(state): State<AppState>,
    Json(record): Json<MetadataRecord>,
) -> StatusCode {
    if record.id.is_empty() {
        warn!("⚠️  Rejected a catalog entry without an id");
        return StatusCode::UNPROCESSABLE_ENTITY;
    }

    info!("📤 Catalog entry for {}", record.id);
    state.catalog.write().await.insert(record.id.clone(), record);

    StatusCode::OK
}

/// Unknown URLs are left out of the response rather than reported
fn resolve_objects(catalog: &Catalog, request: &ResolveRequest) -> ResolveResponse {
    let metadata = request
        .objects
        .iter()
        .filter_map(|object| {
            catalog.get(&object.url).map(|record| MetadataRecord {
                id: object.url.clone(),
                ..record.clone()
            })
        })
        .collect();

    ResolveResponse { metadata }
}

fn load_catalog(path: &str) -> anyhow::Result<Catalog> {
    let records: Vec<MetadataRecord> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    info!("Loaded {} catalog entries from {}", records.len(), path);

    Ok(records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect())
}

fn sample_catalog() -> Catalog {
    let mut records = vec![
        MetadataRecord {
            id: "http://z3.ca/1".into(),
            title: Some("Porch light".into()),
            url: Some("http://z3.ca/1".into()),
            description: Some("Turn the front porch light on and off".into()),
            favicon_url: None,
        },
        MetadataRecord {
            id: "http://z3.ca/light".into(),
            title: Some("Living room lamp".into()),
            url: Some("http://z3.ca/light".into()),
            description: None,
            favicon_url: Some("/static/lamp.png".into()),
        },
    ];

    // The first few demo sensors have only partial metadata
    for i in 1..=4 {
        records.push(MetadataRecord {
            id: format!("http://jenson.org/iot/{}", i),
            title: Some(format!("Sensor {}", i)),
            ..Default::default()
        });
    }

    records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Location, ScanObject};

    fn request(urls: &[&str]) -> ResolveRequest {
        ResolveRequest {
            location: Location {
                lat: 49.129837,
                lon: 120.38142,
            },
            objects: urls
                .iter()
                .map(|url| ScanObject {
                    url: url.to_string(),
                    rssi: -60,
                })
                .collect(),
        }
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let response = resolve_objects(
            &sample_catalog(),
            &request(&["http://z3.ca/1", "http://nowhere.example/", "http://jenson.org/iot/2"]),
        );

        let ids: Vec<_> = response.metadata.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["http://z3.ca/1", "http://jenson.org/iot/2"]);
        assert_eq!(response.metadata[1].url, None);
    }

    #[test]
    fn test_empty_request() {
        assert!(resolve_objects(&sample_catalog(), &request(&[]))
            .metadata
            .is_empty());
    }

    #[test]
    fn test_load_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{ "id": "http://z3.ca/2", "title": "Garage", "favicon_url": "/g.png" }]"#,
        )
        .unwrap();

        let catalog = load_catalog(path.to_str().unwrap()).unwrap();
        assert_eq!(catalog["http://z3.ca/2"].title.as_deref(), Some("Garage"));
    }
}
