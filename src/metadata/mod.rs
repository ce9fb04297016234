//! Looks up titles, descriptions and icons for the URLs devices broadcast.
//!
//! Lookups are batched: every device found during a batch window goes out in
//! one request. Each response entry is matched back to its device by `id`,
//! its icon is fetched, and the result is handed to the registry. A failed
//! request just drops the batch; retrying is left to whoever asked.

use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use common::{
    Location, MetadataRecord, ResolveRequest, ScanObject, DEFAULT_FAVICON, UNKNOWN_DESCRIPTION,
    UNKNOWN_TITLE, UNKNOWN_URL,
};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};

use crate::{
    config::Config,
    device::{Device, DeviceMetadata},
    error::ResolveError,
    registry::SharedRegistry,
};

pub mod url;

pub use self::url::{resolve_icon_url, UrlResolver};

#[derive(Clone)]
pub struct MetadataResolver {
    client: reqwest::Client,
    endpoint: Arc<str>,
    location: Location,
    urls: UrlResolver,
    registry: SharedRegistry,
}

impl MetadataResolver {
    pub fn new(config: &Config, registry: SharedRegistry) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.metadata_url.as_str().into(),
            location: config.location,
            urls: UrlResolver::new(config.url_map.clone()),
            registry,
        })
    }

    /// The URL a device's advertised name points at, if any
    pub fn resolve_url(&self, raw_name: &str) -> Option<String> {
        self.urls.resolve(raw_name)
    }

    /// Look up every device in `devices` that has a URL in a single request.
    /// Returns the handle of the background lookup, or `None` if there was
    /// nothing to ask about.
    pub fn resolve_batch(&self, devices: &[Device]) -> Option<JoinHandle<()>> {
        let objects: Vec<ScanObject> = devices
            .iter()
            .filter_map(|device| {
                device.url().map(|url| ScanObject {
                    url: url.to_string(),
                    rssi: device.last_signal(),
                })
            })
            .collect();

        if objects.is_empty() {
            return None;
        }

        let request = ResolveRequest {
            location: self.location,
            objects,
        };

        let resolver = self.clone();
        Some(tokio::spawn(async move { resolver.run_batch(request).await }))
    }

    pub fn resolve_one(&self, device: &Device) -> Option<JoinHandle<()>> {
        self.resolve_batch(std::slice::from_ref(device))
    }

    async fn run_batch(self, request: ResolveRequest) {
        let submitted: HashSet<String> = request.objects.iter().map(|o| o.url.clone()).collect();
        info!("Resolving metadata for {} device(s)", submitted.len());

        let entries = match self.request_metadata(&request).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Dropping metadata batch: {}", e);
                return;
            }
        };

        // Icons are fetched side by side so one slow site doesn't hold up the rest
        let mut lookups = JoinSet::new();

        for entry in entries {
            let record = match entry {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping metadata entry: {}", e);
                    continue;
                }
            };

            if !submitted.contains(&record.id) {
                warn!("Resolver answered for {}, which wasn't asked about", record.id);
                continue;
            }

            let resolver = self.clone();
            lookups.spawn(async move {
                let id = record.id.clone();
                let mut metadata = build_metadata(record);
                metadata.icon = resolver.download_icon(&metadata.icon_url).await;

                resolver.registry.on_metadata_resolved(&id, metadata).await;
            });
        }

        while let Some(result) = lookups.join_next().await {
            if let Err(e) = result {
                warn!("Metadata task failed: {}", e);
            }
        }
    }

    async fn request_metadata(
        &self,
        request: &ResolveRequest,
    ) -> Result<Vec<Result<MetadataRecord, ResolveError>>, ResolveError> {
        let response = self
            .client
            .post(&*self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ResolveError::MalformedResponse(e.to_string()))?;

        parse_response(body)
    }

    /// A missing icon doesn't stop the rest of the metadata from being shown
    async fn download_icon(&self, icon_url: &str) -> Option<Bytes> {
        match self.fetch_icon(icon_url).await {
            Ok(icon) => {
                debug!("Got an icon from {} ({} bytes)", icon_url, icon.len());
                Some(icon)
            }
            Err(e) => {
                debug!("No icon from {}: {}", icon_url, e);
                None
            }
        }
    }

    async fn fetch_icon(&self, icon_url: &str) -> Result<Bytes, ResolveError> {
        let icon = self
            .client
            .get(icon_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(icon)
    }
}

/// Split a response body into its entries. A body without a `metadata` array
/// is unusable as a whole; a bad entry only affects itself.
pub fn parse_response(body: Value) -> Result<Vec<Result<MetadataRecord, ResolveError>>, ResolveError> {
    let Value::Object(mut body) = body else {
        return Err(ResolveError::MalformedResponse(
            "response is not an object".to_string(),
        ));
    };

    let Some(Value::Array(entries)) = body.remove("metadata") else {
        return Err(ResolveError::MalformedResponse(
            "response has no metadata list".to_string(),
        ));
    };

    Ok(entries
        .into_iter()
        .map(|entry| {
            MetadataRecord::from_value(entry)
                .map_err(|e| ResolveError::MalformedResponse(e.to_string()))
        })
        .collect())
}

/// Fill in placeholders for anything the resolver left out
pub fn build_metadata(record: MetadataRecord) -> DeviceMetadata {
    let site_url = record.url.unwrap_or_else(|| UNKNOWN_URL.to_string());
    let icon_url = record
        .favicon_url
        .unwrap_or_else(|| DEFAULT_FAVICON.to_string());
    let icon_url = resolve_icon_url(&icon_url, &site_url, &record.id);

    DeviceMetadata {
        title: record.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        description: record
            .description
            .unwrap_or_else(|| UNKNOWN_DESCRIPTION.to_string()),
        site_url,
        icon_url,
        icon: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response() {
        let entries = parse_response(json!({
            "metadata": [
                { "id": "http://z3.ca/1", "title": "Light" },
                { "title": "No id" },
                { "id": "http://z3.ca/2" },
            ]
        }))
        .unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].as_ref().unwrap().title.as_deref(), Some("Light"));
        assert!(matches!(entries[1], Err(ResolveError::MalformedResponse(_))));
        assert_eq!(entries[2].as_ref().unwrap().id, "http://z3.ca/2");
    }

    #[test]
    fn test_parse_response_without_metadata() {
        assert!(matches!(
            parse_response(json!({ "objects": [] })),
            Err(ResolveError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_response(json!([])),
            Err(ResolveError::MalformedResponse(_))
        ));
        assert!(parse_response(json!({ "metadata": [] })).unwrap().is_empty());
    }

    #[test]
    fn test_build_metadata_defaults() {
        let metadata = build_metadata(MetadataRecord {
            id: "http://z3.ca/1".into(),
            url: Some("http://z3.ca/1".into()),
            description: Some("The front porch light".into()),
            ..Default::default()
        });

        assert_eq!(metadata.title, "Unknown name");
        assert_eq!(metadata.description, "The front porch light");
        assert_eq!(metadata.site_url, "http://z3.ca/1");
        assert_eq!(metadata.icon_url, "http://z3.ca/favicon.ico");
        assert!(metadata.icon.is_none());
    }

    #[test]
    fn test_build_metadata_without_site() {
        let metadata = build_metadata(MetadataRecord {
            id: "http://jenson.org/iot/1".into(),
            ..Default::default()
        });

        assert_eq!(metadata.site_url, "Unknown url");
        assert_eq!(metadata.description, "Unknown description");
        assert_eq!(metadata.icon_url, "http://jenson.org/favicon.ico");
    }

    #[test]
    fn test_build_metadata_relative_icon() {
        let metadata = build_metadata(MetadataRecord {
            id: "http://z3.ca/1".into(),
            title: Some("Light".into()),
            url: Some("https://z3.ca/light?room=porch".into()),
            favicon_url: Some("/static/light.png".into()),
            ..Default::default()
        });

        assert_eq!(metadata.icon_url, "https://z3.ca/static/light.png?room=porch");
    }
}
