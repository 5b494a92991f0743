//! Earth Engine REST client for the annual satellite embedding collection
//!
//! Maps the three data-source calls onto the public REST surface:
//! `assets:listImages` for lookups, `value:compute` with an
//! `Image.sampleRectangle` expression for pixel sampling, and an asset GET for
//! image metadata.

use crate::io::source::EmbeddingSource;
use crate::types::{
    BoundingBox, DateRange, EmbedError, EmbedResult, ImageProperties, RawSample, RemoteImageHandle,
    EMBEDDING_COLLECTION_ID,
};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Project that owns the public data catalog assets
const PUBLIC_CATALOG_PROJECT: &str = "earthengine-public";


/// Earth Engine connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarthEngineConfig {
    /// REST root, without trailing slash
    pub base_url: String,
    /// Cloud project billed for `value:compute` requests
    pub project: String,
    /// Image collection asset id
    pub collection_id: String,
    /// OAuth2 bearer token
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    pub user_agent: String,
    /// `pageSize` sent with every listImages request
    pub list_page_size: u32,
    /// listImages pages followed per lookup; only the first match is used
    pub max_list_pages: usize,
}

impl Default for EarthEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://earthengine.googleapis.com/v1".to_string(),
            project: PUBLIC_CATALOG_PROJECT.to_string(),
            collection_id: EMBEDDING_COLLECTION_ID.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(300), // 5 minutes, sampling 64 bands is slow
            user_agent: format!("mangroves/{}", env!("CARGO_PKG_VERSION")),
            list_page_size: 100, // a 2.5 km box touches a handful of annual tiles
            max_list_pages: 1,
        }
    }
}

impl EarthEngineConfig {
    /// Defaults overridden by `EARTHENGINE_TOKEN`, `EARTHENGINE_PROJECT` and `EARTHENGINE_URL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `EARTHENGINE_*` variables on top of the current values
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(token) = lookup("EARTHENGINE_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(project) = lookup("EARTHENGINE_PROJECT") {
            self.project = project;
        }
        if let Some(url) = lookup("EARTHENGINE_URL") {
            self.base_url = url.trim_end_matches('/').to_string();
        }
    }

    fn list_images_query(
        &self,
        window: &DateRange,
        region_geojson: &str,
        page_token: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("startTime", window.start_rfc3339()),
            ("endTime", window.end_rfc3339()),
            ("region", region_geojson.to_string()),
            ("pageSize", self.list_page_size.max(1).to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        query
    }

    fn list_images_url(&self) -> String {
        format!(
            "{}/projects/{}/assets/{}:listImages",
            self.base_url, PUBLIC_CATALOG_PROJECT, self.collection_id
        )
    }

    fn compute_value_url(&self) -> String {
        format!("{}/projects/{}/value:compute", self.base_url, self.project)
    }

    fn asset_url(&self, asset_id: &str) -> String {
        format!("{}/projects/{}/assets/{}", self.base_url, PUBLIC_CATALOG_PROJECT, asset_id)
    }
}

/// Blocking Earth Engine REST data source
pub struct EarthEngineSource {
    client: Client,
    config: EarthEngineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListImagesResponse {
    #[serde(default)]
    images: Vec<ImageEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageEntry {
    id: Option<String>,
    name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ComputeValueResponse {
    result: Value,
}

impl EarthEngineSource {
    /// Create a source with its own HTTP client
    pub fn new(config: EarthEngineConfig) -> EmbedResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EmbedError::DataSource(format!("Failed to create HTTP client: {}", e)))?;

        if config.access_token.is_none() {
            log::warn!("No Earth Engine access token configured; requests will be unauthenticated");
        }

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EarthEngineConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, what: &str) -> EmbedResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|e| EmbedError::DataSource(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedError::DataSource(format!(
                "{} returned HTTP {} {}: {}",
                what,
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                truncate(&body, 300)
            )));
        }
        Ok(response)
    }
}

impl EmbeddingSource for EarthEngineSource {
    fn query_images(&self, bounds: &BoundingBox, window: &DateRange) -> EmbedResult<Vec<RemoteImageHandle>> {
        let url = self.config.list_images_url();
        let region = bounds.to_geojson_polygon().to_string();
        let max_pages = self.config.max_list_pages.max(1);

        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..max_pages {
            let query = self
                .config
                .list_images_query(window, &region, page_token.as_deref());

            log::debug!("Listing images: {} {:?}", url, query);
            let response = self.send(self.client.get(&url).query(&query), "listImages")?;
            let body = response
                .text()
                .map_err(|e| EmbedError::DataSource(format!("Failed to read listImages body: {}", e)))?;
            let (page, next) = parse_list_images(&body, &self.config.collection_id)?;
            handles.extend(page);

            match next {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(handles),
            }
        }

        log::debug!("Stopped listing images after {} page(s)", max_pages);
        Ok(handles)
    }

    fn sample_rectangle(
        &self,
        image: &RemoteImageHandle,
        bounds: &BoundingBox,
        default_value: f64,
        band_filter: &[String],
    ) -> EmbedResult<RawSample> {
        let body = sample_rectangle_request(&image.id, bounds, default_value, band_filter);
        let response = self.send(
            self.client.post(self.config.compute_value_url()).json(&body),
            "value:compute",
        )?;
        let text = response
            .text()
            .map_err(|e| EmbedError::DataSource(format!("Failed to read value:compute body: {}", e)))?;
        parse_sample_response(&text)
    }

    fn get_properties(&self, image: &RemoteImageHandle) -> EmbedResult<ImageProperties> {
        let response = self.send(self.client.get(self.config.asset_url(&image.id)), "asset metadata")?;
        let text = response
            .text()
            .map_err(|e| EmbedError::DataSource(format!("Failed to read asset body: {}", e)))?;
        serde_json::from_str(&text)
            .map_err(|e| EmbedError::DataSource(format!("Malformed asset metadata: {}", e)))
    }
}

/// Expression graph for `Image.sampleRectangle(Image.select(Image.load(id), bands), Rectangle(bounds))`
pub fn sample_rectangle_request(
    image_id: &str,
    bounds: &BoundingBox,
    default_value: f64,
    band_filter: &[String],
) -> Value {
    let load = json!({
        "functionInvocationValue": {
            "functionName": "Image.load",
            "arguments": { "id": { "constantValue": image_id } }
        }
    });
    let select = json!({
        "functionInvocationValue": {
            "functionName": "Image.select",
            "arguments": {
                "input": load,
                "bandSelectors": { "constantValue": band_filter }
            }
        }
    });
    let rectangle = json!({
        "functionInvocationValue": {
            "functionName": "GeometryConstructors.Rectangle",
            "arguments": {
                "coordinates": { "constantValue": bounds.to_coordinates() },
                "geodesic": { "constantValue": false }
            }
        }
    });

    json!({
        "expression": {
            "result": "0",
            "values": {
                "0": {
                    "functionInvocationValue": {
                        "functionName": "Image.sampleRectangle",
                        "arguments": {
                            "image": select,
                            "region": rectangle,
                            "defaultValue": { "constantValue": default_value },
                            "properties": { "constantValue": [] }
                        }
                    }
                }
            }
        }
    })
}

/// Parse one `listImages` page into handles and the next page token
fn parse_list_images(body: &str, collection_id: &str) -> EmbedResult<(Vec<RemoteImageHandle>, Option<String>)> {
    let response: ListImagesResponse = serde_json::from_str(body)
        .map_err(|e| EmbedError::DataSource(format!("Malformed listImages response: {}", e)))?;

    let handles = response
        .images
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id.or_else(|| entry.name.as_deref().map(|n| asset_id_from_name(n, collection_id)))?;
            Some(RemoteImageHandle {
                id,
                start_time: entry.start_time,
                end_time: entry.end_time,
            })
        })
        .collect();

    Ok((handles, response.next_page_token))
}

/// `projects/earthengine-public/assets/X` -> `X`
fn asset_id_from_name(name: &str, collection_id: &str) -> String {
    match name.split_once("/assets/") {
        Some((_, id)) => id.to_string(),
        None if name.starts_with(collection_id) => name.to_string(),
        None => format!("{}/{}", collection_id, name),
    }
}

/// Extract per-band rows from a sampled Feature. Non-raster properties are skipped.
fn parse_sample_response(body: &str) -> EmbedResult<RawSample> {
    let response: ComputeValueResponse = serde_json::from_str(body)
        .map_err(|e| EmbedError::DataSource(format!("Malformed value:compute response: {}", e)))?;

    let properties = match response.result.get("properties").and_then(Value::as_object) {
        Some(properties) => properties,
        None => {
            return Err(EmbedError::Extraction(
                "Sample result has no properties".to_string(),
            ))
        }
    };

    let mut sample = BTreeMap::new();
    for (name, value) in properties {
        match serde_json::from_value::<Vec<Vec<f64>>>(value.clone()) {
            Ok(rows) => {
                sample.insert(name.clone(), rows);
            }
            Err(e) => log::debug!("Skipping non-raster property '{}': {}", name, e),
        }
    }
    Ok(sample)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = EarthEngineConfig {
            project: "my-project".to_string(),
            ..EarthEngineConfig::default()
        };
        assert_eq!(
            config.list_images_url(),
            "https://earthengine.googleapis.com/v1/projects/earthengine-public/assets/GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL:listImages"
        );
        assert_eq!(
            config.compute_value_url(),
            "https://earthengine.googleapis.com/v1/projects/my-project/value:compute"
        );
        assert!(config.asset_url("GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/x").ends_with("/assets/GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/x"));
    }

    #[test]
    fn test_list_images_query_is_paged() {
        let config = EarthEngineConfig::default();
        let window = DateRange::for_year(2020).unwrap();
        let query = config.list_images_query(&window, "{}", None);
        assert!(query.contains(&("pageSize", "100".to_string())));
        assert!(query.contains(&("startTime", "2020-01-01T00:00:00Z".to_string())));
        assert!(!query.iter().any(|(k, _)| *k == "pageToken"));
        assert_eq!(config.max_list_pages, 1);

        let next = config.list_images_query(&window, "{}", Some("tok"));
        assert!(next.contains(&("pageToken", "tok".to_string())));
    }

    #[test]
    fn test_env_overrides_apply_on_top_of_file_values() {
        let mut config = EarthEngineConfig {
            project: "from-file".to_string(),
            list_page_size: 10,
            ..EarthEngineConfig::default()
        };
        config.apply_overrides(|name| match name {
            "EARTHENGINE_PROJECT" => Some("from-env".to_string()),
            "EARTHENGINE_URL" => Some("http://localhost:8080/v1/".to_string()),
            _ => None,
        });
        assert_eq!(config.project, "from-env");
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.list_page_size, 10);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_parse_list_images() {
        let body = r#"{
            "images": [
                {
                    "name": "projects/earthengine-public/assets/GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa1",
                    "id": "GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa1",
                    "startTime": "2020-01-01T00:00:00Z",
                    "endTime": "2021-01-01T00:00:00Z"
                },
                {
                    "name": "projects/earthengine-public/assets/GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa2"
                }
            ],
            "nextPageToken": "abc"
        }"#;

        let (images, next) = parse_list_images(body, EMBEDDING_COLLECTION_ID).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id, "GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa1");
        assert!(images[0].start_time.is_some());
        assert_eq!(images[1].id, "GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa2");
        assert!(images[1].end_time.is_none());
        assert_eq!(next.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_empty_list() {
        let (images, next) = parse_list_images("{}", EMBEDDING_COLLECTION_ID).unwrap();
        assert!(images.is_empty());
        assert!(next.is_none());
        assert!(matches!(
            parse_list_images("<html>", EMBEDDING_COLLECTION_ID),
            Err(EmbedError::DataSource(_))
        ));
    }

    #[test]
    fn test_parse_sample_response() {
        let body = r#"{
            "result": {
                "type": "Feature",
                "geometry": null,
                "properties": {
                    "A00": [[0.1, 0.2], [0.3, 0.4]],
                    "A01": [[1.0], [2.0, 3.0]],
                    "system:index": "0"
                }
            }
        }"#;
        let sample = parse_sample_response(body).unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample["A00"], vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
        // Ragged rows are passed through; the normalizer decides what to do with them
        assert_eq!(sample["A01"].len(), 2);
    }

    #[test]
    fn test_sample_without_properties_is_extraction_failure() {
        let body = r#"{"result": {"type": "Feature"}}"#;
        assert!(matches!(parse_sample_response(body), Err(EmbedError::Extraction(_))));
    }

    #[test]
    fn test_sample_request_expression() {
        let bounds = BoundingBox {
            min_lon: -80.01,
            max_lon: -79.99,
            min_lat: 24.99,
            max_lat: 25.01,
        };
        let bands = vec!["A00".to_string(), "A01".to_string()];
        let body = sample_rectangle_request("GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa1", &bounds, 0.0, &bands);

        let call = &body["expression"]["values"]["0"]["functionInvocationValue"];
        assert_eq!(call["functionName"], "Image.sampleRectangle");
        assert_eq!(call["arguments"]["defaultValue"]["constantValue"], 0.0);

        let region = &call["arguments"]["region"]["functionInvocationValue"]["arguments"];
        assert_eq!(region["coordinates"]["constantValue"], json!([-80.01, 24.99, -79.99, 25.01]));

        let select = &call["arguments"]["image"]["functionInvocationValue"];
        assert_eq!(select["functionName"], "Image.select");
        assert_eq!(select["arguments"]["bandSelectors"]["constantValue"], json!(["A00", "A01"]));
        assert_eq!(
            select["arguments"]["input"]["functionInvocationValue"]["arguments"]["id"]["constantValue"],
            "GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xa1"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
