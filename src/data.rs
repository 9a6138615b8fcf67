//! Dataset fetching: menu, source feature collections and layer tables.
//!
//! Payloads come either from an HTTP host or from a local directory laid out
//! the same way as the host.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use geojson::{Feature, FeatureCollection};
use serde_json::Value;
use tracing::debug;

use crate::join::Row;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {cause}")]
    Request { url: String, cause: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} is not valid JSON: {cause}")]
    Decode { url: String, cause: String },
    #[error("cannot read {path}: {cause}")]
    Io { path: PathBuf, cause: std::io::Error },
    #[error("{url} has an unexpected shape: {cause}")]
    Payload { url: String, cause: String },
}

/// One JSON document per call.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                cause: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let request_err = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            cause: e.to_string(),
        };
        let resp = self.client.get(url).send().await.map_err(request_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await.map_err(request_err)?;
        debug!("fetched {} bytes from {url}", body.len());
        decode(url, &body)
    }
}

/// Reads payloads from files under `base`.
pub struct DirFetcher {
    base: PathBuf,
}

impl DirFetcher {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// Maps a catalog url onto a file below `base`, dropping any scheme and
    /// `host:port` prefix.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let rest = url.split_once("://").map_or(url, |(_, r)| r);
        let rest = match rest.split_once('/') {
            Some((first, tail)) if first.contains(':') || url.contains("://") => tail,
            _ => rest,
        };
        self.base.join(rest.trim_start_matches('/'))
    }
}

#[async_trait]
impl Fetch for DirFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let path = self.path_for(url);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|cause| FetchError::Io { path, cause })?;
        decode(url, &bytes)
    }
}

fn decode(url: &str, bytes: &[u8]) -> Result<Value, FetchError> {
    serde_json::from_slice(bytes).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        cause: e.to_string(),
    })
}

/// Builds the url to request for a catalog path.
///
/// Absolute `http(s)://` urls are kept. A bare `host:port/...` gets an
/// `http://` scheme. Anything else is appended to `host` with one `/`.
pub fn resolve_url(host: &str, url: &str) -> String {
    if url.contains("://") {
        return url.to_string();
    }
    let first = url.split('/').next().unwrap_or_default();
    if first.contains(':') {
        return format!("http://{url}");
    }
    if host.is_empty() {
        return url.to_string();
    }
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// Interprets a source payload as a GeoJSON feature collection.
pub fn source_features(url: &str, payload: Value) -> Result<Vec<Feature>, FetchError> {
    let fc: FeatureCollection =
        serde_json::from_value(payload).map_err(|e| FetchError::Payload {
            url: url.to_string(),
            cause: e.to_string(),
        })?;
    Ok(fc.features)
}

/// Interprets a layer payload as an array of flat records.
pub fn layer_rows(url: &str, payload: Value) -> Result<Vec<Row>, FetchError> {
    let Value::Array(items) = payload else {
        return Err(FetchError::Payload {
            url: url.to_string(),
            cause: "expected an array of records".into(),
        });
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(FetchError::Payload {
                url: url.to_string(),
                cause: format!("record {i} is not an object: {other}"),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("http://localhost:3000/", "Milano/NIL.json", "http://localhost:3000/Milano/NIL.json")]
    #[case("http://localhost:3000", "/Milano/NIL.json", "http://localhost:3000/Milano/NIL.json")]
    #[case("http://h/", "https://cdn.example.org/a.json", "https://cdn.example.org/a.json")]
    #[case("http://h/", "localhost:3000/Milano/results.json", "http://localhost:3000/Milano/results.json")]
    #[case("", "menu.json", "menu.json")]
    fn resolves_urls(#[case] host: &str, #[case] url: &str, #[case] expected: &str) {
        assert_eq!(resolve_url(host, url), expected);
    }

    #[rstest]
    #[case("Milano/NIL.json")]
    #[case("/Milano/NIL.json")]
    #[case("localhost:3000/Milano/NIL.json")]
    #[case("http://localhost:3000/Milano/NIL.json")]
    fn maps_urls_below_base(#[case] url: &str) {
        let f = DirFetcher::new("/data");
        assert_eq!(f.path_for(url), PathBuf::from("/data/Milano/NIL.json"));
    }

    #[tokio::test]
    async fn dir_fetcher_reads_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Milano")).unwrap();
        fs::write(dir.path().join("Milano/rows.json"), r#"[{"NIL": "A", "v": 1}]"#).unwrap();
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();

        let f = DirFetcher::new(dir.path());
        let v = f.fetch("Milano/rows.json").await.unwrap();
        assert_eq!(v, json!([{"NIL": "A", "v": 1}]));

        assert!(matches!(
            f.fetch("broken.json").await,
            Err(FetchError::Decode { .. })
        ));
        assert!(matches!(
            f.fetch("missing.json").await,
            Err(FetchError::Io { .. })
        ));
    }

    #[test]
    fn interprets_payload_shapes() {
        let fc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"NIL": "A"}, "geometry": null}
            ]
        });
        let features = source_features("s", fc).unwrap();
        assert_eq!(features.len(), 1);
        assert!(matches!(
            source_features("s", json!([1, 2])),
            Err(FetchError::Payload { .. })
        ));

        let rows = layer_rows("l", json!([{"NIL": "A"}, {"NIL": "B"}])).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(layer_rows("l", json!({"NIL": "A"})).is_err());
        assert!(layer_rows("l", json!([{"NIL": "A"}, 3])).is_err());
    }
}
