//! WMS GetMap source.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use url::Url;

use super::{MapRequest, Source};
use crate::error::SourceError;

/// Default timeout for upstream GetMap requests.
pub const DEFAULT_WMS_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("tilecache/", env!("CARGO_PKG_VERSION"));

/// Renders metatiles with WMS 1.1.1 GetMap requests.
///
/// Configured parameters override the defaults (`SERVICE`, `VERSION`,
/// `REQUEST`, `STYLES`, `FORMAT`); `LAYERS` is mandatory.
#[derive(Debug, Clone)]
pub struct WmsSource {
    name: String,
    url: Url,
    params: BTreeMap<String, String>,
    client: reqwest::blocking::Client,
}

impl WmsSource {
    pub fn new(
        name: impl Into<String>,
        url: &str,
        params: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let name = name.into();
        let invalid = |reason: String| SourceError::InvalidDefinition {
            name: name.clone(),
            reason,
        };

        let url = Url::parse(url).map_err(|e| invalid(format!("invalid url: {}", e)))?;
        let params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();
        if !params.contains_key("LAYERS") {
            return Err(invalid("missing LAYERS parameter".to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| invalid(format!("cannot create HTTP client: {}", e)))?;

        Ok(Self {
            name,
            url,
            params,
            client,
        })
    }

    /// Full GetMap URL for `request`.
    pub fn request_url(&self, request: &MapRequest) -> Url {
        let mut query: BTreeMap<String, String> = [
            ("SERVICE", "WMS"),
            ("VERSION", "1.1.1"),
            ("REQUEST", "GetMap"),
            ("STYLES", ""),
            ("FORMAT", "image/png"),
            ("TRANSPARENT", "TRUE"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let bbox = &request.bbox;
        query.insert(
            "BBOX".to_string(),
            format!("{},{},{},{}", bbox.minx, bbox.miny, bbox.maxx, bbox.maxy),
        );
        query.insert("WIDTH".to_string(), request.width.to_string());
        query.insert("HEIGHT".to_string(), request.height.to_string());
        query.insert("SRS".to_string(), request.srs.clone());
        for (name, value) in &request.dimensions {
            query.insert(name.to_ascii_uppercase(), value.clone());
        }
        for (k, v) in &self.params {
            query.insert(k.clone(), v.clone());
        }

        let mut url = self.url.clone();
        url.query_pairs_mut().extend_pairs(query.iter());
        url
    }
}

impl Source for WmsSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn render_metatile(&self, request: &MapRequest) -> Result<Bytes, SourceError> {
        let url = self.request_url(request);
        debug!(source = %self.name, url = %url, "WMS GetMap");

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| SourceError::Request {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(SourceError::NotAnImage { content_type });
        }

        response.bytes().map_err(|e| SourceError::Request {
            message: e.to_string(),
        })
    }
}
