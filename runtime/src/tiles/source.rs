//! Remote tile sources.

use super::{RateLimiter, TileError};
use crate::geo::TileKey;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Esri World Imagery. Note the `{y}` before `{x}` ordering.
pub const WORLD_IMAGERY_URL: &str =
    "https://services.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}";

/// Esri place-name and boundary overlay, transparent PNG.
pub const REFERENCE_OVERLAY_URL: &str =
    "https://services.arcgisonline.com/ArcGIS/rest/services/Reference/World_Reference_Overlay/MapServer/tile/{z}/{y}/{x}";

const USER_AGENT: &str = concat!("towerline/", env!("CARGO_PKG_VERSION"));

/// Somewhere tile bytes come from.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fully resolved URL for `key`; also the cache key.
    fn tile_url(&self, key: TileKey) -> String;

    /// Raw encoded tile bytes (PNG or JPEG).
    async fn fetch(&self, key: TileKey) -> Result<Vec<u8>, TileError>;
}

/// Expand `{z}`, `{x}` and `{y}` in a URL template. A template without
/// placeholders is treated as a base URL and gets `/{z}/{y}/{x}` appended.
pub fn expand_template(template: &str, key: TileKey) -> String {
    let template = if template.contains("{z}") {
        template.to_string()
    } else {
        format!("{}/{{z}}/{{y}}/{{x}}", template.trim_end_matches('/'))
    };
    template
        .replace("{z}", &key.z.to_string())
        .replace("{x}", &key.x.to_string())
        .replace("{y}", &key.y.to_string())
}

/// HTTP GET tile source.
pub struct HttpTileSource {
    client: reqwest::Client,
    template: String,
    limiter: RateLimiter,
}

impl HttpTileSource {
    pub fn new(template: &str, limiter: RateLimiter, timeout: Duration) -> Result<Self, TileError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TileError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            template: template.to_string(),
            limiter,
        })
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    fn tile_url(&self, key: TileKey) -> String {
        expand_template(&self.template, key)
    }

    async fn fetch(&self, key: TileKey) -> Result<Vec<u8>, TileError> {
        let url = self.tile_url(key);
        let _guard = self.limiter.acquire().await?;

        debug!(%url, "fetching tile");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| TileError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TileError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| TileError::Transport {
                url: url.clone(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}
