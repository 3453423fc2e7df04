//! Local tile proxy: `GET /tile/{z}/{y}/{x}.png`.
//!
//! Serves imagery from the tile store, optionally alpha-composited with a
//! label overlay, always re-encoded as PNG.

use crate::geo::{TileKey, MAX_ZOOM};
use crate::tiles::{TileError, TileStore};
use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use image::{imageops, DynamicImage, ImageFormat};
use regex::Regex;
use std::future::Future;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const INVALID_PATH: &str = "Invalid tile path. Use /tile/{z}/{y}/{x}.png";

fn tile_path() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/tile/(\d+)/(\d+)/(\d+)\.png$").ok())
        .as_ref()
}

/// Tile stores backing the proxy.
pub struct ProxyState {
    pub imagery: Arc<TileStore>,
    pub overlay: Option<Arc<TileStore>>,
}

/// Parse `/tile/{z}/{y}/{x}.png`, rejecting tiles outside the world.
pub fn parse_tile_path(path: &str) -> Option<TileKey> {
    let caps = tile_path()?.captures(path)?;
    let z: u8 = caps[1].parse().ok()?;
    let y: u32 = caps[2].parse().ok()?;
    let x: u32 = caps[3].parse().ok()?;
    if z > MAX_ZOOM {
        return None;
    }
    let world = TileKey::world_tiles(z);
    ((x as u64) < world && (y as u64) < world).then(|| TileKey::new(z, x, y))
}

pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(serve_tile).with_state(state)
}

async fn serve_tile(State(state): State<Arc<ProxyState>>, uri: Uri) -> Response {
    let Some(key) = parse_tile_path(uri.path()) else {
        debug!(path = uri.path(), "rejected tile path");
        return (StatusCode::NOT_FOUND, INVALID_PATH).into_response();
    };

    match compose(&state, key).await {
        Ok(png) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            Body::from(png),
        )
            .into_response(),
        Err(e) => {
            warn!(tile = %key, error = %e, "tile request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error fetching/composing tile: {e}"),
            )
                .into_response()
        }
    }
}

async fn compose(state: &ProxyState, key: TileKey) -> Result<Vec<u8>, TileError> {
    let mut base = state.imagery.fetch_tile(key).await?.to_rgba8();
    if let Some(overlay) = &state.overlay {
        let labels = overlay.fetch_tile(key).await?.to_rgba8();
        imageops::overlay(&mut base, &labels, 0, 0);
    }
    // served tiles are always opaque
    let composed = DynamicImage::ImageRgba8(base).to_rgb8();

    let mut out = Cursor::new(Vec::new());
    composed
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|source| TileError::Decode {
            url: format!("/tile/{key}.png"),
            source,
        })?;
    Ok(out.into_inner())
}

/// Bind `127.0.0.1:port`; port 0 picks a free one.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ProxyState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "tile proxy listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("tile proxy failed")?;
    info!("tile proxy stopped");
    Ok(())
}
