//! `towerline serve` for running the local tile proxy until interrupted.

use crate::cli::context;
use crate::cli::output::{self, Styled};
use crate::config::Config;
use crate::proxy::{self, ProxyState};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub async fn run(config: &Config, port: u16, overlay: bool) -> Result<()> {
    let s = Styled::new();
    let cache = context::open_cache(&config.imagery)?;
    let imagery = context::tile_store(&config.imagery, &config.imagery.url_template, cache.clone())?;
    let overlay = if overlay {
        let template = config.imagery.overlay_or_default();
        Some(Arc::new(context::tile_store(&config.imagery, &template, cache)?))
    } else {
        None
    };
    let state = Arc::new(ProxyState {
        imagery: Arc::new(imagery),
        overlay,
    });

    let listener = proxy::bind(port).await?;
    let addr = listener.local_addr()?;
    if !output::is_quiet() {
        eprintln!(
            "  {} Serving tile proxy at http://{addr}/tile/{{z}}/{{y}}/{{x}}.png",
            s.ok_sym()
        );
        eprintln!("  {}", s.dim("Press Ctrl-C to stop."));
    }

    proxy::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
    })
    .await?;

    if !output::is_quiet() {
        eprintln!("  {} Tile proxy stopped.", s.ok_sym());
    }
    Ok(())
}
