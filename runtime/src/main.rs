use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use towerline_runtime::cli::output::{ENV_JSON, ENV_NO_COLOR, ENV_QUIET, ENV_VERBOSE};
use towerline_runtime::cli::run_cmd::RunOptions;
use towerline_runtime::cli::{cache_cmd, chip_cmd, detect_cmd, run_cmd, serve_cmd};
use towerline_runtime::config::Config;
use towerline_runtime::logging;

#[derive(Parser)]
#[command(name = "towerline")]
#[command(about = "Follow transmission towers outward from power plants across satellite imagery")]
#[command(version)]
struct Cli {
    /// Configuration file (`run` takes it positionally).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Machine-readable output on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Only print errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More logging; repeat for trace level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace every facility listed in the configuration.
    Run {
        config_file: PathBuf,
        /// Output root; one directory per facility.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        max_visited: Option<usize>,
        /// Only trace the first N facilities.
        #[arg(long)]
        limit: Option<usize>,
        /// Skip writing annotated chips and ledgers.
        #[arg(long)]
        no_chips: bool,
    },

    /// Save the stitched chip centered on a coordinate.
    Chip {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        zoom: Option<u8>,
        /// Odd number of tiles per side.
        #[arg(long)]
        tiles: Option<u32>,
        #[arg(short, long, default_value = "chip.png")]
        out: PathBuf,
        /// Draw a marker at the requested coordinate.
        #[arg(long)]
        mark: bool,
    },

    /// Run the tower detector over images and write annotated copies.
    Detect {
        /// ONNX model; defaults to the configured model_path.
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Serve tiles on 127.0.0.1 at /tile/{z}/{y}/{x}.png.
    Serve {
        #[arg(short, long, default_value_t = 8787)]
        port: u16,
        /// Composite the place-name overlay onto each tile.
        #[arg(long)]
        overlay: bool,
    },

    /// Inspect or prune the tile cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts and size.
    Stats,
    /// Remove expired entries.
    Purge,
    /// Remove every entry.
    Clear,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json {
        std::env::set_var(ENV_JSON, "1");
    }
    if cli.quiet {
        std::env::set_var(ENV_QUIET, "1");
    }
    if cli.verbose > 0 {
        std::env::set_var(ENV_VERBOSE, "1");
    }
    if cli.no_color {
        std::env::set_var(ENV_NO_COLOR, "1");
    }

    let config_path = match &cli.command {
        Commands::Run { config_file, .. } => Some(config_file.as_path()),
        _ => cli.config.as_deref(),
    };
    let mut config = load_config(config_path)?;
    config.logging.level = logging::level_for(cli.verbose, cli.quiet, &config.logging.level);
    logging::setup_logging(&config.logging, cli.json)?;

    match cli.command {
        Commands::Run {
            output,
            workers,
            max_depth,
            max_visited,
            limit,
            no_chips,
            ..
        } => {
            run_cmd::run(
                config,
                RunOptions {
                    output_dir: output,
                    workers,
                    max_depth,
                    max_visited,
                    limit,
                    no_chips,
                },
            )
            .await
        }
        Commands::Chip {
            lat,
            lon,
            zoom,
            tiles,
            out,
            mark,
        } => chip_cmd::run(&config, lat, lon, zoom, tiles, &out, mark).await,
        Commands::Detect {
            model,
            out_dir,
            images,
        } => detect_cmd::run(&config, model.as_deref(), &images, out_dir.as_deref()).await,
        Commands::Serve { port, overlay } => serve_cmd::run(&config, port, overlay).await,
        Commands::Cache { action } => match action {
            CacheAction::Stats => cache_cmd::run_stats(&config),
            CacheAction::Purge => cache_cmd::run_purge(&config),
            CacheAction::Clear => cache_cmd::run_clear(&config),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_negative_coordinates() {
        let cli = Cli::parse_from(["towerline", "chip", "--lat", "31.5964", "--lon", "-110.307589"]);
        match cli.command {
            Commands::Chip { lat, lon, .. } => {
                assert_eq!(lat, 31.5964);
                assert_eq!(lon, -110.307589);
            }
            _ => panic!("expected chip"),
        }
    }
}
