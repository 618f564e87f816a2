//! tiledem - elevation queries against a tiled global DEM.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tiledem::{DemConfig, DemFamily, ElevationModel, GeoPos, ResamplingMethod};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tiledem")]
#[command(author, version, about = "Elevation lookup over tiled SRTM DEMs", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// DEM family: srtm3-hgt, srtm1-hgt, srtm3-geotiff
    #[arg(short, long, global = true)]
    family: Option<DemFamily>,

    /// Directory holding tile files and archives
    #[arg(short = 'd', long, global = true)]
    install_dir: Option<PathBuf>,

    /// Never download missing tiles
    #[arg(long, global = true)]
    offline: bool,

    /// Resampling: nearest-neighbour or bilinear
    #[arg(short, long, global = true)]
    resampling: Option<ResamplingMethod>,

    /// Number of tiles whose rows stay in memory
    #[arg(long, global = true)]
    hot_tiles: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Elevation at a single point
    Query {
        /// Latitude in degrees
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        /// Longitude in degrees
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },
    /// Elevation profile along a line
    Profile {
        #[arg(allow_negative_numbers = true)]
        start_lat: f64,
        #[arg(allow_negative_numbers = true)]
        start_lon: f64,
        #[arg(allow_negative_numbers = true)]
        end_lat: f64,
        #[arg(allow_negative_numbers = true)]
        end_lon: f64,
        /// Number of samples, including both end points
        #[arg(short, long, default_value = "20")]
        samples: usize,
    },
    /// Download and open every tile in a region
    Prefetch {
        #[arg(allow_negative_numbers = true)]
        min_lat: f64,
        #[arg(allow_negative_numbers = true)]
        max_lat: f64,
        #[arg(allow_negative_numbers = true)]
        min_lon: f64,
        #[arg(allow_negative_numbers = true)]
        max_lon: f64,
    },
    /// Print the effective configuration as YAML
    ShowConfig,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Configuration file, if any, with command-line overrides applied.
fn effective_config(cli: &Cli) -> tiledem::Result<DemConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            DemConfig::load(path)?
        }
        None => DemConfig::default(),
    };

    if let Some(family) = cli.family {
        config.family = family;
    }
    if let Some(dir) = &cli.install_dir {
        config.install_dir = dir.clone();
    }
    if cli.offline {
        config.downloadable = false;
    }
    if let Some(resampling) = cli.resampling {
        config.resampling = resampling;
    }
    if let Some(hot_tiles) = cli.hot_tiles {
        config.hot_tiles = hot_tiles;
    }
    Ok(config)
}

fn build_model(config: &DemConfig) -> tiledem::Result<ElevationModel> {
    config
        .model_builder()?
        .download_callback(Box::new(|msg: &str| info!("{}", msg)))
        .build()
}

fn run(cli: &Cli) -> tiledem::Result<()> {
    let config = effective_config(cli)?;

    match &cli.command {
        Commands::Query { lat, lon } => {
            let model = build_model(&config)?;
            let start = Instant::now();
            let geo = GeoPos::new(*lat, *lon);
            let elevation = model.get_elevation(geo)?;
            let pixel = model.get_index(geo);
            debug!(x = pixel.x, y = pixel.y, elapsed = ?start.elapsed(), "Query complete");

            if elevation == model.descriptor().no_data_value() {
                println!("{:.6}, {:.6}: no data", lat, lon);
            } else {
                println!("{:.6}, {:.6}: {:.2} m", lat, lon, elevation);
            }
        }
        Commands::Profile {
            start_lat,
            start_lon,
            end_lat,
            end_lon,
            samples,
        } => {
            let model = build_model(&config)?;
            let no_data = model.descriptor().no_data_value();
            let profile = model.sample_line(
                GeoPos::new(*start_lat, *start_lon),
                GeoPos::new(*end_lat, *end_lon),
                *samples,
            )?;

            println!("{:>12}  {:>10}", "distance_m", "elevation");
            for (distance, elevation) in profile {
                if elevation == no_data {
                    println!("{:>12.1}  {:>10}", distance, "-");
                } else {
                    println!("{:>12.1}  {:>10.2}", distance, elevation);
                }
            }
        }
        Commands::Prefetch {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        } => {
            let model = build_model(&config)?;
            let start = Instant::now();
            let ready = model.prefetch_region(*min_lat, *max_lat, *min_lon, *max_lon)?;
            let stats = model.download_stats();
            println!(
                "{} tile(s) ready, {} downloaded ({} bytes) in {:.1}s",
                ready,
                stats.tiles_downloaded,
                stats.bytes_downloaded,
                start.elapsed().as_secs_f64()
            );
        }
        Commands::ShowConfig => {
            print!("{}", config.to_yaml()?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
