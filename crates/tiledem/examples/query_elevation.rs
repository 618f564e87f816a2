//! Example: Query elevation from an SRTM tile directory.
//!
//! Usage: cargo run --example query_elevation -- <lat> <lon> [dem_dir]
//!
//! Missing tiles are downloaded into `dem_dir`.

use std::env;
use std::time::Instant;
use tiledem::{DemFamily, DownloadCallback, ElevationModel, GeoPos, GridDescriptor, NearestNeighbour};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <lat> <lon> [dem_dir]", args[0]);
        eprintln!("Example: {} 47.6062 -122.3321 ./dem_data", args[0]);
        std::process::exit(1);
    }

    let lat: f64 = args[1].parse().expect("Invalid latitude");
    let lon: f64 = args[2].parse().expect("Invalid longitude");
    let dem_dir = args.get(3).map(|s| s.as_str()).unwrap_or("dem_data");

    let descriptor = GridDescriptor::for_family(DemFamily::Srtm3Hgt, dem_dir)
        .expect("Invalid DEM directory");
    let callback: DownloadCallback = Box::new(|msg: &str| println!("  {}", msg));
    let model = ElevationModel::builder(descriptor)
        .download_callback(callback)
        .build()
        .expect("Failed to create elevation model");

    let geo = GeoPos::new(lat, lon);
    let pixel = model.get_index(geo);
    println!(
        "Querying elevation at ({}, {}), pixel ({:.2}, {:.2})...",
        lat, lon, pixel.x, pixel.y
    );
    let query_start = Instant::now();

    match model.get_elevation(geo) {
        Ok(elevation) => {
            println!(
                "Elevation (bilinear): {:.2} meters ({:.2}s)",
                elevation,
                query_start.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    // A second model finds the tile on disk
    let query_start = Instant::now();
    let nearest = ElevationModel::builder(model.descriptor().clone())
        .resampling(Box::new(NearestNeighbour))
        .build()
        .and_then(|m| m.get_elevation(geo));
    if let Ok(nearest) = nearest {
        println!(
            "Elevation (nearest): {:.2} meters ({:.6}s)",
            nearest,
            query_start.elapsed().as_secs_f64()
        );
    }

    let stats = model.download_stats();
    if stats.tiles_downloaded > 0 {
        println!(
            "Downloaded {} tile(s), {} bytes",
            stats.tiles_downloaded, stats.bytes_downloaded
        );
    }
}
