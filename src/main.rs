// src/main.rs - radiobot entry point

use std::process;

use log::error;

use radiobot::{Config, RadioStation};

#[rocket::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    println!("============================================================");
    println!("radiobot - perpetual shuffle radio");
    println!("============================================================");
    println!("Backend:      {:?}", config.backend);
    println!("Music folder: {}", config.music_dir.display());

    let station = match RadioStation::from_config(&config).await {
        Ok(station) => station,
        Err(e) => {
            error!("Failed to start: {}", e);
            process::exit(1);
        }
    };

    let tracks = station.catalog.len();
    if tracks == 0 {
        println!("No tracks yet. Add MP3 files to {} or add remote tracks", config.music_dir.display());
    } else {
        println!("Tracks:       {}", tracks);
    }
    println!("Listen at:    http://{}:{}/stream/<channel>?user=<name>", config.host, config.port);
    println!("============================================================");

    let figment = rocket::Config::figment()
        .merge(("address", config.host.clone()))
        .merge(("port", config.port));

    let player = station.player.clone();
    let result = station.rocket(figment).launch().await;

    if let Err(e) = player.shutdown().await {
        error!("Player did not shut down cleanly: {}", e);
    }
    if let Err(e) = result {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
