#[macro_use]
extern crate rocket;

mod api;
mod cache;
mod config;
mod images;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use cache::ImageCache;
use config::AppConfig;
use dotenv::dotenv;
use env_logger::Env;
use images::{HttpOrigin, ImageProxy};
use log::{error, info};
use rocket::{
    figment::{
        providers::{Format, Toml},
        Figment, Profile,
    },
    Build, Config, Rocket,
};

pub fn build_rocket(figment: Figment, image_cache: ImageCache, image_proxy: ImageProxy) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(image_cache)
        .manage(image_proxy)
        .mount("/", routes![api::image::proxy_image])
}

#[launch]
async fn rocket() -> _ {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let mut figment = Figment::from(Config::default())
        .merge(Toml::file("App.toml").nested());

    if let Ok(timeout) = env::var("IMAGE_PROXY_TIMEOUT") {
        match timeout.trim().parse::<u64>() {
            Ok(secs) => figment = figment.merge(("timeout", secs)),
            Err(e) => error!("Ignoring IMAGE_PROXY_TIMEOUT={}: {}", timeout, e),
        }
    }

    if let Ok(ttl) = env::var("IMAGE_CACHE_TTL") {
        match ttl.trim().parse::<u64>() {
            Ok(secs) => figment = figment.merge(("image_cache_ttl", secs)),
            Err(e) => error!("Ignoring IMAGE_CACHE_TTL={}: {}", ttl, e),
        }
    }

    figment = figment.select(Profile::from_env_or("APP_PROFILE", "default"));

    // App config
    let config = match figment.extract::<AppConfig>() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded successfully");

    let origin = match HttpOrigin::new(
        Duration::from_secs(config.timeout),
        &config.user_agent,
        config.max_source_bytes,
    ) {
        Ok(origin) => origin,
        Err(e) => {
            error!("Failed to create origin client: {}", e);
            std::process::exit(1);
        }
    };

    let image_cache = ImageCache::new(
        Duration::from_secs(config.image_cache_ttl),
        config.image_cache_sweep_probability,
    );
    info!(
        "Image cache initialized (ttl {}s, sweep probability {})",
        config.image_cache_ttl, config.image_cache_sweep_probability
    );

    let image_proxy = ImageProxy::new(Arc::new(origin), config.max_source_pixels);
    info!(
        "Image proxy initialized (timeout {}s, max {} bytes, max {} pixels)",
        config.timeout, config.max_source_bytes, config.max_source_pixels
    );

    info!(
        "Starting image proxy on {}:{}",
        config.address, config.port
    );

    build_rocket(figment, image_cache, image_proxy)
}
