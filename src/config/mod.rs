use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub address: String,
    /// Origin fetch timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Lifetime of a transformed image in the cache, in seconds
    #[serde(default = "default_image_cache_ttl")]
    pub image_cache_ttl: u64,
    #[serde(default = "default_sweep_probability")]
    pub image_cache_sweep_probability: f64,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default = "default_max_source_pixels")]
    pub max_source_pixels: u64,
}

fn default_port() -> u16 {
    8000
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("storefront-image-proxy/{}", env!("CARGO_PKG_VERSION"))
}

fn default_image_cache_ttl() -> u64 {
    3600
}

fn default_sweep_probability() -> f64 {
    crate::cache::DEFAULT_SWEEP_PROBABILITY
}

fn default_max_source_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_max_source_pixels() -> u64 {
    50_000_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            address: default_address(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
            image_cache_ttl: default_image_cache_ttl(),
            image_cache_sweep_probability: default_sweep_probability(),
            max_source_bytes: default_max_source_bytes(),
            max_source_pixels: default_max_source_pixels(),
        }
    }
}
