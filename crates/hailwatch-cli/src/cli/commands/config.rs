//! Config command handlers.

use anyhow::{Context, Result};
use hailwatch_core::config;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn set_server(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid server URL '{url}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("invalid server URL '{url}': expected http or https");
    }

    let config_path = config::paths::config_path();
    config::Config::save_server_url_to(&config_path, url)
        .with_context(|| format!("update config at {}", config_path.display()))?;
    println!("Server set to {url}");
    Ok(())
}
