//! `ctxkit config`: Print configuration as TOML.

use super::{CmdResult, load_config};
use ctxkit_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, defaults: bool) -> CmdResult {
    if defaults {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = load_config(config_path)?;
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    println!("# Effective configuration");
    if path.exists() {
        println!("# Loaded from {}", path.display());
    } else {
        println!("# No file at {}; built-in defaults", path.display());
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
