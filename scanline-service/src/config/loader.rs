//! Configuration loading from files and environment variables.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::ServiceConfig;

/// Load configuration from `config.{toml,yaml,json}` (optional) and `SCANLINE__*` env vars
pub fn load_config() -> ServiceResult<ServiceConfig> {
    load_config_from(
        Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("SCANLINE")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}

/// Build configuration from an already-assembled set of sources
pub fn load_config_from(builder: ConfigBuilder<DefaultState>) -> ServiceResult<ServiceConfig> {
    let mut config: ServiceConfig = builder
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    config.ocr = config.ocr.normalized();
    Ok(config)
}
