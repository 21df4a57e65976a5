use crate::{AppSettings, RawSettings};
use color_eyre::eyre::{Result, WrapErr};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

/// Defaults shipped with the binary; any file or environment variable overrides them.
pub const DEFAULT_SETTINGS_YAML: &str = include_str!("../../../../config/settings.yaml");

const LOCAL_SETTINGS_PATH: &str = "config/settings.yaml";

/// Loads settings from the embedded defaults, then `config_file` (or `config/settings.yaml`
/// if it exists), then `APP__SECTION__KEY` environment variables.
pub fn load_app_settings(config_file: Option<&Path>) -> Result<AppSettings> {
    // Load .env first so its values take part in the environment source below.
    dotenv::from_path(".env").ok();

    let builder = default_builder();
    let builder = match config_file {
        Some(path) => {
            debug!(path = %path.display(), "Loading settings file");
            builder.add_source(File::from(path).required(true))
        }
        None => builder.add_source(File::from(Path::new(LOCAL_SETTINGS_PATH)).required(false)),
    };
    let builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    build_settings(builder)
}

/// The embedded defaults alone, without any file or environment overrides.
pub fn default_settings() -> Result<AppSettings> {
    build_settings(default_builder())
}

fn default_builder() -> ConfigBuilder<DefaultState> {
    config::Config::builder().add_source(File::from_str(DEFAULT_SETTINGS_YAML, FileFormat::Yaml))
}

fn build_settings(builder: ConfigBuilder<DefaultState>) -> Result<AppSettings> {
    let raw_settings = builder
        .build()
        .wrap_err("Cannot read settings")?
        .try_deserialize::<RawSettings>()
        .wrap_err("Invalid settings")?;
    AppSettings::try_from(raw_settings)
}
