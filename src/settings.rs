// src/settings.rs

use std::path::{Path, PathBuf};

use clap::Parser;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::Level;

use crate::pack::Precision;

const APP_NAME: &str = "voicepack-export";
const ENV_PREFIX: &str = "VOICEPACK";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PRECISION: &str = "double";

#[derive(Parser, Debug)]
#[command(version, about = "Export a voice pack tensor to a JSON array")]
pub struct Args {
    /// Path to the source tensor file (.pt, .npy, .npz, .safetensors or .ot).
    #[arg(short, long, value_name = "SOURCE_PATH")]
    pub input: PathBuf,

    /// Path to the target JSON file.
    #[arg(short, long, value_name = "TARGET_PATH")]
    pub output: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    #[serde(deserialize_with = "deserialize_level")]
    pub level: Level,
}

#[derive(Debug, Deserialize)]
pub struct ExportSettings {
    pub precision: Precision,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log: LogSettings,
    pub export: ExportSettings,
}

impl Settings {
    /// Load settings from the user's config file, if any, and `VOICEPACK_*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(config_file().as_deref(), environment())
    }

    /// Defaults, then the optional TOML file, then `env`.
    pub fn from_sources(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::<DefaultState>::default()
            .set_default("log.level", DEFAULT_LOG_LEVEL)?
            .set_default("export.precision", DEFAULT_PRECISION)?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }

        let cfg = builder.add_source(env).build()?;

        cfg.try_deserialize()
    }
}

/// `<config dir>/voicepack-export/config.toml` on this platform.
pub fn config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
