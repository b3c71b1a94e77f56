//! Layered configuration: defaults, optional file, `DATA_AGENT_*` environment
//! variables, then command-line flags.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::error::Result;
use crate::stream::DEFAULT_STREAM_PATH;

/// Environment variable prefix, e.g. `DATA_AGENT_BACKEND__BASE_URL`.
pub const ENV_PREFIX: &str = "DATA_AGENT";

/// Global flags shared by every subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct Cli {
    /// Config file path (YAML, TOML or JSON)
    #[arg(short, long, env = "DATA_AGENT_CONFIG", global = true)]
    pub config: Option<String>,

    /// Backend base URL
    #[arg(long, env = "DATA_AGENT_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub stream_path: String,
    pub connect_timeout_secs: u64,
}

impl BackendConfig {
    /// Full URL of the search stream endpoint.
    pub fn stream_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?.join(&self.stream_path)?)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::load_from_cli(&cli)
    }

    pub fn load_from_cli(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("backend.base_url", "http://127.0.0.1:8065")?
            .set_default("backend.stream_path", DEFAULT_STREAM_PATH)?
            .set_default("backend.connect_timeout_secs", 10)?
            .set_default("logging.format", "text")?
            .set_default("logging.filter", "info")?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        }

        // DATA_AGENT_BACKEND__BASE_URL=http://... -> backend.base_url
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Flags win over everything else.
        if let Some(base_url) = &cli.base_url {
            builder = builder.set_override("backend.base_url", base_url.as_str())?;
        }
        if let Some(format) = cli.log_format {
            let value = match format {
                LogFormat::Text => "text",
                LogFormat::Json => "json",
            };
            builder = builder.set_override("logging.format", value)?;
        }

        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }
}
