//! Configuration
//!
//! Layered load: built-in defaults, then an optional `quill.toml` (working
//! directory or `QUILL_CONFIG_PATH`), then `QUILL_*` environment variables.
//! A builder allows programmatic overrides, which win over every layer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_DEBUG_PORT: u16 = 5005;

/// How contexts execute, derived from the flags below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Direct,
    NonBlocking,
    Debug,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Use the suspendable strategy instead of direct execution.
    pub non_blocking: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig { non_blocking: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            enabled: false,
            port: DEFAULT_DEBUG_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub debug: DebugConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Strategy selection. Debug wins over non-blocking, non-blocking over
    /// direct.
    pub fn mode(&self) -> ExecMode {
        if self.debug.enabled {
            ExecMode::Debug
        } else if self.execution.non_blocking {
            ExecMode::NonBlocking
        } else {
            ExecMode::Direct
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    non_blocking: Option<bool>,
    debug: Option<bool>,
    debug_port: Option<u16>,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn non_blocking(mut self, enabled: Option<bool>) -> Self {
        self.non_blocking = enabled;
        self
    }

    pub fn debug(mut self, enabled: Option<bool>) -> Self {
        self.debug = enabled;
        self
    }

    pub fn debug_port(mut self, port: Option<u16>) -> Self {
        self.debug_port = port;
        self
    }

    pub fn build(self) -> Result<Config> {
        let mut loader = config::Config::builder();

        match self
            .config_path
            .or_else(|| std::env::var("QUILL_CONFIG_PATH").ok().map(PathBuf::from))
        {
            Some(path) => {
                loader = loader.add_source(
                    File::from(path.clone())
                        .format(FileFormat::Toml)
                        .required(true),
                );
            }
            None => {
                loader = loader.add_source(
                    File::with_name("quill")
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        loader = loader.add_source(
            Environment::with_prefix("QUILL")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = loader
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("failed to parse configuration")?;

        if let Some(non_blocking) = self.non_blocking {
            config.execution.non_blocking = non_blocking;
        }
        if let Some(debug) = self.debug {
            config.debug.enabled = debug;
        }
        if let Some(port) = self.debug_port {
            config.debug.port = port;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mode(), ExecMode::Direct);
        assert_eq!(config.debug.port, DEFAULT_DEBUG_PORT);
    }

    #[test]
    fn test_mode_precedence() {
        let mut config = Config::default();
        config.execution.non_blocking = true;
        assert_eq!(config.mode(), ExecMode::NonBlocking);

        config.debug.enabled = true;
        assert_eq!(config.mode(), ExecMode::Debug);
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .non_blocking(Some(true))
            .debug_port(Some(7007))
            .build()
            .unwrap();
        assert!(config.execution.non_blocking);
        assert_eq!(config.debug.port, 7007);
    }
}
