use std::{fs, io, path::PathBuf, str::FromStr};

use clap::{Args, ValueEnum};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::ConfigError;

/// What `emit` does when a listener panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Catch the panic, keep delivering, report the first failure afterwards.
    #[default]
    Isolate,
    /// Let the panic unwind out of `emit`.
    Propagate,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(Self::Isolate),
            "propagate" => Ok(Self::Propagate),
            _ => Err(ConfigError::InvalidValue {
                key: "failure_policy",
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration overrides supplied on the command line.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Override the dispatch failure policy.
    #[arg(long, global = true, value_enum)]
    pub failure_policy: Option<FailurePolicy>,
    /// Override the log filter (e.g. `debug`, `emitter=trace`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

/// Runtime configuration of an emitter, resolved from file, env and CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterConfig {
    /// How listener panics are handled during dispatch.
    pub failure_policy: FailurePolicy,
    /// Log filter installed by the binary.
    pub log_level: String,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    dispatch: FileDispatch,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileDispatch {
    #[serde(default)]
    failure_policy: FailurePolicy,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EmitterConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        Ok(Self {
            failure_policy: file.dispatch.failure_policy,
            log_level: file.logging.level,
        })
    }

    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(args: &ConfigArgs) -> Result<Self, ConfigError> {
        // config file path precedence: CLI -> ENV -> platform config dir
        let path = args
            .config
            .clone()
            .or_else(|| std::env::var("EMITTER_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) => match fs::read_to_string(&path) {
                Ok(text) => Self::from_toml_str(&text)?,
                Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
                Err(source) => return Err(ConfigError::Io { path, source }),
            },
            None => Self::default(),
        };

        // environment overrides
        if let Ok(policy) = std::env::var("EMITTER_FAILURE_POLICY") {
            config.failure_policy = policy.parse()?;
        }
        if let Ok(level) = std::env::var("EMITTER_LOG_LEVEL") {
            if level.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "log_level",
                    value: level,
                });
            }
            config.log_level = level;
        }

        // CLI overrides
        if let Some(policy) = args.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }
}

/// Location of `emitter.toml` in the platform configuration directory.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "emitter", "emitter").map(|dirs| dirs.config_dir().join("emitter.toml"))
}
