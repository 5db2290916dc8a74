use std::{
    collections::BTreeSet as Set,
    path::{Path, PathBuf},
};

use std::str::FromStr;
use clap::{ArgAction, Parser};
use miette::{IntoDiagnostic, miette};
use repo_archive::{
    ArchiveFormat, ArchiveUrlResolver,
    consts::{DEFAULT_HOST_MARKER, DEFAULT_REF},
};
use serde::{Deserialize, Serialize};

pub mod consts;

#[derive(Parser, Debug, Default, Clone)]
pub struct ConfigCli {
    /// Only accept repository references on this host.
    #[arg(long, env = "REPO_ARCHIVE_HOST", help_heading = consts::CLAP_CONFIG_OPTIONS)]
    host: Option<String>,

    /// Archive format to request, `zip` or `tar-gz`.
    #[arg(long, env = "REPO_ARCHIVE_FORMAT", help_heading = consts::CLAP_CONFIG_OPTIONS)]
    archive_format: Option<ArchiveFormat>,

    /// Directory downloaded archives are stored in until they are extracted.
    #[arg(long, env = "REPO_ARCHIVE_TEMP_DIR", help_heading = consts::CLAP_CONFIG_OPTIONS)]
    temp_dir: Option<PathBuf>,

    /// Do not verify the TLS certificate of the server.
    #[arg(long, action = ArgAction::SetTrue, help_heading = consts::CLAP_CONFIG_OPTIONS)]
    tls_no_verify: bool,

    /// Token sent as a bearer token with every archive request.
    #[arg(
        long,
        env = "REPO_ARCHIVE_TOKEN",
        hide_env_values = true,
        help_heading = consts::CLAP_CONFIG_OPTIONS
    )]
    access_token: Option<String>,
}

impl From<ConfigCli> for Config {
    fn from(cli: ConfigCli) -> Self {
        Self {
            host: cli.host,
            archive_format: cli.archive_format,
            temp_dir: cli.temp_dir,
            tls_no_verify: if cli.tls_no_verify { Some(true) } else { None },
            access_token: cli.access_token,
            ..Default::default()
        }
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Substring every repository reference must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Branch fetched when no branch is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_format: Option<ArchiveFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_no_verify: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// The locations the config was merged from, lowest priority first.
    #[serde(skip)]
    pub loaded_from: Vec<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no file was found at {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read config from '{0}'")]
    ReadError(std::io::Error),
    #[error("failed to parse config of {1}: {0}")]
    ParseError(miette::Report, PathBuf),
    #[error("validation error of {1}: {0}")]
    ValidationError(miette::Report, PathBuf),
}

impl Config {
    /// Parse the given toml string and return the config together with the
    /// keys that were not recognized.
    pub fn from_toml(toml: &str) -> miette::Result<(Config, Set<String>)> {
        let de = toml_edit::de::Deserializer::from_str(toml).into_diagnostic()?;

        let mut unused_keys = Set::new();
        let config: Config = serde_ignored::deserialize(de, |path| {
            unused_keys.insert(path.to_string());
        })
        .into_diagnostic()?;

        Ok((config, unused_keys))
    }

    /// Load the config from the given path.
    pub fn from_path(path: &Path) -> Result<Config, ConfigError> {
        tracing::debug!("Loading config from {}", path.display());
        let s = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::NotADirectory =>
            {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::ReadError(e)),
        };

        let (mut config, unused_keys) =
            Config::from_toml(&s).map_err(|e| ConfigError::ParseError(e, path.to_path_buf()))?;

        if !unused_keys.is_empty() {
            tracing::warn!(
                "Ignoring '{}' in {}",
                console::style(
                    unused_keys
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
                .yellow(),
                path.display()
            );
        }

        config.loaded_from.push(path.to_path_buf());

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e, path.to_path_buf()))?;

        Ok(config)
    }

    /// Validate the config file.
    pub fn validate(&self) -> miette::Result<()> {
        if let Some(host) = &self.host {
            if host.trim().is_empty() || host.contains(char::is_whitespace) {
                return Err(miette!("`host` must be a non-empty host name, got '{host}'"));
            }
        }

        if let Some(default_ref) = &self.default_ref {
            // A throwaway reference tells us whether the branch name is usable.
            ArchiveUrlResolver::default()
                .resolve("https://github.com/owner/name", Some(default_ref))
                .map_err(|_| miette!("`default-ref` '{default_ref}' is not a valid branch name"))?;
        }

        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.is_file() {
                return Err(miette!(
                    "`temp-dir` must be a directory, but {} is a file",
                    temp_dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Load the global config files, then the file named by
    /// `REPO_ARCHIVE_CONFIG`, then the values set through environment
    /// variables. Later sources take precedence.
    pub fn load_global() -> Config {
        let mut config = Config::default();

        for p in config_path_global().into_iter().chain(config_path_env()) {
            match Self::from_path(&p) {
                Ok(c) => config = config.merge_config(c),
                Err(ConfigError::FileNotFound(_)) if !is_env_path(&p) => (),
                Err(e) => tracing::error!(
                    "Failed to load config '{}' with error: {}",
                    p.display(),
                    e
                ),
            }
        }

        // Picks up the environment variables declared on the `clap` args.
        let mut default_cli = ConfigCli::default();
        default_cli.update_from(std::env::args().take(0));
        config.merge_config(default_cli.into())
    }

    /// Load the global config and layer the given cli config on top of it.
    pub fn with_cli_config(cli: &ConfigCli) -> Config {
        let config = Config::load_global();
        config.merge_config(cli.clone().into())
    }

    /// Merge the `other` config into `self`.
    /// The `other` config will have higher priority
    #[must_use]
    pub fn merge_config(self, mut other: Config) -> Self {
        let mut loaded_from = self.loaded_from;
        loaded_from.append(&mut other.loaded_from);

        Self {
            host: other.host.or(self.host),
            default_ref: other.default_ref.or(self.default_ref),
            archive_format: other.archive_format.or(self.archive_format),
            temp_dir: other.temp_dir.or(self.temp_dir),
            tls_no_verify: other.tls_no_verify.or(self.tls_no_verify),
            access_token: other.access_token.or(self.access_token),
            user_agent: other.user_agent.or(self.user_agent),
            loaded_from,
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST_MARKER)
    }

    pub fn default_ref(&self) -> &str {
        self.default_ref.as_deref().unwrap_or(DEFAULT_REF)
    }

    pub fn archive_format(&self) -> ArchiveFormat {
        self.archive_format.unwrap_or_default()
    }

    /// Retrieve the temp directory (defaults to the system temp directory).
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Retrieve the value for the tls_no_verify field (defaults to false).
    pub fn tls_no_verify(&self) -> bool {
        self.tls_no_verify.unwrap_or(false)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(consts::USER_AGENT)
    }

    /// The resolver described by this config.
    pub fn resolver(&self) -> ArchiveUrlResolver {
        ArchiveUrlResolver::default()
            .with_host_marker(self.host())
            .with_default_ref(self.default_ref())
            .with_format(self.archive_format())
    }
}

/// Returns the path(s) to the global config file.
pub fn config_path_global() -> Vec<PathBuf> {
    vec![
        // XDG_CONFIG_HOME is not standard on macos, but honour it when set.
        #[cfg(target_os = "macos")]
        std::env::var("XDG_CONFIG_HOME").ok().map(|d| {
            PathBuf::from(d)
                .join(consts::CONFIG_DIR)
                .join(consts::CONFIG_FILE)
        }),
        dirs::config_dir().map(|d| d.join(consts::CONFIG_DIR).join(consts::CONFIG_FILE)),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Returns the config file named by `REPO_ARCHIVE_CONFIG`, if set.
pub fn config_path_env() -> Option<PathBuf> {
    std::env::var_os(consts::CONFIG_ENV)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// A file explicitly requested through the environment must exist.
fn is_env_path(path: &Path) -> bool {
    config_path_env().is_some_and(|env| env == path)
}
