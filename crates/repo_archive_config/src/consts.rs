pub const CONFIG_DIR: &str = "repo-archive";
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable pointing at an additional config file.
pub const CONFIG_ENV: &str = "REPO_ARCHIVE_CONFIG";

pub const CLAP_CONFIG_OPTIONS: &str = "Config Options";

pub const USER_AGENT: &str = concat!("repo-archive/", env!("CARGO_PKG_VERSION"));
