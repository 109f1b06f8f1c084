pub mod parse;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use parse::{load_config, validate_config, ConfigError};
pub use types::{BrokerConfig, CheckpointConfig, Config, ShutdownConfig, SourceConfig};

/// Expands tilde (~) in paths to the user's home directory.
/// If the path starts with "~/" or is exactly "~", replaces it with the home directory.
/// Returns the path unchanged if it doesn't start with tilde or home directory cannot be determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/logship/config.yml
/// 3. /etc/logship/config.yml
///
/// Running without any config file is fine; built-in defaults apply then.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/logship/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/logship/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Settings given on the command line. Only the ones actually given replace
/// what the config file says.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub file: Option<PathBuf>,
    pub uri: Option<String>,
    pub exchange: Option<String>,
    pub exchange_type: Option<String>,
    pub routing_key: Option<String>,
    pub verbose: bool,
    pub no_follow: bool,
    pub checkpoint_interval: Option<Duration>,
    pub shutdown_grace: Option<Duration>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(file) = self.file {
            config.source.path = expand_tilde(&file);
        }
        if let Some(uri) = self.uri {
            config.broker.uri = uri;
        }
        if let Some(exchange) = self.exchange {
            config.broker.exchange = exchange;
        }
        if let Some(exchange_type) = self.exchange_type {
            config.broker.exchange_type = exchange_type;
        }
        if let Some(routing_key) = self.routing_key {
            config.broker.routing_key = routing_key;
        }
        if self.verbose {
            config.verbose = true;
        }
        if self.no_follow {
            config.source.follow = false;
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint.interval = interval;
        }
        if let Some(grace) = self.shutdown_grace {
            config.shutdown.grace_period = grace;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_with_path() {
        let path = Path::new("~/test/path");
        let expanded = expand_tilde(path);

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("test/path"));
        }
    }

    #[test]
    fn test_expand_tilde_alone() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        assert_eq!(expand_tilde(Path::new("/absolute/path")), Path::new("/absolute/path"));
        assert_eq!(expand_tilde(Path::new("relative/path")), Path::new("relative/path"));
        assert_eq!(expand_tilde(Path::new("~user/logs")), Path::new("~user/logs"));
    }

    #[test]
    fn test_explicit_config_path_wins() {
        assert_eq!(
            resolve_config_path(Some(Path::new("/tmp/custom.yml"))),
            Some(PathBuf::from("/tmp/custom.yml"))
        );
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let mut config = Config::default();
        config.broker.exchange = "from-file".to_string();
        config.broker.routing_key = "file-key".to_string();

        Overrides {
            file: Some(PathBuf::from("/var/log/nginx/access.log")),
            routing_key: Some("cli-key".to_string()),
            no_follow: true,
            checkpoint_interval: Some(Duration::from_secs(5)),
            ..Overrides::default()
        }
        .apply(&mut config);

        assert_eq!(config.source.path, PathBuf::from("/var/log/nginx/access.log"));
        assert_eq!(config.broker.exchange, "from-file");
        assert_eq!(config.broker.routing_key, "cli-key");
        assert!(!config.source.follow);
        assert!(!config.verbose);
        assert_eq!(config.checkpoint.interval, Duration::from_secs(5));
        assert_eq!(config.shutdown.grace_period, Duration::from_secs(10));
    }
}
