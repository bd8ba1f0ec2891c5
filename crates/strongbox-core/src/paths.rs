//! Standard paths used by strongbox

use std::path::{Path, PathBuf};

/// Environment variable overriding the state directory
pub const HOME_ENV: &str = "STRONGBOX_HOME";

/// Standard strongbox paths
#[derive(Debug, Clone)]
pub struct Paths {
    /// State directory (~/.strongbox)
    pub home: PathBuf,
    /// Configuration file (~/.strongbox/config.json)
    pub config: PathBuf,
    /// PID file of the detached API server
    pub pid_file: PathBuf,
    /// Log file of the detached API server
    pub log_file: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    /// Resolve paths from `$STRONGBOX_HOME`, falling back to `~/.strongbox`
    pub fn new() -> Self {
        let home = std::env::var_os(HOME_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".strongbox")
            });

        Self::with_home(&home)
    }

    /// Lay out every path under an explicit state directory
    pub fn with_home(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            config: home.join("config.json"),
            pid_file: home.join("strongbox.pid"),
            log_file: home.join("strongbox.log"),
        }
    }

    /// Vault location used when `init` is not given one
    pub fn default_vault(&self) -> PathBuf {
        self.home.join("vault")
    }
}
