use karst_core::{KarstError, Result, SealerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 17000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    /// Identity secret: peers echo it to open node-data sessions and the
    /// sealer receives it with every request.
    pub backup: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sealer: Option<SealerSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_base_path")]
    pub base: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_files: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base: default_base_path(),
            files: None,
            temp_files: None,
            db: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealerSection {
    /// `host:port` of the sealer; ws:// and http:// are derived from it.
    pub base_url: String,
    #[serde(default = "default_lifecycle_timeout_secs")]
    pub lifecycle_timeout_secs: u64,
}

/// Resolved on-disk locations of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    pub files: PathBuf,
    pub temp_files: PathBuf,
    pub db: PathBuf,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_lifecycle_timeout_secs() -> u64 {
    karst_core::seal::tee::DEFAULT_LIFECYCLE_TIMEOUT.as_secs()
}

fn default_base_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".karst"))
        .unwrap_or_else(|| PathBuf::from(".karst"))
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("KARST"))
            .build()
            .map_err(|e| KarstError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| KarstError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(KarstError::Config("port must be greater than 0".to_string()));
        }

        if self.backup.trim().is_empty() {
            return Err(KarstError::Config("backup must not be empty".to_string()));
        }

        if let Some(sealer) = &self.sealer {
            if sealer.base_url.trim().is_empty() {
                return Err(KarstError::Config("sealer.base_url must not be empty".to_string()));
            }
            if sealer.lifecycle_timeout_secs == 0 {
                return Err(KarstError::Config(
                    "sealer.lifecycle_timeout_secs must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn node_paths(&self) -> NodePaths {
        let base = expand_home(&self.paths.base);
        let pick = |explicit: &Option<PathBuf>, fallback: PathBuf| {
            explicit
                .as_deref()
                .map(expand_home)
                .unwrap_or(fallback)
        };

        NodePaths {
            files: pick(&self.paths.files, base.join("files")),
            temp_files: pick(&self.paths.temp_files, base.join("temp_files")),
            db: pick(&self.paths.db, base.join("db").join("karst.sqlite3")),
        }
    }

    pub fn sealer_config(&self) -> Option<SealerConfig> {
        self.sealer.as_ref().map(|sealer| {
            let mut config = SealerConfig::new(sealer.base_url.clone(), self.backup.clone());
            config.lifecycle_timeout = Duration::from_secs(sealer.lifecycle_timeout_secs);
            config
        })
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "karst=debug"
        } else {
            "karst=info"
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Writes a starter config to `path`, refusing to replace an existing file.
    pub fn write_default(path: &Path, backup: &str) -> Result<()> {
        if backup.trim().is_empty() {
            return Err(KarstError::Config("backup must not be empty".to_string()));
        }

        if path.exists() {
            return Err(KarstError::Config(format!(
                "'{}' already exists",
                path.display()
            )));
        }

        let config = Config {
            port: DEFAULT_PORT,
            debug: false,
            backup: backup.to_string(),
            paths: PathsConfig::default(),
            sealer: Some(SealerSection {
                base_url: "127.0.0.1:12222".to_string(),
                lifecycle_timeout_secs: default_lifecycle_timeout_secs(),
            }),
        };

        let rendered =
            toml::to_string_pretty(&config).map_err(|e| KarstError::Config(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, body: &str) -> String {
        let path = dir.join("karst.toml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            &format!(
                "backup = \"secret\"\n[paths]\nbase = \"{}\"\n",
                dir.path().join("node").display()
            ),
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.debug);
        assert_eq!(config.log_filter(), "karst=info");
        assert!(config.sealer_config().is_none());

        let paths = config.node_paths();
        assert_eq!(paths.files, dir.path().join("node").join("files"));
        assert_eq!(paths.temp_files, dir.path().join("node").join("temp_files"));
        assert_eq!(paths.db, dir.path().join("node").join("db").join("karst.sqlite3"));
    }

    #[test]
    fn explicit_paths_and_sealer() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "port = 18000\ndebug = true\nbackup = \"secret\"\n\
             [paths]\nbase = \"/srv/karst\"\ndb = \"/var/lib/karst.sqlite3\"\n\
             [sealer]\nbase_url = \"10.0.0.2:12222\"\nlifecycle_timeout_secs = 5\n",
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:18000");
        assert_eq!(config.log_filter(), "karst=debug");

        let paths = config.node_paths();
        assert_eq!(paths.files, PathBuf::from("/srv/karst/files"));
        assert_eq!(paths.db, PathBuf::from("/var/lib/karst.sqlite3"));

        let sealer = config.sealer_config().unwrap();
        assert_eq!(sealer.ws_base_url(), "ws://10.0.0.2:12222");
        assert_eq!(sealer.http_base_url(), "http://10.0.0.2:12222");
        assert_eq!(sealer.backup, "secret");
        assert_eq!(sealer.lifecycle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_empty_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "backup = \"  \"\n");

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, KarstError::Config(_)));
    }

    #[test]
    fn write_default_round_trips_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("karst.toml");

        Config::write_default(&path, "secret").unwrap();
        let config = Config::from_file(&path.to_string_lossy()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.backup, "secret");
        assert_eq!(
            config.sealer.as_ref().map(|sealer| sealer.lifecycle_timeout_secs),
            Some(20)
        );

        let err = Config::write_default(&path, "other").unwrap_err();
        assert!(matches!(err, KarstError::Config(_)));
    }

    #[test]
    fn write_default_refuses_empty_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("karst.toml");

        let err = Config::write_default(&path, " ").unwrap_err();
        assert!(matches!(err, KarstError::Config(_)));
        assert!(!path.exists());
    }
}
