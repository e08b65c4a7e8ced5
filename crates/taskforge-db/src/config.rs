use std::env;
use std::path::PathBuf;

/// Database configuration.
///
/// Reads from the `TASKFORGE_DATABASE_PATH` environment variable, falling
/// back to a path under the user's data directory when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Filesystem path to the SQLite database file.
    pub database_path: PathBuf,
}

impl DbConfig {
    /// Build a config from the environment.
    ///
    /// Priority: `TASKFORGE_DATABASE_PATH` env var, then the default data-dir
    /// location.
    pub fn from_env() -> Self {
        let database_path = env::var("TASKFORGE_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        Self { database_path }
    }

    /// Build a config from an explicit path (useful for tests and CLI flags).
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    /// Default database location: `<data dir>/taskforge/taskforge.db`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskforge")
            .join("taskforge.db")
    }

    /// Build the `sqlx` connection URL for this path, in `rwc` (create if
    /// missing) mode.
    pub fn connect_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path.display())
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_new() {
        let cfg = DbConfig::new("/tmp/foo.db");
        assert_eq!(cfg.database_path, PathBuf::from("/tmp/foo.db"));
    }

    #[test]
    fn connect_url_uses_rwc_mode() {
        let cfg = DbConfig::new("/tmp/foo.db");
        assert_eq!(cfg.connect_url(), "sqlite:///tmp/foo.db?mode=rwc");
    }

    #[test]
    fn default_path_ends_in_taskforge_db() {
        let path = DbConfig::default_path();
        assert_eq!(path.file_name().unwrap(), "taskforge.db");
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "taskforge");
    }
}
