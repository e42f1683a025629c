use std::io;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "UPLOG_HOME";
const BASE_DIR: &str = ".uplog";
const CONFIG_DIR: &str = "config";
const TMP_DIR: &str = "tmp";
const DB_FILE: &str = "db.duckdb";
const CONFIG_FILE: &str = "config.yml";
const BUFFER_EXT: &str = "log";

/// On-disk layout of the agent's local state.
///
/// ```text
/// <base>/config/config.yml
/// <base>/config/db.duckdb
/// <base>/tmp/<session_id>.log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    base: PathBuf,
}

impl AgentPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `$UPLOG_HOME`, or `~/.uplog`.
    pub fn discover() -> io::Result<Self> {
        if let Some(base) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(base));
        }
        dirs::home_dir()
            .map(|home| Self::new(home.join(BASE_DIR)))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "cannot determine home directory"))
    }

    /// Create the directory tree (owner-only permissions on unix).
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [self.config_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base.join(CONFIG_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.base.join(TMP_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.config_dir().join(DB_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    pub fn buffer_path(&self, session_id: &str) -> PathBuf {
        self.tmp_dir().join(format!("{}.{}", session_id, BUFFER_EXT))
    }

    /// Every buffer file currently left in the tmp directory.
    pub fn buffer_files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(self.tmp_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == BUFFER_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
