use chrono::{DateTime, Local};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Session credential issued by a successful authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSession {
    pub token: String,
    pub username: String,
    pub saved_at: DateTime<Local>,
}

impl StoredSession {
    pub fn new(token: &str, username: &str) -> Self {
        Self {
            token: token.to_string(),
            username: username.to_string(),
            saved_at: Local::now(),
        }
    }
}

pub trait SessionStore {
    fn load(&self) -> Option<StoredSession>;
    fn save(&self, session: &StoredSession) -> std::io::Result<()>;
    fn clear(&self) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "keyauth") {
            pd.config_dir().join("session.json")
        } else {
            PathBuf::from("keyauth_session.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<StoredSession> {
        let bytes = fs::read(&self.path).ok()?;
        serde_json::from_slice::<StoredSession>(&bytes).ok()
    }

    fn save(&self, session: &StoredSession) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(session).unwrap_or_default();
        log::info!("storing session credential for {}", session.username);
        fs::write(&self.path, data)
    }

    fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("cleared stored session credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
