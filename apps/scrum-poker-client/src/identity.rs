//! Durable client identity: a stable client id, the cached display name and
//! the "currently voting" flag, kept in a small TOML file under the user's
//! config directory.
//!
//! Storage problems never fail the caller. A store that cannot read or write
//! its file keeps working in memory, which at worst means a fresh identity on
//! the next launch.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use scrum_poker_core::ClientId;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IdentityError;

const IDENTITY_FILE: &str = "identity.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(default)]
    client_id: Option<ClientId>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default = "default_voting")]
    voting: bool,
}

impl Default for StoredIdentity {
    fn default() -> Self {
        Self {
            client_id: None,
            display_name: None,
            voting: default_voting(),
        }
    }
}

fn default_voting() -> bool {
    true
}

#[derive(Debug)]
pub struct IdentityStore {
    path: Option<PathBuf>,
    record: StoredIdentity,
}

impl IdentityStore {
    pub fn default_path() -> Result<PathBuf, IdentityError> {
        let dirs = ProjectDirs::from("dev", "scrum-poker", "scrum-poker")
            .ok_or(IdentityError::NoConfigDir)?;
        Ok(dirs.config_dir().join(IDENTITY_FILE))
    }

    /// Opens the store at the platform default location.
    pub fn open_default() -> Self {
        match Self::default_path() {
            Ok(path) => Self::open(path),
            Err(err) => {
                warn!(error = %err, "identity storage unavailable; using an in-memory identity");
                Self::ephemeral()
            }
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let record = match load(&path) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read stored identity; starting fresh"
                );
                StoredIdentity::default()
            }
        };
        Self {
            path: Some(path),
            record,
        }
    }

    /// A store with no backing file.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            record: StoredIdentity::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the stored client id, minting and persisting one on first use.
    pub fn get_or_create_client_id(&mut self) -> ClientId {
        if let Some(client_id) = &self.record.client_id {
            return client_id.clone();
        }
        let client_id = ClientId::generate();
        self.record.client_id = Some(client_id.clone());
        self.persist();
        client_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.record.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: &str) {
        if self.record.display_name.as_deref() == Some(name) {
            return;
        }
        self.record.display_name = Some(name.to_string());
        self.persist();
    }

    pub fn voting(&self) -> bool {
        self.record.voting
    }

    pub fn set_voting(&mut self, voting: bool) {
        if self.record.voting == voting {
            return;
        }
        self.record.voting = voting;
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = save(path, &self.record) {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to persist identity; changes are kept in memory only"
            );
        }
    }
}

fn load(path: &Path) -> Result<StoredIdentity, IdentityError> {
    if !path.exists() {
        return Ok(StoredIdentity::default());
    }
    let raw = fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

fn save(path: &Path, record: &StoredIdentity) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string_pretty(record)?;
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
