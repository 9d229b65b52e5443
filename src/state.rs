use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LimitsConfig;
use crate::storage::{self, StorageError};

const STATE_FILE: &str = "instances.json";
const SETTINGS_FILE: &str = "settings.json";
const LOCK_SUFFIX: &str = ".lock";

/// On-disk locations of the persisted documents and their lock files.
///
/// Each document is paired with its own lock resource; every read-modify-write
/// of a document happens under the matching lock.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub state_file: PathBuf,
    pub state_lock: PathBuf,
    pub settings_file: PathBuf,
    pub settings_lock: PathBuf,
}

impl StatePaths {
    pub fn new(data_dir: &Path) -> Self {
        let state_file = data_dir.join(STATE_FILE);
        let settings_file = data_dir.join(SETTINGS_FILE);
        Self {
            state_lock: lock_path(&state_file),
            settings_lock: lock_path(&settings_file),
            state_file,
            settings_file,
        }
    }

    pub fn default_data_dir() -> PathBuf {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "arena").expect("Unable to find user directory");
        let data_dir = proj_dirs.data_local_dir();

        fs::create_dir_all(data_dir).expect("Failed to create local data dir");

        data_dir.to_path_buf()
    }
}

fn lock_path(file: &Path) -> PathBuf {
    let mut os = file.as_os_str().to_owned();
    os.push(LOCK_SUFFIX);
    PathBuf::from(os)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Error,
}

impl InstanceStatus {
    /// A live instance holds a quota slot and blocks a duplicate start.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// One tracked sandbox instance. Absence of a record means released.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Instance {
    pub instance_id: u64,
    pub problem: String,
    pub challenge_id: String,
    pub title: String,
    pub owner: String,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_time: String,
    pub updated_time: String,
}

/// The persisted instance table. Keys of `instances` are decimal instance ids.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StateDoc {
    pub next_instance_id: u64,
    pub instances: HashMap<String, Instance>,
}

impl Default for StateDoc {
    fn default() -> Self {
        Self {
            next_instance_id: 1,
            instances: HashMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SettingsDoc {
    pub user_instance_limit: u64,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("user_instance_limit must be at most {max}")]
    AboveMaximum { max: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Returns the next instance id and advances the counter.
///
/// Ids are monotonic and never recycled, even after the instance is
/// deleted. Callable only while holding the instance-table lock.
pub fn allocate_instance_id(doc: &mut StateDoc) -> u64 {
    let instance_id = doc.next_instance_id;
    doc.next_instance_id += 1;
    instance_id
}

/// Loads the instance table. Callers must already hold the state lock.
///
/// A missing document is the empty table; a corrupt one is replaced by the
/// empty table with a warning. Neither is an error for the caller.
pub fn load_state_unlocked(paths: &StatePaths) -> StateDoc {
    match storage::read_json::<StateDoc>(&paths.state_file) {
        Ok(Some(mut doc)) => {
            if doc.next_instance_id < 1 {
                doc.next_instance_id = 1;
            }
            doc
        }
        Ok(None) => StateDoc::default(),
        Err(e) => {
            log::warn!("unreadable instance table, starting from an empty one: {e}");
            StateDoc::default()
        }
    }
}

/// Persists the instance table. Callers must already hold the state lock.
pub fn save_state_unlocked(paths: &StatePaths, doc: &StateDoc) -> Result<(), StorageError> {
    storage::atomic_write_json(&paths.state_file, doc)
}

pub fn load_settings_unlocked(paths: &StatePaths, limits: &LimitsConfig) -> SettingsDoc {
    let default = SettingsDoc {
        user_instance_limit: limits.default_user_instance_limit,
    };
    match storage::read_json::<SettingsDoc>(&paths.settings_file) {
        Ok(Some(mut doc)) => {
            if doc.user_instance_limit > limits.max_user_instance_limit {
                log::warn!(
                    "stored user_instance_limit {} exceeds maximum {}, clamping",
                    doc.user_instance_limit,
                    limits.max_user_instance_limit
                );
                doc.user_instance_limit = limits.max_user_instance_limit;
            }
            doc
        }
        Ok(None) => default,
        Err(e) => {
            log::warn!(
                "unreadable settings, using default limit {}: {e}",
                default.user_instance_limit
            );
            default
        }
    }
}

pub fn save_settings_unlocked(paths: &StatePaths, doc: &SettingsDoc) -> Result<(), StorageError> {
    storage::atomic_write_json(&paths.settings_file, doc)
}

/// Current per-user concurrent-instance limit, read under the settings lock.
pub fn user_instance_limit(paths: &StatePaths, limits: &LimitsConfig) -> Result<u64, StorageError> {
    storage::with_lock(&paths.settings_lock, || {
        load_settings_unlocked(paths, limits).user_instance_limit
    })
}

/// Updates the per-user limit under the settings lock.
pub fn set_user_instance_limit(
    paths: &StatePaths,
    limits: &LimitsConfig,
    limit: u64,
) -> Result<u64, SettingsError> {
    if limit > limits.max_user_instance_limit {
        return Err(SettingsError::AboveMaximum {
            max: limits.max_user_instance_limit,
        });
    }

    storage::with_lock(&paths.settings_lock, || {
        let mut doc = load_settings_unlocked(paths, limits);
        doc.user_instance_limit = limit;
        save_settings_unlocked(paths, &doc)
    })??;
    Ok(limit)
}

/// Removes the persisted instance table, e.g. for the `--flush-data` flag.
pub fn remove_state(paths: &StatePaths) {
    if let Err(e) = fs::remove_file(&paths.state_file) {
        log::warn!(
            "unable to remove instance state at {}: {e}",
            paths.state_file.display()
        );
    } else {
        log::info!("removed instance state at {}", paths.state_file.display());
    }
    let _ = fs::remove_file(&paths.state_lock);
}
