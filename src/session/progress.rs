use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const FIRST_LEVEL_ID: u32 = 1;

#[derive(Debug)]
pub enum ProgressError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Display for ProgressError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to access progress file `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse progress file `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for ProgressError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

/// Saved player progress. Best times are kept in hundredths of a second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressData {
    pub user_id: String,
    #[serde(default = "default_unlocked_level")]
    pub unlocked_level: u32,
    #[serde(default)]
    pub best_hundredths: BTreeMap<u32, u32>,
}

fn default_unlocked_level() -> u32 {
    FIRST_LEVEL_ID
}

impl ProgressData {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            unlocked_level: FIRST_LEVEL_ID,
            best_hundredths: BTreeMap::new(),
        }
    }

    pub fn best_time(&self, level_id: u32) -> Option<f32> {
        self.best_hundredths
            .get(&level_id)
            .filter(|hundredths| **hundredths > 0)
            .map(|hundredths| *hundredths as f32 / 100.0)
    }

    /// Stores the time only when there is no previous best or it is strictly faster.
    pub fn record_time(&mut self, level_id: u32, seconds: f32) -> bool {
        if let Some(previous) = self.best_time(level_id) {
            if seconds >= previous {
                return false;
            }
        }

        let hundredths = (seconds.max(0.0) * 100.0).round() as u32;
        self.best_hundredths.insert(level_id, hundredths.max(1));
        true
    }

    /// Unlocks the level after `completed_level_id`. Never moves backwards.
    pub fn unlock_after(&mut self, completed_level_id: u32) -> bool {
        let next = completed_level_id.saturating_add(1);
        if next <= self.unlocked_level {
            return false;
        }
        self.unlocked_level = next;
        true
    }

    pub fn total_time(&self) -> f32 {
        self.best_hundredths.values().map(|h| *h as u64).sum::<u64>() as f32 / 100.0
    }
}

pub trait ProgressStore: Send + Sync + 'static {
    fn data(&self) -> &ProgressData;

    fn data_mut(&mut self) -> &mut ProgressData;

    /// Writes the current data to backing storage.
    fn persist(&mut self) -> Result<(), ProgressError>;

    fn user_id(&self) -> &str {
        &self.data().user_id
    }

    fn level_best_time(&self, level_id: u32) -> Option<f32> {
        self.data().best_time(level_id)
    }

    fn save_level_best_time(&mut self, level_id: u32, seconds: f32) -> Result<bool, ProgressError> {
        let improved = self.data_mut().record_time(level_id, seconds);
        if improved {
            self.persist()?;
        }
        Ok(improved)
    }

    fn unlock_progress(&self) -> u32 {
        self.data().unlocked_level.max(FIRST_LEVEL_ID)
    }

    fn set_unlock_progress(&mut self, completed_level_id: u32) -> Result<bool, ProgressError> {
        let unlocked = self.data_mut().unlock_after(completed_level_id);
        if unlocked {
            self.persist()?;
        }
        Ok(unlocked)
    }

    fn total_time(&self) -> f32 {
        self.data().total_time()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryProgressStore {
    data: ProgressData,
    persist_count: usize,
}

impl MemoryProgressStore {
    pub fn new(user_id: &str) -> Self {
        Self {
            data: ProgressData::new(user_id.to_string()),
            persist_count: 0,
        }
    }

    pub fn persist_count(&self) -> usize {
        self.persist_count
    }
}

impl ProgressStore for MemoryProgressStore {
    fn data(&self) -> &ProgressData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProgressData {
        &mut self.data
    }

    fn persist(&mut self) -> Result<(), ProgressError> {
        self.persist_count += 1;
        Ok(())
    }
}

/// Progress kept in a pretty-printed JSON file, rewritten on every change.
#[derive(Debug, Clone)]
pub struct JsonProgressStore {
    path: PathBuf,
    data: ProgressData,
}

impl JsonProgressStore {
    /// Opens the file, or starts fresh progress with a new player id when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ProgressError> {
        let path = path.into();
        if !path.exists() {
            let mut store = Self {
                data: ProgressData::new(generate_user_id()),
                path,
            };
            store.persist()?;
            return Ok(store);
        }

        let raw = fs::read_to_string(&path).map_err(|source| ProgressError::Io {
            path: path.clone(),
            source,
        })?;
        let data = serde_json::from_str(&raw).map_err(|source| ProgressError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for JsonProgressStore {
    fn data(&self) -> &ProgressData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProgressData {
        &mut self.data
    }

    fn persist(&mut self) -> Result<(), ProgressError> {
        let io_error = |source| ProgressError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let raw = serde_json::to_string_pretty(&self.data).map_err(|source| ProgressError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, raw).map_err(io_error)
    }
}

pub fn generate_user_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mixed = (nanos ^ 0x9E37_79B9_7F4A_7C15)
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    format!("player-{mixed:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_time_only_improves() {
        let mut data = ProgressData::new("player-test".to_string());

        assert!(data.record_time(1, 45.0));
        assert!(!data.record_time(1, 50.0));
        assert!(!data.record_time(1, 45.0));
        assert_eq!(data.best_time(1), Some(45.0));
        assert!(data.record_time(1, 40.0));
        assert_eq!(data.best_time(1), Some(40.0));
    }

    #[test]
    fn times_are_stored_in_hundredths() {
        let mut data = ProgressData::new("player-test".to_string());

        data.record_time(2, 12.345_6);

        assert_eq!(data.best_hundredths.get(&2), Some(&1235));
        assert_eq!(data.best_time(3), None);
    }

    #[test]
    fn total_is_sum_of_bests() {
        let mut data = ProgressData::new("player-test".to_string());
        data.record_time(1, 40.0);
        data.record_time(2, 12.5);
        data.record_time(2, 20.0);

        assert!((data.total_time() - 52.5).abs() < 1e-4);
    }

    #[test]
    fn unlock_progress_starts_at_one_and_never_regresses() {
        let mut store = MemoryProgressStore::new("player-test");
        assert_eq!(store.unlock_progress(), 1);

        assert!(store.set_unlock_progress(3).expect("memory store"));
        assert!(!store.set_unlock_progress(1).expect("memory store"));
        assert_eq!(store.unlock_progress(), 4);
        assert_eq!(store.persist_count(), 1);
    }

    #[test]
    fn json_store_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("tron_fg_progress_{}", generate_user_id()));
        let path = dir.join("progress.json");

        let user_id = {
            let mut store = JsonProgressStore::open(&path).expect("fresh store");
            store.save_level_best_time(1, 45.0).expect("write");
            store.set_unlock_progress(1).expect("write");
            store.user_id().to_string()
        };

        let reopened = JsonProgressStore::open(&path).expect("existing store");
        assert_eq!(reopened.user_id(), user_id);
        assert!(user_id.starts_with("player-"));
        assert_eq!(reopened.level_best_time(1), Some(45.0));
        assert_eq!(reopened.unlock_progress(), 2);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = std::env::temp_dir().join(format!("tron_fg_corrupt_{}", generate_user_id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("progress.json");
        fs::write(&path, "{ not json").expect("write fixture");

        let error = JsonProgressStore::open(&path).expect_err("corrupt file");

        assert!(matches!(error, ProgressError::Parse { .. }));
        let _ = fs::remove_dir_all(dir);
    }
}
