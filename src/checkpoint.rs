//! Crash-recoverable checkpoint persistence.
//!
//! A [`CheckpointStore`] manages one logical run id inside a checkpoint
//! directory. On open it scans for files matching the run id's naming
//! pattern (`{run_id}-{tag}`) and loads the most recently modified one; a
//! present-but-unreadable file is fatal rather than silently discarded.
//! Each save writes a freshly named file and then deletes every other file
//! for the run id, so exactly one checkpoint survives per run id at all
//! times.
//!
//! If the process dies before a save begins writing, the previous file
//! remains latest. A crash mid-write can leave a partial file; the next
//! open fails with a persistence error and the operator recovers manually
//! — the store never falls back to a fresh start on its own.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TrainError};
use crate::model::Layer;
use crate::state::TrainingState;

/// A single training snapshot: the exported model layers plus the full run
/// state, including both metric sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Exported model layer list (weights, biases, momenta, per-layer
    /// config).
    pub layers: Vec<Layer>,
    /// Full training state at save time.
    pub state: TrainingState,
    /// Wall-clock save timestamp (RFC 3339).
    pub saved_at: String,
}

impl Checkpoint {
    /// Snapshots the given layers and state with the current timestamp.
    #[must_use]
    pub fn new(layers: Vec<Layer>, state: TrainingState) -> Self {
        Self {
            layers,
            state,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Persists and retrieves the single latest checkpoint for one run id.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    run_id: String,
    latest: Option<Checkpoint>,
}

impl CheckpointStore {
    /// Opens a store for `run_id` under `dir`, creating the directory if
    /// needed and loading the most recently modified matching file.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Persistence`] if a matching file exists but
    /// cannot be read or decoded. This is fatal by design: resuming fresh
    /// over a corrupt checkpoint would silently discard a run.
    pub fn open(dir: impl AsRef<Path>, run_id: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let run_id = run_id.into();
        if run_id.is_empty() {
            return Err(TrainError::Config("run id must not be empty".to_string()));
        }

        std::fs::create_dir_all(&dir).map_err(|e| {
            TrainError::Persistence(format!(
                "cannot create checkpoint directory {}: {e}",
                dir.display()
            ))
        })?;

        let latest = match newest_matching_file(&dir, &run_id)? {
            Some(path) => {
                info!(file = %path.display(), "loading checkpoint");
                Some(load_checkpoint_file(&path)?)
            }
            None => None,
        };

        Ok(Self {
            dir,
            run_id,
            latest,
        })
    }

    /// The latest checkpoint: the one loaded at open, or the most recent
    /// save since.
    #[must_use]
    pub fn latest(&self) -> Option<&Checkpoint> {
        self.latest.as_ref()
    }

    /// The run id this store manages.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Writes `checkpoint` under a tag (typically the epoch number), then
    /// deletes every other file matching this run id.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Persistence`] if the write or the cleanup
    /// fails. Write failures leave the previous file in place as latest.
    pub fn save(&mut self, checkpoint: Checkpoint, tag: u64) -> Result<()> {
        let filename = format!("{}-{tag}", self.run_id);
        let path = self.dir.join(&filename);

        let file = File::create(&path).map_err(|e| {
            TrainError::Persistence(format!("cannot create checkpoint {}: {e}", path.display()))
        })?;
        serde_json::to_writer(BufWriter::new(file), &checkpoint).map_err(|e| {
            TrainError::Persistence(format!("cannot write checkpoint {}: {e}", path.display()))
        })?;

        // The new file is durable; everything else for this run id goes.
        for stale in matching_files(&self.dir, &self.run_id)? {
            if stale.file_name().and_then(|n| n.to_str()) != Some(filename.as_str()) {
                std::fs::remove_file(&stale).map_err(|e| {
                    TrainError::Persistence(format!(
                        "cannot remove stale checkpoint {}: {e}",
                        stale.display()
                    ))
                })?;
            }
        }

        info!(file = %path.display(), "checkpoint saved");
        self.latest = Some(checkpoint);
        Ok(())
    }
}

/// Whether `name` matches `{run_id}-{tag}` with a numeric tag.
fn parse_tag(name: &str, run_id: &str) -> Option<u64> {
    name.strip_prefix(run_id)?
        .strip_prefix('-')?
        .parse::<u64>()
        .ok()
}

/// All files in `dir` matching the run id's naming pattern.
fn matching_files(dir: &Path, run_id: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        TrainError::Persistence(format!(
            "cannot read checkpoint directory {}: {e}",
            dir.display()
        ))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            TrainError::Persistence(format!("cannot read directory entry: {e}"))
        })?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| parse_tag(n, run_id))
            .is_some();
        if matches {
            files.push(path);
        }
    }
    Ok(files)
}

/// The most recently modified matching file, if any.
fn newest_matching_file(dir: &Path, run_id: &str) -> Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for path in matching_files(dir, run_id)? {
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| {
                TrainError::Persistence(format!("cannot stat {}: {e}", path.display()))
            })?;
        let newer = newest
            .as_ref()
            .map_or(true, |(best, _)| modified >= *best);
        if newer {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn load_checkpoint_file(path: &Path) -> Result<Checkpoint> {
    let file = File::open(path).map_err(|e| {
        TrainError::Persistence(format!("cannot open checkpoint {}: {e}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        TrainError::Persistence(format!("cannot decode checkpoint {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Layer, LayerKind};
    use crate::state::MetricRecord;
    use tempfile::TempDir;

    fn sample_checkpoint(batch: u64) -> Checkpoint {
        let mut state = TrainingState::new();
        state.batch = batch;
        state.epoch = 1;
        state.push_train_record(MetricRecord::from_step(2.0, 0.5, 32, 0.1));
        let mut fc = Layer::untrained("fc1", LayerKind::FullyConnected);
        fc.weight = Some(ndarray::Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap());
        Checkpoint::new(vec![fc], state)
    }

    #[test]
    fn test_open_empty_directory_has_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path(), "test7").unwrap();
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "test7").unwrap();
        let checkpoint = sample_checkpoint(12);
        store.save(checkpoint.clone(), 3).unwrap();

        let reopened = CheckpointStore::open(dir.path(), "test7").unwrap();
        let loaded = reopened.latest().unwrap();
        assert_eq!(loaded.state.batch, 12);
        assert_eq!(loaded.layers, checkpoint.layers);
        assert_eq!(loaded.state.train_records, checkpoint.state.train_records);
    }

    #[test]
    fn test_exactly_one_file_after_repeated_saves() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "test7").unwrap();
        for tag in 0..5 {
            store.save(sample_checkpoint(tag), tag).unwrap();
        }
        let files = matching_files(dir.path(), "test7").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("test7-4"));
    }

    #[test]
    fn test_save_updates_in_memory_latest() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path(), "test7").unwrap();
        store.save(sample_checkpoint(1), 0).unwrap();
        store.save(sample_checkpoint(2), 1).unwrap();
        assert_eq!(store.latest().unwrap().state.batch, 2);
    }

    #[test]
    fn test_corrupt_checkpoint_is_fatal_on_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("test7-3"), b"not json").unwrap();
        let err = CheckpointStore::open(dir.path(), "test7").unwrap_err();
        assert!(matches!(err, TrainError::Persistence(_)));
    }

    #[test]
    fn test_other_run_ids_left_untouched() {
        let dir = TempDir::new().unwrap();
        let mut other = CheckpointStore::open(dir.path(), "test8").unwrap();
        other.save(sample_checkpoint(1), 0).unwrap();

        let mut store = CheckpointStore::open(dir.path(), "test7").unwrap();
        store.save(sample_checkpoint(2), 0).unwrap();
        store.save(sample_checkpoint(3), 1).unwrap();

        assert_eq!(matching_files(dir.path(), "test8").unwrap().len(), 1);
    }

    #[test]
    fn test_tag_parsing_rejects_lookalikes() {
        assert_eq!(parse_tag("test7-12", "test7"), Some(12));
        assert_eq!(parse_tag("test7-", "test7"), None);
        assert_eq!(parse_tag("test70-1", "test7"), None);
        assert_eq!(parse_tag("test7-abc", "test7"), None);
        assert_eq!(parse_tag("other-1", "test7"), None);
    }
}
