//! Data-source boundary and spooled-activation replay.
//!
//! Batch providers live outside this crate; the orchestrator pulls batches
//! through [`DataSource`] and re-partitions data between curriculum stages
//! through [`DataPartitioner`]. The one provider implemented here is
//! [`SpooledSource`], which replays chunk files a [`crate::spool::DiskSpooler`]
//! wrote in an earlier phase — the layer-wise curriculum trains its
//! sub-models on those cached activations instead of raw input.

use std::path::PathBuf;

use ndarray::{s, Array1, Array2, Ix1, Ix2};
use tracing::debug;

use crate::error::{Result, TrainError};
use crate::spool::{chunk_path, read_chunk, ACTIVATION_FIELD, LABEL_FIELD};

/// One batch of training data.
///
/// `epoch` is the source's pass counter, starting at 1. The source
/// advances it on the batch that consumes the final record of a pass, so
/// the boundary batch already reports the incremented value and a loop
/// bounded by `epoch <= max` stops without drawing from the next pass.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input rows, one case per row.
    pub data: Array2<f32>,
    /// Label per case.
    pub labels: Array1<f32>,
    /// Epoch counter reported by the source.
    pub epoch: u64,
}

impl Batch {
    /// Number of cases in the batch.
    #[must_use]
    pub fn case_count(&self) -> usize {
        self.data.nrows()
    }
}

/// A provider of training or evaluation batches.
pub trait DataSource {
    /// Returns the next batch of at most `batch_size` cases.
    fn next_batch(&mut self, batch_size: usize) -> Result<Batch>;

    /// Rewinds the source to the beginning of its first pass.
    fn reset(&mut self);
}

/// A matched pair of train and test sources for one data partition.
pub struct SourcePair {
    /// Training-split source.
    pub train: Box<dyn DataSource>,
    /// Evaluation-split source.
    pub test: Box<dyn DataSource>,
}

/// How a curriculum stage narrows the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSelector {
    /// Restrict to the leading `n` output categories.
    CategoryRange(usize),
    /// Partition by membership into `n` groups.
    GroupCount(usize),
}

/// Builds source pairs for a given data partition.
///
/// Category-wise and category-group controllers call this once per stage
/// to re-point the data at the stage's class range or grouping.
pub trait DataPartitioner {
    /// Builds train/test sources restricted by `selector`.
    fn partition(&self, selector: &DataSelector) -> Result<SourcePair>;
}

/// Replays previously spooled activation chunks as a data source.
///
/// Chunks are enumerated as `{target}.{0}` through `{target}.{count-1}`,
/// the numbering a [`crate::spool::DiskSpooler`] produces; `count` comes
/// from the spooler's `chunk_count()` recorded by the phase that wrote
/// them. Each chunk's [`ACTIVATION_FIELD`] rows become input data and its
/// [`LABEL_FIELD`] entries become labels.
#[derive(Debug)]
pub struct SpooledSource {
    target: PathBuf,
    chunk_count: usize,
    position: usize,
    cursor: usize,
    current: Option<LoadedChunk>,
    epoch: u64,
}

#[derive(Debug)]
struct LoadedChunk {
    data: Array2<f32>,
    labels: Array1<f32>,
}

impl SpooledSource {
    /// Creates a replay source over `chunk_count` chunks under `target`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `chunk_count` is zero — a phase
    /// handed an empty spool has nothing to train on.
    pub fn new(target: impl Into<PathBuf>, chunk_count: usize) -> Result<Self> {
        if chunk_count == 0 {
            return Err(TrainError::Config(
                "spooled source requires at least one chunk".to_string(),
            ));
        }
        let target = target.into();
        debug!(target_path = %target.display(), chunk_count, "replaying spooled chunks");
        Ok(Self {
            target,
            chunk_count,
            position: 0,
            cursor: 0,
            current: None,
            epoch: 1,
        })
    }

    fn load_current(&mut self) -> Result<&LoadedChunk> {
        if self.current.is_none() {
            let path = chunk_path(&self.target, self.position);
            let mut chunk = read_chunk(&path)?;
            let data = chunk
                .remove(ACTIVATION_FIELD)
                .ok_or_else(|| {
                    TrainError::Persistence(format!(
                        "chunk {} has no '{ACTIVATION_FIELD}' field",
                        path.display()
                    ))
                })?
                .into_dimensionality::<Ix2>()
                .map_err(|e| {
                    TrainError::Persistence(format!(
                        "chunk {} activations are not 2-d: {e}",
                        path.display()
                    ))
                })?;
            let labels = chunk
                .remove(LABEL_FIELD)
                .ok_or_else(|| {
                    TrainError::Persistence(format!(
                        "chunk {} has no '{LABEL_FIELD}' field",
                        path.display()
                    ))
                })?
                .into_dimensionality::<Ix1>()
                .map_err(|e| {
                    TrainError::Persistence(format!(
                        "chunk {} labels are not 1-d: {e}",
                        path.display()
                    ))
                })?;
            if data.nrows() != labels.len() {
                return Err(TrainError::Persistence(format!(
                    "chunk {} row mismatch: {} activations vs {} labels",
                    path.display(),
                    data.nrows(),
                    labels.len()
                )));
            }
            self.current = Some(LoadedChunk { data, labels });
        }
        Ok(self.current.as_ref().expect("chunk loaded above"))
    }
}

impl DataSource for SpooledSource {
    fn next_batch(&mut self, batch_size: usize) -> Result<Batch> {
        let cursor = self.cursor;
        let chunk = self.load_current()?;
        let rows = chunk.data.nrows();
        let end = (cursor + batch_size).min(rows);

        let data = chunk.data.slice(s![cursor..end, ..]).to_owned();
        let labels = chunk.labels.slice(s![cursor..end]).to_owned();

        if end == rows {
            // Chunk exhausted; step to the next one, wrapping at the end
            // of the pass.
            self.current = None;
            self.cursor = 0;
            self.position += 1;
            if self.position == self.chunk_count {
                self.position = 0;
                self.epoch += 1;
            }
        } else {
            self.cursor = end;
        }

        Ok(Batch {
            data,
            labels,
            epoch: self.epoch,
        })
    }

    fn reset(&mut self) {
        self.position = 0;
        self.cursor = 0;
        self.current = None;
        self.epoch = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::{DiskSpooler, NamedArrays, Spooler};
    use ndarray::ArrayD;
    use tempfile::TempDir;

    fn spool_batches(target: &std::path::Path, per_chunk: &[usize]) -> usize {
        let mut spooler = DiskSpooler::new(target, usize::MAX);
        let mut next_label = 0.0f32;
        for &rows in per_chunk {
            let mut batch = NamedArrays::new();
            let labels: Vec<f32> = (0..rows).map(|i| next_label + i as f32).collect();
            let data: Vec<f32> = labels.iter().flat_map(|&l| vec![l, l]).collect();
            next_label += rows as f32;
            batch.insert(
                ACTIVATION_FIELD.to_string(),
                ArrayD::from_shape_vec(vec![rows, 2], data).unwrap(),
            );
            batch.insert(
                LABEL_FIELD.to_string(),
                ArrayD::from_shape_vec(vec![rows], labels).unwrap(),
            );
            spooler.add(batch).unwrap();
            spooler.flush().unwrap();
        }
        spooler.chunk_count()
    }

    #[test]
    fn test_zero_chunks_is_config_error() {
        let err = SpooledSource::new("nowhere", 0).unwrap_err();
        assert!(matches!(err, TrainError::Config(_)));
    }

    #[test]
    fn test_replays_rows_in_spool_order() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("train-data.spool");
        let count = spool_batches(&target, &[3, 2]);
        assert_eq!(count, 2);

        let mut source = SpooledSource::new(&target, count).unwrap();
        let b1 = source.next_batch(2).unwrap();
        assert_eq!(b1.labels.to_vec(), vec![0.0, 1.0]);
        assert_eq!(b1.epoch, 1);

        let b2 = source.next_batch(2).unwrap();
        assert_eq!(b2.labels.to_vec(), vec![2.0]);
        assert_eq!(b2.epoch, 1);

        let b3 = source.next_batch(2).unwrap();
        assert_eq!(b3.labels.to_vec(), vec![3.0, 4.0]);
        // Final record of the pass: the boundary batch reports the
        // incremented epoch.
        assert_eq!(b3.epoch, 2);
    }

    #[test]
    fn test_wraps_to_first_chunk_after_pass() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("spool");
        let count = spool_batches(&target, &[2]);

        let mut source = SpooledSource::new(&target, count).unwrap();
        let first = source.next_batch(2).unwrap();
        assert_eq!(first.epoch, 2);
        let again = source.next_batch(2).unwrap();
        assert_eq!(again.labels.to_vec(), first.labels.to_vec());
        assert_eq!(again.epoch, 3);
    }

    #[test]
    fn test_reset_rewinds_to_first_pass() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("spool");
        let count = spool_batches(&target, &[2, 2]);

        let mut source = SpooledSource::new(&target, count).unwrap();
        source.next_batch(2).unwrap();
        source.next_batch(2).unwrap();
        source.reset();
        let b = source.next_batch(2).unwrap();
        assert_eq!(b.labels.to_vec(), vec![0.0, 1.0]);
        assert_eq!(b.epoch, 1);
    }

    #[test]
    fn test_missing_chunk_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("spool");
        spool_batches(&target, &[2]);

        // Claim more chunks than were written; reading chunk 1 fails.
        let mut source = SpooledSource::new(&target, 2).unwrap();
        source.next_batch(2).unwrap();
        let err = source.next_batch(2).unwrap_err();
        assert!(matches!(err, TrainError::Persistence(_)));
    }
}
