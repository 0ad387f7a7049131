//! Memory-bounded buffered spooling of per-batch arrays.
//!
//! Training phases capture small per-batch records (intermediate
//! activations plus labels) that later phases replay as training input. A
//! [`Spooler`] accumulates those records and drains them into larger
//! chunks once a size threshold is crossed:
//!
//! - [`DiskSpooler`] writes each chunk to a uniquely numbered file under a
//!   target path; downstream phases enumerate the files by
//!   [`chunk_count`](Spooler::chunk_count).
//! - [`MemorySpooler`] keeps a bounded ring of resident chunks and evicts
//!   the oldest once a global byte ceiling is exceeded — lossy by design,
//!   so callers must tolerate losing the earliest data under sustained
//!   memory pressure.
//!
//! All arrays added between two flushes share the first dimension as their
//! concatenation axis; a flush joins them per name along axis 0, preserving
//! per-batch row order.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{concatenate, ArrayD, Axis};
use tracing::debug;

use crate::error::{Result, TrainError};

/// A set of named batch-shaped arrays, keyed by field name.
pub type NamedArrays = BTreeMap<String, ArrayD<f32>>;

/// Field name under which penultimate-layer activations are spooled.
pub const ACTIVATION_FIELD: &str = "fc";

/// Field name under which batch labels are spooled.
pub const LABEL_FIELD: &str = "labels";

/// Accumulates per-batch records and emits them as concatenated chunks.
pub trait Spooler {
    /// Appends one batch's worth of named arrays.
    fn add(&mut self, batch: NamedArrays) -> Result<()>;

    /// Concatenates all buffered batches per name along axis 0, emits one
    /// chunk, and clears the buffer. Flushing an empty buffer is a no-op.
    fn flush(&mut self) -> Result<()>;

    /// Forces a final flush. Called once at run end so no buffered data is
    /// silently lost.
    fn finish(&mut self) -> Result<()> {
        self.flush()
    }

    /// Number of chunks emitted so far.
    fn chunk_count(&self) -> usize;
}

/// Total element count across all arrays in a batch.
fn element_count(batch: &NamedArrays) -> usize {
    batch.values().map(|a| a.len()).sum()
}

/// Total byte size across all arrays in a batch.
fn byte_size(batch: &NamedArrays) -> usize {
    element_count(batch) * std::mem::size_of::<f32>()
}

/// Concatenates buffered batches field-by-field along axis 0.
///
/// Field names are taken from the first batch; every buffered batch must
/// carry the same fields with compatible trailing dimensions.
fn concatenate_batches(batches: &[NamedArrays]) -> Result<NamedArrays> {
    let mut out = NamedArrays::new();
    let Some(first) = batches.first() else {
        return Ok(out);
    };
    for name in first.keys() {
        let views: Vec<_> = batches
            .iter()
            .map(|b| {
                b.get(name).map(|a| a.view()).ok_or_else(|| {
                    TrainError::Data(format!("buffered batch missing field '{name}'"))
                })
            })
            .collect::<Result<_>>()?;
        let joined = concatenate(Axis(0), &views)
            .map_err(|e| TrainError::Data(format!("cannot concatenate field '{name}': {e}")))?;
        out.insert(name.clone(), joined);
    }
    Ok(out)
}

/// Path of the `index`-th chunk file under `target`.
#[must_use]
pub fn chunk_path(target: &Path, index: usize) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Reads one serialized chunk file back into named arrays.
///
/// An unreadable or undecodable chunk is a fatal persistence error, the
/// same class as a corrupt checkpoint.
pub fn read_chunk(path: &Path) -> Result<NamedArrays> {
    let file = File::open(path)
        .map_err(|e| TrainError::Persistence(format!("cannot open chunk {}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| TrainError::Persistence(format!("cannot decode chunk {}: {e}", path.display())))
}

/// Disk-spilling spooler: flushes to numbered files once the buffered
/// element count exceeds a budget.
pub struct DiskSpooler {
    target: PathBuf,
    pending: Vec<NamedArrays>,
    pending_elements: usize,
    max_elements: usize,
    chunks_written: usize,
}

impl DiskSpooler {
    /// Default element budget, sized to keep a buffered f32 payload around
    /// 200 MB before spilling.
    pub const DEFAULT_MAX_ELEMENTS: usize = 50_000_000;

    /// Creates a spooler writing chunks as `{target}.{n}`.
    #[must_use]
    pub fn new(target: impl Into<PathBuf>, max_elements: usize) -> Self {
        let target = target.into();
        debug!(target_path = %target.display(), max_elements, "disk spooler established");
        Self {
            target,
            pending: Vec::new(),
            pending_elements: 0,
            max_elements,
            chunks_written: 0,
        }
    }

    /// Path prefix the chunk files are written under.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Spooler for DiskSpooler {
    fn add(&mut self, batch: NamedArrays) -> Result<()> {
        self.pending_elements += element_count(&batch);
        self.pending.push(batch);
        if self.pending_elements > self.max_elements {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending_elements == 0 {
            return Ok(());
        }
        let chunk = concatenate_batches(&self.pending)?;
        let path = chunk_path(&self.target, self.chunks_written);
        let file = File::create(&path).map_err(|e| {
            TrainError::Persistence(format!("cannot create chunk {}: {e}", path.display()))
        })?;
        serde_json::to_writer(BufWriter::new(file), &chunk).map_err(|e| {
            TrainError::Persistence(format!("cannot write chunk {}: {e}", path.display()))
        })?;
        debug!(chunk = %path.display(), "wrote activation chunk");
        self.pending.clear();
        self.pending_elements = 0;
        self.chunks_written += 1;
        Ok(())
    }

    fn chunk_count(&self) -> usize {
        self.chunks_written
    }
}

/// Ordered resident chunks with a running byte total.
///
/// Invariant: whenever more than one chunk is resident, the total stays at
/// or below the configured ceiling; admission evicts oldest-first until the
/// incoming chunk fits. A single chunk larger than the ceiling is admitted
/// alone — the eviction loop drains the collection and then stops.
#[derive(Debug, Default)]
pub struct MemoryChunkCollection {
    chunks: VecDeque<NamedArrays>,
    total_bytes: usize,
}

impl MemoryChunkCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunks are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Running byte total across resident chunks.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Admits a chunk, evicting oldest chunks first until it fits under
    /// `ceiling`.
    pub fn admit(&mut self, chunk: NamedArrays, ceiling: usize) {
        let incoming = byte_size(&chunk);
        while self.total_bytes + incoming > ceiling && !self.chunks.is_empty() {
            self.evict_oldest();
        }
        self.total_bytes += incoming;
        self.chunks.push_back(chunk);
    }

    /// Drops the oldest chunk, returning its byte size.
    pub fn evict_oldest(&mut self) -> Option<usize> {
        let dropped = self.chunks.pop_front()?;
        let size = byte_size(&dropped);
        self.total_bytes -= size;
        debug!(dropped_bytes = size, total_bytes = self.total_bytes, "dropped oldest memory chunk");
        Some(size)
    }

    /// Iterates resident chunks, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &NamedArrays> {
        self.chunks.iter()
    }
}

/// Memory-resident spooler: flushes into a bounded chunk collection once
/// the unflushed byte total exceeds a per-chunk cap.
pub struct MemorySpooler {
    pending: Vec<NamedArrays>,
    pending_bytes: usize,
    chunk_cap_bytes: usize,
    total_cap_bytes: usize,
    chunks: MemoryChunkCollection,
    chunks_emitted: usize,
}

impl MemorySpooler {
    /// Default per-chunk byte cap.
    pub const DEFAULT_CHUNK_CAP: usize = 50_000_000;
    /// Default global byte ceiling across resident chunks.
    pub const DEFAULT_TOTAL_CAP: usize = 2_000_000_000;

    /// Creates a spooler with the given per-chunk cap and global ceiling.
    #[must_use]
    pub fn new(chunk_cap_bytes: usize, total_cap_bytes: usize) -> Self {
        debug!(chunk_cap_bytes, total_cap_bytes, "memory spooler established");
        Self {
            pending: Vec::new(),
            pending_bytes: 0,
            chunk_cap_bytes,
            total_cap_bytes,
            chunks: MemoryChunkCollection::new(),
            chunks_emitted: 0,
        }
    }

    /// The resident chunk collection.
    #[must_use]
    pub fn chunks(&self) -> &MemoryChunkCollection {
        &self.chunks
    }
}

impl Default for MemorySpooler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHUNK_CAP, Self::DEFAULT_TOTAL_CAP)
    }
}

impl Spooler for MemorySpooler {
    fn add(&mut self, batch: NamedArrays) -> Result<()> {
        self.pending_bytes += byte_size(&batch);
        self.pending.push(batch);
        if self.pending_bytes > self.chunk_cap_bytes {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending_bytes == 0 {
            return Ok(());
        }
        let chunk = concatenate_batches(&self.pending)?;
        self.chunks.admit(chunk, self.total_cap_bytes);
        debug!(
            chunk_bytes = self.pending_bytes,
            resident_bytes = self.chunks.total_bytes(),
            "added memory chunk"
        );
        self.pending.clear();
        self.pending_bytes = 0;
        self.chunks_emitted += 1;
        Ok(())
    }

    fn chunk_count(&self) -> usize {
        self.chunks_emitted
    }
}
