//! Embedding sets and their on-disk artifact.
//!
//! An [`EmbeddingSet`] maps image ids to fixed-length embeddings. Iteration
//! is always in ascending image id order, which is the canonical order the
//! clustering policies depend on for reproducible labels.
//!
//! # Storage Format
//!
//! The artifact is a versioned little-endian binary container:
//! - Header (16 bytes): magic `FEMB`, version, dimension, record count
//! - Records: id length (u32), UTF-8 id bytes, `dimension` f32 values
//!
//! Loading memory-maps the file and validates every length against the
//! header, so truncated or padded files are reported as corrupt instead of
//! being partially accepted.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::io::write_atomic;
use crate::vector::types::{VectorDimension, validate_finite};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify embedding artifacts.
const MAGIC_BYTES: &[u8; 4] = b"FEMB";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Upper bound on a single image id, guards against garbage length fields.
const MAX_ID_LEN: usize = 4096;

/// Mapping from image id to embedding, with a fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSet {
    dimension: VectorDimension,
    entries: BTreeMap<String, Vec<f32>>,
}

impl EmbeddingSet {
    /// Creates an empty set for embeddings of `dimension`.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    /// Builds a set from raw entries, skipping malformed ones with a warning.
    ///
    /// Entries with the wrong dimension or non-finite components are
    /// dropped; the number of skipped entries is returned alongside.
    pub fn from_entries_lenient<I>(dimension: VectorDimension, entries: I) -> (Self, usize)
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut set = Self::new(dimension);
        let mut skipped = 0;
        for (image_id, vector) in entries {
            if let Err(e) = set.insert(image_id, vector) {
                warn!("Skipping embedding: {e}");
                skipped += 1;
            }
        }
        (set, skipped)
    }

    /// Inserts an embedding, replacing any previous one for the same id.
    ///
    /// Image ids must be 1 to 4096 bytes long. Returns the replaced
    /// embedding, if any.
    pub fn insert(
        &mut self,
        image_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> ClusterResult<Option<Vec<f32>>> {
        let image_id = image_id.into();
        validate_image_id(&image_id)?;
        self.dimension.validate_vector(&vector)?;
        validate_finite(&image_id, &vector)?;
        Ok(self.entries.insert(image_id, vector))
    }

    /// Unions `other` into this set; entries of `other` win on conflicts.
    pub fn merge(&mut self, other: EmbeddingSet) -> ClusterResult<()> {
        if other.dimension != self.dimension {
            return Err(ClusterError::Shape {
                expected: self.dimension.get(),
                actual: other.dimension.get(),
            });
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    pub fn remove(&mut self, image_id: &str) -> Option<Vec<f32>> {
        self.entries.remove(image_id)
    }

    #[must_use]
    pub fn get(&self, image_id: &str) -> Option<&[f32]> {
        self.entries.get(image_id).map(|v| v.as_slice())
    }

    #[must_use]
    pub fn contains(&self, image_id: &str) -> bool {
        self.entries.contains_key(image_id)
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries
            .iter()
            .map(|(id, vector)| (id.as_str(), vector.as_slice()))
    }

    /// Image ids in canonical order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Embeddings in canonical order, parallel to [`ids`](Self::ids).
    #[must_use]
    pub fn vectors(&self) -> Vec<&[f32]> {
        self.entries.values().map(Vec::as_slice).collect()
    }

    /// First entry in canonical order.
    #[must_use]
    pub fn first(&self) -> Option<(&str, &[f32])> {
        self.entries
            .iter()
            .next()
            .map(|(id, vector)| (id.as_str(), vector.as_slice()))
    }
}

impl<'a> IntoIterator for &'a EmbeddingSet {
    type Item = (&'a String, &'a Vec<f32>);
    type IntoIter = btree_map::Iter<'a, String, Vec<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Loads and saves [`EmbeddingSet`] artifacts.
pub struct EmbeddingStore;

impl EmbeddingStore {
    /// Loads an embedding artifact from disk.
    ///
    /// # Errors
    /// * `NotFound` if `path` does not exist
    /// * `Corrupt` if the payload is not a well-formed artifact
    /// * `Empty` if no valid embeddings remain
    pub fn load(path: impl AsRef<Path>) -> ClusterResult<EmbeddingSet> {
        let path = path.as_ref();
        let set = Self::load_allow_empty(path)?;
        if set.is_empty() {
            return Err(ClusterError::Empty {
                source_name: path.display().to_string(),
            });
        }
        info!(
            "Loaded {} embeddings ({}-d) from {}",
            set.len(),
            set.dimension().get(),
            path.display()
        );
        Ok(set)
    }

    /// Saves `set` with merge-on-write semantics.
    ///
    /// If an artifact already exists at `path`, the result is the union of
    /// both, with entries from `set` overriding same-key entries on disk.
    /// The write is atomic.
    pub fn save(set: &EmbeddingSet, path: impl AsRef<Path>) -> ClusterResult<()> {
        let path = path.as_ref();

        let merged = if path.exists() {
            let mut existing = Self::load_allow_empty(path)?;
            let previous = existing.len();
            existing.merge(set.clone())?;
            debug!(
                "Merging {} new embeddings into {} existing at {}",
                set.len(),
                previous,
                path.display()
            );
            existing
        } else {
            set.clone()
        };

        write_atomic(path, &Self::encode(&merged)?)?;
        info!("Saved {} embeddings to {}", merged.len(), path.display());
        Ok(())
    }

    /// Imports the extractor's JSON mapping `{"image": [f32, ...]}`.
    ///
    /// Entries that are not numeric arrays of `dimension` finite values are
    /// skipped with a warning.
    pub fn import_json(
        path: impl AsRef<Path>,
        dimension: VectorDimension,
    ) -> ClusterResult<EmbeddingSet> {
        let path = path.as_ref();
        let text = read_existing(path)?;
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| ClusterError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("expected a JSON object of image id to vector: {e}"),
            })?;

        let mut skipped = 0;
        let entries: Vec<(String, Vec<f32>)> = raw
            .into_iter()
            .filter_map(|(image_id, value)| {
                match serde_json::from_value::<Vec<f32>>(value) {
                    Ok(vector) => Some((image_id, vector)),
                    Err(e) => {
                        warn!("Skipping '{image_id}': not a numeric vector ({e})");
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();

        let (set, invalid) = EmbeddingSet::from_entries_lenient(dimension, entries);
        if skipped + invalid > 0 {
            warn!(
                "Imported {} embeddings from {}, skipped {}",
                set.len(),
                path.display(),
                skipped + invalid
            );
        }
        if set.is_empty() {
            return Err(ClusterError::Empty {
                source_name: path.display().to_string(),
            });
        }
        Ok(set)
    }

    fn load_allow_empty(path: &Path) -> ClusterResult<EmbeddingSet> {
        if !path.exists() {
            return Err(ClusterError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let read_err = |source| ClusterError::FileRead {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(read_err)?;
        let len = file.metadata().map_err(read_err)?.len() as usize;
        if len < HEADER_SIZE {
            return Err(corrupt(path, "file too small to contain header"));
        }

        // SAFETY: the mapping is read-only and dropped before returning;
        // artifacts are replaced by rename, never modified in place.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(read_err)?;
        Self::decode(path, &mmap)
    }

    fn decode(path: &Path, mmap: &Mmap) -> ClusterResult<EmbeddingSet> {
        let mut reader = ByteReader::new(mmap);

        let magic = reader.take(4).ok_or_else(|| corrupt(path, "missing magic"))?;
        if magic != MAGIC_BYTES {
            return Err(corrupt(path, "invalid magic bytes"));
        }
        let version = reader.u32().ok_or_else(|| corrupt(path, "missing version"))?;
        if version != STORAGE_VERSION {
            return Err(corrupt(
                path,
                &format!("unsupported format version {version}, expected {STORAGE_VERSION}"),
            ));
        }
        let dim_value = reader.u32().ok_or_else(|| corrupt(path, "missing dimension"))?;
        let dimension = VectorDimension::new(dim_value as usize)
            .map_err(|_| corrupt(path, "dimension is zero"))?;
        let count = reader.u32().ok_or_else(|| corrupt(path, "missing count"))? as usize;

        let mut set = EmbeddingSet::new(dimension);
        for record in 0..count {
            let id_len = reader
                .u32()
                .ok_or_else(|| corrupt(path, &format!("record {record} truncated")))?
                as usize;
            if id_len == 0 || id_len > MAX_ID_LEN {
                return Err(corrupt(path, &format!("record {record} has id length {id_len}")));
            }
            let id_bytes = reader
                .take(id_len)
                .ok_or_else(|| corrupt(path, &format!("record {record} truncated")))?;
            let image_id = std::str::from_utf8(id_bytes)
                .map_err(|_| corrupt(path, &format!("record {record} id is not UTF-8")))?
                .to_string();

            let data = reader
                .take(dimension.get() * BYTES_PER_F32)
                .ok_or_else(|| corrupt(path, &format!("record {record} truncated")))?;
            let vector: Vec<f32> = data
                .chunks_exact(BYTES_PER_F32)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            if set.contains(&image_id) {
                return Err(corrupt(path, &format!("duplicate image id '{image_id}'")));
            }
            if let Err(e) = set.insert(image_id, vector) {
                warn!("Skipping embedding in {}: {e}", path.display());
            }
        }

        if !reader.is_exhausted() {
            return Err(corrupt(path, "trailing bytes after last record"));
        }
        Ok(set)
    }

    fn encode(set: &EmbeddingSet) -> ClusterResult<Vec<u8>> {
        let dimension = set.dimension().get();
        let count = u32::try_from(set.len()).map_err(|_| ClusterError::Config {
            reason: format!("too many embeddings for one artifact: {}", set.len()),
        })?;

        let mut bytes = Vec::with_capacity(
            HEADER_SIZE + set.len() * (4 + 32 + dimension * BYTES_PER_F32),
        );
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());

        for (image_id, vector) in set.iter() {
            validate_image_id(image_id)?;
            bytes.extend_from_slice(&(image_id.len() as u32).to_le_bytes());
            bytes.extend_from_slice(image_id.as_bytes());
            for &value in vector {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(bytes)
    }
}

fn validate_image_id(image_id: &str) -> ClusterResult<()> {
    if image_id.is_empty() || image_id.len() > MAX_ID_LEN {
        return Err(ClusterError::InvalidEmbedding {
            image_id: image_id.to_string(),
            reason: format!("image id length must be 1..={MAX_ID_LEN} bytes"),
        });
    }
    Ok(())
}

fn corrupt(path: &Path, reason: &str) -> ClusterError {
    ClusterError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_existing(path: &Path) -> ClusterResult<String> {
    if !path.exists() {
        return Err(ClusterError::NotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| ClusterError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Bounds-checked cursor over a byte slice.
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let slice = self.bytes.get(self.offset..end)?;
        self.offset = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn is_exhausted(&self) -> bool {
        self.offset == self.bytes.len()
    }
}
