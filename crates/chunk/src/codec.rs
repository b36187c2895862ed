use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use backhaul_protocol::DigestAlgorithm;

use crate::digest::{digest_bytes, digest_file, digest_range, verify_bytes};
use crate::plan::{ChunkDescriptor, ChunkStatus, plan_chunks};
use crate::ChunkError;

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a source file as a fixed-size chunk plan.
///
/// Chunks can be read in any order, any number of times; resume and
/// selective re-send both reduce to "read these indices again".
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    plan: Vec<ChunkDescriptor>,
    algorithm: DigestAlgorithm,
    size: u64,
}

impl ChunkReader {
    /// Opens `path` and builds its chunk plan.
    pub fn open(
        path: &Path,
        chunk_size: u32,
        algorithm: DigestAlgorithm,
    ) -> Result<Self, ChunkError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let plan = plan_chunks(size, chunk_size)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            plan,
            algorithm,
            size,
        })
    }

    /// Total file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The ordered chunk plan.
    pub fn plan(&self) -> &[ChunkDescriptor] {
        &self.plan
    }

    /// Number of chunks in the plan.
    pub fn chunk_count(&self) -> u32 {
        self.plan.len() as u32
    }

    /// Reads chunk `index`, computing and recording its digest.
    ///
    /// Returns the up-to-date descriptor and the payload bytes.
    pub fn read(&mut self, index: u32) -> Result<(ChunkDescriptor, Vec<u8>), ChunkError> {
        let count = self.plan.len() as u32;
        let desc = self
            .plan
            .get_mut(index as usize)
            .ok_or(ChunkError::IndexOutOfRange { index, count })?;

        if desc.offset + desc.len as u64 > self.size {
            return Err(ChunkError::RangeOutOfBounds {
                index,
                offset: desc.offset,
                len: desc.len,
                size: self.size,
            });
        }

        self.file.seek(SeekFrom::Start(desc.offset))?;
        let mut buf = vec![0u8; desc.len as usize];
        self.file.read_exact(&mut buf)?;

        desc.digest = digest_bytes(self.algorithm, &buf);
        Ok((desc.clone(), buf))
    }

    /// Marks a chunk's status in the plan.
    pub fn set_status(&mut self, index: u32, status: ChunkStatus) {
        if let Some(desc) = self.plan.get_mut(index as usize) {
            desc.status = status;
        }
    }

    /// Streams the whole file and returns its digest.
    pub fn file_digest(&self) -> Result<String, ChunkError> {
        digest_file(self.algorithm, &self.path)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Writes verified chunks at their declared offsets into a staging file.
///
/// The staging file (`<final>.part`) lives next to the destination so the
/// final [`finalize`](Self::finalize) rename is atomic; nothing is ever
/// visible at the final path until the whole file has verified. Reopening
/// an existing staging file preserves earlier writes, which is what makes
/// server-side resume work.
pub struct ChunkWriter {
    final_path: PathBuf,
    staging_path: PathBuf,
    file: File,
    algorithm: DigestAlgorithm,
}

impl ChunkWriter {
    /// Opens (or resumes) the staging file for `final_path`.
    pub fn create(final_path: &Path, algorithm: DigestAlgorithm) -> Result<Self, ChunkError> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let staging_path = staging_path_for(final_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&staging_path)?;

        Ok(Self {
            final_path: final_path.to_path_buf(),
            staging_path,
            file,
            algorithm,
        })
    }

    /// Verifies and writes one chunk at its declared offset.
    pub fn write_chunk(
        &mut self,
        index: u32,
        offset: u64,
        expected_digest: &str,
        data: &[u8],
    ) -> Result<(), ChunkError> {
        if !verify_bytes(self.algorithm, data, expected_digest) {
            return Err(ChunkError::ChecksumMismatch { index });
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        debug!(index, offset, len = data.len(), "chunk written to staging");
        Ok(())
    }

    /// Digest of the staging file's current contents.
    pub fn staged_digest(&mut self) -> Result<String, ChunkError> {
        self.file.flush()?;
        digest_file(self.algorithm, &self.staging_path)
    }

    /// Re-verifies the given chunk ranges against the staging file and
    /// returns the indices whose digests no longer match.
    ///
    /// Descriptors with an empty digest are skipped (no recorded hash to
    /// compare against) and reported as mismatched, forcing a re-send.
    pub fn verify_ranges(
        &mut self,
        chunks: &[ChunkDescriptor],
    ) -> Result<Vec<u32>, ChunkError> {
        self.file.flush()?;
        let mut file = File::open(&self.staging_path)?;
        let mut mismatched = Vec::new();
        for desc in chunks {
            if desc.digest.is_empty() {
                mismatched.push(desc.index);
                continue;
            }
            let actual = digest_range(self.algorithm, &mut file, desc.offset, desc.len)?;
            if actual != desc.digest {
                mismatched.push(desc.index);
            }
        }
        Ok(mismatched)
    }

    /// Flushes, syncs, and atomically renames staging into the final path.
    pub fn finalize(mut self) -> Result<PathBuf, ChunkError> {
        self.file.flush()?;
        self.file.sync_all()?;
        std::fs::rename(&self.staging_path, &self.final_path)?;
        debug!(path = %self.final_path.display(), "staging file promoted");
        Ok(self.final_path)
    }

    /// Removes the staging file (abandonment, not transient failure).
    pub fn discard(self) -> Result<(), ChunkError> {
        std::fs::remove_file(&self.staging_path)?;
        Ok(())
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

/// `<final>.part`, in the same directory as the destination.
fn staging_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    final_path.with_file_name(name)
}
