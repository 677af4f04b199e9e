//! On-disk layout of partial segments and assembled uploads.
//!
//! Segment `i` of upload `uid` lives in `<dir>/<uid>_<i>`; the assembled
//! file is `<dir>/<uid>`. A partial file's length is its resume offset.

use std::io;
use std::path::{Path, PathBuf};

use splitup_protocol::segment_file_name;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Directory holding segment and assembled files.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, uid: &str, index: u64) -> PathBuf {
        self.dir.join(segment_file_name(uid, index))
    }

    pub fn assembled_path(&self, uid: &str) -> PathBuf {
        self.dir.join(uid)
    }

    /// Current size of a partial segment. A missing file counts as empty.
    pub async fn segment_len(&self, uid: &str, index: u64) -> io::Result<u64> {
        match fs::metadata(self.segment_path(uid, index)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Opens a segment for appending, creating it if needed.
    pub async fn open_append(&self, uid: &str, index: u64) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(uid, index))
            .await
    }

    /// Sum of all segment sizes of an upload with `count` segments.
    ///
    /// Unreadable segments are counted as empty.
    pub async fn stored_bytes(&self, uid: &str, count: u64) -> u64 {
        let mut sum = 0u64;
        for index in 0..count {
            match self.segment_len(uid, index).await {
                Ok(len) => sum += len,
                Err(e) => {
                    tracing::warn!(uid, index, "cannot stat segment: {e}");
                }
            }
        }
        sum
    }

    /// Concatenates segments `0..count` into the assembled file.
    ///
    /// The destination is created or truncated first and flushed after each
    /// segment. Returns the number of bytes written. On error the
    /// destination is left as far as it got.
    pub async fn assemble(&self, uid: &str, count: u64) -> io::Result<u64> {
        let mut dest = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.assembled_path(uid))
            .await?;

        let mut written = 0u64;
        for index in 0..count {
            let mut segment = File::open(self.segment_path(uid, index)).await?;
            written += tokio::io::copy(&mut segment, &mut dest).await?;
            dest.flush().await?;
        }
        dest.sync_all().await?;
        Ok(written)
    }

    /// Deletes every segment file. Failures are logged and skipped.
    pub async fn remove_segments(&self, uid: &str, count: u64) {
        for index in 0..count {
            let path = self.segment_path(uid, index);
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), "failed to remove segment: {e}");
            }
        }
    }
}
