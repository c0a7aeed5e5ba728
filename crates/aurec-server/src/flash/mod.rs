//! Flat flash filesystem backed by a host directory.
//!
//! The device filesystem has a fixed capacity, a single flat directory and a short path limit.
//! [`FlashFs`] reproduces those constraints over a local directory: free space is
//! `capacity - sum(file sizes)`, recomputed from the directory on every query so concurrent
//! writers always see each other's progress.

mod guard;

use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use aurec_pcm::{size_patches, HEADER_LEN};

pub use guard::StorageGuard;

/// SPIFFS limit: 31 bytes including the leading `/`.
pub const DEFAULT_MAX_PATH_LEN: usize = 31;
/// Usable size of the default 1.5 MiB SPIFFS partition.
pub const DEFAULT_CAPACITY_BYTES: u64 = 1_441_792;
pub const AUDIO_EXTENSIONS: [&str; 2] = [".wav", ".mp3"];

#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error("invalid path: {path:?}")]
    InvalidPath { path: String },
    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },
    #[error("file not found")]
    NotFound,
    #[error("insufficient space: need {needed} bytes, {available} available")]
    NoSpace { needed: u64, available: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A validated flat path, displayed with its leading `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlashPath {
    name: String,
}

impl FlashPath {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased extension including the dot, if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rfind('.')
            .filter(|&idx| idx > 0)
            .map(|idx| self.name[idx..].to_ascii_lowercase())
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension().as_deref() == Some(ext)
    }

    pub fn is_audio(&self) -> bool {
        is_audio_name(&self.name)
    }
}

impl fmt::Display for FlashPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    capacity: u64,
    max_path_len: usize,
}

#[derive(Debug, Clone)]
pub struct FlashFs {
    inner: Arc<Inner>,
}

impl FlashFs {
    pub fn new(root: impl Into<PathBuf>, capacity: u64) -> Self {
        Self::with_max_path_len(root, capacity, DEFAULT_MAX_PATH_LEN)
    }

    pub fn with_max_path_len(root: impl Into<PathBuf>, capacity: u64, max_path_len: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                capacity,
                max_path_len,
            }),
        }
    }

    /// Create the backing directory if needed.
    pub async fn init(&self) -> Result<(), FlashError> {
        fs::create_dir_all(&self.inner.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &std::path::Path {
        &self.inner.root
    }

    /// Validate a client-supplied path (`/name` or `name`).
    pub fn resolve(&self, raw: &str) -> Result<FlashPath, FlashError> {
        let name = raw.strip_prefix('/').unwrap_or(raw);

        let is_allowed = name.bytes().all(|b| {
            matches!(
                b,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' | b' '
            )
        });
        if name.is_empty() || name == "." || name == ".." || !is_allowed {
            return Err(FlashError::InvalidPath {
                path: truncate_for_error(raw, 64),
            });
        }

        let len = name.len() + 1;
        if len > self.inner.max_path_len {
            return Err(FlashError::PathTooLong {
                len,
                max: self.inner.max_path_len,
            });
        }

        Ok(FlashPath {
            name: name.to_string(),
        })
    }

    pub fn total_space(&self) -> u64 {
        self.inner.capacity
    }

    pub async fn used_space(&self) -> Result<u64, FlashError> {
        let mut dir = fs::read_dir(&self.inner.root).await?;
        let mut used = 0u64;
        while let Some(entry) = dir.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // Removed between listing and stat.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if meta.is_file() {
                used = used.saturating_add(meta.len());
            }
        }
        Ok(used)
    }

    pub async fn available_space(&self) -> Result<u64, FlashError> {
        Ok(self.total_space().saturating_sub(self.used_space().await?))
    }

    pub async fn exists(&self, path: &FlashPath) -> Result<bool, FlashError> {
        match self.size(path).await {
            Ok(_) => Ok(true),
            Err(FlashError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn size(&self, path: &FlashPath) -> Result<u64, FlashError> {
        let meta = fs::metadata(self.host_path(path))
            .await
            .map_err(map_not_found)?;
        if !meta.is_file() {
            return Err(FlashError::NotFound);
        }
        Ok(meta.len())
    }

    /// All regular files, sorted by name.
    pub async fn list(&self) -> Result<Vec<FlashEntry>, FlashError> {
        let mut dir = fs::read_dir(&self.inner.root).await?;
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            out.push(FlashEntry {
                path: format!("/{name}"),
                name,
                size: meta.len(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Create (or truncate) a file for writing.
    pub async fn create(&self, path: &FlashPath) -> Result<FlashFile, FlashError> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.host_path(path))
            .await?;
        Ok(FlashFile {
            file,
            fs: self.clone(),
            path: path.clone(),
        })
    }

    /// Open an existing file for reading.
    pub async fn open(&self, path: &FlashPath) -> Result<FlashFile, FlashError> {
        let file = fs::File::open(self.host_path(path))
            .await
            .map_err(map_not_found)?;
        Ok(FlashFile {
            file,
            fs: self.clone(),
            path: path.clone(),
        })
    }

    pub async fn remove(&self, path: &FlashPath) -> Result<(), FlashError> {
        fs::remove_file(self.host_path(path))
            .await
            .map_err(map_not_found)
    }

    fn host_path(&self, path: &FlashPath) -> PathBuf {
        self.inner.root.join(&path.name)
    }
}

/// An open file on the flash filesystem.
pub struct FlashFile {
    file: fs::File,
    fs: FlashFs,
    path: FlashPath,
}

impl FlashFile {
    pub fn path(&self) -> &FlashPath {
        &self.path
    }

    /// Append `buf` at the current position.
    ///
    /// The filesystem refuses writes that do not fit in the free space it reports at the moment
    /// of the write; nothing is written in that case.
    pub async fn append(&mut self, buf: &[u8]) -> Result<(), FlashError> {
        let available = self.fs.available_space().await?;
        let needed = buf.len() as u64;
        if needed > available {
            return Err(FlashError::NoSpace { needed, available });
        }
        self.file.write_all(buf).await?;
        // Wait for the write to land so the next free-space query sees it.
        self.file.flush().await?;
        Ok(())
    }

    /// Overwrite bytes at `offset` without moving the append position.
    pub async fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<(), FlashError> {
        let resume = self.file.seek(SeekFrom::Current(0)).await?;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.file.seek(SeekFrom::Start(resume)).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), FlashError> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes; `0` means end of file.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, FlashError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Read the container header from the start of the file.
    ///
    /// Returns `Ok(None)` if the file is shorter than a header.
    pub async fn read_header(&mut self) -> Result<Option<[u8; HEADER_LEN]>, FlashError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        let mut raw = [0u8; HEADER_LEN];
        let n = self.read_chunk(&mut raw).await?;
        Ok((n == HEADER_LEN).then_some(raw))
    }

    /// Flush the payload, then patch both container size fields to describe `data_size` bytes.
    ///
    /// Called once per recording, after its last chunk.
    pub async fn finalize(&mut self, data_size: u64) -> Result<(), FlashError> {
        self.flush().await?;
        let data_size = u32::try_from(data_size).unwrap_or(u32::MAX);
        for patch in size_patches(data_size) {
            self.patch(patch.offset, &patch.bytes).await?;
        }
        self.flush().await
    }
}

/// Whether a bare file name carries one of [`AUDIO_EXTENSIONS`].
pub fn is_audio_name(name: &str) -> bool {
    name.rfind('.').filter(|&idx| idx > 0).is_some_and(|idx| {
        AUDIO_EXTENSIONS
            .iter()
            .any(|ext| name[idx..].eq_ignore_ascii_case(ext))
    })
}

/// Human-readable size the way the device UI shows it.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    }
}

fn map_not_found(err: std::io::Error) -> FlashError {
    if err.kind() == std::io::ErrorKind::NotFound {
        FlashError::NotFound
    } else {
        FlashError::Io(err)
    }
}

fn truncate_for_error(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_accepts_flat_names() {
        let flash = FlashFs::new("unused", 0);
        let path = flash.resolve("/x.wav").unwrap();
        assert_eq!(path.name(), "x.wav");
        assert_eq!(path.to_string(), "/x.wav");
        assert_eq!(flash.resolve("x.wav").unwrap(), path);
        assert!(path.is_audio());
        assert!(path.has_extension(".wav"));
    }

    #[test]
    fn resolve_rejects_traversal_and_nesting() {
        let flash = FlashFs::new("unused", 0);
        for raw in ["", "/", "/..", "/.", "/a/b.wav", "../x.wav", "/x\\y.wav", "/\u{e9}.wav"] {
            assert!(
                matches!(flash.resolve(raw), Err(FlashError::InvalidPath { .. })),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn resolve_enforces_path_length_including_slash() {
        let flash = FlashFs::new("unused", 0);
        let ok = format!("/{}", "a".repeat(26)) + ".wav";
        assert_eq!(ok.len(), 31);
        assert!(flash.resolve(&ok).is_ok());

        let too_long = format!("/{}", "a".repeat(27)) + ".wav";
        assert!(matches!(
            flash.resolve(&too_long),
            Err(FlashError::PathTooLong { len: 32, max: 31 })
        ));
    }

    #[test]
    fn extension_handling() {
        let flash = FlashFs::new("unused", 0);
        assert!(!flash.resolve("/track").unwrap().is_audio());
        assert!(flash.resolve("/SONG.MP3").unwrap().is_audio());
        assert!(!flash.resolve("/notes.txt").unwrap().is_audio());
        assert_eq!(flash.resolve("/.wav").unwrap().extension(), None);
        assert!(is_audio_name("take 2.WAV"));
        assert!(!is_audio_name(".mp3"));
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.00 GB");
    }

    #[tokio::test]
    async fn available_space_tracks_live_usage() {
        let dir = tempdir().unwrap();
        let flash = FlashFs::new(dir.path(), 1000);
        assert_eq!(flash.available_space().await.unwrap(), 1000);

        let path = flash.resolve("/a.wav").unwrap();
        let mut file = flash.create(&path).await.unwrap();
        file.append(&[0u8; 300]).await.unwrap();
        file.flush().await.unwrap();
        assert_eq!(flash.available_space().await.unwrap(), 700);

        // Another writer sees the first one's bytes without any caching.
        let other = flash.resolve("/b.wav").unwrap();
        let mut second = flash.create(&other).await.unwrap();
        second.append(&[0u8; 700]).await.unwrap();
        assert_eq!(flash.available_space().await.unwrap(), 0);

        let err = file.append(&[0u8; 1]).await.unwrap_err();
        assert!(matches!(
            err,
            FlashError::NoSpace {
                needed: 1,
                available: 0
            }
        ));
        assert_eq!(flash.size(&path).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn patch_keeps_append_position() {
        let dir = tempdir().unwrap();
        let flash = FlashFs::new(dir.path(), 1 << 20);
        let path = flash.resolve("/p.wav").unwrap();

        let mut file = flash.create(&path).await.unwrap();
        file.append(b"0123456789").await.unwrap();
        file.patch(2, b"ab").await.unwrap();
        file.append(b"XY").await.unwrap();
        file.flush().await.unwrap();

        let bytes = tokio::fs::read(dir.path().join("p.wav")).await.unwrap();
        assert_eq!(bytes, b"01ab456789XY");
    }

    #[tokio::test]
    async fn finalize_patches_only_size_fields() {
        let dir = tempdir().unwrap();
        let flash = FlashFs::new(dir.path(), 1 << 20);
        let path = flash.resolve("/f.wav").unwrap();

        let mut file = flash.create(&path).await.unwrap();
        file.append(&aurec_pcm::build_header(0, 16_000, 1, 16))
            .await
            .unwrap();
        file.append(&[0x5a; 1234]).await.unwrap();
        file.finalize(1234).await.unwrap();

        let bytes = tokio::fs::read(dir.path().join("f.wav")).await.unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 1234);
        assert_eq!(
            bytes[..HEADER_LEN],
            aurec_pcm::build_header(1234, 16_000, 1, 16)
        );
        assert!(bytes[HEADER_LEN..].iter().all(|&b| b == 0x5a));
    }

    #[tokio::test]
    async fn open_remove_and_list() {
        let dir = tempdir().unwrap();
        let flash = FlashFs::new(dir.path(), 1 << 20);
        let missing = flash.resolve("/missing.wav").unwrap();
        assert!(matches!(flash.open(&missing).await, Err(FlashError::NotFound)));
        assert!(matches!(
            flash.remove(&missing).await,
            Err(FlashError::NotFound)
        ));
        assert!(!flash.exists(&missing).await.unwrap());

        tokio::fs::write(dir.path().join("b.mp3"), b"12").await.unwrap();
        tokio::fs::write(dir.path().join("a.wav"), b"1").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

        let names: Vec<_> = flash
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.size))
            .collect();
        assert_eq!(names, vec![("/a.wav".to_string(), 1), ("/b.mp3".to_string(), 2)]);

        let a = flash.resolve("/a.wav").unwrap();
        flash.remove(&a).await.unwrap();
        assert!(!flash.exists(&a).await.unwrap());
    }

    #[tokio::test]
    async fn read_header_reports_short_files() {
        let dir = tempdir().unwrap();
        let flash = FlashFs::new(dir.path(), 1 << 20);
        tokio::fs::write(dir.path().join("short.wav"), [0u8; 10])
            .await
            .unwrap();
        let path = flash.resolve("/short.wav").unwrap();
        let mut file = flash.open(&path).await.unwrap();
        assert_eq!(file.read_header().await.unwrap(), None);
    }
}
