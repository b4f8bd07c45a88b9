//! Local recordings access: enumerate and read ranges of video files under
//! `<recordings_root>/<camera_id>/merged/YYYYMMDD_HH:MM.mp4` (SPEC_FULL
//! §4.5 "FilesystemProvider contract").

use std::path::{Path, PathBuf};

use camtunnel_core::protocol::VideoEntry;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("camera not found: {0}")]
    UnknownCamera(String),
    #[error("file not found")]
    NotFound,
    #[error("path escapes the recordings root")]
    Forbidden,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Map to the `{code, message}` shape carried in `ERROR` frames.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::UnknownCamera(_) | FsError::NotFound => "not_found",
            FsError::Forbidden => "forbidden",
            FsError::Io(_) => "io_error",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ListFilters {
    pub date: Option<String>,
    pub hour: Option<u8>,
    pub page: u32,
    pub page_size: u32,
}

pub struct FilesystemProvider {
    recordings_root: PathBuf,
    known_cameras: Vec<String>,
}

impl FilesystemProvider {
    pub fn new(recordings_root: impl Into<PathBuf>, known_cameras: Vec<String>) -> Self {
        Self {
            recordings_root: recordings_root.into(),
            known_cameras,
        }
    }

    fn camera_dir(&self, camera_id: &str) -> Result<PathBuf, FsError> {
        if !self.known_cameras.iter().any(|c| c == camera_id) {
            return Err(FsError::UnknownCamera(camera_id.to_string()));
        }
        Ok(self.recordings_root.join(camera_id).join("merged"))
    }

    /// List this camera's recordings matching `filters`, sorted by
    /// timestamp descending, with `(total, page_of_entries)`.
    pub async fn list_videos(
        &self,
        camera_id: &str,
        filters: ListFilters,
    ) -> Result<(u64, Vec<VideoEntry>), FsError> {
        let dir = self.camera_dir(camera_id)?;
        let mut entries = Vec::new();

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((0, Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let Some(timestamp) = parse_timestamp(name) else { continue };

            if let Some(ref date) = filters.date {
                if !timestamp.starts_with(date.as_str()) {
                    continue;
                }
            }
            if let Some(hour) = filters.hour {
                let hour_str = format!("{hour:02}");
                if !matches_hour(&timestamp, &hour_str) {
                    continue;
                }
            }

            let metadata = entry.metadata().await?;
            entries.push(VideoEntry {
                filename: name.to_string(),
                size: metadata.len(),
                timestamp,
                camera: camera_id.to_string(),
            });
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = entries.len() as u64;

        let page = filters.page.max(1) as usize;
        let page_size = filters.page_size.max(1) as usize;
        let skip = (page - 1) * page_size;
        let page_entries = entries.into_iter().skip(skip).take(page_size).collect();

        Ok((total, page_entries))
    }

    /// Resolve `filename` under `camera_id`'s directory, rejecting any path
    /// that would escape the recordings root, and return its size.
    pub async fn stat(&self, camera_id: &str, filename: &str) -> Result<(PathBuf, u64), FsError> {
        let path = self.resolve(camera_id, filename)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| if e.kind() == std::io::ErrorKind::NotFound { FsError::NotFound } else { e.into() })?;
        Ok((path, metadata.len()))
    }

    /// Open `path`, seek to `start`, and return a handle ready to read up to
    /// `end` inclusive (or EOF if `end` is `None`).
    pub async fn open_range(&self, path: &Path, start: u64) -> Result<File, FsError> {
        let mut file = File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound
            } else {
                e.into()
            }
        })?;
        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start)).await?;
        }
        Ok(file)
    }

    /// Path-traversal defense: the resolved path must stay a direct child of
    /// the camera's `merged/` directory. Generalized from the teacher's
    /// `is_private_ip` rejection idiom — reject the shape outright rather
    /// than normalise-then-check, since normalisation of attacker input is
    /// itself a common source of bypasses.
    fn resolve(&self, camera_id: &str, filename: &str) -> Result<PathBuf, FsError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
            || filename.contains('\0')
        {
            return Err(FsError::Forbidden);
        }
        let dir = self.camera_dir(camera_id)?;
        Ok(dir.join(filename))
    }
}

fn parse_timestamp(filename: &str) -> Option<String> {
    filename.strip_suffix(".mp4").map(str::to_string)
}

fn matches_hour(timestamp: &str, hour_str: &str) -> bool {
    // timestamp shape: YYYYMMDD_HH:MM
    timestamp
        .split('_')
        .nth(1)
        .and_then(|time| time.split(':').next())
        .is_some_and(|hh| hh == hour_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(root: &Path) -> FilesystemProvider {
        FilesystemProvider::new(root, vec!["cam1".to_string()])
    }

    #[tokio::test]
    async fn lists_and_sorts_videos_descending() {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("cam1").join("merged");
        tokio::fs::create_dir_all(&merged).await.unwrap();
        tokio::fs::write(merged.join("20231123_14:30.mp4"), b"aaaa").await.unwrap();
        tokio::fs::write(merged.join("20231124_09:00.mp4"), b"bb").await.unwrap();

        let (total, entries) = provider(dir.path())
            .list_videos("cam1", ListFilters { page: 1, page_size: 60, ..Default::default() })
            .await
            .unwrap();

        assert_eq!(total, 2);
        assert_eq!(entries[0].filename, "20231124_09:00.mp4");
        assert_eq!(entries[1].filename, "20231123_14:30.mp4");
    }

    #[tokio::test]
    async fn unknown_camera_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider(dir.path())
            .list_videos("cam-does-not-exist", ListFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::UnknownCamera(_)));
    }

    #[tokio::test]
    async fn rejects_path_traversal_filename() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider(dir.path()).stat("cam1", "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, FsError::Forbidden));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("cam1").join("merged")).await.unwrap();
        let err = provider(dir.path()).stat("cam1", "nope.mp4").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound));
    }
}
