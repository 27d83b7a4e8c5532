//! Per-job resource tracking.
//!
//! A [`Workspace`] owns every transient resource a job creates: temp files,
//! named pipes, engine subprocesses, and in-memory output buffers. Each entry
//! is released exactly once. Release of an already released or unknown entry
//! is a no-op, and a file that is already gone counts as released.
//!
//! `teardown` runs on every exit path of a job. `Drop` is a synchronous last
//! resort for cancelled futures and panics.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use stillreel_common::error::{StillreelError, StillreelResult};
use stillreel_job_model::JobId;

/// Kind of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    TempFile,
    Pipe,
    Process,
    Buffer,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TempFile => "file",
            Self::Pipe => "pipe",
            Self::Process => "process",
            Self::Buffer => "buffer",
        }
    }

    fn has_path(self) -> bool {
        matches!(self, Self::TempFile | Self::Pipe)
    }
}

/// Handle to a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

/// A tracked filesystem path.
#[derive(Debug, Clone)]
pub struct TrackedPath {
    pub id: ResourceId,
    pub path: PathBuf,
}

/// Outcome of a bulk release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: usize,
    /// `(name, error)` for entries that could not be released.
    pub failed: Vec<(String, String)>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
struct Resource {
    id: ResourceId,
    kind: ResourceKind,
    name: String,
    path: Option<PathBuf>,
    released: bool,
}

/// Resource registry for one job.
#[derive(Debug)]
pub struct Workspace {
    job_id: JobId,
    root: PathBuf,
    next_id: AtomicU64,
    resources: Mutex<Vec<Resource>>,
}

impl Workspace {
    /// Create a workspace rooted at `root`, creating the directory if needed.
    pub async fn create(job_id: JobId, root: impl Into<PathBuf>) -> StillreelResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Workspace created");
        Ok(Self {
            job_id,
            root,
            next_id: AtomicU64::new(1),
            resources: Mutex::new(Vec::new()),
        })
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to `{id}-{label}.{ext}` and track the file.
    pub async fn write_temp_file(
        &self,
        label: &str,
        ext: &str,
        bytes: &[u8],
    ) -> StillreelResult<TrackedPath> {
        let tracked = self.reserve_path(label, ext);
        if let Err(e) = tokio::fs::write(&tracked.path, bytes).await {
            self.release_quietly(tracked.id);
            return Err(e.into());
        }
        tracing::trace!(path = %tracked.path.display(), size = bytes.len(), "Temp file written");
        Ok(tracked)
    }

    /// Track `{id}-{label}.{ext}` without creating it. The engine writes it.
    pub fn reserve_path(&self, label: &str, ext: &str) -> TrackedPath {
        let name = self.job_id.resource_name(label, ext);
        let path = self.root.join(&name);
        let id = self.register(ResourceKind::TempFile, name, Some(path.clone()));
        TrackedPath { id, path }
    }

    /// Create a named pipe `{id}-{label}.fifo` and track it.
    #[cfg(unix)]
    pub fn create_fifo(&self, label: &str) -> StillreelResult<TrackedPath> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let name = self.job_id.resource_name(label, "fifo");
        let path = self.root.join(&name);
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| StillreelError::encode(format!("invalid pipe path: {e}")))?;

        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }

        let id = self.register(ResourceKind::Pipe, name, Some(path.clone()));
        Ok(TrackedPath { id, path })
    }

    /// Track a running subprocess.
    pub fn track_process(&self, label: &str, pid: Option<u32>) -> ResourceId {
        let name = match pid {
            Some(pid) => format!("{}-{label}[{pid}]", self.job_id),
            None => self.job_id.resource_name(label, ""),
        };
        self.register(ResourceKind::Process, name, None)
    }

    /// Track an in-memory buffer of `len` bytes.
    pub fn track_buffer(&self, label: &str, len: usize) -> ResourceId {
        let name = format!("{}-{label}[{len}B]", self.job_id);
        self.register(ResourceKind::Buffer, name, None)
    }

    /// Release one resource. Idempotent.
    pub fn release(&self, id: ResourceId) -> io::Result<()> {
        let mut resources = self.lock();
        let Some(resource) = resources.iter_mut().find(|r| r.id == id) else {
            tracing::trace!(?id, "Release of unknown resource ignored");
            return Ok(());
        };
        if resource.released {
            tracing::trace!(name = %resource.name, "Resource already released");
            return Ok(());
        }
        release_one(resource)
    }

    /// Release everything still outstanding, newest first.
    pub fn release_all(&self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        let mut resources = self.lock();
        for resource in resources.iter_mut().rev().filter(|r| !r.released) {
            match release_one(resource) {
                Ok(()) => report.released += 1,
                Err(e) => report.failed.push((resource.name.clone(), e.to_string())),
            }
        }
        report
    }

    /// Number of resources not yet released.
    pub fn outstanding(&self) -> usize {
        self.lock().iter().filter(|r| !r.released).count()
    }

    /// Names of resources not yet released.
    pub fn resource_names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|r| !r.released)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Release everything. Anything left behind is reported as a leak.
    pub fn teardown(&self) -> StillreelResult<ReleaseReport> {
        let report = self.release_all();
        let remaining = self.resource_names();
        if remaining.is_empty() {
            tracing::debug!(released = report.released, "Workspace torn down");
            return Ok(report);
        }

        let err = StillreelError::ResourceLeak {
            count: remaining.len(),
            names: remaining,
        };
        tracing::error!(
            kind = %err.kind(),
            failures = ?report.failed,
            "{}",
            err
        );
        Err(err)
    }

    fn register(&self, kind: ResourceKind, name: String, path: Option<PathBuf>) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(kind = kind.as_str(), name = %name, "Resource tracked");
        self.lock().push(Resource {
            id,
            kind,
            name,
            path,
            released: false,
        });
        id
    }

    fn release_quietly(&self, id: ResourceId) {
        if let Err(e) = self.release(id) {
            tracing::warn!(?id, "Failed to release resource: {}", e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Resource>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn release_one(resource: &mut Resource) -> io::Result<()> {
    if resource.kind.has_path() {
        if let Some(path) = &resource.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    } else if resource.kind == ResourceKind::Process {
        // The child is killed on drop by its owner; only the entry is cleared here.
        tracing::debug!(name = %resource.name, "Process entry released");
    }
    resource.released = true;
    tracing::trace!(kind = resource.kind.as_str(), name = %resource.name, "Resource released");
    Ok(())
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let outstanding = self.outstanding();
        if outstanding == 0 {
            return;
        }
        tracing::warn!(
            outstanding,
            names = ?self.resource_names(),
            "Workspace dropped with outstanding resources, releasing"
        );
        let report = self.release_all();
        if !report.is_clean() {
            tracing::error!(failures = ?report.failed, "Resources leaked on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn workspace(dir: &tempfile::TempDir) -> Workspace {
        Workspace::create(JobId::new(), dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_temp_file_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir).await;
        let file = ws.write_temp_file("image", "jpg", b"jpeg").await.unwrap();
        assert!(file.path.exists());
        assert!(file
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&ws.job_id().to_string()));

        ws.release(file.id).unwrap();
        assert!(!file.path.exists());
        ws.release(file.id).unwrap();
        assert_eq!(ws.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_counts_as_released() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir).await;
        let reserved = ws.reserve_path("output", "mp4");
        assert!(!reserved.path.exists());
        ws.release(reserved.id).unwrap();
        assert_eq!(ws.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_release_all_reports_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir).await;
        ws.write_temp_file("image", "png", b"png").await.unwrap();
        ws.write_temp_file("audio", "mp3", b"mp3").await.unwrap();
        ws.track_buffer("output", 1024);
        ws.track_process("ffmpeg", Some(4242));
        assert_eq!(ws.outstanding(), 4);

        let report = ws.release_all();
        assert_eq!(report.released, 4);
        assert!(report.is_clean());
        assert_eq!(ws.outstanding(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_clean() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir).await;
        ws.reserve_path("output", "mp4");
        let report = ws.teardown().unwrap();
        assert_eq!(report.released, 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir).await;
        ws.release(ResourceId(999)).unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases_outstanding() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let ws = workspace(&dir).await;
            ws.write_temp_file("audio", "mp3", b"mp3").await.unwrap().path
        };
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fifo_is_created_and_removed() {
        use std::os::unix::fs::FileTypeExt;

        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir).await;
        let fifo = ws.create_fifo("audio").unwrap();
        assert!(fifo.path.to_string_lossy().ends_with("-audio.fifo"));
        let meta = std::fs::metadata(&fifo.path).unwrap();
        assert!(meta.file_type().is_fifo());

        ws.release(fifo.id).unwrap();
        assert!(!fifo.path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_leak_is_reported_on_teardown() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        let ws = Workspace::create(JobId::new(), &locked).await.unwrap();
        ws.write_temp_file("image", "jpg", b"x").await.unwrap();

        // A read-only directory prevents unlinking its entries.
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();
        let result = ws.teardown();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700)).unwrap();

        // Root ignores directory permissions; only assert when the removal really failed.
        if let Err(err) = result {
            assert!(matches!(err, StillreelError::ResourceLeak { count: 1, .. }));
            assert_eq!(ws.release_all().released, 1);
        }
    }
}
