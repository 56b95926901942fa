//! Theme package installation: download, extract, place, verify.
//!
//! One pipeline run is a strictly ordered sequence of stages with a single
//! terminal outcome. The scratch directory (which also holds the downloaded
//! archive) is an owned [`tempfile::TempDir`], so partial state is removed on
//! success, failure, and cancellation alike. Only the user-owned icon root is
//! ever written; system roots are read-only to the pipeline.
//!
//! Single-flight is the job of the caller: the controller owns the one
//! active-job slot and rejects or coalesces overlapping requests.

use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::theme::ThemeId;

/// Discrete stages of one install job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Downloading,
    Extracting,
    Placing,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Placing => "placing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress signals emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Stage(Stage),
    Downloaded { bytes: u64, total: Option<u64> },
}

pub trait ProgressReporter: Send {
    fn on_event(&mut self, event: &InstallEvent);
}

/// Reporter that logs stage transitions through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn on_event(&mut self, event: &InstallEvent) {
        match event {
            InstallEvent::Stage(stage) => info!("install stage: {stage}"),
            InstallEvent::Downloaded { bytes, total } => match total {
                Some(total) => debug!("downloaded {bytes}/{total} bytes"),
                None => debug!("downloaded {bytes} bytes"),
            },
        }
    }
}

/// Terminal failure reasons, one per user-facing message the caller may want
/// to render. Never surfaces as a panic or an uncaught error.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("download failed: {0}")]
    Network(String),
    #[error("download timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("archive is corrupt or not a zip file: {0}")]
    CorruptArchive(String),
    #[error("archive did not contain theme `{0}`")]
    MissingTheme(String),
    #[error("destination has insufficient space")]
    DiskFull,
    #[error("permission denied writing `{0}`")]
    PermissionDenied(PathBuf),
    #[error("installation cancelled")]
    Cancelled,
    #[error("io error during install: {0}")]
    Io(std::io::Error),
}

impl InstallError {
    fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            ErrorKind::StorageFull => Self::DiskFull,
            _ => Self::Io(err),
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Downloads the upstream theme archive and installs it into the user root.
#[derive(Debug, Clone)]
pub struct InstallPipeline {
    client: reqwest::Client,
    archive_url: String,
    user_root: PathBuf,
}

impl InstallPipeline {
    pub fn new(config: &Config) -> Result<Self, InstallError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("accentd/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.download_timeout)
            .build()
            .map_err(InstallError::from_reqwest)?;
        Ok(Self {
            client,
            archive_url: config.archive_url.clone(),
            user_root: config.user_icon_root.clone(),
        })
    }

    /// Runs download → extract → place → verify for `theme`.
    ///
    /// The archive bundles every accent variant; `theme` is used to verify the
    /// postcondition that the requested package is present afterwards.
    pub async fn install(
        &self,
        theme: &ThemeId,
        reporter: &mut dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        reporter.on_event(&InstallEvent::Stage(Stage::Pending));
        let result = self.run_stages(theme, reporter, cancel).await;
        match &result {
            Ok(()) => reporter.on_event(&InstallEvent::Stage(Stage::Done)),
            Err(err) => {
                reporter.on_event(&InstallEvent::Stage(Stage::Failed));
                match err {
                    InstallError::Cancelled => info!("install of {theme} cancelled"),
                    _ => warn!("install of {theme} failed: {err}"),
                }
            }
        }
        result
    }

    async fn run_stages(
        &self,
        theme: &ThemeId,
        reporter: &mut dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        // Scratch space for both the archive and the unpacked tree; removed
        // when this guard drops, whatever path we leave on.
        let scratch = tempfile::Builder::new()
            .prefix("accentd-install-")
            .tempdir()
            .map_err(InstallError::Io)?;
        let archive_path = scratch.path().join("theme-archive.zip");
        let unpack_dir = scratch.path().join("unpacked");

        reporter.on_event(&InstallEvent::Stage(Stage::Downloading));
        self.download(&archive_path, reporter, cancel).await?;

        reporter.on_event(&InstallEvent::Stage(Stage::Extracting));
        extract_archive(archive_path, unpack_dir.clone(), cancel).await?;

        reporter.on_event(&InstallEvent::Stage(Stage::Placing));
        place_contents(unpack_dir, self.user_root.clone(), cancel).await?;

        let installed = self.user_root.join(theme.as_str());
        if !installed.is_dir() {
            return Err(InstallError::MissingTheme(theme.as_str().to_string()));
        }
        info!("installed {theme} into {}", self.user_root.display());
        Ok(())
    }

    async fn download(
        &self,
        destination: &Path,
        reporter: &mut dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        let response = tokio::select! {
            response = self.client.get(&self.archive_url).send() => {
                response.map_err(InstallError::from_reqwest)?
            }
            _ = cancel.cancelled() => return Err(InstallError::Cancelled),
        };
        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::HttpStatus(status.as_u16()));
        }
        let total = response.content_length();

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|err| InstallError::from_io(err, destination))?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => {
                    // Drop the handle before unlinking so the partial file is
                    // never left open and referenced.
                    drop(file);
                    let _ = tokio::fs::remove_file(destination).await;
                    return Err(InstallError::Cancelled);
                }
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes)
                        .await
                        .map_err(|err| InstallError::from_io(err, destination))?;
                    received += bytes.len() as u64;
                    reporter.on_event(&InstallEvent::Downloaded {
                        bytes: received,
                        total,
                    });
                }
                Some(Err(err)) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(destination).await;
                    return Err(InstallError::from_reqwest(err));
                }
                None => break,
            }
        }
        file.flush()
            .await
            .map_err(|err| InstallError::from_io(err, destination))?;
        Ok(())
    }
}

/// Opens and unpacks the zip archive on the blocking pool. An archive that
/// cannot be opened or extracted is reported as corrupt, not as a crash.
async fn extract_archive(
    archive_path: PathBuf,
    unpack_dir: PathBuf,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }
    let result = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path)
            .map_err(|err| InstallError::from_io(err, &archive_path))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|err| InstallError::CorruptArchive(err.to_string()))?;
        std::fs::create_dir_all(&unpack_dir)
            .map_err(|err| InstallError::from_io(err, &unpack_dir))?;
        archive.extract(&unpack_dir).map_err(|err| match err {
            zip::result::ZipError::Io(io_err) => InstallError::from_io(io_err, &unpack_dir),
            other => InstallError::CorruptArchive(other.to_string()),
        })
    })
    .await;
    match result {
        Ok(outcome) => outcome,
        Err(join_err) => Err(InstallError::Io(std::io::Error::other(join_err))),
    }
}

/// Merges the children of the archive's top-level directories into the user
/// root. Name collisions are last-writer-wins; nothing is silently skipped.
async fn place_contents(
    unpack_dir: PathBuf,
    user_root: PathBuf,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }
    let result = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&user_root)
            .map_err(|err| InstallError::from_io(err, &user_root))?;
        for top_level in read_dir_entries(&unpack_dir)? {
            if !top_level.is_dir() {
                // Stray files at the archive root (README and friends) are
                // not theme packages; skip them loudly.
                debug!("ignoring non-directory archive entry {}", top_level.display());
                continue;
            }
            for entry in read_dir_entries(&top_level)? {
                let Some(name) = entry.file_name() else {
                    continue;
                };
                let destination = user_root.join(name);
                move_entry(&entry, &destination)?;
            }
        }
        Ok(())
    })
    .await;
    match result {
        Ok(outcome) => outcome,
        Err(join_err) => Err(InstallError::Io(std::io::Error::other(join_err))),
    }
}

fn read_dir_entries(dir: &Path) -> Result<Vec<PathBuf>, InstallError> {
    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(dir).map_err(|err| InstallError::from_io(err, dir))?;
    for entry in read_dir {
        let entry = entry.map_err(|err| InstallError::from_io(err, dir))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Moves `source` to `destination`, replacing any existing entry. Falls back
/// to copy-and-delete when the rename crosses filesystems (the scratch dir is
/// commonly on tmpfs while the icon root is not).
fn move_entry(source: &Path, destination: &Path) -> Result<(), InstallError> {
    if destination.exists() {
        let removal = if destination.is_dir() {
            std::fs::remove_dir_all(destination)
        } else {
            std::fs::remove_file(destination)
        };
        removal.map_err(|err| InstallError::from_io(err, destination))?;
    }
    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_recursive(source, destination)?;
            let cleanup = if source.is_dir() {
                std::fs::remove_dir_all(source)
            } else {
                std::fs::remove_file(source)
            };
            cleanup.map_err(|err| InstallError::from_io(err, source))
        }
    }
}

fn copy_recursive(source: &Path, destination: &Path) -> Result<(), InstallError> {
    if source.is_dir() {
        std::fs::create_dir_all(destination)
            .map_err(|err| InstallError::from_io(err, destination))?;
        for entry in read_dir_entries(source)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            copy_recursive(&entry, &destination.join(name))?;
        }
    } else {
        std::fs::copy(source, destination)
            .map_err(|err| InstallError::from_io(err, destination))?;
    }
    Ok(())
}
