//! Local media storage: path layout, disk-space checks, atomic finalize.
//!
//! The vault directory is shared between the download manager (writer) and
//! the local streaming server (reader). In-flight downloads live under a
//! `.part` name; a file becomes visible under its final name only through
//! the atomic rename in [`Vault::finalize`]. Nothing ever serves a `.part`
//! path.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

/// Free-space headroom required beyond the expected download size (200 MiB).
pub const DOWNLOAD_HEADROOM_BYTES: u64 = 200 * 1024 * 1024;

/// Extension for finalized media files.
const MEDIA_EXTENSION: &str = "media";

/// Suffix for in-flight download artifacts.
const PART_SUFFIX: &str = "part";

/// Handle to the vault directory.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    /// Opens the vault at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The vault root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for a piece of content: `<root>/<id>_<quality>.media`.
    #[must_use]
    pub fn final_path(&self, content_id: &str, quality: &str) -> PathBuf {
        self.root.join(format!(
            "{}_{}.{MEDIA_EXTENSION}",
            sanitize_component(content_id),
            sanitize_component(quality)
        ))
    }

    /// Temp path for an in-flight download: the final path plus `.part`.
    #[must_use]
    pub fn temp_path(&self, content_id: &str, quality: &str) -> PathBuf {
        let mut path = self.final_path(content_id, quality).into_os_string();
        path.push(".");
        path.push(PART_SUFFIX);
        PathBuf::from(path)
    }

    /// Free bytes available on the filesystem holding the vault.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error from the OS free-space query.
    pub fn available_space(&self) -> Result<u64, io::Error> {
        fs2::available_space(&self.root)
    }

    /// Returns true when the vault's filesystem has room for a download of
    /// `expected_size` bytes plus the fixed headroom.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error from the OS free-space query.
    pub fn has_space_for(&self, expected_size: u64) -> Result<bool, io::Error> {
        let required = expected_size.saturating_add(DOWNLOAD_HEADROOM_BYTES);
        Ok(self.available_space()? >= required)
    }

    /// Atomically publishes a finished download: renames the `.part`
    /// artifact to its final name. Until this returns, the content is not
    /// visible to the streaming server.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the rename fails.
    #[instrument(skip(self), fields(temp = %temp_path.display(), target = %final_path.display()))]
    pub async fn finalize(&self, temp_path: &Path, final_path: &Path) -> Result<(), io::Error> {
        tokio::fs::rename(temp_path, final_path).await?;
        debug!("download finalized");
        Ok(())
    }

    /// Removes a `.part` artifact (used when a failure indicates the
    /// artifact is corrupt and cannot seed a resume).
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if the removal fails for any reason
    /// other than the file already being gone.
    pub async fn remove_temp(&self, temp_path: &Path) -> Result<(), io::Error> {
        match tokio::fs::remove_file(temp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Size of an existing `.part` artifact, or 0 when none exists.
    pub async fn partial_size(&self, temp_path: &Path) -> u64 {
        tokio::fs::metadata(temp_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0)
    }
}

/// Restricts a path component to a safe character set. Anything outside
/// `[A-Za-z0-9._-]` becomes `_`, so content identifiers can never traverse
/// out of the vault directory.
fn sanitize_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches('.').is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}
