//! Upload policy, output naming and file retention.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, error};

use crate::error::{InputError, StorageError, VideoError};

/// Check an upload against the extension allow-list and size limit.
///
/// The extension is checked first and case-insensitively, so a rejected
/// file type never touches the filesystem.
pub fn validate_upload(
    path: &Path,
    allowed_extensions: &[String],
    max_bytes: u64,
) -> Result<(), InputError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return Err(InputError::UnsupportedExtension { extension });
    }

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(InputError::Missing(path.to_path_buf()));
        }
        Err(source) => {
            return Err(InputError::Video(VideoError::Open {
                path: path.to_path_buf(),
                source,
            }));
        }
    };
    if !metadata.is_file() {
        return Err(InputError::Missing(path.to_path_buf()));
    }
    if metadata.len() > max_bytes {
        return Err(InputError::TooLarge {
            size: metadata.len(),
            max: max_bytes,
        });
    }
    Ok(())
}

/// `<processed_dir>/processed_<input file name>`
pub fn output_path_for(processed_dir: &Path, input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    processed_dir.join(format!("processed_{name}"))
}

/// Delete a file. `Ok(false)` when it was already gone.
pub fn remove_artifact(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::new(path, e)),
    }
}

/// Best-effort removal; failures are logged, never returned.
pub fn discard(path: &Path) {
    match remove_artifact(path) {
        Ok(true) => debug!(path = %path.display(), "removed"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "cleanup failed"),
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<StorageError>,
}

/// Remove regular files in `dirs` last modified more than `retention` before
/// `now`. Paths in `keep` are never touched; missing directories are skipped.
pub fn sweep_expired(
    dirs: &[PathBuf],
    retention: Duration,
    now: SystemTime,
    keep: &HashSet<PathBuf>,
) -> SweepReport {
    let mut report = SweepReport::default();
    let Some(cutoff) = now.checked_sub(retention) else {
        return report;
    };

    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                report.failed.push(StorageError::new(dir, e));
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.failed.push(StorageError::new(dir, e));
                    continue;
                }
            };
            let path = entry.path();
            if is_kept(&path, keep) {
                continue;
            }
            let modified = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            match modified {
                Ok(modified) if modified < cutoff => match remove_artifact(&path) {
                    Ok(_) => report.removed.push(path),
                    Err(e) => report.failed.push(e),
                },
                Ok(_) => {}
                Err(e) => report.failed.push(StorageError::new(&path, e)),
            }
        }
    }
    report
}

/// `keep` may hold paths as submitted or canonical ones.
fn is_kept(path: &Path, keep: &HashSet<PathBuf>) -> bool {
    keep.contains(path)
        || fs::canonicalize(path)
            .map(|canonical| keep.contains(&canonical))
            .unwrap_or(false)
}
