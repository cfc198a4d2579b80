// ── Directory operations ─────────────────────────────────────────────────────

use crate::sftp::attrs::{file_attributes, is_directory, long_name};
use crate::sftp::service::TransferFacade;
use crate::sftp::types::RemoteEntry;
use esh_core::{HostConfig, Result};
use esh_ssh::RemoteFs;
use tracing::info;

const DEFAULT_DIR_MODE: u32 = 0o755;

pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn is_dot_entry(name: &str) -> bool {
    name == "." || name == ".."
}

/// Unlinks every non-directory under `dir` depth-first and records the
/// directories in post-order (children before parents).
fn unlink_tree(fs: &mut dyn RemoteFs, dir: &str, dirs: &mut Vec<String>) -> Result<()> {
    for entry in fs.read_dir(dir)? {
        if is_dot_entry(&entry.filename) {
            continue;
        }
        let path = join_path(dir, &entry.filename);
        if is_directory(&entry.stat) {
            unlink_tree(fs, &path, dirs)?;
        } else {
            fs.unlink(&path)?;
        }
    }
    dirs.push(dir.to_string());
    Ok(())
}

/// Recursive delete. Fails on the first error and leaves whatever was
/// already removed deleted.
pub(crate) fn remove_tree(fs: &mut dyn RemoteFs, root: &str) -> Result<()> {
    let mut dirs = Vec::new();
    unlink_tree(fs, root, &mut dirs)?;
    for dir in &dirs {
        fs.rmdir(dir)?;
    }
    Ok(())
}

impl TransferFacade {
    // ── List directory ───────────────────────────────────────────────────────

    pub async fn list(&self, host: &HostConfig, path: &str) -> Result<Vec<RemoteEntry>> {
        let path = path.to_string();
        self.with_remote_fs(host, "list", move |fs| {
            let entries = fs
                .read_dir(&path)?
                .into_iter()
                .filter(|e| !is_dot_entry(&e.filename))
                .map(|e| {
                    let attrs = file_attributes(&e.stat);
                    RemoteEntry {
                        longname: long_name(&e.filename, &attrs),
                        filename: e.filename,
                        attrs,
                    }
                })
                .collect();
            Ok(entries)
        })
        .await
    }

    // ── Create / remove ──────────────────────────────────────────────────────

    pub async fn mkdir(&self, host: &HostConfig, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_remote_fs(host, "mkdir", move |fs| {
            fs.mkdir(&path, DEFAULT_DIR_MODE)?;
            info!("SFTP mkdir {}", path);
            Ok(())
        })
        .await
    }

    /// Removes a single file.
    pub async fn delete(&self, host: &HostConfig, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_remote_fs(host, "delete", move |fs| {
            fs.unlink(&path)?;
            info!("SFTP deleted {}", path);
            Ok(())
        })
        .await
    }

    /// Removes a directory and everything below it. Not atomic: on failure
    /// the entries deleted so far stay deleted.
    pub async fn rmdir(&self, host: &HostConfig, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_remote_fs(host, "rmdir", move |fs| {
            remove_tree(fs, &path)?;
            info!("SFTP removed directory tree {}", path);
            Ok(())
        })
        .await
    }

    pub async fn rename(&self, host: &HostConfig, old_path: &str, new_path: &str) -> Result<()> {
        let (from, to) = (old_path.to_string(), new_path.to_string());
        self.with_remote_fs(host, "rename", move |fs| {
            fs.rename(&from, &to)?;
            info!("SFTP renamed {} → {}", from, to);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_trailing_slash() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/srv", "a"), "/srv/a");
        assert_eq!(join_path("/srv/", "a"), "/srv/a");
    }

    #[test]
    fn dot_entries_are_skipped() {
        assert!(is_dot_entry("."));
        assert!(is_dot_entry(".."));
        assert!(!is_dot_entry(".bashrc"));
    }
}
