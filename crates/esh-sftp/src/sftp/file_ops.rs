// ── File operations (stat, chmod, chown, text read/write) ────────────────────

use crate::sftp::attrs::file_attributes;
use crate::sftp::service::TransferFacade;
use esh_core::{Error, FileAttributes, HostConfig, Result};
use esh_ssh::RemoteStat;
use std::io::{Read, Write};
use tracing::info;

impl TransferFacade {
    // ── stat ─────────────────────────────────────────────────────────────────

    pub async fn stat(&self, host: &HostConfig, path: &str) -> Result<FileAttributes> {
        let path = path.to_string();
        self.with_remote_fs(host, "stat", move |fs| {
            Ok(file_attributes(&fs.stat(&path)?))
        })
        .await
    }

    // ── chmod ────────────────────────────────────────────────────────────────

    /// Sets the permission bits; the file type bits are left to the server.
    pub async fn chmod(&self, host: &HostConfig, path: &str, mode: u32) -> Result<()> {
        let path = path.to_string();
        self.with_remote_fs(host, "chmod", move |fs| {
            fs.set_stat(
                &path,
                RemoteStat {
                    perm: Some(mode),
                    ..RemoteStat::default()
                },
            )?;
            info!("SFTP chmod {} → {:o}", path, mode);
            Ok(())
        })
        .await
    }

    // ── chown ────────────────────────────────────────────────────────────────

    pub async fn chown(&self, host: &HostConfig, path: &str, uid: u32, gid: u32) -> Result<()> {
        let path = path.to_string();
        self.with_remote_fs(host, "chown", move |fs| {
            fs.set_stat(
                &path,
                RemoteStat {
                    uid: Some(uid),
                    gid: Some(gid),
                    ..RemoteStat::default()
                },
            )?;
            info!("SFTP chown {} → {}:{}", path, uid, gid);
            Ok(())
        })
        .await
    }

    // ── Text content ─────────────────────────────────────────────────────────

    /// Whole file as text. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_file(&self, host: &HostConfig, path: &str) -> Result<String> {
        let path = path.to_string();
        self.with_remote_fs(host, "readFile", move |fs| {
            let mut reader = fs.open_read(&path)?;
            let mut bytes = Vec::new();
            reader
                .read_to_end(&mut bytes)
                .map_err(|e| Error::Operation(format!("read '{}' failed: {}", path, e)))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
        .await
    }

    /// Creates or truncates `path` and writes `content` as UTF-8.
    pub async fn write_file(&self, host: &HostConfig, path: &str, content: &str) -> Result<()> {
        let path = path.to_string();
        let content = content.to_string();
        let chunk = self.chunk_size();
        self.with_remote_fs(host, "writeFile", move |fs| {
            let mut writer = fs.open_write(&path)?;
            for piece in content.as_bytes().chunks(chunk) {
                writer
                    .write_all(piece)
                    .map_err(|e| Error::Operation(format!("write '{}' failed: {}", path, e)))?;
            }
            writer
                .flush()
                .map_err(|e| Error::Operation(format!("write '{}' failed: {}", path, e)))?;
            info!("SFTP wrote {} bytes to {}", content.len(), path);
            Ok(())
        })
        .await
    }
}
