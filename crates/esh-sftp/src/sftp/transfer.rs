// ── Transfer engine – chunked uploads & downloads with progress ──────────────

use crate::sftp::progress::ProgressReporter;
use crate::sftp::service::TransferFacade;
use esh_core::{Error, HostConfig, ProgressSender, Result, TransferKind};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// Reads until `buf` is full or the source is exhausted, so every chunk
/// except the last is full-sized.
pub(crate) fn fill_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn base_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
        .to_string()
}

fn copy_chunks(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    chunk_size: usize,
    progress: &mut ProgressReporter,
    what: &str,
) -> Result<()> {
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = fill_chunk(reader, &mut buf)
            .map_err(|e| Error::Operation(format!("read {} failed: {}", what, e)))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::Operation(format!("write {} failed: {}", what, e)))?;
        progress.advance(n);
    }
    writer
        .flush()
        .map_err(|e| Error::Operation(format!("write {} failed: {}", what, e)))?;
    progress.finish();
    Ok(())
}

impl TransferFacade {
    // ── Upload ───────────────────────────────────────────────────────────────

    /// Streams `local_path` to `remote_path`. Returns the remote path.
    pub async fn upload(
        &self,
        host: &HostConfig,
        local_path: &str,
        remote_path: &str,
        progress: Option<ProgressSender>,
    ) -> Result<String> {
        let metadata = tokio::fs::metadata(local_path).await.map_err(|e| {
            Error::Operation(format!("Cannot read local file '{}': {}", local_path, e))
        })?;
        if metadata.is_dir() {
            return Err(Error::Operation(format!(
                "Cannot read local file '{}': is a directory",
                local_path
            )));
        }

        let local = local_path.to_string();
        let remote = remote_path.to_string();
        let chunk = self.chunk_size();
        self.with_remote_fs(host, "upload", move |fs| {
            let mut source = File::open(&local).map_err(|e| {
                Error::Operation(format!("Cannot read local file '{}': {}", local, e))
            })?;
            let total = source.metadata().map(|m| m.len()).unwrap_or(metadata.len());
            let mut reporter =
                ProgressReporter::new(TransferKind::Upload, base_name(&local), total, progress);

            let mut target = fs.open_write(&remote)?;
            copy_chunks(&mut source, target.as_mut(), chunk, &mut reporter, &remote)?;
            info!(
                "SFTP upload {} → {} ({} bytes)",
                local,
                remote,
                reporter.transferred()
            );
            Ok(remote)
        })
        .await
    }

    // ── Download ─────────────────────────────────────────────────────────────

    /// Streams `remote_path` into `local_path`, creating missing parent
    /// directories. A partially written local file is removed on failure.
    /// Returns the local path.
    pub async fn download(
        &self,
        host: &HostConfig,
        remote_path: &str,
        local_path: &str,
        progress: Option<ProgressSender>,
    ) -> Result<String> {
        let local = local_path.to_string();
        let remote = remote_path.to_string();
        let chunk = self.chunk_size();
        self.with_remote_fs(host, "download", move |fs| {
            let total = fs.stat(&remote)?.size.unwrap_or(0);
            let mut source = fs.open_read(&remote)?;

            if let Some(parent) = Path::new(&local).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::Operation(format!(
                            "Cannot create local directory '{}': {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
            let mut target = File::create(&local).map_err(|e| {
                Error::Operation(format!("Cannot create local file '{}': {}", local, e))
            })?;

            let mut reporter =
                ProgressReporter::new(TransferKind::Download, base_name(&remote), total, progress);
            let copied = copy_chunks(source.as_mut(), &mut target, chunk, &mut reporter, &local);
            drop(target);

            if let Err(e) = copied {
                if let Err(rm) = std::fs::remove_file(&local) {
                    warn!("Failed to remove partial download '{}': {}", local, rm);
                }
                return Err(e);
            }
            info!(
                "SFTP download {} → {} ({} bytes)",
                remote,
                local,
                reporter.transferred()
            );
            Ok(local)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = buf.len().min(self.step);
            self.inner.read(&mut buf[..limit])
        }
    }

    #[test]
    fn fill_chunk_fills_from_short_reads() {
        let mut reader = Trickle {
            inner: Cursor::new(vec![7u8; 10]),
            step: 3,
        };
        let mut buf = [0u8; 8];
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 8);
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn base_names() {
        assert_eq!(base_name("/srv/data/big.bin"), "big.bin");
        assert_eq!(base_name("big.bin"), "big.bin");
        assert_eq!(base_name(r"C:\tmp\notes.txt"), "notes.txt");
        assert_eq!(base_name("/srv/dir/"), "dir");
    }
}
