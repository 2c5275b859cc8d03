//! Raw traffic capture.
//!
//! Every byte seen on the serial link is appended to a history file exactly as
//! received. Directions are not distinguished.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only capture file guarded by its own lock.
#[derive(Debug)]
pub struct TrafficLog {
    path: Option<PathBuf>,
    file: Mutex<Option<BufWriter<File>>>,
}

impl TrafficLog {
    /// Opens (or creates) the capture file in append mode.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!("traffic log opened at {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Appends raw bytes. A closed or disabled log ignores them.
    pub fn append(&self, bytes: &[u8]) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(w) => w.write_all(bytes),
            None => Ok(()),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }

    /// Flushes and closes the file. Later appends are ignored.
    pub fn close(&self) -> io::Result<()> {
        let taken = self.file.lock().take();
        if let Some(mut w) = taken {
            w.flush()?;
            tracing::debug!("traffic log closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.txt");

        let log = TrafficLog::open(&path).unwrap();
        log.append(b"@MCTL:ack;;\r").unwrap();
        log.append(&[0xFF, b'\n']).unwrap();
        log.close().unwrap();
        assert!(!log.is_open());

        log.append(b"ignored").unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content, b"@MCTL:ack;;\r\xff\n");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.txt");

        let log = TrafficLog::open(&path).unwrap();
        log.append(b"first;").unwrap();
        log.close().unwrap();

        let log = TrafficLog::open(&path).unwrap();
        log.append(b"second").unwrap();
        log.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"first;second");
        assert_eq!(log.path(), Some(path.as_path()));
    }

    #[test]
    fn test_disabled() {
        let log = TrafficLog::disabled();
        assert!(!log.is_open());
        assert!(log.path().is_none());
        log.append(b"anything").unwrap();
        log.flush().unwrap();
        log.close().unwrap();
    }
}
