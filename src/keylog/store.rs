//! Deduplicating key-log writer.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use super::KeyLogRecord;
use crate::error::PersistError;

/// Outcome of [`SecretStore::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// Lines appended to the key log, with the number of bytes written.
    Written(usize),
    /// The client random was already written earlier in this run.
    Duplicate,
}

/// Owns the key-log file and the set of client randoms already written.
pub struct SecretStore {
    seen: Mutex<HashSet<String>>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl SecretStore {
    /// Open `path` for appending, creating it with owner-only permissions.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file: File = OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o600)
            .open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            writer: Mutex::new(writer),
        }
    }

    /// Append the lines of `record` unless its client random was seen before.
    ///
    /// The check-then-insert on the dedup set is a single critical section,
    /// so concurrent callers racing on one client random write exactly once.
    /// All lines of the record go out in one write call.
    pub fn persist(&self, record: &KeyLogRecord) -> Result<Persisted, PersistError> {
        if !self.seen.lock().insert(record.key()) {
            return Ok(Persisted::Duplicate);
        }

        let bytes = record.lines.as_bytes();
        let mut writer = self.writer.lock();
        writer.write_all(bytes).map_err(PersistError::KeyLog)?;
        writer.flush().map_err(PersistError::KeyLog)?;
        Ok(Persisted::Written(bytes.len()))
    }

    /// Whether a record for this client random has been written.
    pub fn contains(&self, client_random: &[u8]) -> bool {
        self.seen.lock().contains(&hex::encode(client_random))
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TlsVersion;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenDisk;

    impl Write for BrokenDisk {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(random: u8) -> KeyLogRecord {
        KeyLogRecord {
            client_random: vec![random; 32],
            version: TlsVersion::Tls12,
            lines: format!("CLIENT_RANDOM {} {}\n", hex::encode([random; 32]), "00".repeat(48)),
        }
    }

    #[test]
    fn first_record_wins() {
        let buf = SharedBuf::default();
        let store = SecretStore::from_writer(Box::new(buf.clone()));

        assert!(matches!(store.persist(&record(1)).unwrap(), Persisted::Written(_)));
        assert_eq!(store.persist(&record(1)).unwrap(), Persisted::Duplicate);
        assert!(matches!(store.persist(&record(2)).unwrap(), Persisted::Written(_)));

        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(store.len(), 2);
        assert!(store.contains(&[1; 32]));
    }

    #[test]
    fn concurrent_writers_persist_once() {
        let buf = SharedBuf::default();
        let store = Arc::new(SecretStore::from_writer(Box::new(buf.clone())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for r in 0..4u8 {
                        store.persist(&record(r)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    // Key-log write failures are surfaced so the caller can stop the
    // process; continuing with a partial key log is not supported.
    #[test]
    fn write_failure_is_reported_as_fatal() {
        let store = SecretStore::from_writer(Box::new(BrokenDisk));
        let err = store.persist(&record(9)).unwrap_err();
        assert!(matches!(err, PersistError::KeyLog(_)));
    }

    #[test]
    fn opens_key_log_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.log");
        let store = SecretStore::open(&path).unwrap();
        store.persist(&record(3)).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), record(3).lines);
    }
}
