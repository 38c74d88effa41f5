use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use warden_core::{LogEvent, LogStore, LogStoreError};

/// Append-only text file holding one timestamp-prefixed line per vision
/// log event.
pub struct FileLogStore {
    file: Mutex<File>,
    path: PathBuf,
}

impl FileLogStore {
    pub fn open(path: &Path) -> Result<Self, LogStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for FileLogStore {
    fn append(&self, event: &LogEvent) -> Result<(), LogStoreError> {
        let mut file = self.file.lock();
        writeln!(file, "{}", event.line())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("warden-vision-{}", uuid::Uuid::now_v7()))
            .join("vision.log")
    }

    #[test]
    fn appends_one_line_per_event() {
        let path = temp_path();
        let store = FileLogStore::open(&path).unwrap();
        store.append(&LogEvent::now("spawned as ByteBot_1")).unwrap();
        store.append(&LogEvent::now("kicked: idle")).unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("spawned as ByteBot_1"));
        assert!(lines[1].ends_with("kicked: idle"));
    }

    #[test]
    fn reopening_preserves_existing_lines() {
        let path = temp_path();
        FileLogStore::open(&path)
            .unwrap()
            .append(&LogEvent::now("first"))
            .unwrap();
        FileLogStore::open(&path)
            .unwrap()
            .append(&LogEvent::now("second"))
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
