use chrono::Local;
use fs2::FileExt;
use ritual_core::{ReflectionBook, ReflectionEntry};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_DATA_FILE: &str = "reflections.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Write failures leave the previous artifact intact, so the same call can
    /// be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::WriteFailed { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How the artifact looked when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// No artifact existed; an empty one was written.
    Created,
    /// The artifact did not parse. It was moved to `backup` and replaced by an
    /// empty one.
    Quarantined { backup: PathBuf },
}

/// Durable per-person reflection history backed by one JSON artifact.
///
/// Every operation runs under an in-process mutex plus an advisory lock on
/// `<artifact>.lock`, and every write goes to `<artifact>.tmp` before being
/// renamed over the artifact, so readers only ever see a complete file.
pub struct EntryStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

struct ExclusiveAccess<'a> {
    _local: MutexGuard<'a, ()>,
    file: File,
}

impl Drop for ExclusiveAccess<'_> {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl EntryStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sibling_path(&path, "lock");
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole store, creating or quarantining the artifact as needed.
    pub fn load(&self) -> Result<ReflectionBook, StorageError> {
        self.load_with_outcome().map(|(book, _)| book)
    }

    pub fn load_with_outcome(&self) -> Result<(ReflectionBook, LoadOutcome), StorageError> {
        let _access = self.exclusive()?;
        self.read_locked()
    }

    pub fn append(&self, person_id: &str, entry: ReflectionEntry) -> Result<(), StorageError> {
        let _access = self.exclusive()?;
        let (mut book, _) = self.read_locked()?;
        book.push(person_id, entry);
        let total = book.history(person_id).len();

        if let Err(err) = self.write_locked(&book) {
            warn!(
                event = "entry_append_failed",
                person_id = person_id,
                path = %self.path.display(),
                error = %err
            );
            return Err(err);
        }

        info!(event = "entry_appended", person_id = person_id, entries = total);
        Ok(())
    }

    /// The most recent `limit` entries for a person, oldest first.
    pub fn entries_for(
        &self,
        person_id: &str,
        limit: usize,
    ) -> Result<Vec<ReflectionEntry>, StorageError> {
        Ok(self.load()?.recent(person_id, limit))
    }

    pub fn all_person_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.load()?.people.into_keys().collect())
    }

    fn exclusive(&self) -> Result<ExclusiveAccess<'_>, StorageError> {
        let local = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = non_empty_parent(&self.lock_path) {
            fs::create_dir_all(parent).map_err(|err| StorageError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|err| StorageError::io(&self.lock_path, err))?;
        file.lock_exclusive()
            .map_err(|err| StorageError::io(&self.lock_path, err))?;

        Ok(ExclusiveAccess {
            _local: local,
            file,
        })
    }

    fn read_locked(&self) -> Result<(ReflectionBook, LoadOutcome), StorageError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let book = ReflectionBook::default();
                self.write_locked(&book)?;
                info!(event = "store_created", path = %self.path.display());
                return Ok((book, LoadOutcome::Created));
            }
            Err(err) => return Err(StorageError::io(&self.path, err)),
        };

        match serde_json::from_slice::<ReflectionBook>(&raw) {
            Ok(book) => {
                debug!(
                    event = "store_loaded",
                    path = %self.path.display(),
                    people = book.people.len()
                );
                Ok((book, LoadOutcome::Loaded))
            }
            Err(parse_err) => {
                let backup = self.quarantine()?;
                warn!(
                    event = "store_quarantined",
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %parse_err
                );
                let book = ReflectionBook::default();
                self.write_locked(&book)?;
                Ok((book, LoadOutcome::Quarantined { backup }))
            }
        }
    }

    fn quarantine(&self) -> Result<PathBuf, StorageError> {
        let backup = self.free_backup_path();
        fs::rename(&self.path, &backup).map_err(|err| StorageError::io(&self.path, err))?;
        Ok(backup)
    }

    fn free_backup_path(&self) -> PathBuf {
        let plain = sibling_path(&self.path, "bak");
        if !plain.exists() {
            return plain;
        }

        let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let stamped = sibling_path(&self.path, &format!("{stamp}.bak"));
        if !stamped.exists() {
            return stamped;
        }

        let mut attempt = 1u32;
        loop {
            let candidate = sibling_path(&self.path, &format!("{stamp}-{attempt}.bak"));
            if !candidate.exists() {
                return candidate;
            }
            attempt += 1;
        }
    }

    fn write_locked(&self, book: &ReflectionBook) -> Result<(), StorageError> {
        let payload = serde_json::to_vec_pretty(book)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        write_atomic(&self.path, &payload).map_err(|source| StorageError::WriteFailed {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = non_empty_parent(path) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = sibling_path(path, "tmp");
    let written = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(payload)?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.{suffix}", name.to_string_lossy())),
        None => path.with_extension(suffix),
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date: &str, promise: &str) -> ReflectionEntry {
        ReflectionEntry {
            date: date.to_string(),
            scan: "тепло в груди".to_string(),
            voices: "Критик, Бунтарь".to_string(),
            focus: "Здоровье".to_string(),
            promise: promise.to_string(),
        }
    }

    #[test]
    fn load_on_missing_artifact_creates_valid_empty_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflections.json");
        let store = EntryStore::open(&path);

        let (book, outcome) = store.load_with_outcome().expect("load");
        assert!(book.is_empty());
        assert_eq!(outcome, LoadOutcome::Created);

        let on_disk: ReflectionBook =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("valid json");
        assert!(on_disk.is_empty());

        let (_, second) = store.load_with_outcome().expect("reload");
        assert_eq!(second, LoadOutcome::Loaded);
    }

    #[test]
    fn load_on_malformed_artifact_quarantines_and_resets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflections.json");
        fs::write(&path, b"{\"42\": [ {\"date\": ").expect("seed");
        let store = EntryStore::open(&path);

        let (book, outcome) = store.load_with_outcome().expect("load");
        assert!(book.is_empty());
        let LoadOutcome::Quarantined { backup } = outcome else {
            panic!("expected quarantine");
        };
        assert_eq!(backup, dir.path().join("reflections.json.bak"));
        assert_eq!(fs::read(&backup).expect("backup"), b"{\"42\": [ {\"date\": ");
        assert_eq!(store.load_with_outcome().expect("reload").1, LoadOutcome::Loaded);
    }

    #[test]
    fn legacy_entry_without_date_keeps_whole_store_live() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflections.json");
        fs::write(
            &path,
            r#"{
                "alice": [{"date": "2024-03-14T21:00:00", "scan": "s", "voices": "v", "focus": "f", "promise": "p"}],
                "bob": [{"scan": "legacy entry without date"}]
            }"#,
        )
        .expect("seed");
        let store = EntryStore::open(&path);

        let (book, outcome) = store.load_with_outcome().expect("load");
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert!(!dir.path().join("reflections.json.bak").exists());
        assert_eq!(book.history("alice").len(), 1);
        let legacy = &book.history("bob")[0];
        assert_eq!(legacy.date, ritual_core::MISSING_FIELD);
        assert_eq!(legacy.scan, "legacy entry without date");

        store
            .append("bob", entry("2024-03-15T21:00:00", "new"))
            .expect("append");
        let bob = store.entries_for("bob", 10).expect("entries");
        assert_eq!(bob.len(), 2);
        assert_eq!(bob[1].promise, "new");
    }

    #[test]
    fn second_quarantine_keeps_earlier_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflections.json");
        let store = EntryStore::open(&path);

        fs::write(&path, b"first broken").expect("seed");
        store.load().expect("first");
        fs::write(&path, b"second broken").expect("seed");
        let (_, outcome) = store.load_with_outcome().expect("second");

        let LoadOutcome::Quarantined { backup } = outcome else {
            panic!("expected quarantine");
        };
        assert_ne!(backup, dir.path().join("reflections.json.bak"));
        assert_eq!(
            fs::read(dir.path().join("reflections.json.bak")).expect("first backup"),
            b"first broken"
        );
        assert_eq!(fs::read(&backup).expect("second backup"), b"second broken");
    }

    #[test]
    fn append_is_monotonic_and_ordered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EntryStore::open(dir.path().join("reflections.json"));

        let submitted: Vec<_> = (1..=4)
            .map(|day| entry(&format!("2024-03-0{day}T21:00:00"), &format!("promise {day}")))
            .collect();
        for item in &submitted {
            store.append("42", item.clone()).expect("append");
        }

        assert_eq!(store.entries_for("42", 4).expect("entries"), submitted);
        assert_eq!(store.entries_for("42", 2).expect("entries"), submitted[2..]);
        assert!(store.entries_for("7", 3).expect("entries").is_empty());
        assert_eq!(
            store.all_person_ids().expect("ids"),
            BTreeSet::from(["42".to_string()])
        );
    }

    #[test]
    fn artifact_keeps_non_ascii_text_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflections.json");
        let store = EntryStore::open(&path);
        store
            .append("42", entry("2024-03-01T21:00:00", "погулять"))
            .expect("append");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("погулять"));
        assert!(!dir.path().join("reflections.json.tmp").exists());
    }

    #[test]
    fn append_into_missing_directory_creates_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EntryStore::open(dir.path().join("nested/data/reflections.json"));
        store
            .append("1", entry("2024-03-01T21:00:00", "p"))
            .expect("append");
        assert_eq!(store.entries_for("1", 1).expect("entries").len(), 1);
    }

    #[test]
    fn failed_write_surfaces_retryable_error_and_keeps_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflections.json");
        let store = EntryStore::open(&path);
        store
            .append("1", entry("2024-03-01T21:00:00", "kept"))
            .expect("append");

        // A directory squatting on the temp path makes the temp write fail.
        fs::create_dir(dir.path().join("reflections.json.tmp")).expect("block tmp");
        let err = store
            .append("1", entry("2024-03-02T21:00:00", "lost"))
            .expect_err("write must fail");
        assert!(err.is_retryable());
        assert!(matches!(err, StorageError::WriteFailed { .. }));

        fs::remove_dir(dir.path().join("reflections.json.tmp")).expect("unblock");
        let entries = store.entries_for("1", 10).expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].promise, "kept");
    }
}
