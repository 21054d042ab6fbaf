use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use courier_common::internal;
use serde::Deserialize;

use crate::{
    Result, SpoolError, ValidationError,
    r#trait::BackingStore,
    types::{EXTENSION, SpooledEnvelopeId},
};

const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// File-based backing store
///
/// Each envelope lives in its own `{ULID}.envelope` file inside a single
/// directory. Because ULIDs sort by creation time, a directory listing sorted
/// by name is the queue order.
///
/// # Atomicity
/// Writes go to `.tmp_{ULID}.envelope`, are fsynced, then renamed into place,
/// so a crash never leaves a half written entry visible to `list`. Deletes
/// rename to `{name}.deleted` before removing. Leftovers of either are
/// cleaned up by [`FileBackingStore::init`].
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/cache/courier/envelopes"),
        }
    }
}

impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileBackingStoreHelper {
            path: PathBuf,
        }

        let helper = FileBackingStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileBackingStore {
    /// Reject paths containing `..`, relative paths and system directories.
    ///
    /// # Errors
    /// Returns the first rule the path breaks
    fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::ParentDirectory(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        for prefix in sensitive_prefixes {
            if path.starts_with(prefix) {
                return Err(ValidationError::SystemDirectory {
                    prefix,
                    path: path.display().to_string(),
                });
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory if needed and remove leftovers of
    /// interrupted writes and deletes.
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> Result<()> {
        internal!("Initialising envelope queue at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        self.cleanup_orphans()?;

        Ok(())
    }

    fn cleanup_orphans(&self) -> Result<()> {
        let mut cleaned = 0;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(DELETED_SUFFIX) || filename.starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from envelope queue"
            );
        }

        Ok(())
    }

    fn entry_path(&self, id: &SpooledEnvelopeId) -> PathBuf {
        self.path.join(id.filename())
    }
}

fn not_found(id: &SpooledEnvelopeId) -> impl FnOnce(io::Error) -> SpoolError + '_ {
    move |err| {
        if err.kind() == io::ErrorKind::NotFound {
            SpoolError::NotFound(id.clone())
        } else {
            SpoolError::Io(err)
        }
    }
}

impl BackingStore for FileBackingStore {
    fn write(&self, bytes: &[u8]) -> Result<SpooledEnvelopeId> {
        let id = SpooledEnvelopeId::generate();
        let filename = id.filename();
        let final_path = self.path.join(&filename);
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{filename}"));

        let staged = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });

        if let Err(err) = staged.and_then(|()| fs::rename(&temp_path, &final_path)) {
            // Best effort, init() removes anything left behind.
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }

        internal!(
            level = DEBUG,
            "Queued envelope {id} at {}",
            final_path.display()
        );

        Ok(id)
    }

    fn list(&self) -> Result<Vec<SpooledEnvelopeId>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let filename = entry?.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TEMP_PREFIX) || !filename.ends_with(EXTENSION) {
                continue;
            }

            if let Some(id) = SpooledEnvelopeId::from_filename(&filename) {
                ids.push(id);
            }
        }

        ids.sort();

        Ok(ids)
    }

    fn read(&self, id: &SpooledEnvelopeId) -> Result<Vec<u8>> {
        fs::read(self.entry_path(id)).map_err(not_found(id))
    }

    fn delete(&self, id: &SpooledEnvelopeId) -> Result<()> {
        let path = self.entry_path(id);
        let deleted = self.path.join(format!("{}{DELETED_SUFFIX}", id.filename()));

        fs::rename(&path, &deleted).map_err(not_found(id))?;
        fs::remove_file(&deleted)?;

        internal!(level = DEBUG, "Deleted envelope {id} from queue");

        Ok(())
    }

    fn size(&self, id: &SpooledEnvelopeId) -> Result<u64> {
        Ok(fs::metadata(self.entry_path(id))
            .map_err(not_found(id))?
            .len())
    }
}

#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the store. The directory is not touched until [`FileBackingStore::init`].
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileBackingStore> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore { path: self.path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileBackingStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileBackingStore::builder()
            .path(dir.path().to_path_buf())
            .build()
            .expect("valid path");
        store.init().expect("init");
        (dir, store)
    }

    #[test]
    fn test_write_list_read_delete() {
        let (_dir, store) = store();

        let first = store.write(b"first").expect("write");
        let second = store.write(b"second").expect("write");

        assert_eq!(store.list().expect("list"), vec![first.clone(), second.clone()]);
        assert_eq!(store.read(&second).expect("read"), b"second".to_vec());
        assert_eq!(store.size(&first).expect("size"), 5);

        store.delete(&first).expect("delete");
        assert_eq!(store.list().expect("list"), vec![second]);
        assert!(matches!(store.read(&first), Err(SpoolError::NotFound(_))));
        assert!(matches!(store.delete(&first), Err(SpoolError::NotFound(_))));
    }

    #[test]
    fn test_list_ignores_foreign_and_staged_files() {
        let (dir, store) = store();
        let id = store.write(b"kept").expect("write");

        fs::write(dir.path().join("notes.txt"), b"hello").expect("write");
        fs::write(dir.path().join(format!(".tmp_{}", id.filename())), b"x").expect("write");
        fs::write(dir.path().join("garbage.envelope"), b"x").expect("write");

        assert_eq!(store.list().expect("list"), vec![id]);
    }

    #[test]
    fn test_init_cleans_up_orphans() {
        let (dir, store) = store();
        let id = store.write(b"kept").expect("write");

        let staged = dir.path().join(format!(".tmp_{}", SpooledEnvelopeId::generate().filename()));
        let deleted = dir.path().join(format!("{}.deleted", SpooledEnvelopeId::generate().filename()));
        fs::write(&staged, b"partial").expect("write");
        fs::write(&deleted, b"old").expect("write");

        store.init().expect("init");

        assert!(!staged.exists());
        assert!(!deleted.exists());
        assert_eq!(store.list().expect("list"), vec![id]);
    }

    #[test]
    fn test_init_rejects_file_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"").expect("write");

        let store = FileBackingStore::builder().path(file).build().expect("valid");
        assert!(matches!(
            store.init(),
            Err(SpoolError::Validation(ValidationError::NotDirectory(_)))
        ));
    }
}
