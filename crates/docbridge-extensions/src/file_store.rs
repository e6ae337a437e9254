//! JSON file store
//!
//! Keeps the whole [`StoreState`] as pretty JSON in a single file. Every
//! mutation takes an exclusive `fs4` lock on a sibling `.lock` file, reloads
//! the state, applies the change and atomically replaces the file, so several
//! CLI processes can share one state file.

use docbridge_core::error::{Error, Result};
use docbridge_core::types::{Component, ExecutionLog, Extension, Instance, LogCompletion, Source};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::store::{ExtensionStore, InstanceFilter, StoreState};

/// Store persisted to a single JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn acquire_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive()
            .map_err(|e| Error::storage(format!("Failed to lock {}: {}", self.path.display(), e)))?;
        Ok(lock)
    }

    fn load(&self) -> Result<StoreState> {
        if !self.path.exists() {
            return Ok(StoreState::default());
        }
        let content = fs::read(&self.path)?;
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(StoreState::default());
        }
        serde_json::from_slice(&content)
            .map_err(|e| Error::storage(format!("Corrupt state file {}: {}", self.path.display(), e)))
    }

    fn save(&self, state: &StoreState) -> Result<()> {
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)?;
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&json)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T> {
        let _lock = self.acquire_lock()?;
        let state = self.load()?;
        Ok(f(&state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let _lock = self.acquire_lock()?;
        let mut state = self.load()?;
        let result = f(&mut state)?;
        self.save(&state)?;
        Ok(result)
    }
}

impl ExtensionStore for FileStore {
    fn list_sources(&self) -> Result<Vec<Source>> {
        self.read(|s| s.sources.values().cloned().collect())
    }

    fn get_source(&self, slug: &str) -> Result<Option<Source>> {
        self.read(|s| s.sources.get(slug).cloned())
    }

    fn create_source(&self, source: Source) -> Result<()> {
        self.write(|s| s.create_source(source))
    }

    fn update_source(&self, source: &Source) -> Result<()> {
        self.write(|s| s.update_source(source))
    }

    fn delete_source(&self, slug: &str) -> Result<()> {
        self.write(|s| s.delete_source(slug))
    }

    fn list_extensions(&self) -> Result<Vec<Extension>> {
        self.read(|s| s.extensions.values().cloned().collect())
    }

    fn get_extension(&self, slug: &str) -> Result<Option<Extension>> {
        self.read(|s| s.extensions.get(slug).cloned())
    }

    fn create_extension(&self, extension: Extension) -> Result<()> {
        self.write(|s| s.create_extension(extension))
    }

    fn update_extension(&self, extension: &Extension) -> Result<()> {
        self.write(|s| s.update_extension(extension))
    }

    fn delete_extension(&self, slug: &str) -> Result<()> {
        self.write(|s| s.delete_extension(slug))
    }

    fn list_components(&self, extension: Option<&str>) -> Result<Vec<Component>> {
        self.read(|s| s.list_components(extension))
    }

    fn get_component(&self, full_slug: &str) -> Result<Option<Component>> {
        self.read(|s| s.components.get(full_slug).cloned())
    }

    fn replace_components(&self, extension: &str, components: Vec<Component>) -> Result<Vec<Instance>> {
        self.write(|s| s.replace_components(extension, components))
    }

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        self.read(|s| s.list_instances(filter))
    }

    fn get_instance(&self, id: Uuid) -> Result<Option<Instance>> {
        self.read(|s| s.instances.get(&id).cloned())
    }

    fn create_instance(&self, instance: Instance) -> Result<()> {
        self.write(|s| s.create_instance(instance))
    }

    fn update_instance(&self, instance: &Instance) -> Result<()> {
        self.write(|s| s.update_instance(instance))
    }

    fn delete_instance(&self, id: Uuid) -> Result<()> {
        self.write(|s| s.delete_instance(id))
    }

    fn create_log(&self, log: ExecutionLog) -> Result<()> {
        self.write(|s| s.create_log(log))
    }

    fn complete_log(&self, id: Uuid, completion: LogCompletion) -> Result<ExecutionLog> {
        self.write(|s| s.complete_log(id, completion))
    }

    fn get_log(&self, id: Uuid) -> Result<Option<ExecutionLog>> {
        self.read(|s| s.logs.get(&id).cloned())
    }

    fn list_logs(&self, instance: Uuid) -> Result<Vec<ExecutionLog>> {
        self.read(|s| s.list_logs(instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_core::types::SourceKind;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("state.json"));
        (store, temp_dir)
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let (store, _temp) = create_test_store();
        assert!(store.list_sources().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_state_survives_reopen() {
        let (store, _temp) = create_test_store();
        store
            .create_source(Source::new("acme", "Acme", "https://github.com/acme/plugins", SourceKind::User))
            .unwrap();

        let reopened = FileStore::new(store.path());
        let source = reopened.get_source("acme").unwrap().unwrap();
        assert_eq!(source.url, "https://github.com/acme/plugins");
    }

    #[test]
    fn test_failed_mutation_leaves_file_untouched() {
        let (store, _temp) = create_test_store();
        store
            .create_source(Source::new("acme", "Acme", "https://github.com/acme/plugins", SourceKind::User))
            .unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        assert!(store
            .create_source(Source::new("acme", "Dup", "https://example.com/x.tar.gz", SourceKind::User))
            .is_err());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let (store, _temp) = create_test_store();
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.list_sources().unwrap_err(), Error::Storage(_)));
    }

    #[test]
    fn test_concurrent_writers() {
        let (store, _temp) = create_test_store();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .create_source(Source::new(
                            format!("source-{}", i),
                            "Source",
                            "https://github.com/acme/plugins",
                            SourceKind::User,
                        ))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_sources().unwrap().len(), 8);
    }
}
