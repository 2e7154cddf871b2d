use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// String-keyed persistent storage, one JSON document per key.
///
/// The method names follow the browser storage API the widgets were
/// originally written against, so each widget can be read as "get my key,
/// parse it, mutate, set my key".
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove_item(&mut self, key: &str) -> anyhow::Result<()>;
}

/// File-backed store: every key lives in `<data_dir>/<key>.json`.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        validate_key(key)?;
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for DataStore {
    #[tracing::instrument(skip(self))]
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            debug!(file = %path.display(), "no stored value");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value).with_context(|| format!("failed to save {key}"))
    }

    #[tracing::instrument(skip(self))]
    fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}

/// In-process store with no backing file.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> anyhow::Result<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// Reads and parses `key`, falling back to `T::default()` when the value is
/// missing, unreadable or not valid JSON for `T`.
#[tracing::instrument(skip(store))]
pub fn load_json<T, S>(store: &S, key: &str) -> T
where
    T: DeserializeOwned + Default,
    S: KeyValueStore + ?Sized,
{
    let raw = match store.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(err) => {
            warn!(key, error = %format!("{err:#}"), "stored state unavailable; using defaults");
            return T::default();
        }
    };

    if raw.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "failed to parse stored state; using defaults");
            T::default()
        }
    }
}

#[tracing::instrument(skip(store, value))]
pub fn save_json<T, S>(store: &mut S, key: &str, value: &T) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let serialized =
        serde_json::to_string(value).with_context(|| format!("failed serializing {key}"))?;
    store.set_item(key, &serialized)
}

fn validate_key(key: &str) -> anyhow::Result<()> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!("invalid storage key: {key:?}"));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = contents.len(), "saving atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::tempdir;

    use super::{DataStore, KeyValueStore, MemoryStore, load_json, save_json};

    #[test]
    fn file_store_roundtrips_and_removes() {
        let temp = tempdir().expect("tempdir");
        let mut store = DataStore::open(temp.path()).expect("open store");

        assert_eq!(store.get_item("bossTimers").expect("get"), None);
        store.set_item("bossTimers", "[]").expect("set");
        assert_eq!(
            store.get_item("bossTimers").expect("get").as_deref(),
            Some("[]")
        );
        assert!(temp.path().join("bossTimers.json").exists());

        store.remove_item("bossTimers").expect("remove");
        assert_eq!(store.get_item("bossTimers").expect("get"), None);
    }

    #[test]
    fn rejects_keys_that_escape_the_data_dir() {
        let temp = tempdir().expect("tempdir");
        let mut store = DataStore::open(temp.path()).expect("open store");
        assert!(store.set_item("../outside", "{}").is_err());
        assert!(store.get_item("").is_err());
    }

    #[test]
    fn corrupt_json_loads_as_default() {
        let mut store = MemoryStore::new();
        store.set_item("channelActiveState", "[1, 2,").expect("set");

        let loaded: Vec<u32> = load_json(&store, "channelActiveState");
        assert!(loaded.is_empty());
    }

    #[test]
    fn typed_helpers_roundtrip() {
        let mut store = MemoryStore::new();
        let set: BTreeSet<u32> = [3, 1, 2].into_iter().collect();
        save_json(&mut store, "channelActiveState", &set).expect("save");

        let loaded: BTreeSet<u32> = load_json(&store, "channelActiveState");
        assert_eq!(loaded, set);
        assert_eq!(
            store.get_item("channelActiveState").expect("get").as_deref(),
            Some("[1,2,3]")
        );
    }
}
