use super::error::CompileError;
use super::file::{Content, File};
use crate::helpers;
use ahash::AHashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Bumped whenever the persisted record layout changes.
pub const CACHE_VERSION: u32 = 1;
pub const COMPILE_NAMESPACE: &str = "compile";

/// The observable fields of a compiled unit, restorable without recompiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub requires: Vec<String>,
    pub async_requires: Vec<String>,
    pub links: Vec<String>,
    pub derived: Vec<String>,
    pub missing_deps: Vec<String>,
    pub hash: Option<String>,
    pub is_resource_map: bool,
}

impl CacheInfo {
    pub fn from_file(file: &File) -> CacheInfo {
        CacheInfo {
            requires: file.requires.clone(),
            async_requires: file.async_requires.clone(),
            links: file.links.clone(),
            derived: file.derived.clone(),
            missing_deps: file.missing_deps.clone(),
            hash: file.cached_hash().map(str::to_string),
            is_resource_map: file.is_resource_map,
        }
    }

    pub fn revert(&self, file: &mut File) {
        file.requires = self.requires.clone();
        file.async_requires = self.async_requires.clone();
        file.links = self.links.clone();
        file.derived = self.derived.clone();
        file.missing_deps = self.missing_deps.clone();
        file.is_resource_map = self.is_resource_map;
    }
}

/// What the persistent store keeps per unit next to its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub version: u32,
    pub source: PathBuf,
    pub mtime: Option<u64>,
    pub content_hash: Option<String>,
    pub deps: BTreeMap<PathBuf, Option<u64>>,
    pub missing_deps: BTreeMap<PathBuf, String>,
    pub binary: bool,
    pub info: CacheInfo,
}

pub trait CacheStore {
    fn load(&self, namespace: &str, key: &Path) -> Option<(CacheRecord, Vec<u8>)>;
    fn save(
        &self,
        namespace: &str,
        key: &Path,
        record: &CacheRecord,
        content: &[u8],
    ) -> Result<(), CompileError>;
    /// Drops one namespace, or every compile namespace when `None`.
    fn clean(&self, namespace: Option<&str>) -> Result<(), CompileError>;
}

/// Stores `<dir>/<namespace>/<blake3 of realpath>.{json,bin}`.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, namespace: &str, key: &Path, ext: &str) -> PathBuf {
        let name = helpers::compute_content_hash(key.to_string_lossy().as_bytes());
        self.dir.join(namespace).join(format!("{name}.{ext}"))
    }
}

impl CacheStore for FsCacheStore {
    fn load(&self, namespace: &str, key: &Path) -> Option<(CacheRecord, Vec<u8>)> {
        let json = fs::read_to_string(self.entry_path(namespace, key, "json")).ok()?;
        let record = serde_json::from_str::<CacheRecord>(&json).ok()?;
        let content = fs::read(self.entry_path(namespace, key, "bin")).ok()?;
        Some((record, content))
    }

    fn save(
        &self,
        namespace: &str,
        key: &Path,
        record: &CacheRecord,
        content: &[u8],
    ) -> Result<(), CompileError> {
        let json_path = self.entry_path(namespace, key, "json");
        if let Some(parent) = json_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CompileError::io(parent, err))?;
        }
        let json = serde_json::to_string(record).map_err(|err| CompileError::Cache(err.to_string()))?;
        let bin_path = self.entry_path(namespace, key, "bin");
        fs::write(&bin_path, content).map_err(|err| CompileError::io(&bin_path, err))?;
        fs::write(&json_path, json).map_err(|err| CompileError::io(&json_path, err))?;
        Ok(())
    }

    fn clean(&self, namespace: Option<&str>) -> Result<(), CompileError> {
        let target = self.dir.join(namespace.unwrap_or(COMPILE_NAMESPACE));
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|err| CompileError::io(&target, err))?;
        }
        Ok(())
    }
}

/// Persistent cache entry of one file-backed unit, collecting the files its output depends on.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    pub realpath: PathBuf,
    pub namespace: String,
    deps: BTreeMap<PathBuf, Option<u64>>,
    missing_deps: BTreeMap<PathBuf, String>,
}

impl CacheHandle {
    pub fn new(realpath: &Path, namespace: &str) -> Self {
        Self {
            realpath: realpath.to_path_buf(),
            namespace: namespace.to_string(),
            deps: BTreeMap::new(),
            missing_deps: BTreeMap::new(),
        }
    }

    pub fn deps(&self) -> impl Iterator<Item = &PathBuf> {
        self.deps.keys()
    }

    pub fn missing_deps(&self) -> impl Iterator<Item = &PathBuf> {
        self.missing_deps.keys()
    }

    pub fn add_deps(&mut self, path: &Path) {
        self.deps
            .insert(path.to_path_buf(), helpers::get_mtime(path));
    }

    /// Takes over every dependency of `other`, which depends on `other`'s own file too.
    pub fn merge_deps(&mut self, other: &CacheHandle) {
        for (path, mtime) in &other.deps {
            self.deps.insert(path.clone(), *mtime);
        }
        for (path, reference) in &other.missing_deps {
            self.missing_deps.insert(path.clone(), reference.clone());
        }
    }

    pub fn add_missing_dep(&mut self, path: PathBuf, reference: &str) {
        self.missing_deps.insert(path, reference.to_string());
    }

    fn is_valid(&self, record: &CacheRecord) -> bool {
        if record.version != CACHE_VERSION || record.source != self.realpath {
            return false;
        }
        if record.mtime.is_none() || helpers::get_mtime(&self.realpath) != record.mtime {
            let current = helpers::compute_file_hash(&self.realpath);
            if current.is_none() || current != record.content_hash {
                return false;
            }
        }
        let deps_unchanged = record.deps.iter().all(|(path, mtime)| {
            let current = helpers::get_mtime(path);
            current.is_some() && current == *mtime
        });
        let missing_still_missing = record.missing_deps.keys().all(|path| !path.exists());
        deps_unchanged && missing_still_missing
    }

    /// Loads the stored record when it is still valid, adopting its dependencies.
    pub fn revert(&mut self, store: &dyn CacheStore) -> Option<(CacheInfo, Content)> {
        let (record, bytes) = store.load(&self.namespace, &self.realpath)?;
        if !self.is_valid(&record) {
            debug!("Cache [{}] is stale", self.realpath.display());
            return None;
        }
        let content = if record.binary {
            Content::Binary(bytes)
        } else {
            Content::Text(String::from_utf8(bytes).ok()?)
        };
        self.deps = record.deps;
        self.missing_deps = record.missing_deps;
        Some((record.info, content))
    }

    pub fn save(
        &self,
        store: &dyn CacheStore,
        content: &Content,
        info: CacheInfo,
    ) -> Result<(), CompileError> {
        let record = CacheRecord {
            version: CACHE_VERSION,
            source: self.realpath.clone(),
            mtime: helpers::get_mtime(&self.realpath),
            content_hash: helpers::compute_file_hash(&self.realpath),
            deps: self.deps.clone(),
            missing_deps: self.missing_deps.clone(),
            binary: matches!(content, Content::Binary(_)),
            info,
        };
        store.save(&self.namespace, &self.realpath, &record, content.as_bytes())
    }
}

/// Snapshot of a unit seen earlier in the current run.
#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    pub content: Option<Content>,
    pub info: CacheInfo,
    pub cache: Option<PathBuf>,
    pub done: bool,
}

/// Per-run cache of units, keyed by realpath.
#[derive(Debug, Default)]
pub(crate) struct MemoryCache {
    entries: AHashMap<PathBuf, MemoryEntry>,
}

impl MemoryCache {
    /// Marks a unit as in flight before its own compilation starts.
    pub fn register(&mut self, file: &File) {
        self.entries.insert(
            file.realpath.clone(),
            MemoryEntry {
                content: None,
                info: CacheInfo::default(),
                cache: file.cache.clone(),
                done: false,
            },
        );
    }

    pub fn update(&mut self, file: &File) {
        self.entries.insert(
            file.realpath.clone(),
            MemoryEntry {
                content: file.content().cloned(),
                info: CacheInfo::from_file(file),
                cache: file.cache.clone(),
                done: true,
            },
        );
    }

    /// Restores `file` from its entry; an in-flight unit yields its raw content.
    pub fn revert(&self, file: &mut File) -> Result<bool, CompileError> {
        let Some(entry) = self.entries.get(&file.realpath) else {
            return Ok(false);
        };
        entry.info.revert(file);
        file.cache = entry.cache.clone();
        match &entry.content {
            Some(content) => {
                file.set_content(content.clone());
                file.set_hash(entry.info.hash.clone());
            }
            None => {
                let raw = file.read_raw()?;
                file.set_content(raw);
            }
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
