use super::cache::{CacheHandle, CacheStore, MemoryCache, COMPILE_NAMESPACE};
use super::cycle_guard::CycleGuard;
use super::error::CompileError;
use super::events::{Observer, Observers};
use super::file::File;
use super::lang::Lang;
use super::lookup::{self, split_query, ResolutionInfo};
use super::registry::ProcessorRegistry;
use crate::helpers;
use crate::project_context::ProjectContext;
use ahash::AHashMap;
use log::warn;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Run-wide switches picking the lint pass and the persistent cache namespace.
#[derive(Debug, Clone, Default)]
pub struct CompileSettings {
    pub debug: bool,
    pub use_lint: bool,
    /// Use a fresh cache namespace, ignoring everything stored before.
    pub unique: bool,
}

impl CompileSettings {
    pub fn cache_namespace(&self, media: &str) -> String {
        if self.unique {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis())
                .unwrap_or_default();
            format!("{COMPILE_NAMESPACE}/{stamp}-{}", std::process::id())
        } else {
            let mode = if self.debug { "debug" } else { "release" };
            format!("{COMPILE_NAMESPACE}/{mode}-{media}")
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileContext {
    /// Set for compiles triggered by a file change; those never queue follow-ups.
    pub from_watch: bool,
}

/// Everything one release shares while compiling units recursively.
pub struct Session {
    pub project: ProjectContext,
    pub registry: ProcessorRegistry,
    pub settings: CompileSettings,
    pub namespace: String,
    pub(crate) store: Box<dyn CacheStore>,
    pub(crate) lang: Lang,
    pub(crate) guard: CycleGuard,
    pub(crate) memory: MemoryCache,
    pub(crate) handles: AHashMap<PathBuf, CacheHandle>,
    pub(crate) compile_stack: Vec<PathBuf>,
    pub(crate) follow_ups: VecDeque<PathBuf>,
    pub(crate) observers: Observers,
}

impl Session {
    pub fn new(
        project: ProjectContext,
        registry: ProcessorRegistry,
        store: Box<dyn CacheStore>,
        settings: CompileSettings,
    ) -> Self {
        let namespace = settings.cache_namespace(project.current_profile());
        Self {
            project,
            registry,
            settings,
            namespace,
            store,
            lang: Lang::new(),
            guard: CycleGuard::default(),
            memory: MemoryCache::default(),
            handles: AHashMap::new(),
            compile_stack: vec![],
            follow_ups: VecDeque::new(),
            observers: Observers::default(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// The placeholder codec, for registering extra kinds.
    pub fn lang_mut(&mut self) -> &mut Lang {
        &mut self.lang
    }

    /// A unit for `path`, configured by the project rules.
    pub fn file(&self, path: &Path) -> Result<File, CompileError> {
        File::new(&self.project, path)
    }

    /// Resolves `reference` relative to the directory of `file`.
    pub fn lookup(&self, reference: &str, file: &File) -> ResolutionInfo {
        lookup::lookup(&self.project, reference, Some(&file.dirname))
    }

    pub fn handle(&self, key: &Path) -> Option<&CacheHandle> {
        self.handles.get(key)
    }

    pub fn next_follow_up(&mut self) -> Option<PathBuf> {
        self.follow_ups.pop_front()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Forgets everything from the current run.
    pub fn reset(&mut self) {
        self.memory.clear();
        self.compile_stack.clear();
        self.follow_ups.clear();
        self.guard.clear();
        self.lang.reset();
        self.handles.clear();
    }

    /// Drops one named compile cache, or all of them when `name` is `None`.
    pub fn clean(&self, name: Option<&str>) -> Result<(), CompileError> {
        match name {
            Some(name) => self.store.clean(Some(&format!("{COMPILE_NAMESPACE}/{name}"))),
            None => self.store.clean(None),
        }
    }

    /// Records that the output of `file` depends on `target`, including what `target` depends on.
    pub(crate) fn add_deps(&mut self, file: &File, target: &File) {
        let Some(key) = &file.cache else {
            return;
        };
        let inherited = target
            .cache
            .as_ref()
            .filter(|target_key| *target_key != key)
            .and_then(|target_key| self.handles.get(target_key))
            .cloned();
        if let Some(handle) = self.handles.get_mut(key) {
            if let Some(inherited) = inherited {
                handle.merge_deps(&inherited);
            }
            handle.add_deps(&target.realpath);
        }
    }

    /// Records a reference that resolved to nothing; its appearance invalidates the cache.
    pub(crate) fn add_missing_dep(&mut self, file: &mut File, reference: &str) {
        let quoted = helpers::string_quote(reference);
        let rest = split_query(quoted.rest).rest;
        file.add_missing_dep(&rest);
        let Some(key) = &file.cache else {
            return;
        };
        let path = if rest.starts_with('/') {
            self.project.project_absolute_path(&rest)
        } else {
            helpers::normalize(&file.dirname.join(&rest))
        };
        match self.handles.get_mut(key) {
            Some(handle) => handle.add_missing_dep(path, reference),
            None => warn!("No cache handle for [{}]", key.display()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_namespace_follows_mode_and_media() {
        let release = CompileSettings::default();
        assert_eq!(release.cache_namespace("dev"), "compile/release-dev");
        let debug = CompileSettings {
            debug: true,
            ..Default::default()
        };
        assert_eq!(debug.cache_namespace("prod"), "compile/debug-prod");
        let unique = CompileSettings {
            unique: true,
            ..Default::default()
        };
        assert!(unique.cache_namespace("dev").starts_with("compile/"));
        assert_ne!(unique.cache_namespace("dev"), "compile/release-dev");
    }

    #[test]
    fn clean_drops_one_namespace_or_all() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join(".cache");
        for name in ["release-dev", "debug-dev"] {
            std::fs::create_dir_all(cache.join(COMPILE_NAMESPACE).join(name)).unwrap();
        }
        let project = ProjectContext::from_config(dir.path(), crate::config::Config::default(), "dev").unwrap();
        let session = Session::new(
            project,
            ProcessorRegistry::new(),
            Box::new(crate::build::cache::FsCacheStore::new(&cache)),
            CompileSettings::default(),
        );

        session.clean(Some("debug-dev")).unwrap();
        assert!(!cache.join("compile/debug-dev").exists());
        assert!(cache.join("compile/release-dev").exists());

        session.clean(None).unwrap();
        assert!(!cache.join(COMPILE_NAMESPACE).exists());
        assert!(cache.exists());
    }
}
