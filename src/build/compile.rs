use super::cache::{CacheHandle, CacheInfo};
use super::error::CompileError;
use super::file::{Content, File};
use super::pipeline::{self, Stage};
use super::session::{CompileContext, Session};
use crate::helpers;
use log::debug;
use regex::Regex;
use std::sync::LazyLock;

static RESOURCE_MAP_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b__RESOURCE_MAP__\b").expect("resource map marker pattern is valid"));

impl Session {
    /// Compiles `file` in place, recursively compiling whatever it embeds or hashes.
    /// A failure drops everything the session learned during the run.
    pub fn compile(&mut self, file: &mut File, context: &CompileContext) -> Result<(), CompileError> {
        let result = self.compile_unit(file, context);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn compile_unit(&mut self, file: &mut File, context: &CompileContext) -> Result<(), CompileError> {
        // Resource maps skip the persistent cache but are still memoized within a run.
        let memoize = file.use_cache;
        if memoize && self.memory.revert(file)? {
            debug!("Memory hit [{}]", file.subpath);
            if file.is_resource_map {
                file.use_cache = false;
            }
            return Ok(());
        }

        if memoize {
            self.memory.register(file);
        }
        self.mark_resource_map(file)?;
        if file.is_text() && self.settings.use_lint && (file.has_content() || file.is_file()) {
            file.get_content()?;
            pipeline::pipe(self, file, Stage::Lint, true)?;
        }

        self.observers.compile_start(file);
        if !self.compile_stack.contains(&file.realpath) {
            self.compile_stack.push(file.realpath.clone());
        }

        if file.is_file() {
            if file.use_compile && !file.ext.is_empty() {
                let key = file.realpath.clone();
                let namespace = &self.namespace;
                self.handles
                    .entry(key.clone())
                    .or_insert_with(|| CacheHandle::new(&key, namespace));
                file.cache = Some(key);

                let reverted = file.use_cache && self.revert_cache(file)?;
                if !reverted {
                    self.observers.before_compile(file);
                    file.get_content()?;
                    pipeline::process(self, file)?;
                    self.observers.after_compile(file);
                    if file.use_cache {
                        self.save_cache(file)?;
                    }
                }
            } else {
                let raw = file.read_raw()?;
                file.set_content(raw);
            }
        } else if file.use_compile && !file.ext.is_empty() {
            pipeline::process(self, file)?;
        }

        if file.use_hash {
            file.get_hash()?;
        }
        file.compiled = true;
        self.observers.compile_end(file);

        if !context.from_watch {
            self.queue_links(file);
        }
        self.compile_stack.retain(|path| *path != file.realpath);

        if memoize {
            self.memory.update(file);
        }
        Ok(())
    }

    /// Units carrying `__RESOURCE_MAP__` are rebuilt on every run.
    fn mark_resource_map(&mut self, file: &mut File) -> Result<(), CompileError> {
        if file.is_resource_map || !file.is_text() || !(file.has_content() || file.is_file()) {
            return Ok(());
        }
        if let Content::Text(text) = file.get_content()? {
            if RESOURCE_MAP_MARKER.is_match(text) {
                file.is_resource_map = true;
                file.use_cache = false;
            }
        }
        Ok(())
    }

    fn revert_cache(&mut self, file: &mut File) -> Result<bool, CompileError> {
        let Some(handle) = self.handles.get_mut(&file.realpath) else {
            return Ok(false);
        };
        let Some((info, content)) = handle.revert(self.store.as_ref()) else {
            return Ok(false);
        };
        debug!("Revert cache [{}]", file.subpath);
        self.observers.before_cache_revert(file);
        info.revert(file);
        file.set_content(content);
        file.set_hash(info.hash);
        self.observers.after_cache_revert(file);
        Ok(true)
    }

    fn save_cache(&mut self, file: &File) -> Result<(), CompileError> {
        debug!("Save cache [{}] start", file.subpath);
        if let (Some(handle), Some(content)) = (self.handles.get(&file.realpath), file.content()) {
            handle.save(self.store.as_ref(), content, CacheInfo::from_file(file))?;
        }
        debug!("Save cache [{}] end", file.subpath);
        Ok(())
    }

    /// Queues every linked file that is not being compiled already.
    fn queue_links(&mut self, file: &File) {
        for link in &file.links {
            let Some(path) = helpers::realpath(&self.project.project_absolute_path(link)) else {
                continue;
            };
            if self.compile_stack.contains(&path) {
                continue;
            }
            self.compile_stack.push(path.clone());
            self.observers.compile_add(&path);
            self.follow_ups.push_back(path);
        }
    }
}
