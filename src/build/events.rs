use super::file::{File, FileKind};
use super::lookup::ResolutionInfo;
use super::pipeline::Stage;
use std::path::Path;

/// One resolved placeholder, handed to observers before it is spliced in.
#[derive(Debug)]
pub struct Restoration<'a> {
    pub kind: &'a str,
    pub value: &'a str,
    pub extra: Option<&'a str>,
    pub info: Option<&'a ResolutionInfo>,
    pub file: &'a File,
    /// Text substituted for the placeholder; `None` leaves the kind unhandled.
    pub ret: Option<String>,
}

/// Hooks into compilation. Every method defaults to doing nothing.
pub trait Observer {
    fn compile_start(&mut self, _file: &File) {}

    fn compile_end(&mut self, _file: &File) {}

    /// A linked file was queued for a follow-up compile.
    fn compile_add(&mut self, _path: &Path) {}

    fn stage(&mut self, _stage: Stage, _file: &File) {}

    /// Content produced by one of the reference extractors.
    fn standardized(&mut self, _kind: FileKind, _file: &File, _content: &mut String) {}

    fn restore(&mut self, _restoration: &mut Restoration) {}

    fn before_cache_revert(&mut self, _file: &File) {}

    fn after_cache_revert(&mut self, _file: &File) {}

    fn before_compile(&mut self, _file: &File) {}

    fn after_compile(&mut self, _file: &File) {}
}

/// Ordered list of observers, fired in registration order.
#[derive(Default)]
pub struct Observers {
    observers: Vec<Box<dyn Observer>>,
}

impl Observers {
    pub fn push(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn compile_start(&mut self, file: &File) {
        self.observers.iter_mut().for_each(|o| o.compile_start(file));
    }

    pub fn compile_end(&mut self, file: &File) {
        self.observers.iter_mut().for_each(|o| o.compile_end(file));
    }

    pub fn compile_add(&mut self, path: &Path) {
        self.observers.iter_mut().for_each(|o| o.compile_add(path));
    }

    pub fn stage(&mut self, stage: Stage, file: &File) {
        self.observers.iter_mut().for_each(|o| o.stage(stage, file));
    }

    pub fn standardized(&mut self, kind: FileKind, file: &File, content: &mut String) {
        for observer in self.observers.iter_mut() {
            observer.standardized(kind, file, content);
        }
    }

    pub fn restore(&mut self, restoration: &mut Restoration) {
        for observer in self.observers.iter_mut() {
            observer.restore(restoration);
        }
    }

    pub fn before_cache_revert(&mut self, file: &File) {
        self.observers.iter_mut().for_each(|o| o.before_cache_revert(file));
    }

    pub fn after_cache_revert(&mut self, file: &File) {
        self.observers.iter_mut().for_each(|o| o.after_cache_revert(file));
    }

    pub fn before_compile(&mut self, file: &File) {
        self.observers.iter_mut().for_each(|o| o.before_compile(file));
    }

    pub fn after_compile(&mut self, file: &File) {
        self.observers.iter_mut().for_each(|o| o.after_compile(file));
    }
}
