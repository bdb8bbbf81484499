use super::error::CompileError;
use super::pipeline::{Stage, Step};
use crate::config::{ReleaseConfig, StepsConfig};
use crate::helpers;
use crate::project_context::ProjectContext;
use ahash::AHashMap;
use regex::Captures;
use std::path::{Path, PathBuf};

const MARKUP_EXTS: &[&str] = &[
    "html", "htm", "xhtml", "shtml", "tpl", "tmpl", "vm", "ejs", "jsp", "php", "asp", "aspx",
    "handlebars", "jade", "haml",
];
const SCRIPT_EXTS: &[&str] = &["js", "jsx", "mjs", "ts", "tsx", "coffee", "es", "es6", "es7"];
const STYLE_EXTS: &[&str] = &["css", "less", "sass", "scss", "styl"];

/// Content kind driving the builtin reference extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Markup,
    Script,
    Style,
    Other,
}

impl FileKind {
    pub fn from_ext(ext: &str) -> FileKind {
        let ext = ext.trim_start_matches('.').to_lowercase();
        if MARKUP_EXTS.contains(&ext.as_str()) {
            FileKind::Markup
        } else if SCRIPT_EXTS.contains(&ext.as_str()) {
            FileKind::Script
        } else if STYLE_EXTS.contains(&ext.as_str()) {
            FileKind::Style
        } else {
            FileKind::Other
        }
    }

    /// Parses a `standard` type override such as `"html"` or `"css"`.
    pub fn from_name(name: &str) -> Option<FileKind> {
        match name {
            "html" | "markup" => Some(FileKind::Markup),
            "js" | "script" => Some(FileKind::Script),
            "css" | "style" => Some(FileKind::Style),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Text(text) => text.as_bytes(),
            Content::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|item| item == value) {
        list.push(value.to_string());
    }
}

fn expand(template: &str, caps: &Captures) -> String {
    let mut dst = String::new();
    caps.expand(template, &mut dst);
    dst
}

fn replace_ext(subpath: &str, ext: &str, r_ext: &str) -> String {
    match subpath.strip_suffix(ext) {
        Some(stem) if !ext.is_empty() => format!("{stem}{r_ext}"),
        _ => subpath.to_string(),
    }
}

/// `/a/b.png` + `1f2e3d4` gives `/a/b_1f2e3d4.png`.
fn insert_hash(path: &str, hash: &str) -> String {
    let file_start = path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) => {
            let dot = file_start + dot;
            format!("{}_{hash}{}", &path[..dot], &path[dot..])
        }
        None => format!("{path}_{hash}"),
    }
}

/// A compilation unit: one project file, or a fragment compiled on behalf of a host.
#[derive(Debug, Clone)]
pub struct File {
    pub realpath: PathBuf,
    pub subpath: String,
    pub dirname: PathBuf,
    pub ext: String,
    pub r_ext: String,
    pub xlang: String,
    pub kind: FileKind,
    pub is_json_like: bool,

    pub id: String,
    pub module_id: Option<String>,
    pub release: Option<String>,
    pub url: String,
    pub domain: String,
    pub query: String,
    pub fragment: String,

    content: Option<Content>,
    content_hash: Option<String>,
    pub hash_length: usize,

    pub requires: Vec<String>,
    pub async_requires: Vec<String>,
    pub links: Vec<String>,
    pub derived: Vec<String>,
    pub missing_deps: Vec<String>,

    pub use_cache: bool,
    pub use_compile: bool,
    pub use_hash: bool,
    pub pipe_embed: bool,
    pub is_inline: bool,
    pub is_partial: bool,
    pub compiled: bool,
    pub is_resource_map: bool,

    pub steps: AHashMap<Stage, Vec<Step>>,
    /// Key of the persistent cache handle this unit records dependencies into.
    pub cache: Option<PathBuf>,
}

impl File {
    /// A unit backed by `path`, configured by the project rules matching its subpath.
    pub fn new(project: &ProjectContext, path: &Path) -> Result<File, CompileError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            project.root.join(path)
        };
        let realpath = helpers::realpath(&absolute).unwrap_or_else(|| helpers::normalize(&absolute));
        if realpath.as_os_str().is_empty() {
            return Err(CompileError::InvalidRealpath(path.to_string_lossy().to_string()));
        }
        let ext = realpath
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        Ok(File::configure(project, realpath, ext, String::new()))
    }

    /// A fragment of `host` compiled as if it were a file of extension `ext`.
    pub fn partial(project: &ProjectContext, host: &File, ext: &str, xlang: &str) -> File {
        let ext = format!(".{}", ext.trim_start_matches('.'));
        let xlang = if xlang.is_empty() {
            format!(":{}", ext.trim_start_matches('.'))
        } else {
            xlang.to_string()
        };
        let mut file = File::configure(project, host.realpath.clone(), ext, xlang);
        file.cache = host.cache.clone();
        file.is_partial = true;
        file.is_inline = true;
        file
    }

    fn configure(project: &ProjectContext, realpath: PathBuf, ext: String, xlang: String) -> File {
        let subpath = project
            .subpath_of(&realpath)
            .unwrap_or_else(|| helpers::to_slash(&realpath));
        let dirname = realpath
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project.root.clone());

        let mut file = File {
            dirname,
            subpath: subpath.clone(),
            r_ext: ext.clone(),
            kind: FileKind::Other,
            is_json_like: false,
            id: subpath.trim_start_matches('/').to_string(),
            module_id: None,
            release: Some(subpath.clone()),
            url: subpath.clone(),
            domain: project.domain().to_string(),
            query: String::new(),
            fragment: String::new(),
            content: None,
            content_hash: None,
            hash_length: project.hash_length(),
            requires: vec![],
            async_requires: vec![],
            links: vec![],
            derived: vec![],
            missing_deps: vec![],
            use_cache: true,
            use_compile: true,
            use_hash: false,
            pipe_embed: true,
            is_inline: false,
            is_partial: false,
            compiled: false,
            is_resource_map: false,
            steps: AHashMap::new(),
            cache: None,
            realpath,
            ext,
            xlang,
        };
        file.apply_rules(project);
        file
    }

    fn apply_rules(&mut self, project: &ProjectContext) {
        let subject = format!("{}{}", self.subpath, self.xlang);
        let mut release: Option<Option<String>> = None;
        let mut url: Option<String> = None;
        let mut id: Option<String> = None;

        for (rule, caps) in project.matching_rules(&subject) {
            let props = &rule.props;
            let stages = [
                (Stage::Lint, &props.lint),
                (Stage::Parser, &props.parser),
                (Stage::Preprocessor, &props.preprocessor),
                (Stage::Standard, &props.standard),
                (Stage::Postprocessor, &props.postprocessor),
                (Stage::Optimizer, &props.optimizer),
            ];
            for (stage, steps) in stages {
                if let Some(steps) = steps {
                    self.steps.insert(stage, steps_from_config(steps));
                }
            }
            if let Some(value) = props.use_cache {
                self.use_cache = value;
            }
            if let Some(value) = props.use_compile {
                self.use_compile = value;
            }
            if let Some(value) = props.use_hash {
                self.use_hash = value;
            }
            if let Some(value) = props.pipe_embed {
                self.pipe_embed = value;
            }
            if let Some(r_ext) = &props.r_ext {
                self.r_ext = format!(".{}", r_ext.trim_start_matches('.'));
            }
            match &props.release {
                Some(ReleaseConfig::Enabled(false)) => release = Some(None),
                Some(ReleaseConfig::Enabled(true)) => release = None,
                Some(ReleaseConfig::Path(template)) => release = Some(Some(expand(template, &caps))),
                None => (),
            }
            if let Some(template) = &props.url {
                url = Some(expand(template, &caps));
            }
            if let Some(template) = &props.id {
                id = Some(expand(template, &caps));
            }
            if let Some(template) = &props.module_id {
                self.module_id = Some(expand(template, &caps));
            }
            if let Some(query) = &props.query {
                self.query = expand(query, &caps);
            }
            if let Some(hash) = &props.hash {
                let hash = expand(hash, &caps);
                self.fragment = if hash.is_empty() || hash.starts_with('#') {
                    hash
                } else {
                    format!("#{hash}")
                };
            }
            if let Some(domain) = &props.domain {
                self.domain = expand(domain, &caps);
            }
        }

        let kind_ext = if self.r_ext.is_empty() { &self.ext } else { &self.r_ext };
        self.kind = match FileKind::from_ext(kind_ext) {
            FileKind::Other => FileKind::from_ext(&self.ext),
            kind => kind,
        };
        self.is_json_like = kind_ext.eq_ignore_ascii_case(".json");

        let released = replace_ext(&self.subpath, &self.ext, &self.r_ext);
        self.release = match release {
            Some(explicit) => explicit,
            None => Some(released.clone()),
        };
        self.url = url.unwrap_or_else(|| self.release.clone().unwrap_or(released));
        let id = id.unwrap_or_else(|| self.subpath.trim_start_matches('/').to_string());
        self.id = if project.namespace().is_empty() {
            id
        } else {
            format!("{}{}{}", project.namespace(), project.namespace_connector(), id)
        };
    }

    pub fn is_text(&self) -> bool {
        self.is_partial || helpers::is_text_ext(&self.ext)
    }

    /// True for units backed by an existing file on disk.
    pub fn is_file(&self) -> bool {
        !self.is_partial && self.realpath.is_file()
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Content::as_text)
    }

    pub fn set_content(&mut self, content: impl Into<Content>) {
        self.content = Some(content.into());
        self.content_hash = None;
    }

    /// Reads the unit from disk, as text when its extension is a text one.
    pub fn read_raw(&self) -> Result<Content, CompileError> {
        let bytes = helpers::read_file(&self.realpath)
            .map_err(|err| CompileError::io(&self.realpath, err))?;
        if self.is_text() {
            match String::from_utf8(bytes) {
                Ok(text) => Ok(Content::Text(text.trim_start_matches('\u{feff}').to_string())),
                Err(err) => Ok(Content::Binary(err.into_bytes())),
            }
        } else {
            Ok(Content::Binary(bytes))
        }
    }

    /// Current content, loading the raw file when nothing was set yet.
    pub fn get_content(&mut self) -> Result<&Content, CompileError> {
        if self.content.is_none() {
            let raw = self.read_raw()?;
            self.content = Some(raw);
        }
        match &self.content {
            Some(content) => Ok(content),
            None => Err(CompileError::InvalidRealpath(self.subpath.clone())),
        }
    }

    pub fn get_hash(&mut self) -> Result<String, CompileError> {
        if let Some(hash) = &self.content_hash {
            return Ok(hash.clone());
        }
        let full = helpers::compute_content_hash(self.get_content()?.as_bytes());
        let hash = full[..self.hash_length.min(full.len())].to_string();
        self.content_hash = Some(hash.clone());
        Ok(hash)
    }

    pub(crate) fn set_hash(&mut self, hash: Option<String>) {
        self.content_hash = hash;
    }

    pub(crate) fn cached_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn get_base64(&mut self) -> Result<String, CompileError> {
        let ext = self.r_ext.clone();
        Ok(helpers::data_uri(&ext, self.get_content()?.as_bytes()))
    }

    /// `domain + url + query`, with the content hash in the basename when hashing is on.
    pub fn get_url(&mut self) -> Result<String, CompileError> {
        let url = if self.use_hash {
            let hash = self.get_hash()?;
            insert_hash(&self.url, &hash)
        } else {
            self.url.clone()
        };
        Ok(format!("{}{}{}", self.domain, url, self.query))
    }

    /// Output path relative to the destination folder, `None` when not released.
    pub fn get_release_path(&mut self) -> Result<Option<String>, CompileError> {
        let Some(release) = self.release.clone() else {
            return Ok(None);
        };
        if self.use_hash {
            let hash = self.get_hash()?;
            Ok(Some(insert_hash(&release, &hash)))
        } else {
            Ok(Some(release))
        }
    }

    pub fn add_require(&mut self, id: &str) {
        push_unique(&mut self.requires, id);
    }

    pub fn add_async_require(&mut self, id: &str) {
        push_unique(&mut self.async_requires, id);
    }

    pub fn add_link(&mut self, subpath: &str) {
        push_unique(&mut self.links, subpath);
    }

    pub fn add_derived(&mut self, subpath: &str) {
        push_unique(&mut self.derived, subpath);
    }

    pub fn add_missing_dep(&mut self, reference: &str) {
        push_unique(&mut self.missing_deps, reference);
    }

    /// Copies the edges discovered in `other` onto this unit.
    pub fn copy_edges_from(&mut self, other: &File) {
        for id in &other.requires {
            self.add_require(id);
        }
        for id in &other.async_requires {
            self.add_async_require(id);
        }
        for subpath in &other.links {
            self.add_link(subpath);
        }
    }

    pub fn steps_for(&self, stage: Stage) -> Option<&Vec<Step>> {
        self.steps.get(&stage)
    }

    pub fn set_steps(&mut self, stage: Stage, steps: Vec<Step>) {
        self.steps.insert(stage, steps);
    }

    /// Subpath plus xlang suffix, the name partials report errors under.
    pub fn display_name(&self) -> String {
        format!("{}{}", self.subpath, self.xlang)
    }
}

fn steps_from_config(steps: &StepsConfig) -> Vec<Step> {
    steps.specs().into_iter().map(Step::from).collect()
}
