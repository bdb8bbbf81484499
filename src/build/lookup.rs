use super::file::File;
use crate::helpers;
use crate::project_context::ProjectContext;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static INLINE_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[?&]__inline(?:[=&'"]|$)"#).expect("valid inline flag pattern"));

/// A reference split into path, `?query` and `#hash` parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParts {
    pub rest: String,
    pub query: String,
    pub hash: String,
}

pub fn split_query(value: &str) -> QueryParts {
    let mut rest = value;
    let mut hash = "";
    let mut query = "";
    if let Some(pos) = rest.find('#') {
        hash = &rest[pos..];
        rest = &rest[..pos];
    }
    if let Some(pos) = rest.find('?') {
        query = &rest[pos..];
        rest = &rest[..pos];
    }
    QueryParts {
        rest: rest.replace('\\', "/"),
        query: query.to_string(),
        hash: hash.to_string(),
    }
}

/// True when the query asks for the target's content instead of its address.
pub fn is_inline(query: &str) -> bool {
    INLINE_FLAG.is_match(query)
}

/// Inline test applied to a raw (possibly quoted) reference.
pub fn is_inline_ref(value: &str) -> bool {
    is_inline(&split_query(value).query)
}

/// What a textual reference resolves to.
#[derive(Debug, Clone, Default)]
pub struct ResolutionInfo {
    pub quote: String,
    pub rest: String,
    pub query: String,
    pub hash: String,
    pub id: String,
    pub module_id: String,
    pub is_logical_id: bool,
    pub file: Option<File>,
}

impl ResolutionInfo {
    /// The resolved unit, only when it is backed by a real file.
    pub fn real_file(&self) -> Option<&File> {
        self.file.as_ref().filter(|file| file.is_file())
    }
}

/// Resolves `reference` against the project, relative references against `base_dir`.
pub fn lookup(project: &ProjectContext, reference: &str, base_dir: Option<&Path>) -> ResolutionInfo {
    let quoted = helpers::string_quote(reference);
    let parts = split_query(quoted.rest);
    let mut info = ResolutionInfo {
        quote: quoted.quote.to_string(),
        rest: parts.rest,
        query: parts.query,
        hash: parts.hash,
        ..Default::default()
    };

    if !info.rest.is_empty() {
        let path = info.rest.as_str();
        let connector = project.namespace_connector();
        let mut candidate: Option<PathBuf> = None;

        match path.find(connector).filter(|_| !connector.is_empty()) {
            Some(idx) => {
                info.is_logical_id = true;
                if path[..idx] == *project.namespace() {
                    candidate = Some(project.project_absolute_path(&path[idx + connector.len()..]));
                }
            }
            None if path.starts_with('/') => {
                candidate = Some(project.project_absolute_path(path));
            }
            None => match base_dir {
                Some(dir) => candidate = Some(helpers::normalize(&dir.join(path))),
                None if project.namespace().is_empty() => {
                    let absolute = project.project_absolute_path(path);
                    if absolute.is_file() {
                        info.is_logical_id = true;
                    }
                    candidate = Some(absolute);
                }
                None => log::warn!("Unable to resolve `{path}` without a base directory"),
            },
        }

        if let Some(candidate) = candidate.filter(|candidate| candidate.is_file()) {
            info.file = File::new(project, &candidate).ok();
        }
    }

    match &info.file {
        Some(file) => {
            info.id = file.id.clone();
            info.module_id = file.module_id.clone().unwrap_or_else(|| file.id.clone());
        }
        None => {
            info.id = info.rest.clone();
            info.module_id = info.rest.clone();
        }
    }
    info
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config;
    use std::fs;

    fn project(dir: &Path, json: &str) -> ProjectContext {
        ProjectContext::from_config(dir, config::parse_config(json).unwrap(), "dev").unwrap()
    }

    #[test]
    fn splits_query_and_hash() {
        assert_eq!(
            split_query("a/b.png?__inline#frag"),
            QueryParts {
                rest: "a/b.png".into(),
                query: "?__inline".into(),
                hash: "#frag".into()
            }
        );
    }

    #[test]
    fn inline_flag_forms() {
        assert!(is_inline("?__inline"));
        assert!(is_inline("?a=1&__inline="));
        assert!(is_inline("?a=1&__inline&b"));
        assert!(is_inline("?__inline'"));
        assert!(!is_inline("?__inlinee"));
        assert!(!is_inline(""));
        assert!(is_inline_ref("'b.css?__inline'"));
    }

    #[test]
    fn relative_reference_keeps_quote_and_query() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("img/a.png"), [0u8]).unwrap();
        let project = project(dir.path(), "{}");

        let info = lookup(&project, "'./img/a.png?v=1#top'", Some(&project.root));
        assert_eq!(info.quote, "'");
        assert_eq!(info.query, "?v=1");
        assert_eq!(info.hash, "#top");
        assert_eq!(info.id, "img/a.png");
        assert_eq!(info.module_id, "img/a.png");
        assert!(!info.is_logical_id);
        assert_eq!(info.real_file().map(|f| f.subpath.as_str()), Some("/img/a.png"));
    }

    #[test]
    fn missing_target_has_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path(), "{}");
        let info = lookup(&project, "\"./missing.png\"", Some(&project.root));
        assert!(info.file.is_none());
        assert_eq!(info.id, "./missing.png");
    }

    #[test]
    fn namespaced_id_resolves_inside_own_namespace_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        let project = project(dir.path(), r#"{ "namespace": "app" }"#);

        let own = lookup(&project, "app:a.js", None);
        assert!(own.is_logical_id);
        assert_eq!(own.id, "app:a.js");

        let foreign = lookup(&project, "lib:a.js", None);
        assert!(foreign.is_logical_id);
        assert!(foreign.file.is_none());
        assert_eq!(foreign.id, "lib:a.js");
    }

    // A bare reference without base directory counts as a logical id only when the
    // project-absolute file exists; the same text is a plain path otherwise.
    #[test]
    fn bare_reference_is_an_id_only_when_the_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        let project = project(dir.path(), "{}");

        let found = lookup(&project, "a.js", None);
        assert!(found.is_logical_id);
        assert!(found.file.is_some());

        let missing = lookup(&project, "b.js", None);
        assert!(!missing.is_logical_id);
        assert!(missing.file.is_none());
    }

    #[test]
    fn module_id_is_preferred_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        let project = project(
            dir.path(),
            r#"{ "rules": [ { "match": "^/(.*)\\.js$", "moduleId": "$1" } ] }"#,
        );
        let info = lookup(&project, "/a.js", None);
        assert_eq!(info.id, "a.js");
        assert_eq!(info.module_id, "a");
    }
}
