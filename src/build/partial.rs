//! Compiles fragments embedded in a host unit as units of their own.

use super::error::CompileError;
use super::file::File;
use super::pipeline;
use super::session::Session;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static EMBED_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!-- @@((?:\n?.)*?)-->").expect("embed directive pattern is valid"));

/// Runs `content` through the whole pipeline as if it were a file of
/// extension `ext` living next to `host`, then hands the discovered edges
/// over to `host`. An empty `ext` keeps the host's extension.
pub fn partial(
    session: &mut Session,
    content: &str,
    host: &mut File,
    ext: &str,
    xlang: &str,
) -> Result<String, CompileError> {
    if !host.pipe_embed || content.trim().is_empty() {
        return Ok(content.to_string());
    }
    let ext = if ext.is_empty() { host.ext.clone() } else { ext.to_string() };

    let mut fragment = File::partial(&session.project, host, &ext, xlang);
    fragment.set_content(content);
    pipeline::process(session, &mut fragment)?;

    host.copy_edges_from(&fragment);
    for reference in &fragment.missing_deps {
        host.add_missing_dep(reference);
    }
    for subpath in &fragment.derived {
        host.add_derived(subpath);
    }
    Ok(fragment.text().unwrap_or_default().to_string())
}

/// Substitutes `<!-- @@var name -->` directives in embedded text with the
/// `name="value"` pairs carried by the embedding reference.
pub fn filter_embed(content: &str, attrs: &str) -> String {
    let params = attrs
        .split_whitespace()
        .filter_map(|param| {
            let (name, value) = param.split_once('=')?;
            let value = value
                .strip_prefix(['"', '\''])
                .and_then(|value| value.strip_suffix(['"', '\'']))
                .unwrap_or(value);
            Some((name, value))
        })
        .collect::<Vec<(&str, &str)>>();

    EMBED_DIRECTIVE
        .replace_all(content, |caps: &Captures| {
            let mut parts = caps[1].split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("var"), Some(name)) => params
                    .iter()
                    .find(|(param, _)| *param == name)
                    .map(|(_, value)| value.to_string())
                    .unwrap_or_default(),
                (Some("var"), None) => String::new(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::build::cache::FsCacheStore;
    use crate::build::registry::ProcessorRegistry;
    use crate::build::session::CompileSettings;
    use crate::config;
    use crate::project_context::ProjectContext;
    use std::fs;
    use std::path::Path;

    fn session(dir: &Path, json: &str) -> Session {
        let project =
            ProjectContext::from_config(dir, config::parse_config(json).unwrap(), "dev").unwrap();
        let store = FsCacheStore::new(&dir.join(".cache"));
        Session::new(project, ProcessorRegistry::new(), Box::new(store), CompileSettings::default())
    }

    #[test]
    fn fills_var_directives() {
        let out = filter_embed(
            "<div class=\"<!-- @@var cls -->\"><!-- @@var missing --><!-- @@other --></div>",
            "cls=\"nav\" id='x'",
        );
        assert_eq!(out, "<div class=\"nav\"><!-- @@other --></div>");
    }

    #[test]
    fn fragment_edges_move_to_the_host() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "").unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        let mut session = session(dir.path(), "{}");
        let mut host = session.file(&dir.path().join("index.html")).unwrap();

        let out = partial(&mut session, "var a = __uri('a.js');", &mut host, "js", "").unwrap();
        assert_eq!(out, "var a = '/a.js';");
        assert_eq!(host.links, vec!["/a.js"]);
    }

    #[test]
    fn disabled_piping_and_blank_content_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "").unwrap();
        let mut session = session(
            dir.path(),
            r#"{ "rules": [ { "match": "\\.html$", "pipeEmbed": false } ] }"#,
        );
        let mut host = session.file(&dir.path().join("index.html")).unwrap();
        assert_eq!(
            partial(&mut session, "__uri('a.js')", &mut host, "js", "").unwrap(),
            "__uri('a.js')"
        );
        host.pipe_embed = true;
        assert_eq!(partial(&mut session, "  \n", &mut host, "js", "").unwrap(), "  \n");
    }

    #[test]
    fn fragment_rules_match_the_xlang_suffix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "").unwrap();
        let mut session = session(
            dir.path(),
            r#"{ "rules": [ { "match": "\\.html:inline-style$", "standard": "builtin" } ] }"#,
        );
        let mut host = session.file(&dir.path().join("index.html")).unwrap();
        let out = partial(&mut session, "a{color:red}", &mut host, "css", ":inline-style").unwrap();
        assert_eq!(out, "a{color:red}");
    }
}
