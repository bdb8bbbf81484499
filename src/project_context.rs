use crate::config::{self, CONFIG_FILE_NAME, Config, RuleProps};
use crate::helpers;
use anyhow::{Context, Result, anyhow};
use log::debug;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_DIR: &str = ".assetpipe-cache";
pub const DEFAULT_DEST: &str = "output";

/// A config rule with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub pattern: Regex,
    pub props: RuleProps,
}

/// Resolved project root together with the active media profile.
pub struct ProjectContext {
    pub root: PathBuf,
    pub config: Config,
    config_path: Option<PathBuf>,
    media: String,
    settings: Map<String, Value>,
    rules: Vec<CompiledRule>,
}

impl fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.config_path {
            Some(path) => write!(
                f,
                "Project at \"{}\" (media \"{}\", {} rules, config \"{}\")",
                self.root.to_string_lossy(),
                self.media,
                self.rules.len(),
                path.to_string_lossy()
            ),
            None => write!(
                f,
                "Project at \"{}\" (media \"{}\", no config)",
                self.root.to_string_lossy(),
                self.media
            ),
        }
    }
}

/// Walks up from `path` looking for `assetpipe.json`.
pub fn get_nearest_config(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(dir) = current {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

impl ProjectContext {
    pub fn new(path: &Path, media: &str) -> Result<ProjectContext> {
        let path = helpers::get_abs_path(path);
        if !path.is_dir() {
            return Err(anyhow!(
                "The project folder \"{}\" does not exist",
                path.to_string_lossy()
            ));
        }

        let context = match get_nearest_config(&path) {
            Some(config_path) => {
                let config = config::read(&config_path)?;
                let root = config_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| path.clone());
                let mut context = ProjectContext::from_config(&root, config, media)?;
                context.config_path = Some(config_path);
                context
            }
            None => ProjectContext::from_config(&path, Config::default(), media)?,
        };
        debug!("Created project context {:?}", context);
        Ok(context)
    }

    pub fn from_config(root: &Path, config: Config, media: &str) -> Result<ProjectContext> {
        let rules = config
            .rules_for_media(media)
            .into_iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .with_context(|| format!("Invalid rule pattern \"{}\"", rule.pattern))
                    .map(|pattern| CompiledRule {
                        pattern,
                        props: rule.props,
                    })
            })
            .collect::<Result<Vec<CompiledRule>>>()?;

        Ok(ProjectContext {
            root: helpers::get_abs_path(root),
            settings: config.settings_for_media(media),
            config,
            config_path: None,
            media: media.to_string(),
            rules,
        })
    }

    pub fn current_profile(&self) -> &str {
        &self.media
    }

    /// Step settings by `"<stage>.<step>"` key for the active media.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn namespace_connector(&self) -> &str {
        &self.config.namespace_connector
    }

    pub fn hash_length(&self) -> usize {
        self.config.hash_length
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// `/a/b.js` or `a/b.js` inside the project root.
    pub fn project_absolute_path(&self, path: &str) -> PathBuf {
        helpers::normalize(&self.root.join(path.trim_start_matches('/')))
    }

    /// Project relative path with a leading slash, if `path` lives inside the root.
    pub fn subpath_of(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|relative| format!("/{}", helpers::to_slash(relative)))
    }

    /// Rules matching `subject`, in declaration order, with their captures.
    pub fn matching_rules<'a>(
        &'a self,
        subject: &'a str,
    ) -> impl Iterator<Item = (&'a CompiledRule, Captures<'a>)> + 'a {
        self.rules
            .iter()
            .filter_map(move |rule| rule.pattern.captures(subject).map(|caps| (rule, caps)))
    }

    pub fn dest_dir(&self) -> PathBuf {
        match &self.config.dest {
            Some(dest) => self.root.join(dest),
            None => self.root.join(DEFAULT_DEST),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.config.cache_dir {
            Some(dir) => self.root.join(dir),
            None => self.root.join(DEFAULT_CACHE_DIR),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn finds_config_in_parent_folder() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "namespace": "app", "settings": { "parser.less": { "a": 1 } } }"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("src/page")).unwrap();

        let context = ProjectContext::new(&dir.path().join("src/page"), "dev").unwrap();
        assert_eq!(context.root, helpers::get_abs_path(dir.path()));
        assert_eq!(context.namespace(), "app");
        assert_eq!(context.namespace_connector(), ":");
        assert_eq!(context.get("parser.less").unwrap()["a"], Value::from(1));
        assert!(context.get("parser.sass").is_none());
    }

    #[test]
    fn resolves_project_paths() {
        let dir = tempfile::tempdir().unwrap();
        let context = ProjectContext::from_config(dir.path(), Config::default(), "dev").unwrap();
        let abs = context.project_absolute_path("/static/../img/a.png");
        assert_eq!(abs, context.root.join("img/a.png"));
        assert_eq!(context.subpath_of(&abs).as_deref(), Some("/img/a.png"));
        assert_eq!(context.dest_dir(), context.root.join(DEFAULT_DEST));
    }

    #[test]
    fn rules_report_captures() {
        let dir = tempfile::tempdir().unwrap();
        let config = config::parse_config(
            r#"{ "rules": [ { "match": "^/src/(.*)\\.less$", "rExt": ".css" }, { "match": "\\.js$" } ] }"#,
        )
        .unwrap();
        let context = ProjectContext::from_config(dir.path(), config, "dev").unwrap();
        let matched = context.matching_rules("/src/a/b.less").collect::<Vec<_>>();
        assert_eq!(matched.len(), 1);
        assert_eq!(&matched[0].1[1], "a/b");
    }

    #[test]
    fn invalid_rule_pattern_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config::parse_config(r#"{ "rules": [ { "match": "(" } ] }"#).unwrap();
        assert!(ProjectContext::from_config(dir.path(), config, "dev").is_err());
    }
}
