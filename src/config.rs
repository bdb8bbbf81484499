use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "assetpipe.json";
pub const DEFAULT_MEDIA: &str = "dev";

/// A step named inline together with its per-invocation options, e.g.
/// `{ "name": "less", "paths": ["lib"] }`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NamedStep {
    pub name: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StepSpec {
    Name(String),
    WithOptions(NamedStep),
}

impl StepSpec {
    pub fn name(&self) -> &str {
        match self {
            StepSpec::Name(name) => name,
            StepSpec::WithOptions(step) => &step.name,
        }
    }
}

/// Step chain for one stage: either `"a, b"` or an explicit list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StepsConfig {
    Names(String),
    List(Vec<StepSpec>),
}

impl StepsConfig {
    pub fn specs(&self) -> Vec<StepSpec> {
        match self {
            StepsConfig::Names(names) => names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| StepSpec::Name(name.to_string()))
                .collect(),
            StepsConfig::List(list) => list.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReleaseConfig {
    Enabled(bool),
    Path(String),
}

/// Properties a rule assigns to every unit whose subpath it matches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleProps {
    pub lint: Option<StepsConfig>,
    pub parser: Option<StepsConfig>,
    pub preprocessor: Option<StepsConfig>,
    pub standard: Option<StepsConfig>,
    pub postprocessor: Option<StepsConfig>,
    pub optimizer: Option<StepsConfig>,
    pub use_cache: Option<bool>,
    pub use_compile: Option<bool>,
    pub use_hash: Option<bool>,
    pub pipe_embed: Option<bool>,
    #[serde(rename = "rExt")]
    pub r_ext: Option<String>,
    pub release: Option<ReleaseConfig>,
    pub url: Option<String>,
    pub id: Option<String>,
    pub module_id: Option<String>,
    pub query: Option<String>,
    pub hash: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(flatten)]
    pub props: RuleProps,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_namespace_connector")]
    pub namespace_connector: String,
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
    #[serde(default)]
    pub domain: String,
    pub cache_dir: Option<PathBuf>,
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub media: BTreeMap<String, MediaConfig>,
}

fn default_namespace_connector() -> String {
    String::from(":")
}

fn default_hash_length() -> usize {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            namespace_connector: default_namespace_connector(),
            hash_length: default_hash_length(),
            domain: String::new(),
            cache_dir: None,
            dest: None,
            settings: Map::new(),
            rules: vec![],
            media: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Settings of the base config with the media profile's settings laid over them.
    pub fn settings_for_media(&self, media: &str) -> Map<String, Value> {
        let mut settings = self.settings.clone();
        if let Some(profile) = self.media.get(media) {
            for (key, value) in &profile.settings {
                settings.insert(key.clone(), value.clone());
            }
        }
        settings
    }

    /// Base rules followed by the media profile's rules, so profile rules win.
    pub fn rules_for_media(&self, media: &str) -> Vec<Rule> {
        let mut rules = self.rules.clone();
        if let Some(profile) = self.media.get(media) {
            rules.extend(profile.rules.iter().cloned());
        }
        rules
    }
}

pub fn parse_config(contents: &str) -> Result<Config> {
    serde_json::from_str(contents).context("Could not parse assetpipe.json")
}

pub fn read(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Could not read config at {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Invalid config at {}", path.display()))
}
