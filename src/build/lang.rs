use super::error::CompileError;
use ahash::AHashMap;
use regex::Regex;
use std::ops::Range;

/// Structural separator of every placeholder token (ASCII unit separator).
pub const SEP: char = '\u{1F}';

pub const REQUIRE: &str = "require";
pub const JS_REQUIRE: &str = "jsRequire";
pub const EMBED: &str = "embed";
pub const JS_EMBED: &str = "jsEmbed";
pub const ASYNC: &str = "async";
pub const JS_ASYNC: &str = "jsAsync";
pub const URI: &str = "uri";
pub const DEP: &str = "dep";
pub const ID: &str = "id";
pub const HASH: &str = "hash";
pub const MODULE_ID: &str = "moduleId";
pub const XLANG: &str = "xlang";
pub const INLINE_STYLE: &str = "inlineStyle";
pub const SOURCE_MAP: &str = "sourceMap";
pub const INFO: &str = "info";

const BUILTIN_KINDS: [&str; 15] = [
    REQUIRE,
    JS_REQUIRE,
    EMBED,
    JS_EMBED,
    ASYNC,
    JS_ASYNC,
    URI,
    DEP,
    ID,
    HASH,
    MODULE_ID,
    XLANG,
    INLINE_STYLE,
    SOURCE_MAP,
    INFO,
];

/// One matched `SEP kind depth SEP value [SEP extra] SEP depth kind SEP` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: String,
    pub depth: usize,
    pub value: String,
    pub extra: Option<String>,
    pub range: Range<usize>,
}

/// Placeholder codec: registered kinds, one depth stack per kind and the
/// lazily rebuilt opener pattern.
#[derive(Debug)]
pub struct Lang {
    kinds: Vec<String>,
    stacks: AHashMap<String, Vec<usize>>,
    opener: Option<Regex>,
}

impl Default for Lang {
    fn default() -> Self {
        Self::new()
    }
}

impl Lang {
    pub fn new() -> Self {
        let mut lang = Lang {
            kinds: vec![],
            stacks: AHashMap::new(),
            opener: None,
        };
        for kind in BUILTIN_KINDS {
            lang.add(kind);
        }
        lang
    }

    /// Registers a kind. Adding a known kind is a no-op.
    pub fn add(&mut self, kind: &str) {
        if self.has(kind) {
            return;
        }
        self.kinds.push(kind.to_string());
        self.stacks.insert(kind.to_string(), vec![]);
        self.opener = None;
    }

    pub fn has(&self, kind: &str) -> bool {
        self.kinds.iter().any(|known| known == kind)
    }

    pub fn open(&mut self, kind: &str) -> String {
        self.add(kind);
        let stack = self.stacks.entry(kind.to_string()).or_default();
        let depth = stack.len();
        stack.push(depth);
        format!("{SEP}{kind}{depth}{SEP}")
    }

    pub fn close(&mut self, kind: &str) -> Result<String, CompileError> {
        let depth = self
            .stacks
            .get_mut(kind)
            .and_then(|stack| stack.pop())
            .ok_or_else(|| CompileError::UnbalancedPlaceholder {
                kind: kind.to_string(),
                depth: 0,
            })?;
        Ok(format!("{SEP}{depth}{kind}{SEP}"))
    }

    pub fn wrap(&mut self, kind: &str, value: &str) -> String {
        self.wrap_parts(kind, value, None)
    }

    pub fn wrap_with(&mut self, kind: &str, value: &str, extra: &str) -> String {
        self.wrap_parts(kind, value, Some(extra))
    }

    fn wrap_parts(&mut self, kind: &str, value: &str, extra: Option<&str>) -> String {
        let mut token = self.open(kind);
        token.push_str(value);
        if let Some(extra) = extra {
            token.push(SEP);
            token.push_str(extra);
        }
        // open just pushed, so the pop cannot fail
        let depth = self.stacks.get_mut(kind).and_then(|stack| stack.pop()).unwrap_or(0);
        token.push_str(&format!("{SEP}{depth}{kind}{SEP}"));
        token
    }

    /// True when every `open` has been closed.
    pub fn is_balanced(&self) -> bool {
        self.stacks.values().all(|stack| stack.is_empty())
    }

    /// Drops all open depths, used when a compile aborts half way.
    pub fn reset(&mut self) {
        for stack in self.stacks.values_mut() {
            stack.clear();
        }
    }

    fn opener(&mut self) -> Option<&Regex> {
        if self.opener.is_none() {
            let kinds = self
                .kinds
                .iter()
                .map(|kind| regex::escape(kind))
                .collect::<Vec<String>>()
                .join("|");
            self.opener = Regex::new(&format!(r"\x1F({kinds})(\d+)\x1F")).ok();
        }
        self.opener.as_ref()
    }

    /// Finds every balanced placeholder whose value holds no other token,
    /// left to right. Outer tokens become visible once these are replaced.
    pub fn scan(&mut self, content: &str) -> Vec<Placeholder> {
        let Some(opener) = self.opener().cloned() else {
            return vec![];
        };
        let mut found = vec![];
        let mut pos = 0;

        while pos < content.len() {
            let Some(caps) = opener.captures_at(content, pos) else {
                break;
            };
            let (Some(whole), Some(kind), Some(depth)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                break;
            };
            let closer = format!("{SEP}{}{}{SEP}", depth.as_str(), kind.as_str());

            match match_body(content, whole.end(), &closer) {
                Some((end, value, extra)) => {
                    found.push(Placeholder {
                        kind: kind.as_str().to_string(),
                        depth: depth.as_str().parse().unwrap_or(0),
                        value: value.to_string(),
                        extra: extra.map(str::to_string),
                        range: whole.start()..end,
                    });
                    pos = end;
                }
                None => pos = whole.start() + SEP.len_utf8(),
            }
        }

        found
    }
}

fn match_body<'a>(
    content: &'a str,
    from: usize,
    closer: &str,
) -> Option<(usize, &'a str, Option<&'a str>)> {
    let rest = &content[from..];
    let value_end = rest.find(SEP)?;
    let value = &rest[..value_end];
    let after = &rest[value_end..];
    if after.starts_with(closer) {
        return Some((from + value_end + closer.len(), value, None));
    }

    let extra_start = value_end + SEP.len_utf8();
    let extra_rest = &rest[extra_start..];
    let extra_end = extra_rest.find(SEP)?;
    if extra_rest[extra_end..].starts_with(closer) {
        let end = from + extra_start + extra_end + closer.len();
        return Some((end, value, Some(&extra_rest[..extra_end])));
    }
    None
}

/// Rebuilds `content` with each scanned placeholder replaced by its result.
pub fn splice(content: &str, replacements: &[(Range<usize>, String)]) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for (range, text) in replacements {
        out.push_str(&content[last..range.start]);
        out.push_str(text);
        last = range.end;
    }
    out.push_str(&content[last..]);
    out
}
