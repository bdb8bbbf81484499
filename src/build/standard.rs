//! Reference extraction: rewrites the reference forms of markup, script and
//! style content into placeholders that the restore pass resolves later.

use super::events::Observers;
use super::file::{File, FileKind};
use super::lang::{self, Lang};
use super::lookup::is_inline_ref;
use crate::helpers;
use log::debug;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::LazyLock;

/// Overrides the builtin replacement of a matched reference.
pub type Replacer<'r> = &'r mut dyn FnMut(&Captures, &mut Lang) -> String;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("reference pattern is valid")
}

static COMMENT_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(@(require|async|require\.async)\s+)('[^']+'|"[^"]+"|[^\s;!@#%^&*()]+)"#));
static SOURCE_MAP: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?:@|#)\s+sourceMappingURL=(\S+)"));

static JS_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r#""(?:[^\\"\r\n\f]|\\[\s\S])*"|'(?:[^\\'\n\r\f]|\\[\s\S])*'|(//[^\r\n\f]+|/\*[\s\S]*?(?:\*/|$))|\b(__inline|__uri|__require|__id|__moduleId|__hash)\s*\(\s*("(?:[^\\"\r\n\f]|\\[\s\S])*"|'(?:[^\\'\n\r\f]|\\[\s\S])*')\s*\)"#,
    )
});

static CSS_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r#"(/\*[\s\S]*?(?:\*/|$))|(?:@import\s+)?\burl\s*\(\s*("(?:[^\\"\r\n\f]|\\[\s\S])*"|'(?:[^\\'\n\r\f]|\\[\s\S])*'|[^)}\s]+)\s*\)(\s*;?)|\bsrc\s*=\s*("(?:[^\\"\r\n\f]|\\[\s\S])*"|'(?:[^\\'\n\r\f]|\\[\s\S])*'|[^\s}]+)"#,
    )
});

// 1 script open tag, 2 style open tag, 3 resource tag name, 4 inline comment path,
// 5 conditional comment, 6 comment body, 7 comment end, 8 style attribute value
static HTML_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r#"(?i)(<script(?:\s(?:[\s\S]*?["'\s\w/\-])?>|>))|(<style(?:\s(?:[\s\S]*?["'\s\w/\-])?>|>))|<(img|embed|audio|video|link|object|source)\s+[\s\S]*?["'\s\w/\-](?:>|$)|<!--inline\[([^\]]+)\]-->|(<!(?:--)?\[[^>]+>)|<!--((?:[^\[>][\s\S]*?)?)(-->|$)|\bstyle\s*=\s*("(?:[^\\"\r\n\f]|\\[\s\S])+"|'(?:[^\\'\n\r\f]|\\[\s\S])+')"#,
    )
});
static SCRIPT_CLOSE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)</script\s*>"));
static STYLE_CLOSE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)</style\s*>"));
static TYPE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r#"(?i)\s+type\s*=\s*(?:"((?:text|application)/([^"]*))"|'((?:text|application)/([^']*))'|((?:text|application)/([^\s>'"]*)))"#,
    )
});
static SCRIPT_SRC: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)(\s(?:data-)?src\s*=\s*)('[^']+'|"[^"]+"|[^\s/>]+)"#));
static LINK_REL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)\srel\s*=\s*('[^']+'|"[^"]+"|[^\s/>]+)"#));
static LINK_HREF: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)(\s(?:data-)?href\s*=\s*)('[^']+'|"[^"]+"|[^\s/>]+)"#));
static LINK_DROPPED_ATTRS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r#"(?i)\s+(?:charset|href|data-href|hreflang|rel|rev|sizes|target)\s*=\s*(?:'[^']+'|"[^"]+"|[^\s/>]+)"#,
    )
});
static LINK_EXTRA: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"^<link\b|/?>$|\b(?:rel|href)='[^']*'|\b(?:rel|href)="[^"]*""#)
});
static OBJECT_DATA: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)(\sdata\s*=\s*)('[^']+'|"[^"]+"|[^\s/>]+)"#));
static MEDIA_SRC: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"(?i)(\s(?:(?:data-)?src(?:set)?|poster)\s*=\s*)('[^']+'|"[^"]+"|[^\s/>]+)"#)
});

/// Rewrites `@require`, `@async` and sourcemap annotations inside a comment.
pub fn analyse_comment(lang: &mut Lang, comment: &str, mut callback: Option<Replacer>) -> String {
    let annotated = COMMENT_REFERENCE.replace_all(comment, |caps: &Captures| {
        if let Some(custom) = callback.as_mut() {
            return custom(caps, &mut *lang);
        }
        let kind = if &caps[2] == "require" {
            lang::REQUIRE
        } else {
            lang::ASYNC
        };
        format!("{}{}", &caps[1], lang.wrap(kind, &caps[3]))
    });
    SOURCE_MAP
        .replace_all(&annotated, |caps: &Captures| {
            format!("# sourceMappingURL={}", lang.wrap(lang::SOURCE_MAP, &caps[1]))
        })
        .into_owned()
}

/// `type="text/x-less"` style attribute of a script or style tag.
struct TypeAttr {
    range: Range<usize>,
    quote: &'static str,
    lang: String,
}

fn type_attr(tag: &str) -> Option<TypeAttr> {
    let caps = TYPE_ATTR.captures(tag)?;
    let whole = caps.get(0)?;
    let (quote, lang) = if let Some(lang) = caps.get(2) {
        ("\"", lang)
    } else if let Some(lang) = caps.get(4) {
        ("'", lang)
    } else {
        ("", caps.get(6)?)
    };
    Some(TypeAttr {
        range: whole.range(),
        quote,
        lang: lang.as_str().to_lowercase(),
    })
}

fn block_end(close: &Regex, content: &str, from: usize) -> usize {
    close
        .find_at(content, from)
        .map(|found| found.start())
        .unwrap_or(content.len())
}

/// Extractors bound to the unit whose content they rewrite.
pub struct Extractor<'a> {
    pub lang: &'a mut Lang,
    pub observers: &'a mut Observers,
    pub file: &'a File,
}

impl<'a> Extractor<'a> {
    pub fn new(lang: &'a mut Lang, observers: &'a mut Observers, file: &'a File) -> Self {
        Self {
            lang,
            observers,
            file,
        }
    }

    /// `__inline`, `__uri`, `__require`, `__id`, `__moduleId`, `__hash` calls and
    /// comment annotations. String literals are skipped.
    pub fn js(&mut self, content: &str, mut callback: Option<Replacer>) -> String {
        let lang = &mut *self.lang;
        let replaced = JS_REFERENCE.replace_all(content, |caps: &Captures| {
            if let Some(custom) = callback.as_mut() {
                return custom(caps, &mut *lang);
            }
            if let (Some(kind), Some(value)) = (caps.get(2), caps.get(3)) {
                let value = value.as_str();
                match kind.as_str() {
                    "__inline" => lang.wrap(lang::JS_EMBED, value),
                    "__uri" => lang.wrap(lang::URI, value),
                    "__id" => lang.wrap(lang::ID, value),
                    "__moduleId" => lang.wrap(lang::MODULE_ID, value),
                    "__require" => format!("require({})", lang.wrap(lang::JS_REQUIRE, value)),
                    _ => lang.wrap(lang::HASH, value),
                }
            } else if let Some(comment) = caps.get(1) {
                analyse_comment(lang, comment.as_str(), None)
            } else {
                caps[0].to_string()
            }
        });
        let mut content = replaced.into_owned();
        self.observers
            .standardized(FileKind::Script, self.file, &mut content);
        content
    }

    /// `url(...)`, `@import url(...)`, `src=` and comment annotations.
    pub fn css(&mut self, content: &str, mut callback: Option<Replacer>) -> String {
        let lang = &mut *self.lang;
        let replaced = CSS_REFERENCE.replace_all(content, |caps: &Captures| {
            if let Some(custom) = callback.as_mut() {
                return custom(caps, &mut *lang);
            }
            let whole = &caps[0];
            if let Some(url) = caps.get(2) {
                let url = url.as_str();
                let last = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                let inline = is_inline_ref(url);
                if whole.starts_with('@') {
                    if inline {
                        let last = last.strip_suffix(';').unwrap_or(last);
                        format!("{}{last}", lang.wrap(lang::EMBED, url))
                    } else {
                        format!("@import url({}){last}", lang.wrap(lang::URI, url))
                    }
                } else {
                    let kind = if inline { lang::EMBED } else { lang::URI };
                    format!("url({}){last}", lang.wrap(kind, url))
                }
            } else if let Some(value) = caps.get(4) {
                format!("src={}", lang.wrap(lang::URI, value.as_str()))
            } else if let Some(comment) = caps.get(1) {
                analyse_comment(lang, comment.as_str(), None)
            } else {
                whole.to_string()
            }
        });
        let mut content = replaced.into_owned();
        self.observers
            .standardized(FileKind::Style, self.file, &mut content);
        content
    }

    /// Script and style blocks, resource tags, comments and inline style
    /// attributes. A callback replaces every match except script and style
    /// blocks, whose bodies are always handed to [`Extractor::x_lang`].
    pub fn html(&mut self, content: &str, mut callback: Option<Replacer>) -> String {
        let mut out = String::with_capacity(content.len());
        let mut last = 0;
        let mut pos = 0;

        while pos < content.len() {
            let Some(caps) = HTML_REFERENCE.captures_at(content, pos) else {
                break;
            };
            let Some(whole) = caps.get(0) else {
                break;
            };

            let (replacement, end) = if let Some(tag) = caps.get(1) {
                let body_end = block_end(&SCRIPT_CLOSE, content, tag.end());
                let body = &content[tag.end()..body_end];
                (self.script_block(tag.as_str(), body), body_end)
            } else if let Some(tag) = caps.get(2) {
                let body_end = block_end(&STYLE_CLOSE, content, tag.end());
                let body = &content[tag.end()..body_end];
                (self.x_lang(tag.as_str(), body, "css"), body_end)
            } else if let Some(custom) = callback.as_mut() {
                (custom(&caps, &mut *self.lang), whole.end())
            } else {
                (self.html_reference(&caps), whole.end())
            };

            out.push_str(&content[last..whole.start()]);
            out.push_str(&replacement);
            last = end;
            pos = end.max(whole.start() + 1);
            while !content.is_char_boundary(pos) && pos < content.len() {
                pos += 1;
            }
        }
        out.push_str(&content[last..]);

        self.observers.standardized(FileKind::Markup, self.file, &mut out);
        out
    }

    fn script_block(&mut self, tag: &str, body: &str) -> String {
        let mut embed = String::new();
        let lang = &mut *self.lang;
        let tag = SCRIPT_SRC
            .replace_all(tag, |caps: &Captures| {
                let value = &caps[2];
                if is_inline_ref(value) {
                    embed.push_str(&lang.wrap(lang::EMBED, value));
                    String::new()
                } else {
                    format!("{}{}", &caps[1], lang.wrap(lang::URI, value))
                }
            })
            .into_owned();

        if !embed.is_empty() {
            return format!("{tag}{embed}");
        }
        let default_ext = match type_attr(&tag) {
            Some(attr) if attr.lang == "javascript" => "js",
            Some(_) => "html",
            None => "js",
        };
        self.x_lang(&tag, body, default_ext)
    }

    fn html_reference(&mut self, caps: &Captures) -> String {
        let whole = &caps[0];
        if let Some(tag) = caps.get(3) {
            match tag.as_str().to_lowercase().as_str() {
                "link" => self.link_tag(whole),
                "object" => {
                    let lang = &mut *self.lang;
                    OBJECT_DATA
                        .replace_all(whole, |c: &Captures| {
                            format!("{}{}", &c[1], lang.wrap(lang::URI, &c[2]))
                        })
                        .into_owned()
                }
                _ => self.media_tag(whole),
            }
        } else if let Some(path) = caps.get(4) {
            self.lang.wrap(lang::EMBED, path.as_str())
        } else if caps.get(5).is_some() {
            whole.to_string()
        } else if let Some(end) = caps.get(7) {
            let body = caps.get(6).map(|m| m.as_str()).unwrap_or_default();
            format!("<!--{}{}", analyse_comment(self.lang, body, None), end.as_str())
        } else if let Some(value) = caps.get(8) {
            let value = value.as_str();
            let quote = &value[..1];
            let inner = &value[1..value.len() - 1];
            format!("style={quote}{}{quote}", self.lang.wrap(lang::INLINE_STYLE, inner))
        } else {
            whole.to_string()
        }
    }

    fn link_tag(&mut self, tag: &str) -> String {
        let rel = LINK_REL
            .captures(tag)
            .map(|caps| caps[1].trim_matches(|c| c == '"' || c == '\'').to_lowercase())
            .unwrap_or_default();
        let is_css_link = rel == "stylesheet";
        let is_import_link = rel == "import";

        let mut inline = String::new();
        let lang = &mut *self.lang;
        let replaced = LINK_HREF
            .replace_all(tag, |caps: &Captures| {
                let value = &caps[2];
                if (is_css_link || is_import_link) && is_inline_ref(value) {
                    if is_css_link {
                        let attrs = &tag[5..];
                        let attrs = match attrs.strip_suffix("/>") {
                            Some(open) => format!("{open}>"),
                            None => attrs.to_string(),
                        };
                        inline.push_str("<style");
                        inline.push_str(&LINK_DROPPED_ATTRS.replace_all(&attrs, ""));
                    }
                    let extra = LINK_EXTRA.replace_all(tag, "");
                    let extra = extra.trim();
                    if extra.is_empty() {
                        inline.push_str(&lang.wrap(lang::EMBED, value));
                    } else {
                        inline.push_str(&lang.wrap_with(lang::EMBED, value, extra));
                    }
                    if is_css_link {
                        inline.push_str("</style>");
                    }
                    String::new()
                } else {
                    format!("{}{}", &caps[1], lang.wrap(lang::URI, value))
                }
            })
            .into_owned();

        if inline.is_empty() { replaced } else { inline }
    }

    fn media_tag(&mut self, tag: &str) -> String {
        let lang = &mut *self.lang;
        MEDIA_SRC
            .replace_all(tag, |caps: &Captures| {
                let prefix = &caps[1];
                let value = &caps[2];
                if prefix.to_lowercase().contains("srcset") {
                    let quoted = helpers::string_quote(value);
                    let candidates = quoted
                        .rest
                        .split(',')
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| match item.find(' ') {
                            Some(space) => {
                                format!("{}{}", lang.wrap(lang::URI, &item[..space]), &item[space..])
                            }
                            None => lang.wrap(lang::URI, item),
                        })
                        .collect::<Vec<String>>();
                    return format!("{prefix}{}{}{}", quoted.quote, candidates.join(", "), quoted.quote);
                }
                let kind = if is_inline_ref(value) {
                    lang::EMBED
                } else {
                    lang::URI
                };
                format!("{prefix}{}", lang.wrap(kind, value))
            })
            .into_owned()
    }

    /// Wraps an embedded block as an `xlang` fragment compiled on its own, or
    /// extracts it in place when the host does not pipe embedded content.
    pub fn x_lang(&mut self, tag: &str, content: &str, default_ext: &str) -> String {
        if !self.file.pipe_embed {
            let content = match default_ext {
                "html" => self.html(content, None),
                "js" => self.js(content, None),
                "css" => self.css(content, None),
                _ => content.to_string(),
            };
            return format!("{tag}{content}");
        }

        let mut ext = default_ext.to_string();
        let mut tag = tag.to_string();
        if let Some(attr) = type_attr(&tag) {
            let mut is_xlang = false;
            match attr.lang.as_str() {
                "javascript" => ext = String::from("js"),
                "css" => ext = String::from("css"),
                other => {
                    if let Some(custom) = other.strip_prefix("x-") {
                        ext = custom.to_string();
                        is_xlang = true;
                    }
                }
            }
            if is_xlang {
                if let Some(mime) = helpers::get_mime_type(&ext) {
                    if mime != format!("application/x-{ext}") {
                        let quote = attr.quote;
                        tag.replace_range(attr.range, &format!(" type={quote}{mime}{quote}"));
                    }
                }
            }
        }
        format!("{tag}{}", self.lang.wrap_with(lang::XLANG, content, &ext))
    }
}

/// The default `standard` step: picks the extractor from the unit's kind,
/// unless the `type` setting names one.
pub fn builtin(
    lang: &mut Lang,
    observers: &mut Observers,
    file: &File,
    content: &str,
    settings: &Map<String, Value>,
) -> String {
    debug!("builtin standard for [{}] start", file.realpath.display());
    let kind = match settings.get("type").and_then(Value::as_str) {
        Some(name) if name != "auto" => FileKind::from_name(name).unwrap_or(FileKind::Other),
        _ => file.kind,
    };
    let mut extractor = Extractor::new(lang, observers, file);
    let content = match kind {
        FileKind::Markup => extractor.html(content, None),
        FileKind::Script => extractor.js(content, None),
        FileKind::Style => extractor.css(content, None),
        FileKind::Other => content.to_string(),
    };
    debug!("builtin standard for [{}] end", file.realpath.display());
    content
}
