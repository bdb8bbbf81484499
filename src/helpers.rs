use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

pub mod emojis {
    use console::Emoji;
    pub static TREE: Emoji<'_, '_> = Emoji("📦 ", "");
    pub static SWEEP: Emoji<'_, '_> = Emoji("🧹 ", "");
    pub static SWORDS: Emoji<'_, '_> = Emoji("⚔️  ", "");
    pub static DEPS: Emoji<'_, '_> = Emoji("️🌴 ", "");
    pub static CHECKMARK: Emoji<'_, '_> = Emoji("️✅ ", "");
    pub static CROSS: Emoji<'_, '_> = Emoji("️🛑 ", "");
    pub static LINE_CLEAR: &str = "\x1b[2K\r";
}

const TEXT_EXTS: &[&str] = &[
    "css", "tpl", "js", "php", "txt", "json", "xml", "htm", "text", "xhtml", "html", "md", "conf",
    "po", "config", "tmpl", "coffee", "less", "sass", "jsp", "scss", "manifest", "bak", "asp",
    "tmp", "haml", "jade", "aspx", "ashx", "java", "py", "c", "cpp", "h", "cshtml", "asax",
    "master", "ascx", "cs", "ftl", "vm", "ejs", "styl", "jsx", "handlebars", "shtml", "ts",
    "tsx", "yml", "sh", "es", "es6", "es7", "map", "vue", "mjs",
];

const MIME_TYPES: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("less", "text/css"),
    ("sass", "text/css"),
    ("scss", "text/css"),
    ("styl", "text/css"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("jsx", "text/javascript"),
    ("ts", "text/javascript"),
    ("tsx", "text/javascript"),
    ("coffee", "text/javascript"),
    ("json", "application/json"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xhtml", "text/html"),
    ("txt", "text/plain"),
    ("xml", "text/xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("bmp", "image/bmp"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("woff", "application/font-woff"),
    ("woff2", "application/font-woff2"),
    ("ttf", "application/octet-stream"),
    ("eot", "application/vnd.ms-fontobject"),
    ("swf", "application/x-shockwave-flash"),
];

pub trait StrippedVerbatimPath {
    fn to_stripped_verbatim_path(self) -> PathBuf;
}

impl StrippedVerbatimPath for PathBuf {
    fn to_stripped_verbatim_path(self) -> PathBuf {
        if cfg!(not(target_os = "windows")) {
            return self;
        }

        let mut stripped = PathBuf::new();
        for component in self.components() {
            if let Component::Prefix(prefix_component) = component {
                if prefix_component.kind().is_verbatim() {
                    stripped.push(
                        prefix_component
                            .as_os_str()
                            .to_string_lossy()
                            .strip_prefix("\\\\?\\")
                            .unwrap_or_default(),
                    );
                } else {
                    stripped.push(prefix_component.as_os_str());
                }
            } else {
                stripped.push(component);
            }
        }
        stripped
    }
}

/// Canonical path of an existing entry.
pub fn realpath(path: &Path) -> Option<PathBuf> {
    path.canonicalize()
        .map(StrippedVerbatimPath::to_stripped_verbatim_path)
        .ok()
}

pub fn get_abs_path(path: &Path) -> PathBuf {
    realpath(path).unwrap_or_else(|| normalize(path))
}

/// Lexically resolves `.` and `..` without touching the file system.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Forward-slash form of a path, used for subpaths and ids.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Modification time in nanoseconds since the epoch.
pub fn get_mtime(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos() as u64)
}

pub fn compute_content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn compute_file_hash(path: &Path) -> Option<String> {
    read_file(path).ok().map(|bytes| compute_content_hash(&bytes))
}

pub fn is_text_ext(ext: &str) -> bool {
    TEXT_EXTS.contains(&ext.trim_start_matches('.').to_lowercase().as_str())
}

pub fn get_mime_type(ext: &str) -> Option<&'static str> {
    let ext = ext.trim_start_matches('.').to_lowercase();
    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:<mime>;base64,<payload>` for inlining binary content.
pub fn data_uri(ext: &str, bytes: &[u8]) -> String {
    let mime = get_mime_type(ext).unwrap_or("application/x-empty");
    format!("data:{mime};base64,{}", to_base64(bytes))
}

/// A string with its surrounding quote pair removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quoted<'a> {
    pub quote: &'a str,
    pub rest: &'a str,
}

/// Splits matching `'` or `"` off both ends of a trimmed reference.
pub fn string_quote(value: &str) -> Quoted<'_> {
    let trimmed = value.trim();
    for quote in ["'", "\""] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return Quoted {
                quote,
                rest: trimmed[1..trimmed.len() - 1].trim(),
            };
        }
    }
    Quoted {
        quote: "",
        rest: trimmed,
    }
}

pub fn is_absolute_ref(value: &str) -> bool {
    value.starts_with('/') || Path::new(value).is_absolute()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_quotes() {
        assert_eq!(string_quote(" './a.png' "), Quoted { quote: "'", rest: "./a.png" });
        assert_eq!(string_quote("\"b.css\""), Quoted { quote: "\"", rest: "b.css" });
        assert_eq!(string_quote("'half"), Quoted { quote: "", rest: "'half" });
    }

    #[test]
    fn normalizes_relative_segments() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d.js")), PathBuf::from("/a/c/d.js"));
    }

    #[test]
    fn classifies_extensions() {
        assert!(is_text_ext(".less"));
        assert!(!is_text_ext("png"));
        assert_eq!(get_mime_type(".PNG"), Some("image/png"));
        assert_eq!(data_uri("png", b"ab"), "data:image/png;base64,YWI=");
    }

    #[test]
    fn hashes_are_stable_hex() {
        let hash = compute_content_hash(b"body{}");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_content_hash(b"body{}"));
    }
}
