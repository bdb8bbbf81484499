//! The `postStandard` pass: resolves placeholders until none are left.

use super::cycle_guard::LockCheck;
use super::error::CompileError;
use super::events::Restoration;
use super::file::{Content, File, FileKind};
use super::lang::{self, Placeholder};
use super::lookup::ResolutionInfo;
use super::partial::{filter_embed, partial};
use super::session::{CompileContext, Session};
use crate::helpers;
use log::debug;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

static INLINE_STYLE_WRAPPER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"inline-style-placeholder\s?\{([\s\S]*)\}").expect("inline style wrapper pattern is valid")
});

pub fn post_standard(session: &mut Session, file: &mut File) -> Result<(), CompileError> {
    let Some(text) = file.text() else {
        return Ok(());
    };
    debug!("postStandard start");
    let mut content = text.to_string();

    loop {
        let found = session.lang.scan(&content);
        if found.is_empty() {
            break;
        }
        let mut replacements = Vec::with_capacity(found.len());
        for placeholder in &found {
            match restore(session, file, placeholder) {
                Ok(ret) => replacements.push((placeholder.range.clone(), ret)),
                Err(err) => {
                    session.guard.clear();
                    return Err(err.in_file(&file.display_name()));
                }
            }
        }
        content = lang::splice(&content, &replacements);
    }

    file.set_content(content);
    debug!("postStandard end");
    Ok(())
}

fn quoted(info: &ResolutionInfo, value: &str) -> String {
    format!("{}{value}{}", info.quote, info.quote)
}

/// Compiles `target` before `file` uses it, unless that would close a cycle.
fn compile_unless_locked(session: &mut Session, file: &File, target: &mut File) -> Result<bool, CompileError> {
    if !session.guard.check(&file.realpath, &target.realpath).is_unlocked() {
        return Ok(false);
    }
    session.guard.lock(&file.realpath, &target.realpath);
    let result = session.compile(target, &CompileContext::default());
    session.guard.unlock(&target.realpath);
    result.map(|_| true)
}

fn restore(session: &mut Session, file: &mut File, placeholder: &Placeholder) -> Result<String, CompileError> {
    let Placeholder {
        kind, value, extra, ..
    } = placeholder;
    let extra = extra.as_deref();

    let (info, ret) = match kind.as_str() {
        lang::ID | lang::MODULE_ID => {
            let info = session.lookup(value, file);
            if let Some(target) = info.real_file() {
                file.add_link(&target.subpath);
            }
            let id = if kind == lang::MODULE_ID {
                &info.module_id
            } else {
                &info.id
            };
            let ret = quoted(&info, id);
            (Some(info), Some(ret))
        }
        lang::HASH => {
            let mut info = session.lookup(value, file);
            let ret = match info.file.take() {
                Some(mut target) if target.is_file() => {
                    file.add_link(&target.subpath);
                    if compile_unless_locked(session, file, &mut target)? {
                        session.add_deps(file, &target);
                    }
                    let hash = target.get_hash()?;
                    info.file = Some(target);
                    quoted(&info, &hash)
                }
                other => {
                    info.file = other;
                    session.add_missing_dep(file, value);
                    value.clone()
                }
            };
            (Some(info), Some(ret))
        }
        lang::REQUIRE | lang::JS_REQUIRE | lang::ASYNC | lang::JS_ASYNC => {
            let info = session.lookup(value, file);
            if kind == lang::REQUIRE || kind == lang::JS_REQUIRE {
                file.add_require(&info.id);
            } else {
                file.add_async_require(&info.id);
            }
            let id = if kind.starts_with("js") {
                &info.module_id
            } else {
                &info.id
            };
            let ret = quoted(&info, id);
            if let Some(target) = info.real_file() {
                file.add_link(&target.subpath);
            }
            (Some(info), Some(ret))
        }
        lang::URI | lang::SOURCE_MAP => {
            let mut info = session.lookup(value, file);
            let ret = match info.file.take() {
                Some(mut target) if target.is_file() => {
                    file.add_link(&target.subpath);
                    if target.use_hash && compile_unless_locked(session, file, &mut target)? {
                        session.add_deps(file, &target);
                    }
                    let query = if !target.query.is_empty() && !info.query.is_empty() {
                        format!("&{}", &info.query[1..])
                    } else {
                        info.query.clone()
                    };
                    let fragment = if info.hash.is_empty() {
                        target.fragment.clone()
                    } else {
                        info.hash.clone()
                    };
                    let url = target.get_url()?;
                    if kind == lang::SOURCE_MAP {
                        file.add_derived(&target.subpath);
                    }
                    info.file = Some(target);
                    quoted(&info, &format!("{url}{query}{fragment}"))
                }
                other => {
                    info.file = other;
                    if kind == lang::URI {
                        session.add_missing_dep(file, value);
                    }
                    value.clone()
                }
            };
            (Some(info), Some(ret))
        }
        lang::DEP => {
            if file.cache.is_some() {
                let info = session.lookup(value, file);
                match info.real_file() {
                    Some(target) => session.add_deps(file, target),
                    None => session.add_missing_dep(file, value),
                }
                (Some(info), Some(String::new()))
            } else {
                log::warn!("unable to add deps to file [{}]", file.realpath.display());
                session.add_missing_dep(file, value);
                (None, Some(String::new()))
            }
        }
        lang::EMBED | lang::JS_EMBED => {
            let (info, ret) = embed(session, file, kind, value, extra)?;
            (Some(info), Some(ret))
        }
        lang::XLANG => {
            let ret = partial(session, value, file, extra.unwrap_or_default(), "")?;
            (None, Some(ret))
        }
        lang::INLINE_STYLE => {
            let wrapped = format!("inline-style-placeholder {{{value}}}");
            let ret = partial(session, &wrapped, file, "css", ":inline-style")?;
            let ret = INLINE_STYLE_WRAPPER.replace(&ret, "$1").into_owned();
            (None, Some(ret))
        }
        lang::INFO => (None, Some(String::new())),
        _ => (None, None),
    };

    let mut restoration = Restoration {
        kind,
        value,
        extra,
        info: info.as_ref(),
        file,
        ret,
    };
    session.observers.restore(&mut restoration);
    restoration
        .ret
        .ok_or_else(|| CompileError::UnknownPlaceholder(kind.clone()))
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn embed(
    session: &mut Session,
    file: &mut File,
    kind: &str,
    value: &str,
    extra: Option<&str>,
) -> Result<(ResolutionInfo, String), CompileError> {
    let mut info = session.lookup(value, file);
    let target = match info.file.take() {
        Some(target) => Some(target),
        None if helpers::is_absolute_ref(&info.rest) => session.file(Path::new(&info.rest)).ok(),
        None => None,
    };
    let Some(mut target) = target.filter(File::is_file) else {
        return Err(CompileError::MissingEmbed(value.to_string()));
    };

    file.add_link(&target.subpath);
    match session.guard.check(&file.realpath, &target.realpath) {
        LockCheck::Unlocked => (),
        LockCheck::SelfReference => return Err(CompileError::SelfEmbed(display(&file.realpath))),
        LockCheck::Cycle(path) => {
            return Err(CompileError::CircularEmbed(path.iter().map(|p| display(p)).collect()));
        }
    }

    session.guard.lock(&file.realpath, &target.realpath);
    target.is_inline = true;
    let result = session.compile(&mut target, &CompileContext::default());
    session.guard.unlock(&target.realpath);
    result?;

    session.add_deps(file, &target);
    file.copy_edges_from(&target);

    let ret = match target.content() {
        Some(Content::Text(text)) => {
            let text = if kind == lang::JS_EMBED && target.kind != FileKind::Script && !target.is_json_like {
                Value::String(text.clone()).to_string()
            } else {
                text.clone()
            };
            match extra.filter(|extra| !extra.is_empty()) {
                Some(attrs) => filter_embed(&text, attrs),
                None => text,
            }
        }
        _ => {
            let data = target.get_base64()?;
            quoted(&info, &data)
        }
    };
    info.file = Some(target);
    Ok((info, ret))
}
