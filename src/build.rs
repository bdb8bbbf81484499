pub mod cache;
pub mod compile;
pub mod cycle_guard;
pub mod error;
pub mod events;
pub mod file;
pub mod lang;
pub mod lookup;
pub mod partial;
pub mod pipeline;
pub mod registry;
pub mod restore;
pub mod session;
pub mod standard;

use self::cache::FsCacheStore;
use self::file::File;
use self::registry::ProcessorRegistry;
use self::session::{CompileContext, CompileSettings, Session};
use crate::helpers;
use crate::helpers::emojis::*;
use crate::project_context::ProjectContext;
use ahash::AHashSet;
use anyhow::{Context, Result, anyhow};
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Progress events emitted during a release
#[derive(Debug, Clone)]
pub enum BuildProgress {
    /// Project files collected
    Collected { file_count: usize, duration_seconds: f64 },
    /// Sent as each unit compiles
    Compiling { current_count: usize, total_count: usize },
    /// Units compiled (final)
    Compiled {
        compiled_count: usize,
        duration_seconds: f64,
    },
    /// Artifacts written to the destination folder
    Written {
        written_count: usize,
        dest: String,
        duration_seconds: f64,
    },
    /// References that resolved to nothing, per unit
    MissingDependencies { subpath: String, references: Vec<String> },
    CompileError(String),
    /// Cache namespace removed (during clean command)
    Cleaned { namespace: String, duration_seconds: f64 },
}

/// Trait for reporting build progress
pub trait BuildReporter {
    fn report(&self, progress: BuildProgress);
}

/// A reporter that discards all progress messages.
pub struct NoopReporter;

impl BuildReporter for NoopReporter {
    fn report(&self, _progress: BuildProgress) {}
}

/// Check if we're running in a TTY (interactive terminal)
fn is_tty() -> bool {
    Term::stdout().is_term() && Term::stderr().is_term()
}

/// Format timing string, returning empty string if no_timing is true
fn timing(duration_seconds: f64, no_timing: bool) -> String {
    if no_timing {
        String::new()
    } else {
        format!(" in {:.2}s", duration_seconds)
    }
}

/// Renders progress on the terminal, with emojis and a progress bar when interactive.
pub struct ConsoleReporter {
    show_progress: bool,
    no_timing: bool,
    plain_output: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new(show_progress: bool, no_timing: bool) -> Self {
        Self {
            show_progress,
            no_timing,
            plain_output: !is_tty(),
            bar: Mutex::new(None),
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(bar) = bar.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn tick(&self, current_count: usize, total_count: usize) {
        let Ok(mut bar) = self.bar.lock() else {
            return;
        };
        let bar = bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total_count as u64);
            let template = format!(
                "{} {}Compiling... {{spinner}} {{pos}}/{{len}} {{msg}}",
                style("[2/3]").bold().dim(),
                SWORDS
            );
            if let Ok(progress_style) = ProgressStyle::with_template(&template) {
                bar.set_style(progress_style);
            }
            bar
        });
        bar.set_length(total_count as u64);
        bar.set_position(current_count as u64);
    }
}

impl BuildReporter for ConsoleReporter {
    fn report(&self, progress: BuildProgress) {
        match progress {
            BuildProgress::CompileError(message) => {
                self.finish_bar();
                if self.plain_output {
                    eprintln!("{message}");
                } else {
                    eprintln!("{}{}{}", LINE_CLEAR, CROSS, style(&message).red());
                }
            }
            BuildProgress::MissingDependencies { subpath, references } => {
                let message = format!("Missing dependencies in {subpath}: {}", references.join(", "));
                if self.plain_output {
                    eprintln!("{message}");
                } else {
                    eprintln!("{}", style(&message).yellow());
                }
            }
            _ if !self.show_progress => (),
            BuildProgress::Collected {
                file_count,
                duration_seconds,
            } => {
                if self.plain_output {
                    println!("Collected {file_count} files");
                } else {
                    println!(
                        "{}{} {}Collected {} files{}",
                        LINE_CLEAR,
                        style("[1/3]").bold().dim(),
                        TREE,
                        file_count,
                        timing(duration_seconds, self.no_timing)
                    );
                }
            }
            BuildProgress::Compiling {
                current_count,
                total_count,
            } => {
                if !self.plain_output {
                    self.tick(current_count, total_count);
                }
            }
            BuildProgress::Compiled {
                compiled_count,
                duration_seconds,
            } => {
                self.finish_bar();
                if self.plain_output {
                    println!("Compiled {compiled_count} units");
                } else {
                    println!(
                        "{}{} {}Compiled {} units{}",
                        LINE_CLEAR,
                        style("[2/3]").bold().dim(),
                        SWORDS,
                        compiled_count,
                        timing(duration_seconds, self.no_timing)
                    );
                }
            }
            BuildProgress::Written {
                written_count,
                dest,
                duration_seconds,
            } => {
                if self.plain_output {
                    println!("Wrote {written_count} files to {dest}");
                } else {
                    println!(
                        "{}{} {}Wrote {} files to {}{}",
                        LINE_CLEAR,
                        style("[3/3]").bold().dim(),
                        DEPS,
                        written_count,
                        dest,
                        timing(duration_seconds, self.no_timing)
                    );
                }
            }
            BuildProgress::Cleaned {
                namespace,
                duration_seconds,
            } => {
                if self.plain_output {
                    println!("Cleaned {namespace}");
                } else {
                    println!(
                        "{}{} {}Cleaned {}{}",
                        LINE_CLEAR,
                        style("[1/1]").bold().dim(),
                        SWEEP,
                        namespace,
                        timing(duration_seconds, self.no_timing)
                    );
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub media: String,
    /// Overrides the configured destination folder.
    pub dest: Option<PathBuf>,
    pub settings: CompileSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildResult {
    pub compiled_count: usize,
    pub written: Vec<PathBuf>,
}

pub fn new_session(project: ProjectContext, settings: CompileSettings) -> Session {
    let store = FsCacheStore::new(&project.cache_dir());
    Session::new(project, ProcessorRegistry::new(), Box::new(store), settings)
}

fn is_ignored(path: &Path, skipped: &[PathBuf]) -> bool {
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false);
    let vendored = path.file_name().map(|name| name == "node_modules").unwrap_or(false);
    hidden || vendored || skipped.iter().any(|skip| path.starts_with(skip))
}

/// Every source file of the project, leaving out hidden entries, `node_modules`,
/// the destination folder and the cache folder.
pub fn collect_files(project: &ProjectContext, dest: &Path) -> Result<Vec<PathBuf>> {
    let skipped = vec![helpers::get_abs_path(dest), helpers::get_abs_path(&project.cache_dir())];
    let mut files = vec![];
    let mut pending = vec![project.root.clone()];

    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Could not read folder {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if is_ignored(&path, &skipped) {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() && !path.ends_with(crate::config::CONFIG_FILE_NAME) {
                files.push(helpers::get_abs_path(&path));
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Compiles `paths`, then every follow-up the compiled units queued, and
/// writes each released unit under `dest`.
pub fn release<R: BuildReporter>(
    session: &mut Session,
    paths: &[PathBuf],
    dest: &Path,
    context: &CompileContext,
    reporter: &R,
) -> Result<BuildResult> {
    let start_compiling = Instant::now();
    let mut units: Vec<File> = vec![];
    let mut seen: AHashSet<PathBuf> = AHashSet::new();
    let mut queue: Vec<PathBuf> = paths.iter().rev().cloned().collect();
    let mut total_count = paths.len();

    loop {
        let path = match queue.pop() {
            Some(path) => path,
            None => match session.next_follow_up() {
                Some(path) => {
                    total_count += 1;
                    path
                }
                None => break,
            },
        };
        if !seen.insert(path.clone()) {
            continue;
        }

        let mut file = session.file(&path)?;
        if let Err(err) = session.compile(&mut file, context) {
            reporter.report(BuildProgress::CompileError(err.to_string()));
            return Err(anyhow!("Failed to compile {}", file.subpath));
        }
        reporter.report(BuildProgress::Compiling {
            current_count: units.len() + 1,
            total_count,
        });
        if !file.missing_deps.is_empty() {
            reporter.report(BuildProgress::MissingDependencies {
                subpath: file.subpath.clone(),
                references: file.missing_deps.clone(),
            });
        }
        units.push(file);
    }
    reporter.report(BuildProgress::Compiled {
        compiled_count: units.len(),
        duration_seconds: start_compiling.elapsed().as_secs_f64(),
    });

    let start_writing = Instant::now();
    let mut written = vec![];
    for unit in units.iter_mut() {
        let Some(release_path) = unit.get_release_path()? else {
            continue;
        };
        let Some(content) = unit.content() else {
            continue;
        };
        let target = dest.join(release_path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create folder {}", parent.display()))?;
        }
        fs::write(&target, content.as_bytes())
            .with_context(|| format!("Could not write {}", target.display()))?;
        debug!("Wrote [{}]", target.display());
        written.push(target);
    }
    reporter.report(BuildProgress::Written {
        written_count: written.len(),
        dest: dest.to_string_lossy().to_string(),
        duration_seconds: start_writing.elapsed().as_secs_f64(),
    });

    session.reset();
    Ok(BuildResult {
        compiled_count: units.len(),
        written,
    })
}

pub fn destination(project: &ProjectContext, options: &BuildOptions) -> PathBuf {
    match &options.dest {
        Some(dest) if dest.is_absolute() => dest.clone(),
        Some(dest) => project.root.join(dest),
        None => project.dest_dir(),
    }
}

/// Collects and releases the project found at `path`.
pub fn build<R: BuildReporter>(path: &Path, options: &BuildOptions, reporter: &R) -> Result<BuildResult> {
    let project = ProjectContext::new(path, &options.media)?;
    let dest = destination(&project, options);

    let timing_collect = Instant::now();
    let files = collect_files(&project, &dest)?;
    reporter.report(BuildProgress::Collected {
        file_count: files.len(),
        duration_seconds: timing_collect.elapsed().as_secs_f64(),
    });

    let mut session = new_session(project, options.settings.clone());
    release(&mut session, &files, &dest, &CompileContext::default(), reporter)
}

/// Removes one named compile cache, or every compile cache when `name` is `None`.
pub fn clean<R: BuildReporter>(path: &Path, media: &str, name: Option<&str>, reporter: &R) -> Result<()> {
    let timing_clean = Instant::now();
    let project = ProjectContext::new(path, media)?;
    let session = new_session(project, CompileSettings::default());
    session
        .clean(name)
        .with_context(|| format!("Could not clean cache in {}", session.project.cache_dir().display()))?;
    reporter.report(BuildProgress::Cleaned {
        namespace: name.unwrap_or("all compile caches").to_string(),
        duration_seconds: timing_clean.elapsed().as_secs_f64(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<BuildProgress>>,
    }

    impl BuildReporter for Recorder {
        fn report(&self, progress: BuildProgress) {
            self.events.borrow_mut().push(progress);
        }
    }

    fn write(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn options() -> BuildOptions {
        BuildOptions {
            media: "dev".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn collects_sources_and_skips_outputs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), CONFIG_FILE_NAME, "{}");
        write(dir.path(), "a.js", "");
        write(dir.path(), "css/b.css", "");
        write(dir.path(), "output/old.js", "");
        write(dir.path(), ".assetpipe-cache/compile/x.json", "");
        write(dir.path(), "node_modules/lib/index.js", "");
        write(dir.path(), ".git/HEAD", "");

        let project = ProjectContext::new(dir.path(), "dev").unwrap();
        let files = collect_files(&project, &project.dest_dir()).unwrap();
        let names = files
            .iter()
            .map(|file| project.subpath_of(file).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["/a.js", "/css/b.css"]);
    }

    #[test]
    fn release_writes_hashed_and_resolved_output() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            CONFIG_FILE_NAME,
            r#"{ "hashLength": 8, "rules": [ { "match": "\\.png$", "useHash": true } ] }"#,
        );
        write(dir.path(), "img/logo.png", "png");
        write(dir.path(), "index.html", "<img src=\"img/logo.png\">");

        let recorder = Recorder::default();
        let result = build(dir.path(), &options(), &recorder).unwrap();
        assert_eq!(result.compiled_count, 2);

        let html = fs::read_to_string(dir.path().join("output/index.html")).unwrap();
        let hashed = result
            .written
            .iter()
            .find(|path| path.extension().map(|ext| ext == "png").unwrap_or(false))
            .unwrap();
        let name = hashed.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("logo_"));
        assert_eq!(html, format!("<img src=\"/img/{name}\">"));
        assert!(recorder
            .events
            .borrow()
            .iter()
            .any(|event| matches!(event, BuildProgress::Written { written_count: 2, .. })));
    }

    #[test]
    fn unreleased_units_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            CONFIG_FILE_NAME,
            r#"{ "rules": [ { "match": "^/_", "release": false } ] }"#,
        );
        write(dir.path(), "_partial.html", "<p>hi</p>");
        write(dir.path(), "index.html", "<!--inline[/_partial.html]-->");

        let result = build(dir.path(), &options(), &NoopReporter).unwrap();
        assert_eq!(result.written.len(), 1);
        let html = fs::read_to_string(dir.path().join("output/index.html")).unwrap();
        assert_eq!(html, "<p>hi</p>");
        assert!(!dir.path().join("output/_partial.html").exists());
    }

    #[test]
    fn compile_errors_fail_the_release() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), CONFIG_FILE_NAME, "{}");
        write(dir.path(), "a.js", "__inline('./missing.js')");

        let recorder = Recorder::default();
        assert!(build(dir.path(), &options(), &recorder).is_err());
        assert!(recorder
            .events
            .borrow()
            .iter()
            .any(|event| matches!(event, BuildProgress::CompileError(message) if message.contains("missing.js"))));
    }

    #[test]
    fn clean_removes_the_compile_caches() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), CONFIG_FILE_NAME, "{}");
        write(dir.path(), "a.js", "var a = 1;");
        build(dir.path(), &options(), &NoopReporter).unwrap();
        assert!(dir.path().join(".assetpipe-cache/compile/release-dev").exists());

        clean(dir.path(), "dev", Some("release-dev"), &NoopReporter).unwrap();
        assert!(!dir.path().join(".assetpipe-cache/compile/release-dev").exists());
    }
}
