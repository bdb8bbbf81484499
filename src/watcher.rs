use crate::build::session::CompileContext;
use crate::build::{self, BuildOptions, BuildReporter, ConsoleReporter};
use crate::config::CONFIG_FILE_NAME;
use crate::helpers::emojis::*;
use crate::project_context::ProjectContext;
use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

fn is_relevant_kind(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(_) | EventKind::Other => false,
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Modify(ModifyKind::Other) => false,
        EventKind::Any | EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) => true,
    }
}

/// Changes under the output or cache folders, or in hidden entries, never trigger a release.
fn is_relevant_path(path: &Path, root: &Path, skipped: &[PathBuf]) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    if skipped.iter().any(|skip| path.starts_with(skip)) {
        return false;
    }
    !relative.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name.starts_with('.') || name == "node_modules"
    })
}

fn release_all<R: BuildReporter>(
    session: &mut build::session::Session,
    dest: &Path,
    context: &CompileContext,
    reporter: &R,
) -> Result<()> {
    let files = build::collect_files(&session.project, dest)?;
    build::release(session, &files, dest, context, reporter)?;
    Ok(())
}

/// Releases the project once, then again after every batch of file-system
/// changes, until Ctrl-C.
pub fn start(folder: &Path, options: &BuildOptions, show_progress: bool, no_timing: bool) -> Result<()> {
    let project = ProjectContext::new(folder, &options.media)?;
    let root = project.root.clone();
    let dest = build::destination(&project, options);
    let skipped = vec![dest.clone(), project.cache_dir()];
    let mut session = build::new_session(project, options.settings.clone());
    let reporter = ConsoleReporter::new(show_progress, no_timing);

    let ctrlc_pressed = Arc::new(AtomicBool::new(false));
    let ctrlc_flag = Arc::clone(&ctrlc_pressed);
    ctrlc::set_handler(move || ctrlc_flag.store(true, Ordering::SeqCst))
        .context("Error setting Ctrl-C handler")?;

    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(tx, Config::default()).context("Could not create watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("Could not watch {}", root.display()))?;
    log::debug!("watching {}", root.display());

    // The first pass fills the caches; later passes only recompile what changed.
    let initial = CompileContext::default();
    if let Err(err) = release_all(&mut session, &dest, &initial, &reporter) {
        log::error!("{err:#}");
    }

    let from_watch = CompileContext { from_watch: true };
    let mut pending: Vec<PathBuf> = vec![];
    loop {
        if ctrlc_pressed.load(Ordering::SeqCst) {
            if show_progress {
                println!("\nExiting...");
            }
            return Ok(());
        }

        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(Ok(event)) => {
                if is_relevant_kind(&event.kind) {
                    pending.extend(
                        event
                            .paths
                            .into_iter()
                            .filter(|path| is_relevant_path(path, &root, &skipped)),
                    );
                }
                continue;
            }
            Ok(Err(err)) => {
                log::warn!("watch error: {err}");
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => (),
        }

        if pending.is_empty() {
            continue;
        }
        log::debug!("changed: {pending:?}");

        if pending.iter().any(|path| path.ends_with(CONFIG_FILE_NAME)) {
            let project = match ProjectContext::new(&root, &options.media) {
                Ok(project) => project,
                Err(err) => {
                    log::error!("{err:#}");
                    pending.clear();
                    continue;
                }
            };
            session = build::new_session(project, options.settings.clone());
        }
        pending.clear();

        let timing_total = Instant::now();
        match release_all(&mut session, &dest, &from_watch, &reporter) {
            Ok(()) if show_progress => {
                println!(
                    "\n{}{}Finished release in {:.2}s\n",
                    LINE_CLEAR,
                    CHECKMARK,
                    timing_total.elapsed().as_secs_f64()
                );
            }
            Ok(()) => (),
            Err(err) => log::error!("{err:#}"),
        }
    }
}
