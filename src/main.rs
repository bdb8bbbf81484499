use anyhow::Result;
use clap::{Parser, error::ErrorKind};
use log::LevelFilter;
use std::{env, io::Write, path::Path};

use assetpipe::build::{self, ConsoleReporter};
use assetpipe::{cli, watcher};

fn main() -> Result<()> {
    let raw_args: Vec<String> = env::args().collect();
    let cli = parse_cli(raw_args).unwrap_or_else(|err| err.exit());

    let log_level_filter = cli.verbose.log_level_filter();

    env_logger::Builder::new()
        .format(|buf, record| writeln!(buf, "{}:\n{}", record.level(), record.args()))
        .filter_level(log_level_filter)
        .target(env_logger::fmt::Target::Stdout)
        .init();

    // The 'normal run' mode will show the 'pretty' formatted progress. But if we turn off the log
    // level, we should never show that.
    let show_progress = log_level_filter == LevelFilter::Info;

    match cli.command {
        cli::Command::Build(build_args) => {
            let reporter = ConsoleReporter::new(show_progress, build_args.no_timing);
            match build::build(
                Path::new(&build_args.folder.folder),
                &build_args.options(),
                &reporter,
            ) {
                Err(e) => {
                    log::error!("{e:#}");
                    std::process::exit(1)
                }
                Ok(_) => std::process::exit(0),
            }
        }
        cli::Command::Watch(watch_args) => watcher::start(
            Path::new(&watch_args.folder.folder),
            &watch_args.options(),
            show_progress,
            watch_args.no_timing,
        ),
        cli::Command::Clean { folder, media, name } => {
            let reporter = ConsoleReporter::new(show_progress, false);
            build::clean(
                Path::new(&folder.folder),
                &media.media,
                name.as_deref(),
                &reporter,
            )
        }
    }
}

fn parse_cli(raw_args: Vec<String>) -> Result<cli::Cli, clap::Error> {
    match cli::Cli::try_parse_from(&raw_args) {
        Ok(cli) => Ok(cli),
        Err(err) => {
            if should_default_to_build(&err, &raw_args) {
                let mut fallback_args = raw_args.clone();
                let insert_at = index_after_global_flags(&fallback_args);
                fallback_args.insert(insert_at, "build".into());

                match cli::Cli::try_parse_from(&fallback_args) {
                    Ok(cli) => Ok(cli),
                    Err(fallback_err) => Err(fallback_err),
                }
            } else {
                Err(err)
            }
        }
    }
}

fn should_default_to_build(err: &clap::Error, args: &[String]) -> bool {
    match err.kind() {
        ErrorKind::MissingSubcommand | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => true,
        ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand => {
            args.iter().skip(1).any(|arg| !is_global_flag(arg))
        }
        _ => false,
    }
}

fn index_after_global_flags(args: &[String]) -> usize {
    let mut idx = 1;
    while let Some(arg) = args.get(idx) {
        if is_global_flag(arg) {
            idx += 1;
        } else {
            break;
        }
    }
    idx.min(args.len())
}

fn is_global_flag(arg: &str) -> bool {
    matches!(
        arg,
        "-v" | "-vv"
            | "-vvv"
            | "-vvvv"
            | "-q"
            | "-qq"
            | "-qqq"
            | "-qqqq"
            | "--verbose"
            | "--quiet"
            | "-h"
            | "--help"
            | "-V"
            | "--version"
    )
}
