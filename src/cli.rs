use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;

use crate::build::BuildOptions;
use crate::build::session::CompileSettings;
use crate::config::DEFAULT_MEDIA;

/// Front-end asset compiler: resolves references between html, js, css and
/// binary resources, inlines what is asked for and writes hashed releases.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Verbosity:
    /// -v -> Debug
    /// -vv -> Trace
    /// -q -> Warn
    /// -qq -> Error
    /// -qqq -> Off.
    /// Default (/ no argument given): 'info'
    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct FolderArg {
    /// The project folder, or any folder below the one holding `assetpipe.json`.
    #[arg(default_value = ".")]
    pub folder: String,
}

#[derive(Args, Debug, Clone)]
pub struct MediaArg {
    /// Media profile whose settings and rules apply.
    #[arg(short, long, default_value = DEFAULT_MEDIA)]
    pub media: String,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub folder: FolderArg,

    #[command(flatten)]
    pub media: MediaArg,

    /// Output folder. Defaults to the configured `dest`.
    #[arg(short, long)]
    pub dest: Option<String>,

    /// Run the lint stage before compiling each unit.
    #[arg(short, long, default_value_t = false)]
    pub lint: bool,

    /// Keep the debug cache apart from the release cache.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Compile into a fresh cache, ignoring what earlier runs stored.
    #[arg(short, long, default_value_t = false)]
    pub unique: bool,

    /// Disable output timing
    #[arg(short, long, default_value_t = false)]
    pub no_timing: bool,
}

impl BuildArgs {
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            media: self.media.media.clone(),
            dest: self.dest.as_ref().map(Into::into),
            settings: CompileSettings {
                debug: self.debug,
                use_lint: self.lint,
                unique: self.unique,
            },
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compile the project and write the release.
    Build(BuildArgs),
    /// Release the project, then release again on every change.
    Watch(BuildArgs),
    /// Remove compile caches.
    Clean {
        #[command(flatten)]
        folder: FolderArg,

        #[command(flatten)]
        media: MediaArg,

        /// Only remove this cache, e.g. `release-dev`.
        #[arg(long)]
        name: Option<String>,
    },
}
