//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use subscout_core::Language;

/// Search and fetch subtitles from scraped subtitle sites.
#[derive(Parser, Debug)]
#[command(name = "subscout")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/subscout/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search enabled sources and print candidates as JSON
    Search(SearchArgs),

    /// Download one candidate printed by `search`
    Fetch(FetchArgs),

    /// List sources that are backing off
    Throttled,

    /// Make a throttled source available again
    ResetThrottle {
        /// Source id
        source: String,
    },

    /// Drop the session, cached ids and throttle state of a source
    Invalidate {
        /// Source id (all sources when omitted)
        source: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Series or movie title
    pub title: String,

    /// Season number (episode search)
    #[arg(short, long, requires = "episode", conflicts_with = "movie")]
    pub season: Option<u32>,

    /// Episode number (episode search)
    #[arg(short, long, requires = "season", conflicts_with = "movie")]
    pub episode: Option<u32>,

    /// Search for a movie instead of an episode
    #[arg(long)]
    pub movie: bool,

    /// Release year
    #[arg(short, long)]
    pub year: Option<u16>,

    /// Country of the series, to tell remakes apart (e.g. US)
    #[arg(long)]
    pub country: Option<String>,

    /// Alternate title, tried in order after the main one (repeatable)
    #[arg(long = "alt", value_name = "TITLE")]
    pub alternate_titles: Vec<String>,

    /// Wanted language, e.g. en, pt-BR, en:hi (repeatable; default any)
    #[arg(short, long = "lang", value_name = "CODE")]
    pub languages: Vec<Language>,

    /// Restrict to these sources (repeatable; default all enabled)
    #[arg(long = "source", value_name = "ID")]
    pub sources: Vec<String>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// File holding one candidate as JSON, or `-` for stdin
    #[arg(long, value_name = "PATH", default_value = "-")]
    pub candidate: PathBuf,

    /// Where to write the subtitle (default: stdout)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}
