use crate::commands::{batch::BatchArgs, config::ConfigArgs, download::DownloadArgs};
use reqwest::Url;
use std::path::PathBuf;
use structopt::StructOpt;

/// vhdata is the command line interface to the Valohai dataset registry.
#[derive(Debug, StructOpt)]
#[structopt(
    global_settings = &[
        structopt::clap::AppSettings::ColoredHelp,
        structopt::clap::AppSettings::InferSubcommands,
    ]
)]
pub struct Args {
    #[structopt(long = "config-file", parse(from_os_str))]
    /// Path to the configuration file. Typically defaults to ~/.config/vhdata on Linux.
    pub config: Option<PathBuf>,

    #[structopt(short = "c", long = "context")]
    /// Specify what context to use. Overrides the current context, if any.
    pub context: Option<String>,

    #[structopt(short = "v", long = "verbose")]
    /// Enable more verbose logging.
    pub verbose: bool,

    #[structopt(long = "endpoint", parse(try_from_str))]
    /// Specify what endpoint to use. Overrides the one from the current
    /// context, if any.
    pub endpoint: Option<Url>,

    #[structopt(short = "k", long = "accept-invalid-certificates", parse(try_from_str))]
    pub accept_invalid_certificates: Option<bool>,

    #[structopt(long = "proxy", parse(try_from_str))]
    /// URL of an HTTP proxy to route all requests through. Overrides the one
    /// from the current context, if any.
    pub proxy: Option<Url>,

    #[structopt(long = "token")]
    /// Specify what API token to use. Overrides the one from the current
    /// context, if any.
    pub token: Option<String>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    #[structopt(name = "config")]
    /// Manage vhdata authentication and endpoint contexts
    Config {
        #[structopt(subcommand)]
        config_args: ConfigArgs,
    },

    #[structopt(name = "download")]
    /// Download every version of a dataset from a start version onwards
    Download {
        #[structopt(flatten)]
        download_args: DownloadArgs,
    },

    #[structopt(name = "batch")]
    /// Download several datasets as described by a batch manifest file
    Batch {
        #[structopt(flatten)]
        batch_args: BatchArgs,
    },
}
