#![deny(clippy::all)]

mod archive;
mod args;
mod commands;
mod config;
mod paths;
mod utils;

use anyhow::{anyhow, Context, Result};
use log::{error, warn};
use once_cell::sync::Lazy;
use reqwest::Url;
use std::{env, fs, path::PathBuf, process};
use structopt::StructOpt;
use valohai_client::{
    retry::{RateLimitConfig, RetryConfig},
    Client, Config as ClientConfig, Token,
};

use crate::{
    args::{Args, Command},
    commands::{batch, config as config_command, download},
    config::VhdataConfig,
    utils::io::{init_env_logger, read_token_from_stdin},
};

static DEFAULT_ENDPOINT: Lazy<Url> =
    Lazy::new(|| Url::parse("https://app.valohai.com").expect("Default URL is well-formed"));

const TOKEN_ENV_VARIABLE_NAME: &str = "VH_TOKEN";

fn run(args: Args) -> Result<()> {
    let config_path = find_configuration(&args)?;
    let cli_config = config::read_vhdata_config(&config_path)?;

    match &args.command {
        Command::Config { config_args } => {
            config_command::run(config_args, cli_config, config_path).map(|_| ())
        }
        Command::Download { download_args } => {
            download::run(download_args, &client_from_args(&args, &cli_config)?)
        }
        Command::Batch { batch_args } => {
            batch::run(batch_args, &client_from_args(&args, &cli_config)?)
        }
    }
}

fn client_from_args(args: &Args, config: &VhdataConfig) -> Result<Client> {
    let current_context = if let Some(context_name) = args.context.as_ref() {
        let context = config.get_context(context_name);
        if context.is_none() {
            return Err(anyhow!("Unknown context `{}`.", context_name));
        };
        context
    } else {
        config.get_current_context()
    };

    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| current_context.map(|context| context.endpoint.clone()))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.clone());

    let args_or_config_token = args
        .token
        .clone()
        .or_else(|| current_context.and_then(|context| context.token.clone()))
        .or_else(|| env::var(TOKEN_ENV_VARIABLE_NAME).ok());

    let token = Token(if let Some(token) = args_or_config_token {
        token
    } else {
        read_token_from_stdin()?.unwrap_or_default()
    });

    let accept_invalid_certificates = args
        .accept_invalid_certificates
        .or_else(|| current_context.map(|context| context.accept_invalid_certificates))
        .unwrap_or(false);

    if accept_invalid_certificates {
        warn!(concat!(
            "TLS certificate verification is disabled. ",
            "Do NOT use this over an insecure network."
        ));
    }

    let proxy = args
        .proxy
        .clone()
        .or_else(|| current_context.and_then(|context| context.proxy.clone()));

    Client::new(ClientConfig {
        endpoint,
        token,
        accept_invalid_certificates,
        proxy,
        retry_config: Some(RetryConfig::default()),
        rate_limit_config: RateLimitConfig::default(),
    })
    .context("Failed to initialise the API client.")
}

fn find_configuration(args: &Args) -> Result<PathBuf> {
    let config_path = if let Some(config_path) = args.config.clone() {
        if !config_path.exists() {
            warn!(
                "Configuration file `{}` doesn't exist.",
                config_path.display()
            );
        }
        config_path
    } else {
        let mut config_path =
            dirs::config_dir().context("Could not get path to the user's config directory")?;
        config_path.push("vhdata");
        fs::create_dir_all(&config_path).with_context(|| {
            format!(
                "Could not create config directory {}",
                config_path.display()
            )
        })?;
        config_path.push("contexts.json");
        config_path
    };
    Ok(config_path)
}

fn main() {
    let args = Args::from_args();
    init_env_logger(args.verbose);

    if let Err(error) = run(args) {
        error!("An error occurred:");
        for cause in error.chain() {
            error!(" |- {cause}");
        }

        #[cfg(feature = "backtrace")]
        {
            error!("{}", error.backtrace());
        }

        process::exit(1);
    }
}
