use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::Deserialize;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use structopt::StructOpt;
use valohai_client::{Client, DatasetId, DatasetName};

use crate::commands::download::{download_and_archive, DatasetSpec};

#[derive(Debug, StructOpt)]
pub struct BatchArgs {
    #[structopt(name = "manifest", parse(from_os_str))]
    /// Path to a JSON manifest listing the datasets to download. Each entry
    /// has the dataset's display name, its id, and the time-of-day suffix of
    /// its start marker, e.g.
    /// [{"name": "rtm-forecast-0", "id": "018e...", "time": "09-05"}].
    manifest: PathBuf,

    #[structopt(long = "days-back", default_value = "7")]
    /// How many days before today the start marker date is taken from.
    days_back: i64,

    #[structopt(short = "o", long = "output-dir", parse(from_os_str), default_value = ".")]
    /// Directory to materialise the datasets and their archives into.
    output_dir: PathBuf,
}

/// One entry of the batch manifest: a dataset plus the time-of-day suffix of
/// its start marker.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    pub name: DatasetName,
    pub id: DatasetId,
    pub time: String,
}

pub fn run(args: &BatchArgs, client: &Client) -> Result<()> {
    let BatchArgs {
        manifest,
        days_back,
        output_dir,
    } = args;

    let entries = read_batch_manifest(manifest)?;
    let base_date = base_date(Utc::now(), *days_back);

    for entry in &entries {
        let start_version = format!("{}-{}", base_date, entry.time);
        info!(
            "Processing dataset {} with id {} starting from {}",
            entry.name, entry.id, start_version
        );

        let spec = DatasetSpec {
            id: entry.id.clone(),
            name: entry.name.clone(),
            start_version,
        };
        download_and_archive(client, &spec, output_dir)?;
    }
    Ok(())
}

/// The date part shared by every start marker in a batch run.
fn base_date(now: DateTime<Utc>, days_back: i64) -> String {
    (now - Duration::days(days_back)).format("%Y-%m-%d").to_string()
}

fn read_batch_manifest(path: &Path) -> Result<Vec<BatchEntry>> {
    let file = File::open(path)
        .with_context(|| format!("Could not open batch manifest `{}`", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Could not parse batch manifest `{}`", path.display()))
}
