use anyhow::{Context, Result};
use log::{error, info};
use std::{
    fs,
    path::{Path, PathBuf},
};
use structopt::StructOpt;
use valohai_client::{Client, DatasetId, DatasetName, DatasetVersion, VersionFile};

use crate::{
    archive::zip_directory,
    paths::{available_filename, clean_file_name},
};

#[derive(Debug, StructOpt)]
pub struct DownloadArgs {
    #[structopt(name = "dataset-id")]
    /// The id of the dataset to download.
    dataset_id: DatasetId,

    #[structopt(name = "start-version")]
    /// Name of the version to start from (inclusive). Versions before the
    /// first one with this name are skipped.
    start_version: String,

    #[structopt(short = "n", long = "name")]
    /// Display name used for the local directory and the archive. Defaults
    /// to the dataset id.
    name: Option<DatasetName>,

    #[structopt(short = "o", long = "output-dir", parse(from_os_str), default_value = ".")]
    /// Directory to materialise the dataset and its archive into.
    output_dir: PathBuf,
}

/// One dataset to download: everything the driver loop needs to know.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub id: DatasetId,
    pub name: DatasetName,
    pub start_version: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub versions_processed: usize,
    pub versions_skipped: usize,
    pub files_downloaded: usize,
    pub files_skipped: usize,
}

pub fn run(args: &DownloadArgs, client: &Client) -> Result<()> {
    let DownloadArgs {
        dataset_id,
        start_version,
        name,
        output_dir,
    } = args;

    let spec = DatasetSpec {
        id: dataset_id.clone(),
        name: name
            .clone()
            .unwrap_or_else(|| DatasetName(dataset_id.0.clone())),
        start_version: start_version.clone(),
    };
    download_and_archive(client, &spec, output_dir)
}

/// Download every matching version of one dataset, then zip the resulting
/// directory tree next to it.
pub fn download_and_archive(client: &Client, spec: &DatasetSpec, output_dir: &Path) -> Result<()> {
    let summary = download_dataset(client, spec, output_dir)?;
    info!(
        "Processed {} version(s) of `{}`: {} file(s) downloaded, {} file(s) skipped, {} version(s) skipped",
        summary.versions_processed,
        spec.name,
        summary.files_downloaded,
        summary.files_skipped,
        summary.versions_skipped,
    );

    let archive_path = zip_directory(
        &output_dir.join(&spec.name.0),
        &output_dir.join(format!("{}_{}", spec.name.0, spec.start_version)),
    )?;
    info!("Zipped `{}` to `{}`", spec.name, archive_path.display());
    Ok(())
}

/// Walk the paginated version listing of `spec.id` and materialise every
/// version at or after the start marker.
///
/// The marker check runs for every version on every page: a version whose
/// name equals the marker switches processing on, including a match that
/// only appears on a later page.
pub fn download_dataset(
    client: &Client,
    spec: &DatasetSpec,
    output_dir: &Path,
) -> Result<DownloadSummary> {
    let dataset_dir = output_dir.join(&spec.name.0);
    fs::create_dir_all(&dataset_dir).with_context(|| {
        format!(
            "Could not create dataset directory `{}`",
            dataset_dir.display()
        )
    })?;

    let mut summary = DownloadSummary::default();
    let mut started = false;

    for page in client.dataset_versions(&spec.id) {
        let versions = page.with_context(|| {
            format!("Failed to fetch the version listing of dataset `{}`", spec.id)
        })?;

        for version in versions {
            if version.name.0 == spec.start_version {
                started = true;
            }
            if started {
                info!("Fetching version {} ({})", version.name, version.id);
                materialize_version(client, &version, &dataset_dir, &mut summary)?;
                summary.versions_processed += 1;
            }
        }
    }

    Ok(summary)
}

/// Whether an error is a response the registry actually sent, as opposed to
/// a transport or filesystem failure. Only response errors are isolated to
/// the version or file they occurred in.
fn is_api_error(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<valohai_client::Error>(),
        Some(valohai_client::Error::Api { .. })
    )
}

/// Resolve one version's manifest and download each of its files. A manifest
/// failure skips the whole version; a file failure skips that file only.
/// Transport errors abort the run.
fn materialize_version(
    client: &Client,
    version: &DatasetVersion,
    dataset_dir: &Path,
    summary: &mut DownloadSummary,
) -> Result<()> {
    let details = match client.get_version_details(&version.id) {
        Ok(details) => details,
        Err(error @ valohai_client::Error::Api { .. }) => {
            error!(
                "Failed to fetch the manifest of version {}: {}",
                version.id, error
            );
            summary.versions_skipped += 1;
            return Ok(());
        }
        Err(error) => {
            return Err(error).with_context(|| {
                format!("Failed to fetch the manifest of version {}", version.id)
            })
        }
    };

    let version_dir = dataset_dir
        .join(&version.id.0)
        .join(clean_file_name(version.name.0.clone()));
    for file in &details.files {
        match materialize_file(client, file, &version_dir) {
            Ok(path) => {
                info!("File downloaded successfully and saved as {}", path.display());
                summary.files_downloaded += 1;
            }
            Err(error) if is_api_error(&error) => {
                error!("Failed to download `{}`: {:#}", file.datum.name, error);
                summary.files_skipped += 1;
            }
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn materialize_file(client: &Client, file: &VersionFile, directory: &Path) -> Result<PathBuf> {
    let url = client
        .get_datum_download_url(&file.datum.id)
        .context("Failed to retrieve download URL")?;
    let bytes = client
        .fetch_datum(&url)
        .context("Failed to download the file")?;

    fs::create_dir_all(directory)
        .with_context(|| format!("Could not create directory `{}`", directory.display()))?;
    let path = available_filename(directory, &clean_file_name(file.datum.name.clone()));
    fs::write(&path, bytes)
        .with_context(|| format!("Could not write file `{}`", path.display()))?;
    Ok(path)
}
