use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use zip::{write::SimpleFileOptions, ZipWriter};

/// Zip the contents of `directory` into `<output_stem>.zip`. Entry paths are
/// relative to `directory`, so unpacking the archive recreates its contents
/// without the top-level directory itself.
pub fn zip_directory(directory: &Path, output_stem: &Path) -> Result<PathBuf> {
    // Append rather than `with_extension`: a dot inside the stem (say a
    // version marker like `v1.2`) must survive intact.
    let output_path = {
        let mut path = output_stem.as_os_str().to_owned();
        path.push(".zip");
        PathBuf::from(path)
    };
    let file = File::create(&output_path)
        .with_context(|| format!("Could not create archive `{}`", output_path.display()))?;
    let mut writer = ZipWriter::new(file);

    add_directory(&mut writer, directory, directory)
        .with_context(|| format!("Failed to archive directory `{}`", directory.display()))?;

    writer.finish().context("Failed to finish archive")?;
    Ok(output_path)
}

fn add_directory(writer: &mut ZipWriter<File>, root: &Path, directory: &Path) -> Result<()> {
    let mut entries = fs::read_dir(directory)
        .with_context(|| format!("Could not read directory `{}`", directory.display()))?
        .collect::<io::Result<Vec<_>>>()?;
    // Deterministic entry order keeps archives reproducible across runs.
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root)?.to_path_buf();
        if path.is_dir() {
            writer.add_directory(
                relative.to_string_lossy().into_owned(),
                SimpleFileOptions::default(),
            )?;
            add_directory(writer, root, &path)?;
        } else {
            writer.start_file_from_path(&relative, SimpleFileOptions::default())?;
            let mut reader = File::open(&path)
                .with_context(|| format!("Could not open `{}`", path.display()))?;
            io::copy(&mut reader, writer)?;
        }
    }
    Ok(())
}
