use std::path::{Path, PathBuf};

const INVALID_FILENAME_CHARS: [char; 9] = ['/', '<', '>', ':', '"', '\\', '|', '?', '*'];

/// Replace characters the local filesystem (or a path join) would
/// misinterpret. Datum names come from the remote registry and are not
/// trusted as path components.
pub fn clean_file_name(mut name: String) -> String {
    for char in INVALID_FILENAME_CHARS {
        name = name.replace(char, "□");
    }

    name
}

/// Pick a file name in `directory` that does not collide with an existing
/// file. If `name` is taken, `_1`, `_2`, ... are appended before the
/// extension until a free name is found, so downloads never overwrite.
pub fn available_filename(directory: &Path, name: &str) -> PathBuf {
    let candidate = directory.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let name_path = Path::new(name);
    let stem = name_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = name_path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = directory.join(format!("{stem}_{counter}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{available_filename, clean_file_name};
    use pretty_assertions::assert_eq;
    use std::{env, fs, path::PathBuf};
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("vhdata-paths-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("could not create scratch directory");
        dir
    }

    #[test]
    fn test_clean_file_name() {
        let filename = "run 2024:08:07/eval?";
        let cleaned = clean_file_name(filename.to_string());

        assert_eq!("run 2024□08□07□eval□", cleaned)
    }

    #[test]
    fn test_available_filename_keeps_free_name() {
        let dir = scratch_dir();
        assert_eq!(available_filename(&dir, "a.txt"), dir.join("a.txt"));
    }

    #[test]
    fn test_available_filename_appends_suffix_before_extension() {
        let dir = scratch_dir();
        fs::write(dir.join("a.txt"), b"first").unwrap();
        assert_eq!(available_filename(&dir, "a.txt"), dir.join("a_1.txt"));

        // The suffix keeps growing as the directory fills up.
        fs::write(dir.join("a_1.txt"), b"second").unwrap();
        assert_eq!(available_filename(&dir, "a.txt"), dir.join("a_2.txt"));
    }

    #[test]
    fn test_available_filename_without_extension() {
        let dir = scratch_dir();
        fs::write(dir.join("README"), b"first").unwrap();
        assert_eq!(available_filename(&dir, "README"), dir.join("README_1"));
    }
}
