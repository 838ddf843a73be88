//! Collision-safe naming for payloads saved to disk.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

const FALLBACK_NAME: &str = "file";

/// Reduce a peer-supplied filename to a bare file name.
///
/// Directory components (either separator style) are stripped; names that
/// end up empty or are `.`/`..` become `file`.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if last.is_empty() || last == "." || last == ".." {
        FALLBACK_NAME.to_string()
    } else {
        last.to_string()
    }
}

fn split_name(name: &str) -> (&str, &str) {
    // A leading dot marks a hidden file, not an extension
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn candidate(dir: &Path, stem: &str, ext: &str, attempt: u32) -> PathBuf {
    if attempt == 0 {
        dir.join(format!("{}{}", stem, ext))
    } else {
        dir.join(format!("{}_{}{}", stem, attempt, ext))
    }
}

/// First path in `dir` for `name` that does not exist yet: `name`, then
/// `stem_1.ext`, `stem_2.ext`, ...
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let name = sanitize_filename(name);
    let (stem, ext) = split_name(&name);

    let mut attempt = 0;
    loop {
        let path = candidate(dir, stem, ext, attempt);
        if !path.exists() {
            return path;
        }
        attempt += 1;
    }
}

/// Write `bytes` to a new file in `dir` without ever replacing an existing one.
///
/// The directory is created if needed. Files are opened with create-new
/// semantics, so losing a race to another writer moves on to the next suffix.
pub fn persist_new(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let name = sanitize_filename(name);
    let (stem, ext) = split_name(&name);

    let mut attempt = 0;
    loop {
        let path = candidate(dir, stem, ext, attempt);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)?;
                file.sync_all()?;
                log::debug!("💾 Saved {} bytes to {}", bytes.len(), path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\bob\\photo.png"), "photo.png");
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
    }

    #[test]
    fn test_sanitize_fallback() {
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("dir/"), "file");
        assert_eq!(sanitize_filename(".."), "file");
        assert_eq!(sanitize_filename("   "), "file");
    }

    #[test]
    fn test_same_name_twice_gives_distinct_files() {
        let dir = tempdir().unwrap();

        let first = persist_new(dir.path(), "report.pdf", b"one").unwrap();
        let second = persist_new(dir.path(), "report.pdf", b"two").unwrap();

        assert_ne!(first, second);
        assert_eq!(first.file_name().unwrap(), "report.pdf");
        assert_eq!(second.file_name().unwrap(), "report_1.pdf");
        assert_eq!(fs::read(&first).unwrap(), b"one");
        assert_eq!(fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn test_suffix_without_extension() {
        let dir = tempdir().unwrap();
        persist_new(dir.path(), "README", b"a").unwrap();
        let second = persist_new(dir.path(), "README", b"b").unwrap();
        assert_eq!(second.file_name().unwrap(), "README_1");
    }

    #[test]
    fn test_hidden_file_keeps_leading_dot() {
        let dir = tempdir().unwrap();
        persist_new(dir.path(), ".env", b"a").unwrap();
        let second = persist_new(dir.path(), ".env", b"b").unwrap();
        assert_eq!(second.file_name().unwrap(), ".env_1");
    }

    #[test]
    fn test_unique_path_skips_existing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.wav"), b"x").unwrap();
        fs::write(dir.path().join("a_1.wav"), b"x").unwrap();

        assert_eq!(unique_path(dir.path(), "a.wav"), dir.path().join("a_2.wav"));
        assert_eq!(unique_path(dir.path(), "b.wav"), dir.path().join("b.wav"));
    }

    #[test]
    fn test_creates_missing_directory_and_empty_file() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("descargas_chat");

        let path = persist_new(&nested, "a.txt", &[]).unwrap();

        assert!(nested.is_dir());
        assert_eq!(fs::metadata(path).unwrap().len(), 0);
    }
}
