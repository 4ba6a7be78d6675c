//! Letter discovery on the local filesystem.
//!
//! Walks `[letters].root` (or a single path given on the command line) and
//! returns the obsolescence letters to process, in path order.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::LettersConfig;
use crate::extract::{content_type_for_path, MIME_XLSX};

/// A letter file as found on disk.
///
/// Bytes are read lazily by the pipeline so that a dry run stays cheap.
#[derive(Debug, Clone)]
pub struct LetterFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
    pub size: u64,
}

impl LetterFile {
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).with_context(|| format!("Failed to read {}", self.path.display()))
    }
}

/// SHA-256 of a letter's bytes, hex encoded. Identifies a letter across runs.
pub fn file_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Discover letters under `target` (file or directory), defaulting to the configured root.
pub fn scan_letters(config: &LettersConfig, target: Option<&Path>) -> Result<Vec<LetterFile>> {
    let root = target.unwrap_or(&config.root);
    if !root.exists() {
        bail!("Letters path does not exist: {}", root.display());
    }

    if root.is_file() {
        return match letter_file(root)? {
            Some(file) => Ok(vec![file]),
            None => bail!("Unsupported letter format: {}", root.display()),
        };
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/~$*".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        if let Some(file) = letter_file(path)? {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn letter_file(path: &Path) -> Result<Option<LetterFile>> {
    let content_type = match content_type_for_path(path) {
        Some(ct) if ct != MIME_XLSX => ct,
        _ => return Ok(None),
    };
    let size = std::fs::metadata(path)?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Some(LetterFile {
        path: path.to_path_buf(),
        file_name,
        content_type,
        size,
    }))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{MIME_DOCX, MIME_PDF};

    #[test]
    fn scans_supported_formats_in_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("2023")).unwrap();
        std::fs::write(root.join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(root.join("2023/a.docx"), b"zip").unwrap();
        std::fs::write(root.join("notes.txt"), b"ignored").unwrap();
        std::fs::write(root.join("catalogue.xlsx"), b"ignored").unwrap();

        let config = LettersConfig {
            root: root.to_path_buf(),
            ..Default::default()
        };
        let files = scan_letters(&config, None).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.docx", "b.pdf"]);
        assert_eq!(files[0].content_type, MIME_DOCX);
        assert_eq!(files[1].content_type, MIME_PDF);
    }

    #[test]
    fn single_file_target() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("letter.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let files = scan_letters(&LettersConfig::default(), Some(&path)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 4);
    }

    #[test]
    fn missing_root_is_an_error() {
        let config = LettersConfig {
            root: PathBuf::from("/definitely/not/here"),
            ..Default::default()
        };
        assert!(scan_letters(&config, None).is_err());
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = file_hash(b"abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
