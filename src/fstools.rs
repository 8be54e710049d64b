use std::fs;
use std::path::PathBuf;

use log::warn;

#[derive(Debug, PartialEq, Eq)]
pub enum DirEntryCategory {
    DoesNotExist,
    RegularFile,
    SymbolicLink,
    Directory,
    Unknown,
}

pub fn classify_file(path: &PathBuf) -> DirEntryCategory {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_symlink() => match fs::metadata(path) {
            Ok(target) if target.is_file() => DirEntryCategory::RegularFile,
            Ok(_) => DirEntryCategory::SymbolicLink,
            Err(_) => DirEntryCategory::DoesNotExist,
        },
        Ok(metadata) => {
            if metadata.is_file() {
                DirEntryCategory::RegularFile
            } else if metadata.is_dir() {
                DirEntryCategory::Directory
            } else {
                DirEntryCategory::Unknown
            }
        },
        Err(_) => DirEntryCategory::DoesNotExist,
    }
}

/// Keeps the paths that can be handed to the encoder, warning about the rest.
/// Symlinks to regular files are followed.
pub fn usable_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter(|path| match classify_file(path) {
            DirEntryCategory::RegularFile => true,
            DirEntryCategory::DoesNotExist => {
                warn!("{:?} does not exist; skipping.", path);
                false
            },
            DirEntryCategory::Directory => {
                warn!("{:?} is a directory; skipping.", path);
                false
            },
            DirEntryCategory::SymbolicLink => {
                warn!("{:?} is a symlink to something other than a file; skipping.", path);
                false
            },
            DirEntryCategory::Unknown => {
                warn!("Unable to classify {:?}; skipping.", path);
                false
            },
        })
        .cloned()
        .collect()
}
