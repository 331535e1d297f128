// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::pe::PeFile;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// Separates directories in the path extension setting.
pub const PATH_EXTENSION_SEPARATOR: char = ';';

/// Finds the program database belonging to a binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct PdbLocator;

impl PdbLocator {
    /// Searches, in order:
    ///
    /// 1. the path recorded in the binary's debug directory;
    /// 2. `<binary-dir>/<binary-stem>.pdb`;
    /// 3. the recorded file name, next to the binary;
    /// 4. both file names in each directory of `path_extension`, then of `PATH`.
    ///
    /// Returns `None` if none of the candidates exists.
    pub fn find_pdb(binary: &Utf8Path, path_extension: &str) -> Option<Utf8PathBuf> {
        let embedded = match PeFile::open(binary).and_then(|pe| pe.pdb_path()) {
            Ok(path) => path,
            Err(error) => {
                debug!("reading PDB path from `{binary}` failed: {error}");
                None
            }
        };
        let by_stem = binary.with_extension("pdb");

        let mut candidates = Vec::new();
        candidates.extend(embedded.clone());
        candidates.push(by_stem.clone());

        // Paths recorded on another machine are often in Windows syntax, so split the file name
        // off by hand.
        let embedded_file_name = embedded
            .as_ref()
            .and_then(|path| path.as_str().rsplit(['\\', '/']).next())
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        let binary_dir = binary.parent().unwrap_or(Utf8Path::new(""));
        if let Some(name) = &embedded_file_name {
            candidates.push(binary_dir.join(name));
        }

        let mut file_names: Vec<&str> = by_stem.file_name().into_iter().collect();
        if let Some(name) = embedded_file_name.as_deref() {
            if !file_names.contains(&name) {
                file_names.push(name);
            }
        }
        for dir in search_dirs(path_extension) {
            for name in &file_names {
                candidates.push(dir.join(name));
            }
        }

        for candidate in &candidates {
            if candidate.is_file() {
                debug!("found PDB for `{binary}` at `{candidate}`");
                return Some(candidate.clone());
            }
            debug!("PDB for `{binary}` not found at `{candidate}`");
        }
        None
    }
}

/// The directories of `path_extension` followed by those of `PATH`.
pub fn search_dirs(path_extension: &str) -> Vec<Utf8PathBuf> {
    let mut dirs: Vec<Utf8PathBuf> = path_extension
        .split(PATH_EXTENSION_SEPARATOR)
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(Utf8PathBuf::from)
        .collect();
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(
            std::env::split_paths(&path).filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok()),
        );
    }
    dirs
}
