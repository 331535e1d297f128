// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    byte_search, config::GtestConfig, errors::FindExecutablesError, resolver::pe::PeFile,
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Appended to an executable's path to name a file that marks it as a test executable.
pub const GOOGLE_TEST_INDICATOR: &str = ".is_google_test";

/// DLLs whose import marks an executable as a GoogleTest executable.
pub const GOOGLE_TEST_DLLS: [&str; 4] = ["gtest.dll", "gtestd.dll", "gtest_main.dll", "gtest_maind.dll"];

/// Strings every binary linking GoogleTest contains, from its `--help` text.
pub const GOOGLE_TEST_EXECUTABLE_MARKERS: [&str; 4] = [
    "This program contains tests written using Google Test. You can use the",
    "For more information, please read the Google Test documentation at",
    "Run only the tests whose name matches one of the positive patterns but",
    super::LIST_TESTS_OPTION,
];

/// Returns true if `executable` should be listed for tests.
///
/// An indicator file next to the executable always wins. Otherwise, with a custom `discovery_regex`
/// the executable path must match it; without one, the executable must import a GoogleTest DLL
/// or contain every GoogleTest marker string.
pub fn is_google_test_executable(executable: &Utf8Path, discovery_regex: Option<&Regex>) -> bool {
    let indicator = Utf8PathBuf::from(format!("{executable}{GOOGLE_TEST_INDICATOR}"));
    if indicator.is_file() {
        debug!("`{executable}` has an indicator file, treating it as a test executable");
        return true;
    }

    if let Some(regex) = discovery_regex {
        let matches = regex.is_match(executable.as_str());
        if matches {
            debug!("`{executable}` matches custom discovery regex `{regex}`");
        } else {
            debug!("`{executable}` does not match custom discovery regex `{regex}`");
        }
        return matches;
    }

    let data = match std::fs::read(executable) {
        Ok(data) => data,
        Err(error) => {
            warn!("failed to read `{executable}`: {error}");
            return false;
        }
    };
    if imports_google_test(executable, &data) {
        return true;
    }
    if byte_search::contains_all(&data, GOOGLE_TEST_EXECUTABLE_MARKERS) {
        debug!("`{executable}` contains the GoogleTest marker strings");
        return true;
    }

    debug!("`{executable}` does not look like a GoogleTest executable");
    false
}

/// Returns the test executables among `paths`, sorted by path and without duplicates.
///
/// Directories are scanned (not recursively); files are checked directly. Each candidate is
/// checked with the discovery regex of its own settings.
pub fn find_test_executables(
    paths: &[Utf8PathBuf],
    config: &GtestConfig,
) -> Result<Vec<Utf8PathBuf>, FindExecutablesError> {
    let mut executables = BTreeSet::new();
    for path in paths {
        if path.is_dir() {
            let read_error = |error| FindExecutablesError::new(path, error);
            for entry in path.read_dir_utf8().map_err(read_error)? {
                let entry = entry.map_err(read_error)?;
                if entry.file_type().map_err(read_error)?.is_file() {
                    check_candidate(entry.path(), config, &mut executables);
                }
            }
        } else {
            check_candidate(path, config, &mut executables);
        }
    }
    Ok(executables.into_iter().collect())
}

fn check_candidate(path: &Utf8Path, config: &GtestConfig, executables: &mut BTreeSet<Utf8PathBuf>) {
    if path.as_str().ends_with(GOOGLE_TEST_INDICATOR) {
        return;
    }
    let settings = config.settings_for(path);
    if is_google_test_executable(path, settings.test_discovery_regex.as_ref()) {
        executables.insert(path.to_owned());
    } else {
        debug!("skipping `{path}`: not a GoogleTest executable");
    }
}

fn imports_google_test(executable: &Utf8Path, data: &[u8]) -> bool {
    // Non-PE binaries are common on non-Windows hosts.
    let imports = match PeFile::parse(data.to_vec()).and_then(|pe| pe.imports()) {
        Ok(imports) => imports,
        Err(error) => {
            debug!("not reading imports of `{executable}`: {error}");
            return false;
        }
    };
    match imports.iter().find(|import| {
        GOOGLE_TEST_DLLS
            .iter()
            .any(|dll| import.eq_ignore_ascii_case(dll))
    }) {
        Some(import) => {
            debug!("`{executable}` imports `{import}`");
            true
        }
        None => false,
    }
}
