// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};

/// `$(SolutionDir)`: the solution directory.
pub const SOLUTION_DIR_PLACEHOLDER: &str = "$(SolutionDir)";
/// `$(PlatformName)`: the solution's platform.
pub const PLATFORM_NAME_PLACEHOLDER: &str = "$(PlatformName)";
/// `$(ConfigurationName)`: the solution's configuration.
pub const CONFIGURATION_NAME_PLACEHOLDER: &str = "$(ConfigurationName)";
/// `$(Executable)`: the test executable.
pub const EXECUTABLE_PLACEHOLDER: &str = "$(Executable)";
/// `$(ExecutableDir)`: the directory containing the test executable.
pub const EXECUTABLE_DIR_PLACEHOLDER: &str = "$(ExecutableDir)";
/// `$(TestDir)`: a per-worker temporary directory. Only available while running tests.
pub const TEST_DIR_PLACEHOLDER: &str = "$(TestDir)";
/// `$(ThreadId)`: the id of the worker running the tests. Only available while running tests.
pub const THREAD_ID_PLACEHOLDER: &str = "$(ThreadId)";

/// The per-worker values substituted for `$(TestDir)` and `$(ThreadId)`.
#[derive(Clone, Copy, Debug)]
pub struct WorkerContext<'a> {
    /// The worker's temporary directory.
    pub test_dir: &'a Utf8Path,

    /// The worker id.
    pub thread_id: usize,
}

/// Substitutes placeholders in setting templates.
///
/// Blank templates always expand to the empty string.
#[derive(Clone, Copy, Debug)]
pub struct PlaceholderReplacer<'a> {
    solution_dir: &'a str,
    platform_name: &'a str,
    configuration_name: &'a str,
}

impl<'a> PlaceholderReplacer<'a> {
    /// Creates a new replacer for the given solution values.
    pub fn new(solution_dir: &'a str, platform_name: &'a str, configuration_name: &'a str) -> Self {
        Self {
            solution_dir,
            platform_name,
            configuration_name,
        }
    }

    /// Expands a template used while listing tests: `$(TestDir)` and `$(ThreadId)` are removed.
    pub fn for_discovery(&self, template: &str, executable: &Utf8Path) -> String {
        self.expand(template, Some(executable), Some(("", "")))
    }

    /// Expands a template used while running tests.
    pub fn for_execution(
        &self,
        template: &str,
        executable: &Utf8Path,
        worker: WorkerContext<'_>,
    ) -> String {
        let thread_id = worker.thread_id.to_string();
        self.expand(
            template,
            Some(executable),
            Some((worker.test_dir.as_str(), &thread_id)),
        )
    }

    /// Expands a setup or teardown script. Scripts run once per worker, so `$(Executable)` and
    /// `$(ExecutableDir)` are left as is.
    pub fn for_script(&self, template: &str, worker: WorkerContext<'_>) -> String {
        let thread_id = worker.thread_id.to_string();
        self.expand(template, None, Some((worker.test_dir.as_str(), &thread_id)))
    }

    /// Expands a path list such as the path extension or an additional PDB.
    ///
    /// `$(TestDir)` and `$(ThreadId)` are not available here and are left as is.
    pub fn for_paths(&self, template: &str, executable: &Utf8Path) -> String {
        self.expand(template.trim(), Some(executable), None)
    }

    fn expand(
        &self,
        template: &str,
        executable: Option<&Utf8Path>,
        worker: Option<(&str, &str)>,
    ) -> String {
        if template.trim().is_empty() {
            return String::new();
        }

        let mut result = template.to_owned();
        if let Some((test_dir, thread_id)) = worker {
            result = result
                .replace(TEST_DIR_PLACEHOLDER, test_dir)
                .replace(THREAD_ID_PLACEHOLDER, thread_id);
        }
        if let Some(executable) = executable {
            result = result
                .replace(EXECUTABLE_DIR_PLACEHOLDER, executable_dir(executable).as_str())
                .replace(EXECUTABLE_PLACEHOLDER, executable.as_str());
        }
        result = result
            .replace(PLATFORM_NAME_PLACEHOLDER, self.platform_name)
            .replace(CONFIGURATION_NAME_PLACEHOLDER, self.configuration_name)
            .replace(SOLUTION_DIR_PLACEHOLDER, self.solution_dir);
        expand_env_vars(&result)
    }
}

/// The directory containing `executable`, or `.` for a bare file name.
pub fn executable_dir(executable: &Utf8Path) -> Utf8PathBuf {
    match executable.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => Utf8PathBuf::from("."),
    }
}

/// Expands `%NAME%` references to environment variables.
///
/// References to variables that aren't set are left unchanged.
pub fn expand_env_vars(input: &str) -> String {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

fn expand_env_vars_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('%') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(len) = after.find('%') else {
            output.push_str(&rest[start..]);
            return output;
        };
        let name = &after[..len];
        match (!name.is_empty()).then(|| lookup(name)).flatten() {
            Some(value) => {
                output.push_str(&value);
                rest = &after[len + 1..];
            }
            None => {
                // The closing '%' might open the next reference.
                output.push('%');
                output.push_str(name);
                rest = &after[len..];
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn replacer() -> PlaceholderReplacer<'static> {
        PlaceholderReplacer::new("/src/solution", "x64", "Debug")
    }

    #[test]
    fn execution_replaces_everything() {
        let worker = WorkerContext {
            test_dir: Utf8Path::new("/tmp/gta-1"),
            thread_id: 3,
        };
        let expanded = replacer().for_execution(
            "$(SolutionDir)|$(PlatformName)|$(ConfigurationName)|$(Executable)|$(ExecutableDir)|$(TestDir)|$(ThreadId)",
            Utf8Path::new("/build/bin/tests.exe"),
            worker,
        );
        assert_eq!(
            expanded,
            "/src/solution|x64|Debug|/build/bin/tests.exe|/build/bin|/tmp/gta-1|3"
        );
    }

    #[test]
    fn discovery_removes_worker_placeholders() {
        let expanded = replacer().for_discovery(
            "--dir=$(TestDir) --id=$(ThreadId) --exe=$(Executable)",
            Utf8Path::new("/build/tests"),
        );
        assert_eq!(expanded, "--dir= --id= --exe=/build/tests");
    }

    #[test]
    fn scripts_keep_executable_placeholders() {
        let worker = WorkerContext {
            test_dir: Utf8Path::new("/tmp/t"),
            thread_id: 0,
        };
        assert_eq!(
            replacer().for_script("setup.sh $(TestDir) $(Executable)", worker),
            "setup.sh /tmp/t $(Executable)"
        );
    }

    #[test_case("", ""; "empty")]
    #[test_case("   ", ""; "blank")]
    fn blank_templates(template: &str, expected: &str) {
        assert_eq!(
            replacer().for_discovery(template, Utf8Path::new("/bin/tests")),
            expected
        );
    }

    #[test]
    fn bare_executable_dir() {
        assert_eq!(executable_dir(Utf8Path::new("tests.exe")), ".");
        assert_eq!(executable_dir(Utf8Path::new("bin/tests.exe")), "bin");
    }

    #[test_case("%HOME%/x", "/home/user/x"; "known")]
    #[test_case("%NOPE%/x", "%NOPE%/x"; "unknown kept")]
    #[test_case("100%", "100%"; "unterminated")]
    #[test_case("%%HOME%", "%/home/user"; "empty name")]
    #[test_case("50% of %HOME%", "50% of /home/user"; "unknown span")]
    #[test_case("%NOPE%HOME%", "%NOPE/home/user"; "closing percent reused")]
    fn env_var_expansion(input: &str, expected: &str) {
        let lookup = |name: &str| (name == "HOME").then(|| "/home/user".to_owned());
        assert_eq!(expand_env_vars_with(input, lookup), expected);
    }
}
