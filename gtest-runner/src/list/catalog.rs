// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ListTestsParser, TestDescriptor, method_signatures};
use crate::{
    config::{ExecutableSettings, merge_traits},
    errors::{DiscoveryError, DisplayErrorChain},
    resolver::{
        BinaryMetadataResolver, SourceFileLocation, SymbolResolverFactory,
        strip_test_symbol_namespace,
    },
    test_case::{TestCase, TestCaseMetadata},
    test_command::TestCommand,
};
use std::{
    collections::{HashMap, HashSet},
    sync::mpsc,
    time::Instant,
};
use tracing::{debug, error, info, warn};

/// The GoogleTest flag that lists tests without running them.
pub const LIST_TESTS_OPTION: &str = "--gtest_list_tests";

/// Builds the test cases of one executable.
pub struct TestCatalogBuilder<'a> {
    settings: &'a ExecutableSettings,
    resolver_factory: &'a dyn SymbolResolverFactory,
}

impl<'a> TestCatalogBuilder<'a> {
    /// Creates a builder for the executable `settings` were resolved for.
    pub fn new(
        settings: &'a ExecutableSettings,
        resolver_factory: &'a dyn SymbolResolverFactory,
    ) -> Self {
        Self {
            settings,
            resolver_factory,
        }
    }

    /// Lists and describes the tests of the executable.
    ///
    /// Listing failures are logged and produce an empty catalog.
    pub fn build_catalog(&self) -> Vec<TestCase> {
        match self.try_build_catalog() {
            Ok(test_cases) => {
                info!(
                    "found {} tests in `{}`",
                    test_cases.len(),
                    self.settings.executable
                );
                test_cases
            }
            Err(err) => {
                error!("{}", DisplayErrorChain::new(&err));
                Vec::new()
            }
        }
    }

    /// Lists and describes the tests of the executable, returning listing failures.
    pub fn try_build_catalog(&self) -> Result<Vec<TestCase>, DiscoveryError> {
        let output = self.list_tests()?;
        Ok(self.test_cases_from_list_output(output.iter().map(String::as_str)))
    }

    /// Builds test cases from the output of `--gtest_list_tests`.
    pub fn test_cases_from_list_output<'b>(
        &self,
        lines: impl IntoIterator<Item = &'b str>,
    ) -> Vec<TestCase> {
        let descriptors =
            ListTestsParser::new(self.settings.test_name_separator()).parse(lines);
        let locations = if self.settings.parse_symbol_information {
            self.resolve_locations(&descriptors)
        } else {
            HashMap::new()
        };

        let mut suite_counts: HashMap<&str, usize> = HashMap::new();
        for descriptor in &descriptors {
            *suite_counts.entry(&descriptor.suite).or_default() += 1;
        }

        let mut test_cases: Vec<TestCase> = descriptors
            .iter()
            .map(|descriptor| {
                let metadata = TestCaseMetadata {
                    tests_in_suite: suite_counts[descriptor.suite.as_str()],
                    tests_in_executable: descriptors.len(),
                };
                self.create_test_case(descriptor, &locations)
                    .with_metadata(metadata)
            })
            .collect();

        if let Some(name) = self.settings.exit_code_test_name() {
            test_cases.push(TestCase::exit_code_test(&self.settings.executable, name));
        }
        for test_case in &test_cases {
            debug!("added test case `{}`", test_case.display_name());
        }
        test_cases
    }

    fn create_test_case(
        &self,
        descriptor: &TestDescriptor,
        locations: &HashMap<String, SourceFileLocation>,
    ) -> TestCase {
        let test_case = TestCase::new(
            &descriptor.fully_qualified_name,
            &descriptor.display_name,
            &self.settings.executable,
        );

        let location = if self.settings.parse_symbol_information {
            let location = method_signatures(descriptor)
                .iter()
                .find_map(|signature| locations.get(strip_test_symbol_namespace(signature)));
            if location.is_none() {
                warn!(
                    "could not find source location for test `{}`",
                    descriptor.fully_qualified_name
                );
            }
            location
        } else {
            None
        };

        let symbol_traits = location.map_or(&[][..], |location| &location.traits[..]);
        let traits = merge_traits(
            &descriptor.display_name,
            &self.settings.traits_before,
            symbol_traits,
            &self.settings.traits_after,
        );
        let test_case = test_case.with_traits(traits);
        match location {
            Some(location) => test_case.with_location(&location.source_file, location.line),
            None => test_case,
        }
    }

    fn resolve_locations(
        &self,
        descriptors: &[TestDescriptor],
    ) -> HashMap<String, SourceFileLocation> {
        let signatures: HashSet<String> = descriptors
            .iter()
            .flat_map(method_signatures)
            .map(|signature| strip_test_symbol_namespace(&signature).to_owned())
            .collect();
        if signatures.is_empty() {
            return HashMap::new();
        }

        let outcome = BinaryMetadataResolver::new(self.resolver_factory).resolve_all(
            &self.settings.executable,
            &signatures,
            &self.settings.expanded_path_extension(),
            &self.settings.expanded_additional_pdbs(),
        );
        outcome.locations
    }

    fn list_tests(&self) -> Result<Vec<String>, DiscoveryError> {
        let settings = self.settings;
        let mut args = vec![LIST_TESTS_OPTION.to_owned()];
        args.extend(split_user_params(&settings.expanded_discovery_param()));
        let command = TestCommand::new(&settings.executable, args)
            .cwd(settings.discovery_working_dir())
            .path_extension(settings.expanded_path_extension())
            .envs(&settings.environment);

        let process = command.spawn().map_err(|error| DiscoveryError::Launch {
            executable: settings.executable.clone(),
            error,
        })?;

        let deadline = settings
            .discovery_timeout
            .map(|timeout| Instant::now() + timeout);
        let (sender, receiver) = mpsc::channel();
        let mut output = Vec::new();
        let timed_out = std::thread::scope(|scope| {
            scope.spawn(|| {
                process.read_lines(|line| {
                    // Failure to send means the receiver was dropped.
                    let _ = sender.send(line.to_owned());
                });
                drop(sender);
            });

            loop {
                let line = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        receiver.recv_timeout(remaining).map_err(|error| {
                            matches!(error, mpsc::RecvTimeoutError::Timeout)
                        })
                    }
                    None => receiver.recv().map_err(|_| false),
                };
                match line {
                    Ok(line) => output.push(line),
                    Err(false) => break false,
                    Err(true) => {
                        if let Err(error) = process.kill() {
                            debug!("failed to kill `{}`: {error}", command.command_line());
                        }
                        break true;
                    }
                }
            }
        });

        if timed_out {
            debug!(
                "the list command can be run manually: cd \"{}\" && {}",
                command.working_dir(),
                command.command_line()
            );
            return Err(DiscoveryError::Timeout {
                executable: settings.executable.clone(),
                timeout: settings.discovery_timeout.unwrap_or_default(),
            });
        }

        let exit_code = process.wait().map_err(|error| DiscoveryError::Command {
            executable: settings.executable.clone(),
            command: command.command_line(),
            error,
        })?;
        if exit_code != Some(0) {
            return Err(DiscoveryError::NonZeroExit {
                executable: settings.executable.clone(),
                command: command.command_line(),
                exit_code,
                output: output.join("\n"),
            });
        }
        Ok(output)
    }
}

/// Splits user-supplied parameters the way a POSIX shell would.
///
/// Parameters that cannot be split (for example because of unbalanced quotes) are split on
/// whitespace instead, with a warning.
pub(crate) fn split_user_params(params: &str) -> Vec<String> {
    match shell_words::split(params) {
        Ok(words) => words,
        Err(error) => {
            warn!("splitting parameters `{params}` failed ({error}), splitting on whitespace");
            params.split_whitespace().map(str::to_owned).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_settings,
        resolver::test_helpers::FakeResolverFactory,
        test_case::Trait,
    };
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const LIST_OUTPUT: &str = indoc! {"
        Arithmetic.
          Adds
          Subtracts
        Inst/ParamTest.
          Works/0  # GetParam() = 1
        TypedTests/0.  # TypeParam = int
          Iterates
    "};

    struct Fixture {
        dir: Utf8TempDir,
        settings: ExecutableSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = Utf8TempDir::new().expect("created temp dir");
            let exe = dir.path().join("tests.exe");
            std::fs::write(&exe, b"").expect("wrote exe");
            std::fs::write(dir.path().join("tests.pdb"), b"").expect("wrote pdb");
            let settings = test_settings(exe.as_str());
            Self { dir, settings }
        }

        fn factory(&self) -> FakeResolverFactory {
            FakeResolverFactory::default().with_symbols(
                self.dir.path().join("tests.pdb"),
                &[
                    ("Arithmetic_Adds_Test::TestBody", "/src/math.cpp", 10),
                    ("Arithmetic_Adds_Test::Speed__GTA__Fast_GTA_TRAIT", "/src/math.cpp", 9),
                    ("ns::ParamTest_Works_Test::TestBody", "/src/param.cpp", 20),
                    ("gtest_case_TypedTests_::Iterates<int>::TestBody", "/src/typed.cpp", 30),
                ],
            )
        }
    }

    #[test]
    fn builds_catalog_with_locations_traits_and_metadata() {
        let mut fixture = Fixture::new();
        fixture.settings.traits_after = crate::config::RegexTraitRules::new(
            crate::config::RegexTraitRule::parse_list(".*Subtracts///Speed,Slow"),
        );
        let factory = fixture.factory();
        let builder = TestCatalogBuilder::new(&fixture.settings, &factory);
        let test_cases = builder.test_cases_from_list_output(LIST_OUTPUT.lines());

        let summary: Vec<_> = test_cases
            .iter()
            .map(|tc| {
                (
                    tc.fully_qualified_name(),
                    tc.source_file().map(|f| f.as_str()),
                    tc.line(),
                    tc.metadata().tests_in_suite,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Arithmetic.Adds", Some("/src/math.cpp"), 10, 2),
                ("Arithmetic.Subtracts", None, 0, 2),
                ("Inst/ParamTest.Works/0", Some("/src/param.cpp"), 20, 1),
                ("TypedTests/0.Iterates", Some("/src/typed.cpp"), 30, 1),
            ]
        );
        assert!(test_cases.iter().all(|tc| tc.metadata().tests_in_executable == 4));
        assert_eq!(test_cases[0].traits(), [Trait::new("Speed", "Fast")]);
        assert_eq!(test_cases[1].traits(), [Trait::new("Speed", "Slow")]);
        assert_eq!(test_cases[2].display_name(), "Inst/ParamTest.Works/0 [1]");
    }

    #[test]
    fn symbol_parsing_can_be_disabled() {
        let mut fixture = Fixture::new();
        fixture.settings.parse_symbol_information = false;
        let factory = fixture.factory();
        let test_cases = TestCatalogBuilder::new(&fixture.settings, &factory)
            .test_cases_from_list_output(LIST_OUTPUT.lines());
        assert_eq!(test_cases.len(), 4);
        assert!(test_cases.iter().all(|tc| tc.source_file().is_none()));
        assert!(factory.opened.lock().expect("lock is not poisoned").is_empty());
    }

    #[test]
    fn exit_code_test_is_appended() {
        let mut fixture = Fixture::new();
        fixture.settings.exit_code_test_case = "ExitCode".to_owned();
        let factory = fixture.factory();
        let test_cases = TestCatalogBuilder::new(&fixture.settings, &factory)
            .test_cases_from_list_output(LIST_OUTPUT.lines());
        let last = test_cases.last().expect("catalog is not empty");
        assert!(last.is_exit_code_test());
        assert_eq!(last.fully_qualified_name(), "tests_exe.ExitCode");
        assert_eq!(test_cases[0].metadata().tests_in_executable, 4);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::{os::unix::fs::PermissionsExt, time::Duration};

        fn script(dir: &Utf8TempDir, body: &str) -> ExecutableSettings {
            let exe = dir.path().join("tests.sh");
            std::fs::write(&exe, format!("#!/bin/sh\n{body}\n")).expect("wrote script");
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755))
                .expect("made script executable");
            let mut settings = test_settings(exe.as_str());
            settings.parse_symbol_information = false;
            settings
        }

        #[test]
        fn lists_tests_of_a_real_process() {
            let dir = Utf8TempDir::new().expect("created temp dir");
            let settings = script(
                &dir,
                r#"[ "$1" = "--gtest_list_tests" ] || exit 2
printf 'Suite.\n  One\n  Two\n'"#,
            );
            let factory = FakeResolverFactory::default();
            let test_cases = TestCatalogBuilder::new(&settings, &factory)
                .try_build_catalog()
                .expect("listing succeeds");
            let names: Vec<_> = test_cases.iter().map(|tc| tc.fully_qualified_name()).collect();
            assert_eq!(names, vec!["Suite.One", "Suite.Two"]);
        }

        #[test]
        fn non_zero_exit_is_an_error() {
            let dir = Utf8TempDir::new().expect("created temp dir");
            let settings = script(&dir, "echo broken; exit 4");
            let factory = FakeResolverFactory::default();
            let builder = TestCatalogBuilder::new(&settings, &factory);
            match builder.try_build_catalog() {
                Err(DiscoveryError::NonZeroExit {
                    exit_code, output, ..
                }) => {
                    assert_eq!(exit_code, Some(4));
                    assert_eq!(output, "broken");
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert_eq!(builder.build_catalog(), Vec::new());
        }

        #[test]
        fn discovery_times_out() {
            let dir = Utf8TempDir::new().expect("created temp dir");
            let mut settings = script(&dir, "exec sleep 30");
            settings.discovery_timeout = Some(Duration::from_millis(200));
            let factory = FakeResolverFactory::default();
            let result = TestCatalogBuilder::new(&settings, &factory).try_build_catalog();
            assert!(
                matches!(result, Err(DiscoveryError::Timeout { .. })),
                "unexpected result: {result:?}"
            );
        }
    }
}
