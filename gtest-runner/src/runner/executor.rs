// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::CancelHandle;
use crate::{
    command_line::CommandLineScheduler,
    config::{ExecutableSettings, GtestConfig, WorkerContext},
    durations::{DurationStore, SchedulingAnalyzer},
    errors::{DisplayErrorChain, ScriptError},
    parser::{ParseEvent, StreamingResultParser, TestResultCollector},
    reporter::{ExecutableResult, Reporter},
    test_case::TestCase,
    test_command::TestCommand,
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{
    collections::{BTreeMap, HashSet},
    io,
    sync::Arc,
};
use tracing::{debug, error, warn};

/// Shared state of a test run, borrowed by every worker.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunContext<'a> {
    pub(crate) config: &'a GtestConfig,
    pub(crate) reporter: DebugIgnore<&'a dyn Reporter>,
    pub(crate) cancel: &'a CancelHandle,
    pub(crate) analyzer: &'a SchedulingAnalyzer,
}

/// Runs one worker's tests inside a temporary test directory, with the setup and teardown
/// scripts around them.
#[derive(Debug)]
pub(crate) struct PreparedExecutor<'a> {
    context: RunContext<'a>,
    thread_id: usize,
}

impl<'a> PreparedExecutor<'a> {
    pub(crate) fn new(context: RunContext<'a>, thread_id: usize) -> Self {
        Self { context, thread_id }
    }

    pub(crate) fn run(&self, tests: &[Arc<TestCase>]) -> Vec<ExecutableResult> {
        let Some(first) = tests.first() else {
            return Vec::new();
        };
        let test_dir = match camino_tempfile::Builder::new()
            .prefix("gtest-adapter-")
            .tempdir()
        {
            Ok(test_dir) => test_dir,
            Err(error) => {
                error!(
                    "worker {}: failed to create test directory, not running {} tests: {error}",
                    self.thread_id,
                    tests.len()
                );
                return Vec::new();
            }
        };
        let worker = WorkerContext {
            test_dir: test_dir.path(),
            thread_id: self.thread_id,
        };

        // Scripts are configured per executable; the first test's settings apply to the batch.
        let settings = self.context.config.settings_for(first.executable());
        if let Some(script) = settings.expanded_setup_script(worker) {
            if let Err(error) = run_script(&script, test_dir.path()) {
                warn!("setup script failed: {}", DisplayErrorChain::new(&error));
            }
        }

        let results = SequentialExecutor::new(self.context, worker).run(tests);

        if let Some(script) = settings.expanded_teardown_script(worker) {
            if let Err(error) = run_script(&script, test_dir.path()) {
                warn!("teardown script failed: {}", DisplayErrorChain::new(&error));
            }
        }
        close_test_dir(test_dir);
        results
    }
}

fn close_test_dir(test_dir: Utf8TempDir) {
    let path = test_dir.path().to_owned();
    if let Err(error) = test_dir.close() {
        debug!("failed to remove test directory `{path}`: {error}");
    }
}

fn run_script(script: &str, cwd: &Utf8Path) -> Result<(), ScriptError> {
    let words = shell_words::split(script).map_err(|error| ScriptError::Exec {
        script: script.to_owned(),
        error: io::Error::new(io::ErrorKind::InvalidInput, error),
    })?;
    let Some((program, args)) = words.split_first() else {
        return Ok(());
    };

    debug!("running script `{script}`");
    let output = duct::cmd(program, args)
        .dir(cwd.as_std_path())
        .stderr_to_stdout()
        .stdout_capture()
        .stdin_null()
        .unchecked()
        .run()
        .map_err(|error| ScriptError::Exec {
            script: script.to_owned(),
            error,
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("output of `{script}`:\n{stdout}");
    }
    if output.status.success() {
        Ok(())
    } else {
        Err(ScriptError::Failed {
            script: script.to_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Runs tests one executable after another, one invocation at a time.
#[derive(Debug)]
pub(crate) struct SequentialExecutor<'a> {
    context: RunContext<'a>,
    worker: WorkerContext<'a>,
}

impl<'a> SequentialExecutor<'a> {
    pub(crate) fn new(context: RunContext<'a>, worker: WorkerContext<'a>) -> Self {
        Self { context, worker }
    }

    pub(crate) fn run(&self, tests: &[Arc<TestCase>]) -> Vec<ExecutableResult> {
        let mut by_executable: IndexMap<&Utf8Path, Vec<Arc<TestCase>>> = IndexMap::new();
        for test_case in tests {
            by_executable
                .entry(test_case.executable())
                .or_default()
                .push(Arc::clone(test_case));
        }

        let mut executable_results = Vec::new();
        for (executable, tests) in by_executable {
            if self.context.cancel.is_canceled() {
                break;
            }
            let settings = self.context.config.settings_for(executable);
            executable_results.extend(self.run_executable(&settings, &tests));
        }
        executable_results
    }

    fn run_executable(
        &self,
        settings: &ExecutableSettings,
        tests: &[Arc<TestCase>],
    ) -> Vec<ExecutableResult> {
        let executable = settings.executable.as_path();
        let working_dir = settings.execution_working_dir(self.worker);
        let user_params = settings.expanded_execution_param(self.worker);
        let path_extension = settings.expanded_path_extension();
        let placeholders = settings.placeholders();
        let environment: BTreeMap<String, String> = settings
            .environment
            .iter()
            .map(|(name, value)| {
                let value = placeholders.for_execution(value, executable, self.worker);
                (name.clone(), value)
            })
            .collect();
        let xml_path = self.result_xml_path(executable);

        let invocations = match CommandLineScheduler::new(settings).plan(
            tests,
            executable.as_str().len(),
            &user_params,
            &xml_path,
        ) {
            Ok(invocations) => invocations,
            Err(error) => {
                error!(
                    "{executable}: not running {} tests: {}",
                    tests.len(),
                    DisplayErrorChain::new(&error)
                );
                return Vec::new();
            }
        };

        let mut executable_results = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            if self.context.cancel.is_canceled() {
                debug!("{executable}: run canceled, skipping remaining invocations");
                break;
            }
            remove_stale_results(&xml_path);

            let command = TestCommand::new(executable, invocation.args().to_vec())
                .cwd(&working_dir)
                .path_extension(&path_extension)
                .envs(&environment);
            let Some(result) = self.run_invocation(
                settings,
                &command,
                invocation.test_cases(),
                &xml_path,
            ) else {
                continue;
            };
            executable_results.push(result);
        }
        executable_results
    }

    fn run_invocation(
        &self,
        settings: &ExecutableSettings,
        command: &TestCommand,
        tests: &[Arc<TestCase>],
        xml_path: &Utf8Path,
    ) -> Option<ExecutableResult> {
        let executable = command.executable();
        let process = match command.spawn() {
            Ok(process) => process,
            Err(error) => {
                error!(
                    "{executable}: {} tests not run: {}",
                    tests.len(),
                    DisplayErrorChain::new(&error)
                );
                return None;
            }
        };
        let _registered = settings
            .kill_processes_on_cancel
            .then(|| self.context.cancel.register(process.killer()));

        let reporter = *self.context.reporter;
        let mut parser = StreamingResultParser::new(executable, tests);
        let mut executable_result = ExecutableResult::new(executable);
        let mut started = HashSet::new();
        process.read_lines(|line| {
            if executable_result.observe_line(line) {
                return;
            }
            parser.report_line(line);
            report_started(reporter, &mut parser, &mut started);
        });
        parser.flush();
        report_started(reporter, &mut parser, &mut started);

        executable_result.exit_code = match process.wait() {
            Ok(Some(exit_code)) => exit_code,
            Ok(None) => {
                debug!("{executable}: process was terminated by a signal");
                -1
            }
            Err(error) => {
                warn!("{executable}: failed to wait for test process: {error}");
                -1
            }
        };

        let mut results = TestResultCollector::collect_results(
            tests,
            xml_path,
            parser.results(),
            parser.crashed_test(),
        );
        results.sort_by(|a, b| {
            a.test_case()
                .fully_qualified_name()
                .cmp(b.test_case().fully_qualified_name())
        });

        let not_started: Vec<_> = results
            .iter()
            .map(|result| result.test_case())
            .filter(|test_case| !started.contains(test_case.fully_qualified_name()))
            .cloned()
            .collect();
        if !not_started.is_empty() {
            reporter.report_tests_started(&not_started);
        }
        reporter.report_test_results(&results);
        debug!(
            "worker {}: reported {} results for {executable}",
            self.worker.thread_id,
            results.len()
        );

        if let Err(error) = DurationStore::record(&results) {
            warn!("{}", DisplayErrorChain::new(&error));
        }
        for result in &results {
            self.context
                .analyzer
                .add_actual(result.test_case(), result.duration());
        }

        Some(executable_result)
    }

    fn result_xml_path(&self, executable: &Utf8Path) -> Utf8PathBuf {
        let file_name = executable.file_name().unwrap_or("tests");
        self.worker
            .test_dir
            .join(format!("{file_name}.gtest-results.xml"))
    }
}

fn report_started(
    reporter: &dyn Reporter,
    parser: &mut StreamingResultParser,
    started: &mut HashSet<String>,
) {
    for event in parser.take_events() {
        if let ParseEvent::Started(test_case) = event {
            started.insert(test_case.fully_qualified_name().to_owned());
            reporter.report_tests_started(&[test_case]);
        }
    }
}

fn remove_stale_results(xml_path: &Utf8Path) {
    match std::fs::remove_file(xml_path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => debug!("failed to remove `{xml_path}`: {error}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        reporter::test_helpers::RecordingReporter,
        test_case::TestCaseMetadata,
        test_result::TestOutcome,
    };
    use camino_tempfile::Utf8TempDir;
    use indoc::{formatdoc, indoc};
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    // A fake GoogleTest executable: records its arguments and prints canned output.
    fn fake_executable(dir: &Utf8Path, output: &str, exit_code: i32) -> Utf8PathBuf {
        let path = dir.join("fake_tests");
        let script = formatdoc! {r#"
                #!/bin/sh
                for arg in "$@"; do
                  echo "arg: $arg" >> "{dir}/args.txt"
                done
                cat <<'EOF'
                {output}
                EOF
                exit {exit_code}
            "#,
            output = output.trim_end(),
        };
        std::fs::write(&path, script).expect("wrote fake executable");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("made fake executable executable");
        path
    }

    fn tests(executable: &Utf8Path, names: &[&str]) -> Vec<Arc<TestCase>> {
        let metadata = TestCaseMetadata {
            tests_in_executable: names.len(),
            tests_in_suite: names.len(),
        };
        names
            .iter()
            .map(|name| {
                Arc::new(TestCase::new(*name, *name, executable).with_metadata(metadata))
            })
            .collect()
    }

    #[test]
    fn runs_and_reports_one_executable() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let executable = fake_executable(
            dir.path(),
            indoc! {"
                [ RUN      ] Suite.Pass
                [       OK ] Suite.Pass (2 ms)
                GTA_EXIT_CODE_OUTPUT checked leaks
                [ RUN      ] Suite.Crash
                Segmentation fault
            "},
            139,
        );
        let tests = tests(&executable, &["Suite.Pass", "Suite.Crash", "Suite.Later"]);

        let config = test_config("");
        let reporter = RecordingReporter::default();
        let cancel = CancelHandle::new();
        let analyzer = SchedulingAnalyzer::new();
        let context = RunContext {
            config: &config,
            reporter: DebugIgnore(&reporter),
            cancel: &cancel,
            analyzer: &analyzer,
        };
        let worker = WorkerContext {
            test_dir: dir.path(),
            thread_id: 0,
        };

        let executable_results = SequentialExecutor::new(context, worker).run(&tests);
        assert_eq!(
            executable_results,
            vec![ExecutableResult {
                executable: executable.clone(),
                exit_code: 139,
                exit_code_output: vec!["checked leaks".to_owned()],
                exit_code_skip: false,
            }]
        );

        let outcomes: Vec<_> = reporter
            .results()
            .iter()
            .map(|result| (result.test_case().fully_qualified_name().to_owned(), result.outcome()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("Suite.Crash".to_owned(), TestOutcome::Failed),
                ("Suite.Later".to_owned(), TestOutcome::Skipped),
                ("Suite.Pass".to_owned(), TestOutcome::Passed),
            ]
        );
        let started: Vec<_> = reporter
            .started()
            .iter()
            .map(|test_case| test_case.fully_qualified_name().to_owned())
            .collect();
        assert_eq!(started, vec!["Suite.Pass", "Suite.Crash", "Suite.Later"]);

        let durations = DurationStore::read(&executable).expect("read durations");
        assert_eq!(durations.len(), 2, "skipped tests have no duration");

        let args = std::fs::read_to_string(dir.path().join("args.txt")).expect("read args");
        assert!(
            args.contains("arg: --gtest_output=xml:"),
            "unexpected arguments: {args}"
        );
    }

    #[test]
    fn canceled_run_starts_nothing() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let executable = fake_executable(dir.path(), "", 0);
        let tests = tests(&executable, &["Suite.A"]);

        let config = test_config("");
        let reporter = RecordingReporter::default();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let analyzer = SchedulingAnalyzer::new();
        let context = RunContext {
            config: &config,
            reporter: DebugIgnore(&reporter),
            cancel: &cancel,
            analyzer: &analyzer,
        };
        let worker = WorkerContext {
            test_dir: dir.path(),
            thread_id: 0,
        };

        assert_eq!(SequentialExecutor::new(context, worker).run(&tests), Vec::new());
        assert_eq!(reporter.results(), Vec::new());
        assert!(!dir.path().join("args.txt").exists());
    }

    #[test]
    fn scripts_run_in_the_test_dir() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let marker = dir.path().join("setup-ran");
        run_script(&format!("touch {marker}"), dir.path()).expect("script succeeded");
        assert!(marker.exists());

        let error = run_script("false", dir.path()).expect_err("script failed");
        assert!(matches!(error, ScriptError::Failed { exit_code: Some(1), .. }));
    }
}
