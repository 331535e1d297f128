// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::ExpectedError,
    junit::{junit_report, write_junit},
    output::{OutputContext, OutputOpts, clap_styles},
    reporter::ConsoleReporter,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gtest_metadata::GtestExitCode;
use gtest_runner::{
    config::{ExecutableSettings, GtestConfig},
    list::{OutputFormat, SerializableFormat, TestList},
    resolver::PdbResolverFactory,
    runner::TestRunnerBuilder,
};
use itertools::Itertools;
use std::{
    io::{self, BufWriter, Write},
    time::Instant,
};
use supports_color::Stream;
use tracing::{debug, info};

/// Discovers and runs GoogleTest executables.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct GtestAdapterApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/gtest-adapter.toml in the current directory]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, base_dir: &Utf8Path) -> Result<GtestConfig, ExpectedError> {
        GtestConfig::from_sources(base_dir, self.config_file.as_deref())
            .map_err(ExpectedError::config_parse_error)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tests of GoogleTest executables
    ///
    /// Each executable is run with --gtest_list_tests. Source locations and traits are read from
    /// debug symbols if the settings enable it. Use --message-format json to get machine-readable
    /// output.
    List {
        /// Test executables, or directories to search for them
        #[arg(required = true, value_name = "PATHS")]
        executables: Vec<Utf8PathBuf>,

        /// Output format
        #[arg(
            short = 'T',
            long,
            value_enum,
            default_value_t,
            help_heading = "OUTPUT OPTIONS",
            value_name = "FMT"
        )]
        message_format: MessageFormatOpts,
    },

    /// List and run the tests of GoogleTest executables
    Run {
        /// Test executables, or directories to search for them
        #[arg(required = true, value_name = "PATHS")]
        executables: Vec<Utf8PathBuf>,

        #[command(flatten)]
        runner_opts: TestRunnerOpts,

        /// Write a JUnit report to this path
        #[arg(long, value_name = "PATH", help_heading = "REPORTER OPTIONS")]
        junit: Option<Utf8PathBuf>,
    },

    /// Print the settings resolved for an executable
    ShowSettings {
        /// Test executable
        executable: Utf8PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum MessageFormatOpts {
    #[default]
    Human,
    Json,
    JsonPretty,
}

impl MessageFormatOpts {
    fn to_output_format(self, verbose: bool) -> OutputFormat {
        match self {
            Self::Human => OutputFormat::Human { verbose },
            Self::Json => OutputFormat::Serializable(SerializableFormat::Json),
            Self::JsonPretty => OutputFormat::Serializable(SerializableFormat::JsonPretty),
        }
    }
}

/// Test runner options.
#[derive(Debug, Default, Args)]
#[command(next_help_heading = "RUNNER OPTIONS")]
struct TestRunnerOpts {
    /// Only run tests whose display name contains one of these substrings
    #[arg(long, short = 'F', value_name = "PATTERN")]
    filter: Vec<String>,

    /// Number of workers to split tests across [default: from settings]
    #[arg(long, short = 'j', visible_alias = "jobs", value_name = "WORKERS")]
    workers: Option<usize>,

    /// Run all tests on a single worker
    #[arg(long, conflicts_with = "workers")]
    no_parallel: bool,
}

impl TestRunnerOpts {
    fn to_builder(&self) -> TestRunnerBuilder {
        let mut builder = TestRunnerBuilder::default();
        if let Some(workers) = self.workers {
            builder.set_workers(workers);
        }
        if self.no_parallel {
            builder.set_parallel_execution(false);
        }
        builder
    }
}

impl GtestAdapterApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32, ExpectedError> {
        let base_dir = current_dir()?;
        let config = self.config_opts.make_config(&base_dir)?;

        match self.command {
            Command::List {
                executables,
                message_format,
            } => {
                let executables = absolute_paths(&base_dir, executables);
                let test_list = TestList::discover(&config, &executables, &PdbResolverFactory)?;

                let stdout = io::stdout();
                // Buffer the output to minimize syscalls.
                let mut writer = BufWriter::new(stdout.lock());
                test_list.write(
                    message_format.to_output_format(output.verbose),
                    &mut writer,
                    output.color.should_colorize(Stream::Stdout),
                )?;
                writer.flush().map_err(ExpectedError::write_output_error)?;
                Ok(GtestExitCode::OK)
            }
            Command::Run {
                executables,
                runner_opts,
                junit,
            } => {
                let executables = absolute_paths(&base_dir, executables);
                let test_list = TestList::discover(&config, &executables, &PdbResolverFactory)?;
                let tests = test_list.filtered(&runner_opts.filter);
                if tests.is_empty() {
                    return Err(ExpectedError::NoTestsRun);
                }
                info!(
                    "running {} of {} tests in {} executables",
                    tests.len(),
                    test_list.test_count(),
                    tests.iter().map(|test_case| test_case.executable()).unique().count()
                );

                let mut reporter = ConsoleReporter::new(BufWriter::new(io::stderr()), output.verbose);
                if output.color.should_colorize(Stream::Stderr) {
                    reporter.colorize();
                }

                let runner = runner_opts.to_builder().build(&config);
                let start = Instant::now();
                let executable_results = runner.execute(&tests, &reporter);
                let elapsed = start.elapsed();
                debug!("{} test process invocations finished", executable_results.len());

                let (stats, results) = reporter
                    .finish(elapsed)
                    .map_err(ExpectedError::write_output_error)?;
                if let Some(path) = &junit {
                    write_junit(&junit_report(&results, elapsed), path)?;
                    info!("wrote JUnit report to `{path}`");
                }

                if stats.is_success() {
                    Ok(GtestExitCode::OK)
                } else {
                    Err(ExpectedError::TestRunFailed)
                }
            }
            Command::ShowSettings { executable } => {
                let executable = absolute_paths(&base_dir, vec![executable]).remove(0);
                let settings = config.settings_for(&executable);

                let stdout = io::stdout();
                let mut writer = BufWriter::new(stdout.lock());
                write_settings(&settings, &mut writer)
                    .and_then(|()| writer.flush())
                    .map_err(ExpectedError::write_output_error)?;
                Ok(GtestExitCode::OK)
            }
        }
    }
}

fn current_dir() -> Result<Utf8PathBuf, ExpectedError> {
    let dir = std::env::current_dir().map_err(ExpectedError::current_dir_invalid)?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::current_dir_invalid(err.into_io_error()))
}

/// Resolves relative executable paths against `base_dir`.
fn absolute_paths(base_dir: &Utf8Path, paths: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    paths
        .into_iter()
        .map(|path| {
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        })
        .collect()
}

fn write_settings(settings: &ExecutableSettings, mut writer: impl Write) -> io::Result<()> {
    let fields = settings.fields();
    let width = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, value) in fields {
        writeln!(writer, "{name:>width$}: {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        GtestAdapterApp::command().debug_assert();
    }

    #[test]
    fn parses_run_options() {
        let app = GtestAdapterApp::try_parse_from([
            "gtest-adapter",
            "run",
            "build/tests.exe",
            "-F",
            "Suite.",
            "--filter",
            "Other",
            "-j",
            "3",
            "--junit",
            "out/junit.xml",
        ])
        .expect("valid arguments");
        let Command::Run {
            executables,
            runner_opts,
            junit,
        } = app.command
        else {
            panic!("expected run, found {:?}", app.command);
        };
        assert_eq!(executables, vec![Utf8PathBuf::from("build/tests.exe")]);
        assert_eq!(runner_opts.filter, vec!["Suite.", "Other"]);
        assert_eq!(runner_opts.workers, Some(3));
        assert_eq!(junit, Some(Utf8PathBuf::from("out/junit.xml")));
    }

    #[test]
    fn workers_conflict_with_no_parallel() {
        let result = GtestAdapterApp::try_parse_from([
            "gtest-adapter",
            "run",
            "tests",
            "--workers",
            "2",
            "--no-parallel",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn list_requires_executables() {
        assert!(GtestAdapterApp::try_parse_from(["gtest-adapter", "list"]).is_err());
    }

    #[test]
    fn relative_paths_are_resolved() {
        let paths = absolute_paths(
            Utf8Path::new("/work"),
            vec!["build/a".into(), "/opt/b".into()],
        );
        assert_eq!(
            paths,
            vec![Utf8PathBuf::from("/work/build/a"), Utf8PathBuf::from("/opt/b")]
        );
    }

    #[test]
    fn settings_are_aligned() {
        let config = GtestConfig::default_config("/work");
        let settings = config.settings_for(Utf8Path::new("/work/tests"));
        let mut output = Vec::new();
        write_settings(&settings, &mut output).expect("written");
        let output = String::from_utf8(output).expect("UTF-8");

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), settings.fields().len());
        assert!(
            lines.iter().any(|line| line.trim_start() == "executable: '/work/tests'"),
            "{output}"
        );
        let colons: Vec<_> = lines.iter().map(|line| line.find(": ")).unique().collect();
        assert_eq!(colons.len(), 1, "{output}");
    }
}
