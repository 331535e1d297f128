// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{PlaceholderReplacer, RegexTraitRules, WorkerContext};
use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
    time::Duration,
};
use tracing::warn;

/// The largest seed accepted by `--gtest_random_seed`.
pub const SHUFFLE_SEED_MAX: u32 = 99999;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for gtest-adapter.
///
/// Per-executable settings are obtained through [`settings_for`](Self::settings_for).
#[derive(Clone, Debug)]
pub struct GtestConfig {
    base_dir: Utf8PathBuf,
    solution: SolutionConfig,
    defaults: DefaultSettingsImpl,
    overrides: Vec<CompiledOverride>,
}

impl GtestConfig {
    /// The default location of the config within the base directory.
    pub const CONFIG_PATH: &'static str = ".config/gtest-adapter.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the config from the given file, or if not specified from
    /// `.config/gtest-adapter.toml` in the base directory.
    ///
    /// If no config file is specified and the default location doesn't exist, uses the default
    /// config options.
    pub fn from_sources(
        base_dir: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let base_dir = base_dir.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = base_dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                unknown.iter().join(", ")
            );
        }

        Self::from_deserialized(base_dir, config)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))
    }

    /// Returns the default config.
    pub fn default_config(base_dir: impl Into<Utf8PathBuf>) -> Self {
        let (config, _unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        Self::from_deserialized(base_dir.into(), config).expect("default config is always valid")
    }

    /// The directory the config was read relative to.
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Resolves the settings for one executable.
    ///
    /// The first override whose filter matches the executable path replaces the solution-wide
    /// values it sets.
    pub fn settings_for(&self, executable: &Utf8Path) -> ExecutableSettings {
        let mut settings = ExecutableSettings::from_defaults(executable, &self.solution, &self.defaults);
        if let Some(over) = self
            .overrides
            .iter()
            .find(|over| over.filter.is_match(executable.as_str()))
        {
            settings.apply(&over.settings);
        }
        settings.normalize();
        settings
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn from_deserialized(
        base_dir: Utf8PathBuf,
        config: GtestConfigDeserialize,
    ) -> Result<Self, ConfigParseErrorKind> {
        let overrides = config
            .overrides
            .into_iter()
            .enumerate()
            .map(|(index, over)| {
                let filter = Regex::new(&over.filter).map_err(|error| {
                    ConfigParseErrorKind::InvalidOverrideFilter {
                        index,
                        filter: over.filter.clone(),
                        error,
                    }
                })?;
                Ok(CompiledOverride {
                    filter,
                    settings: over.settings,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            base_dir,
            solution: config.solution,
            defaults: DefaultSettingsImpl::new(config.settings),
            overrides,
        })
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(GtestConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: GtestConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from the config error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// The resolved settings for one test executable.
///
/// A snapshot is produced by [`GtestConfig::settings_for`] and passed explicitly to discovery,
/// scheduling and execution. Templates such as [`working_dir`](Self::working_dir) are stored
/// unexpanded; the `expanded_*` methods substitute placeholders.
#[derive(Clone, Debug)]
pub struct ExecutableSettings {
    /// The executable these settings are for.
    pub executable: Utf8PathBuf,

    /// Substituted for `$(SolutionDir)`.
    pub solution_dir: String,

    /// Substituted for `$(PlatformName)`.
    pub platform_name: String,

    /// Substituted for `$(ConfigurationName)`.
    pub configuration_name: String,

    /// The maximum number of workers. Never 0.
    pub max_workers: usize,

    /// Whether tests are split across workers.
    pub parallel_execution: bool,

    /// The `--gtest_repeat` count. Either -1 or positive.
    pub repetitions: i32,

    /// Whether `--gtest_shuffle` is passed.
    pub shuffle_tests: bool,

    /// The `--gtest_random_seed`, within `0..=SHUFFLE_SEED_MAX`. 0 means unset.
    pub shuffle_seed: u32,

    /// The `--gtest_catch_exceptions` value.
    pub catch_exceptions: bool,

    /// The `--gtest_break_on_failure` value.
    pub break_on_failure: bool,

    /// Whether `--gtest_also_run_disabled_tests` is passed.
    pub run_disabled_tests: bool,

    /// The working directory template.
    pub working_dir: String,

    /// The extra test run arguments template.
    pub additional_test_execution_param: String,

    /// The extra `--gtest_list_tests` arguments template.
    pub additional_test_discovery_param: String,

    /// The setup script template. Empty means no script.
    pub setup_script: String,

    /// The teardown script template. Empty means no script.
    pub teardown_script: String,

    /// Trait rules applied before symbol traits.
    pub traits_before: RegexTraitRules,

    /// Trait rules applied after symbol traits.
    pub traits_after: RegexTraitRules,

    /// The path extension template.
    pub path_extension: String,

    /// Additional debug symbol database templates.
    pub additional_pdbs: Vec<String>,

    /// Whether cancellation kills running test processes.
    pub kill_processes_on_cancel: bool,

    /// How long test discovery may take. `None` means no limit.
    pub discovery_timeout: Option<Duration>,

    /// If set, decides alone whether a file is a GoogleTest executable.
    pub test_discovery_regex: Option<Regex>,

    /// Replaces `/` in display names. Empty means no replacement.
    pub test_name_separator: String,

    /// Whether debug symbols are read for locations and traits.
    pub parse_symbol_information: bool,

    /// The name of the exit-code test. Empty means no exit-code test.
    pub exit_code_test_case: String,

    /// Extra environment variables for test processes.
    pub environment: BTreeMap<String, String>,
}

impl ExecutableSettings {
    fn from_defaults(
        executable: &Utf8Path,
        solution: &SolutionConfig,
        defaults: &DefaultSettingsImpl,
    ) -> Self {
        Self {
            executable: executable.to_owned(),
            solution_dir: solution.dir.clone(),
            platform_name: solution.platform.clone(),
            configuration_name: solution.configuration.clone(),
            max_workers: defaults.max_workers,
            parallel_execution: defaults.parallel_execution,
            repetitions: defaults.repetitions,
            shuffle_tests: defaults.shuffle_tests,
            shuffle_seed: normalize_seed(defaults.shuffle_seed),
            catch_exceptions: defaults.catch_exceptions,
            break_on_failure: defaults.break_on_failure,
            run_disabled_tests: defaults.run_disabled_tests,
            working_dir: defaults.working_dir.clone(),
            additional_test_execution_param: defaults.additional_test_execution_param.clone(),
            additional_test_discovery_param: defaults.additional_test_discovery_param.clone(),
            setup_script: defaults.setup_script.clone(),
            teardown_script: defaults.teardown_script.clone(),
            traits_before: defaults.traits_before.clone(),
            traits_after: defaults.traits_after.clone(),
            path_extension: defaults.path_extension.clone(),
            additional_pdbs: defaults.additional_pdbs.clone(),
            kill_processes_on_cancel: defaults.kill_processes_on_cancel,
            discovery_timeout: Some(defaults.discovery_timeout),
            test_discovery_regex: defaults.test_discovery_regex.0.clone(),
            test_name_separator: defaults.test_name_separator.clone(),
            parse_symbol_information: defaults.parse_symbol_information,
            exit_code_test_case: defaults.exit_code_test_case.clone(),
            environment: defaults.environment.clone(),
        }
    }

    fn apply(&mut self, layer: &SettingsLayer) {
        if let Some(max_workers) = layer.max_workers {
            self.max_workers = max_workers;
        }
        if let Some(parallel_execution) = layer.parallel_execution {
            self.parallel_execution = parallel_execution;
        }
        if let Some(repetitions) = layer.repetitions {
            self.repetitions = repetitions;
        }
        if let Some(shuffle_tests) = layer.shuffle_tests {
            self.shuffle_tests = shuffle_tests;
        }
        if let Some(seed) = layer.shuffle_seed {
            self.shuffle_seed = normalize_seed(seed);
        }
        if let Some(catch_exceptions) = layer.catch_exceptions {
            self.catch_exceptions = catch_exceptions;
        }
        if let Some(break_on_failure) = layer.break_on_failure {
            self.break_on_failure = break_on_failure;
        }
        if let Some(run_disabled_tests) = layer.run_disabled_tests {
            self.run_disabled_tests = run_disabled_tests;
        }
        if let Some(working_dir) = &layer.working_dir {
            self.working_dir.clone_from(working_dir);
        }
        if let Some(param) = &layer.additional_test_execution_param {
            self.additional_test_execution_param.clone_from(param);
        }
        if let Some(param) = &layer.additional_test_discovery_param {
            self.additional_test_discovery_param.clone_from(param);
        }
        if let Some(script) = &layer.setup_script {
            self.setup_script.clone_from(script);
        }
        if let Some(script) = &layer.teardown_script {
            self.teardown_script.clone_from(script);
        }
        if let Some(rules) = &layer.traits_before {
            self.traits_before.clone_from(rules);
        }
        if let Some(rules) = &layer.traits_after {
            self.traits_after.clone_from(rules);
        }
        if let Some(path_extension) = &layer.path_extension {
            self.path_extension.clone_from(path_extension);
        }
        if let Some(additional_pdbs) = &layer.additional_pdbs {
            self.additional_pdbs.clone_from(additional_pdbs);
        }
        if let Some(kill) = layer.kill_processes_on_cancel {
            self.kill_processes_on_cancel = kill;
        }
        if let Some(timeout) = layer.discovery_timeout {
            self.discovery_timeout = Some(timeout);
        }
        if let Some(regex) = &layer.test_discovery_regex {
            self.test_discovery_regex.clone_from(&regex.0);
        }
        if let Some(separator) = &layer.test_name_separator {
            self.test_name_separator.clone_from(separator);
        }
        if let Some(parse) = layer.parse_symbol_information {
            self.parse_symbol_information = parse;
        }
        if let Some(name) = &layer.exit_code_test_case {
            self.exit_code_test_case.clone_from(name);
        }
        if let Some(environment) = &layer.environment {
            self.environment
                .extend(environment.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    fn normalize(&mut self) {
        if self.max_workers == 0 {
            self.max_workers = get_num_cpus();
        }
        if self.repetitions == 0 || self.repetitions < -1 {
            self.repetitions = 1;
        }
        if self.discovery_timeout == Some(Duration::ZERO) {
            self.discovery_timeout = None;
        }
        if self.working_dir.trim().is_empty() {
            self.working_dir = super::EXECUTABLE_DIR_PLACEHOLDER.to_owned();
        }
    }

    /// The number of workers to split tests across.
    pub fn effective_workers(&self) -> usize {
        if self.parallel_execution {
            self.max_workers
        } else {
            1
        }
    }

    /// The exit-code test name, if configured.
    pub fn exit_code_test_name(&self) -> Option<&str> {
        non_empty(&self.exit_code_test_case)
    }

    /// The display name separator, if configured.
    pub fn test_name_separator(&self) -> Option<&str> {
        non_empty(&self.test_name_separator)
    }

    /// Returns a replacer for this snapshot's solution values.
    pub fn placeholders(&self) -> PlaceholderReplacer<'_> {
        PlaceholderReplacer::new(
            &self.solution_dir,
            &self.platform_name,
            &self.configuration_name,
        )
    }

    /// The working directory for `--gtest_list_tests`.
    pub fn discovery_working_dir(&self) -> Utf8PathBuf {
        self.placeholders()
            .for_discovery(&self.working_dir, &self.executable)
            .into()
    }

    /// The working directory for test runs on the given worker.
    pub fn execution_working_dir(&self, worker: WorkerContext<'_>) -> Utf8PathBuf {
        self.placeholders()
            .for_execution(&self.working_dir, &self.executable, worker)
            .into()
    }

    /// The extra arguments for `--gtest_list_tests`.
    pub fn expanded_discovery_param(&self) -> String {
        self.placeholders()
            .for_discovery(&self.additional_test_discovery_param, &self.executable)
    }

    /// The extra arguments for test runs on the given worker.
    pub fn expanded_execution_param(&self, worker: WorkerContext<'_>) -> String {
        self.placeholders().for_execution(
            &self.additional_test_execution_param,
            &self.executable,
            worker,
        )
    }

    /// The path extension with placeholders substituted.
    pub fn expanded_path_extension(&self) -> String {
        self.placeholders()
            .for_paths(&self.path_extension, &self.executable)
    }

    /// The additional debug symbol databases with placeholders substituted.
    pub fn expanded_additional_pdbs(&self) -> Vec<Utf8PathBuf> {
        let placeholders = self.placeholders();
        self.additional_pdbs
            .iter()
            .map(|pdb| placeholders.for_paths(pdb, &self.executable))
            .filter(|pdb| !pdb.is_empty())
            .map(Utf8PathBuf::from)
            .collect()
    }

    /// The setup script for the given worker, if configured.
    pub fn expanded_setup_script(&self, worker: WorkerContext<'_>) -> Option<String> {
        let script = self.placeholders().for_script(&self.setup_script, worker);
        (!script.is_empty()).then_some(script)
    }

    /// The teardown script for the given worker, if configured.
    pub fn expanded_teardown_script(&self, worker: WorkerContext<'_>) -> Option<String> {
        let script = self.placeholders().for_script(&self.teardown_script, worker);
        (!script.is_empty()).then_some(script)
    }

    /// Returns every setting as a `(name, value)` pair, for printing.
    ///
    /// Strings are quoted. The list is maintained by hand: new settings must be added here.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        fn quoted(s: &str) -> String {
            format!("'{s}'")
        }

        vec![
            ("executable", quoted(self.executable.as_str())),
            ("solution-dir", quoted(&self.solution_dir)),
            ("platform-name", quoted(&self.platform_name)),
            ("configuration-name", quoted(&self.configuration_name)),
            ("max-workers", self.max_workers.to_string()),
            ("parallel-execution", self.parallel_execution.to_string()),
            ("repetitions", self.repetitions.to_string()),
            ("shuffle-tests", self.shuffle_tests.to_string()),
            ("shuffle-seed", self.shuffle_seed.to_string()),
            ("catch-exceptions", self.catch_exceptions.to_string()),
            ("break-on-failure", self.break_on_failure.to_string()),
            ("run-disabled-tests", self.run_disabled_tests.to_string()),
            ("working-dir", quoted(&self.working_dir)),
            (
                "additional-test-execution-param",
                quoted(&self.additional_test_execution_param),
            ),
            (
                "additional-test-discovery-param",
                quoted(&self.additional_test_discovery_param),
            ),
            ("setup-script", quoted(&self.setup_script)),
            ("teardown-script", quoted(&self.teardown_script)),
            ("traits-before", format!("{{{}}}", self.traits_before)),
            ("traits-after", format!("{{{}}}", self.traits_after)),
            ("path-extension", quoted(&self.path_extension)),
            (
                "additional-pdbs",
                format!("[{}]", self.additional_pdbs.iter().map(|p| quoted(p)).join(", ")),
            ),
            (
                "kill-processes-on-cancel",
                self.kill_processes_on_cancel.to_string(),
            ),
            (
                "discovery-timeout",
                match self.discovery_timeout {
                    Some(timeout) => humantime::format_duration(timeout).to_string(),
                    None => "none".to_owned(),
                },
            ),
            (
                "test-discovery-regex",
                quoted(self.test_discovery_regex.as_ref().map_or("", Regex::as_str)),
            ),
            ("test-name-separator", quoted(&self.test_name_separator)),
            (
                "parse-symbol-information",
                self.parse_symbol_information.to_string(),
            ),
            ("exit-code-test-case", quoted(&self.exit_code_test_case)),
            (
                "environment",
                format!(
                    "{{{}}}",
                    self.environment
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .join(", ")
                ),
            ),
        ]
    }
}

fn normalize_seed(seed: i64) -> u32 {
    match u32::try_from(seed) {
        Ok(seed) if seed <= SHUFFLE_SEED_MAX => seed,
        _ => {
            warn!("shuffle-seed {seed} is outside 0..={SHUFFLE_SEED_MAX}, using 0");
            0
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

#[derive(Clone, Debug)]
struct CompiledOverride {
    filter: Regex,
    settings: SettingsLayer,
}

/// Solution-wide settings with every value present.
#[derive(Clone, Debug)]
struct DefaultSettingsImpl {
    max_workers: usize,
    parallel_execution: bool,
    repetitions: i32,
    shuffle_tests: bool,
    shuffle_seed: i64,
    catch_exceptions: bool,
    break_on_failure: bool,
    run_disabled_tests: bool,
    working_dir: String,
    additional_test_execution_param: String,
    additional_test_discovery_param: String,
    setup_script: String,
    teardown_script: String,
    traits_before: RegexTraitRules,
    traits_after: RegexTraitRules,
    path_extension: String,
    additional_pdbs: Vec<String>,
    kill_processes_on_cancel: bool,
    discovery_timeout: Duration,
    test_discovery_regex: OptionalRegex,
    test_name_separator: String,
    parse_symbol_information: bool,
    exit_code_test_case: String,
    environment: BTreeMap<String, String>,
}

impl DefaultSettingsImpl {
    fn new(layer: SettingsLayer) -> Self {
        Self {
            max_workers: layer
                .max_workers
                .expect("max-workers present in default settings"),
            parallel_execution: layer
                .parallel_execution
                .expect("parallel-execution present in default settings"),
            repetitions: layer
                .repetitions
                .expect("repetitions present in default settings"),
            shuffle_tests: layer
                .shuffle_tests
                .expect("shuffle-tests present in default settings"),
            shuffle_seed: layer
                .shuffle_seed
                .expect("shuffle-seed present in default settings"),
            catch_exceptions: layer
                .catch_exceptions
                .expect("catch-exceptions present in default settings"),
            break_on_failure: layer
                .break_on_failure
                .expect("break-on-failure present in default settings"),
            run_disabled_tests: layer
                .run_disabled_tests
                .expect("run-disabled-tests present in default settings"),
            working_dir: layer
                .working_dir
                .expect("working-dir present in default settings"),
            additional_test_execution_param: layer
                .additional_test_execution_param
                .expect("additional-test-execution-param present in default settings"),
            additional_test_discovery_param: layer
                .additional_test_discovery_param
                .expect("additional-test-discovery-param present in default settings"),
            setup_script: layer
                .setup_script
                .expect("setup-script present in default settings"),
            teardown_script: layer
                .teardown_script
                .expect("teardown-script present in default settings"),
            traits_before: layer
                .traits_before
                .expect("traits-before present in default settings"),
            traits_after: layer
                .traits_after
                .expect("traits-after present in default settings"),
            path_extension: layer
                .path_extension
                .expect("path-extension present in default settings"),
            additional_pdbs: layer.additional_pdbs.unwrap_or_default(),
            kill_processes_on_cancel: layer
                .kill_processes_on_cancel
                .expect("kill-processes-on-cancel present in default settings"),
            discovery_timeout: layer
                .discovery_timeout
                .expect("discovery-timeout present in default settings"),
            test_discovery_regex: layer
                .test_discovery_regex
                .expect("test-discovery-regex present in default settings"),
            test_name_separator: layer
                .test_name_separator
                .expect("test-name-separator present in default settings"),
            parse_symbol_information: layer
                .parse_symbol_information
                .expect("parse-symbol-information present in default settings"),
            exit_code_test_case: layer
                .exit_code_test_case
                .expect("exit-code-test-case present in default settings"),
            environment: layer
                .environment
                .map(|environment| environment.0)
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GtestConfigDeserialize {
    solution: SolutionConfig,
    settings: SettingsLayer,
    #[serde(default)]
    overrides: Vec<OverrideDeserialize>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SolutionConfig {
    dir: String,
    platform: String,
    configuration: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct OverrideDeserialize {
    filter: String,
    #[serde(flatten)]
    settings: SettingsLayer,
}

/// One layer of settings. Unset values fall through to the layer below.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SettingsLayer {
    #[serde(default)]
    max_workers: Option<usize>,
    #[serde(default)]
    parallel_execution: Option<bool>,
    #[serde(default)]
    repetitions: Option<i32>,
    #[serde(default)]
    shuffle_tests: Option<bool>,
    #[serde(default)]
    shuffle_seed: Option<i64>,
    #[serde(default)]
    catch_exceptions: Option<bool>,
    #[serde(default)]
    break_on_failure: Option<bool>,
    #[serde(default)]
    run_disabled_tests: Option<bool>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    additional_test_execution_param: Option<String>,
    #[serde(default)]
    additional_test_discovery_param: Option<String>,
    #[serde(default)]
    setup_script: Option<String>,
    #[serde(default)]
    teardown_script: Option<String>,
    #[serde(default)]
    traits_before: Option<RegexTraitRules>,
    #[serde(default)]
    traits_after: Option<RegexTraitRules>,
    #[serde(default)]
    path_extension: Option<String>,
    #[serde(default)]
    additional_pdbs: Option<Vec<String>>,
    #[serde(default)]
    kill_processes_on_cancel: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    discovery_timeout: Option<Duration>,
    #[serde(default)]
    test_discovery_regex: Option<OptionalRegex>,
    #[serde(default)]
    test_name_separator: Option<String>,
    #[serde(default)]
    parse_symbol_information: Option<bool>,
    #[serde(default)]
    exit_code_test_case: Option<String>,
    #[serde(default)]
    environment: Option<EnvironmentList>,
}

/// A regex where the empty string means "no regex".
#[derive(Clone, Debug, Default)]
struct OptionalRegex(Option<Regex>);

impl<'de> Deserialize<'de> for OptionalRegex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Self(None));
        }
        Regex::new(&s)
            .map(|regex| Self(Some(regex)))
            .map_err(|error| serde::de::Error::custom(format!("invalid regex `{s}`: {error}")))
    }
}

/// Environment variables, written as a list of `NAME=VALUE` strings.
#[derive(Clone, Debug, Default)]
struct EnvironmentList(BTreeMap<String, String>);

impl<'de> Deserialize<'de> for EnvironmentList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<String>::deserialize(deserializer)?;
        entries
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
                _ => Err(serde::de::Error::custom(format!(
                    "environment entry `{entry}` is not of the form NAME=VALUE"
                ))),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }
}

#[cfg(test)]
pub(crate) fn test_settings(executable: &str) -> ExecutableSettings {
    GtestConfig::default_config("/").settings_for(Utf8Path::new(executable))
}

#[cfg(test)]
pub(crate) fn test_config(toml: &str) -> GtestConfig {
    let builder =
        GtestConfig::make_default_config().add_source(File::from_str(toml, FileFormat::Toml));
    let (config, _unknown) =
        GtestConfig::build_and_deserialize_config(&builder).expect("test config is valid");
    GtestConfig::from_deserialized("/".into(), config).expect("test config is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn config_from_toml(toml: &str) -> Result<GtestConfig, ConfigParseError> {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let config_path = dir.path().join("gtest-adapter.toml");
        std::fs::write(&config_path, toml).expect("wrote config");
        GtestConfig::from_sources(dir.path(), Some(&config_path))
    }

    #[test]
    fn defaults() {
        let settings = test_settings("/build/tests");
        assert_eq!(settings.max_workers, get_num_cpus());
        assert!(settings.parallel_execution);
        assert_eq!(settings.repetitions, 1);
        assert!(settings.catch_exceptions);
        assert!(!settings.break_on_failure);
        assert_eq!(settings.working_dir, "$(ExecutableDir)");
        assert_eq!(settings.discovery_timeout, Some(Duration::from_secs(30)));
        assert!(settings.test_discovery_regex.is_none());
        assert!(settings.parse_symbol_information);
        assert_eq!(settings.exit_code_test_name(), None);
        assert_eq!(settings.test_name_separator(), None);
        assert_eq!(settings.discovery_working_dir(), "/build");
    }

    #[test]
    fn missing_default_location_uses_defaults() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let config = GtestConfig::from_sources(dir.path(), None).expect("default config is valid");
        assert_eq!(
            config.settings_for(Utf8Path::new("/bin/t")).repetitions,
            1
        );
    }

    #[test]
    fn overrides_apply_first_match_field_by_field() {
        let config = config_from_toml(indoc! {r#"
            [solution]
            dir = "/src"
            configuration = "Release"

            [settings]
            repetitions = 3
            traits-before = "Slow.*///Size,Large"

            [[overrides]]
            filter = 'slow_tests(\.exe)?$'
            max-workers = 1
            discovery-timeout = "0s"
            environment = ["GTEST_COLOR=no"]

            [[overrides]]
            filter = 'tests'
            max-workers = 7
            catch-exceptions = false
        "#})
        .expect("config is valid");

        let slow = config.settings_for(Utf8Path::new("/bin/slow_tests.exe"));
        assert_eq!(slow.max_workers, 1);
        assert_eq!(slow.repetitions, 3);
        assert!(slow.catch_exceptions);
        assert_eq!(slow.discovery_timeout, None);
        assert_eq!(slow.solution_dir, "/src");
        assert_eq!(slow.configuration_name, "Release");
        assert_eq!(slow.traits_before.rules().len(), 1);
        assert_eq!(
            slow.environment.get("GTEST_COLOR").map(String::as_str),
            Some("no")
        );

        let other = config.settings_for(Utf8Path::new("/bin/fast_tests"));
        assert_eq!(other.max_workers, 7);
        assert!(!other.catch_exceptions);
        assert!(other.environment.is_empty());
    }

    #[test_case(0, 1; "zero")]
    #[test_case(-1, -1; "forever")]
    #[test_case(-5, 1; "below minus one")]
    #[test_case(4, 4; "positive")]
    fn repetitions_normalized(raw: i32, expected: i32) {
        let config = config_from_toml(&format!("[settings]\nrepetitions = {raw}\n"))
            .expect("config is valid");
        assert_eq!(config.settings_for(Utf8Path::new("/t")).repetitions, expected);
    }

    #[test_case(42, 42; "in range")]
    #[test_case(99999, 99999; "max")]
    #[test_case(100000, 0; "too large")]
    #[test_case(-3, 0; "negative")]
    fn shuffle_seed_normalized(raw: i64, expected: u32) {
        let config = config_from_toml(&format!("[settings]\nshuffle-seed = {raw}\n"))
            .expect("config is valid");
        assert_eq!(config.settings_for(Utf8Path::new("/t")).shuffle_seed, expected);
    }

    #[test]
    fn invalid_override_filter() {
        let error = config_from_toml(indoc! {r#"
            [[overrides]]
            filter = "("
            max-workers = 1
        "#})
        .expect_err("filter is invalid");
        assert!(
            matches!(
                error.kind(),
                ConfigParseErrorKind::InvalidOverrideFilter { index: 0, .. }
            ),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn invalid_discovery_regex() {
        let error = config_from_toml("[settings]\ntest-discovery-regex = \"[\"\n")
            .expect_err("regex is invalid");
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::DeserializeError(_)),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn invalid_environment_entry() {
        let error = config_from_toml("[settings]\nenvironment = [\"NOVALUE\"]\n")
            .expect_err("entry is invalid");
        assert!(matches!(
            error.kind(),
            ConfigParseErrorKind::DeserializeError(_)
        ));
    }

    #[test]
    fn non_parallel_uses_one_worker() {
        let mut settings = test_settings("/bin/t");
        settings.max_workers = 8;
        settings.parallel_execution = false;
        assert_eq!(settings.effective_workers(), 1);
    }

    #[test]
    fn fields_cover_every_setting() {
        let settings = test_settings("/bin/t");
        let fields = settings.fields();
        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), 28);
        assert!(names.iter().all_unique());
        assert!(fields.contains(&("working-dir", "'$(ExecutableDir)'".to_owned())));
        assert!(fields.contains(&("discovery-timeout", "30s".to_owned())));
    }
}
