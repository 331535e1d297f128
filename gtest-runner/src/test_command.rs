// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching test executables.

use crate::{errors::ProcessLaunchError, resolver::PATH_EXTENSION_SEPARATOR};
use camino::{Utf8Path, Utf8PathBuf};
use duct::ReaderHandle;
use std::{
    collections::BTreeMap,
    ffi::OsString,
    io::{self, BufRead, BufReader},
    sync::Arc,
};
use tracing::debug;

/// A to-be-run command for a test executable.
#[derive(Clone, Debug)]
pub struct TestCommand {
    executable: Utf8PathBuf,
    args: Vec<String>,
    cwd: Utf8PathBuf,
    path_extension: String,
    env: BTreeMap<String, String>,
}

impl TestCommand {
    /// Creates a new command. The working directory defaults to the executable's directory.
    pub fn new(executable: impl Into<Utf8PathBuf>, args: Vec<String>) -> Self {
        let executable = executable.into();
        let cwd = crate::config::executable_dir(&executable);
        Self {
            executable,
            args,
            cwd,
            path_extension: String::new(),
            env: BTreeMap::new(),
        }
    }

    /// Sets the working directory.
    pub fn cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Sets directories, separated by `;`, to put in front of `PATH`.
    pub fn path_extension(mut self, path_extension: impl Into<String>) -> Self {
        self.path_extension = path_extension.into();
        self
    }

    /// Sets additional environment variables.
    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// The executable.
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// The working directory.
    pub fn working_dir(&self) -> &Utf8Path {
        &self.cwd
    }

    /// The command line, quoted for display.
    pub fn command_line(&self) -> String {
        let mut words = vec![self.executable.as_str()];
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }

    /// Starts the process, merging stderr into stdout.
    pub fn spawn(&self) -> Result<TestProcess, ProcessLaunchError> {
        let mut expression = duct::cmd(self.executable.as_std_path(), &self.args)
            .dir(self.cwd.as_std_path())
            .stderr_to_stdout()
            .stdin_null()
            .unchecked();
        if let Some(path) = self.extended_path() {
            expression = expression.env("PATH", path);
        }
        for (name, value) in &self.env {
            expression = expression.env(name, value);
        }

        debug!("in `{}`, running `{}`", self.cwd, self.command_line());
        let reader = expression
            .reader()
            .map_err(|error| ProcessLaunchError::new(self.command_line(), &self.cwd, error))?;
        Ok(TestProcess {
            command_line: self.command_line(),
            reader: Arc::new(reader),
        })
    }

    fn extended_path(&self) -> Option<OsString> {
        let extension: Vec<Utf8PathBuf> = self
            .path_extension
            .split(PATH_EXTENSION_SEPARATOR)
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(Utf8PathBuf::from)
            .collect();
        if extension.is_empty() {
            return None;
        }
        let existing = std::env::var_os("PATH").unwrap_or_default();
        let dirs = extension
            .into_iter()
            .map(Utf8PathBuf::into_std_path_buf)
            .chain(std::env::split_paths(&existing));
        match std::env::join_paths(dirs) {
            Ok(path) => Some(path),
            Err(error) => {
                debug!("not extending PATH with `{}`: {error}", self.path_extension);
                None
            }
        }
    }
}

/// A running test process.
///
/// Output is read on the calling thread. The process can be killed from another thread through a
/// [`ProcessKiller`].
#[derive(Debug)]
pub struct TestProcess {
    command_line: String,
    reader: Arc<ReaderHandle>,
}

impl TestProcess {
    /// The command line the process was started with.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Returns a handle that can kill this process.
    pub fn killer(&self) -> ProcessKiller {
        ProcessKiller {
            reader: Arc::downgrade(&self.reader),
        }
    }

    /// Reads the combined output line by line, calling `on_line` for each line.
    ///
    /// Invalid UTF-8 is replaced. Trailing `\r` is removed. A read error ends the output; it
    /// typically means the process was killed.
    pub fn read_lines(&self, mut on_line: impl FnMut(&str)) {
        let mut reader = BufReader::new(&*self.reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    on_line(line.trim_end_matches(['\n', '\r']));
                }
                Err(error) => {
                    debug!("reading output of `{}` stopped: {error}", self.command_line);
                    break;
                }
            }
        }
    }

    /// Waits for the process to exit, returning its exit code if it exited normally.
    ///
    /// Must be called after [`Self::read_lines`].
    pub fn wait(self) -> io::Result<Option<i32>> {
        // Reaching EOF reaps the child. If reading stopped early, drain the rest.
        if self.reader.try_wait()?.is_none() {
            io::copy(&mut &*self.reader, &mut io::sink())?;
        }
        Ok(self
            .reader
            .try_wait()?
            .and_then(|output| output.status.code()))
    }

    /// Kills the process.
    pub fn kill(&self) -> io::Result<()> {
        self.reader.kill()
    }
}

/// Kills a [`TestProcess`] if it is still running.
#[derive(Clone, Debug)]
pub struct ProcessKiller {
    reader: std::sync::Weak<ReaderHandle>,
}

impl ProcessKiller {
    /// Kills the process. Does nothing if it already finished.
    pub fn kill(&self) {
        if let Some(reader) = self.reader.upgrade() {
            if let Err(error) = reader.kill() {
                debug!("failed to kill process: {error}");
            }
        }
    }
}
