// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::test_command::ProcessKiller;
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::debug;

/// Cancels a test run.
///
/// Cancelling stops workers from starting further test processes. Processes registered with
/// [`register`](Self::register) are killed as well. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    canceled: AtomicBool,
    next_id: AtomicU64,
    processes: Mutex<BTreeMap<u64, ProcessKiller>>,
}

impl CancelHandle {
    /// Creates a new handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the run.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        let processes = std::mem::take(&mut *self.processes());
        debug!("run canceled, killing {} test processes", processes.len());
        for killer in processes.into_values() {
            killer.kill();
        }
    }

    /// Returns true if the run was canceled.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Kills the process behind `killer` on cancellation, until the returned guard is dropped.
    ///
    /// If the run is already canceled, the process is killed immediately.
    pub fn register(&self, killer: ProcessKiller) -> RegisteredProcess {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.processes().insert(id, killer);
        // Checked after inserting so that a concurrent cancel can't miss the process.
        if self.is_canceled() {
            if let Some(killer) = self.processes().remove(&id) {
                killer.kill();
            }
        }
        RegisteredProcess {
            handle: self.clone(),
            id,
        }
    }

    fn processes(&self) -> MutexGuard<'_, BTreeMap<u64, ProcessKiller>> {
        self.inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unregisters a process from a [`CancelHandle`] when dropped.
#[derive(Debug)]
pub struct RegisteredProcess {
    handle: CancelHandle,
    id: u64,
}

impl Drop for RegisteredProcess {
    fn drop(&mut self) {
        self.handle.processes().remove(&self.id);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_command::TestCommand;
    use std::time::{Duration, Instant};

    fn sleeper() -> crate::test_command::TestProcess {
        TestCommand::new("/bin/sh", vec!["-c".to_owned(), "exec sleep 30".to_owned()])
            .cwd("/")
            .spawn()
            .expect("spawned sleep")
    }

    #[test]
    fn cancel_kills_registered_processes() {
        let cancel = CancelHandle::new();
        let process = sleeper();
        let _registered = cancel.register(process.killer());

        let start = Instant::now();
        let clone = cancel.clone();
        std::thread::spawn(move || clone.cancel());
        process.read_lines(|_| {});
        let exit_code = process.wait().expect("waited");

        assert!(cancel.is_canceled());
        assert_eq!(exit_code, None, "killed process has no exit code");
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn register_after_cancel_kills_immediately() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        let process = sleeper();
        let registered = cancel.register(process.killer());
        process.read_lines(|_| {});
        assert_eq!(process.wait().expect("waited"), None);
        drop(registered);
        assert!(cancel.processes().is_empty());
    }

    #[test]
    fn dropped_registrations_are_forgotten() {
        let cancel = CancelHandle::new();
        let process = sleeper();
        drop(cancel.register(process.killer()));
        assert!(cancel.processes().is_empty());
        process.kill().expect("killed");
    }
}
