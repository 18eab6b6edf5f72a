//! Scriptable in-memory process control for unit tests.

use super::control::{ExitStatus, ProcessControl, ProcessHandle, ProcessSignal};
use crate::domain::ProcessDescriptor;
use crate::error::{Result, SupervisorError};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FakeState {
    next_pid: u32,
    domains: HashMap<u32, String>,
    alive: HashSet<u32>,
    exits: HashMap<u32, ExitStatus>,
    fail_launch: HashSet<String>,
    ignore_terminate: HashSet<String>,
    ignore_kill: HashSet<String>,
    /// Ordered log: `spawn:<domain>`, `signal:<domain>:<Signal>`,
    /// `release:<domain>`.
    events: Vec<String>,
}

/// Processes that only exist in memory.
///
/// `Terminate` and `Kill` end a process immediately unless the domain was
/// told to ignore them.
#[derive(Debug, Default)]
pub(crate) struct FakeProcessControl {
    state: Mutex<FakeState>,
}

impl FakeProcessControl {
    pub(crate) fn new() -> Self {
        let control = Self::default();
        control.state.lock().unwrap().next_pid = 1000;
        control
    }

    pub(crate) fn fail_launches_of(&self, domain: &str) {
        self.state.lock().unwrap().fail_launch.insert(domain.to_string());
    }

    pub(crate) fn ignore_terminate_of(&self, domain: &str) {
        self.state.lock().unwrap().ignore_terminate.insert(domain.to_string());
    }

    pub(crate) fn ignore_kill_of(&self, domain: &str) {
        self.state.lock().unwrap().ignore_kill.insert(domain.to_string());
    }

    /// End the live process of `domain` as if it crashed.
    pub(crate) fn simulate_exit(&self, domain: &str, status: ExitStatus) {
        let mut state = self.state.lock().unwrap();
        let pid = state
            .domains
            .iter()
            .find(|&(pid, d)| d.as_str() == domain && state.alive.contains(pid))
            .map(|(pid, _)| *pid)
            .expect("no live process for domain");
        state.alive.remove(&pid);
        state.exits.insert(pid, status);
    }

    pub(crate) fn spawn_count(&self, domain: &str) -> usize {
        let expected = format!("spawn:{}", domain);
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| **e == expected)
            .count()
    }

    pub(crate) fn live_count(&self, domain: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .alive
            .iter()
            .filter(|&pid| state.domains.get(pid).map(String::as_str) == Some(domain))
            .count()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

impl ProcessControl for FakeProcessControl {
    fn spawn(&self, descriptor: &ProcessDescriptor) -> Result<ProcessHandle> {
        let mut state = self.state.lock().unwrap();
        if state.fail_launch.contains(&descriptor.domain) {
            return Err(SupervisorError::LaunchFailed {
                domain: descriptor.domain.clone(),
                message: "Executable not found".to_string(),
            });
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        state.domains.insert(pid, descriptor.domain.clone());
        state.alive.insert(pid);
        state.events.push(format!("spawn:{}", descriptor.domain));
        Ok(ProcessHandle::from_pid(pid))
    }

    fn signal(&self, handle: &ProcessHandle, signal: ProcessSignal) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pid = handle.pid();
        let domain = state.domains.get(&pid).cloned().unwrap_or_default();
        state.events.push(format!("signal:{}:{:?}", domain, signal));

        let ends = match signal {
            ProcessSignal::Terminate => !state.ignore_terminate.contains(&domain),
            ProcessSignal::Kill => !state.ignore_kill.contains(&domain),
            ProcessSignal::Pause | ProcessSignal::Resume => false,
        };
        if ends && state.alive.remove(&pid) {
            let number = if signal == ProcessSignal::Kill { 9 } else { 15 };
            state.exits.insert(pid, ExitStatus::signaled(number));
        }
        Ok(())
    }

    fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.state.lock().unwrap().alive.contains(&handle.pid())
    }

    fn exit_status(&self, handle: &ProcessHandle) -> Option<ExitStatus> {
        self.state.lock().unwrap().exits.get(&handle.pid()).copied()
    }

    fn release(&self, handle: &ProcessHandle) {
        let mut state = self.state.lock().unwrap();
        let domain = state.domains.get(&handle.pid()).cloned().unwrap_or_default();
        state.events.push(format!("release:{}", domain));
    }
}
