//! Execution-state tracking and the Ctrl+C listener that consults it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Default)]
struct StateInner {
    running: AtomicBool,
    pid: AtomicU32,
}

/// Whether a module is currently executing, plus the advisory pid of its process.
///
/// Owned by an interpreter; clones share the same state so the interrupt
/// listener thread can observe it.
#[derive(Debug, Default, Clone)]
pub struct ExecutionState {
    inner: Arc<StateInner>,
}

/// Returned by [`ExecutionState::enter`] when the guard is already held.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a module is already executing")]
pub struct AlreadyRunning;

impl ExecutionState {
    /// Mark a module invocation as started.
    ///
    /// The guard is not reentrant: a second `enter` before the first guard is
    /// dropped fails.
    pub fn enter(&self) -> Result<ExecutionGuard, AlreadyRunning> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AlreadyRunning)?;
        Ok(ExecutionGuard {
            state: self.clone(),
        })
    }

    /// Whether a module is executing right now.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The pid recorded by the running module, or `None` when idle or not yet spawned.
    pub fn pid(&self) -> Option<u32> {
        match self.inner.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }
}

/// Held for the duration of one module invocation.
#[derive(Debug)]
pub struct ExecutionGuard {
    state: ExecutionState,
}

impl ExecutionGuard {
    /// Record the child process id once it has been spawned.
    pub fn record_pid(&self, pid: u32) {
        self.state.inner.pid.store(pid, Ordering::Release);
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.state.inner.pid.store(0, Ordering::Release);
        self.state.inner.running.store(false, Ordering::Release);
    }
}

/// What the listener does with one interrupt. Both arms absorb the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// A module is running; its process receives the signal itself and cleans up.
    LeaveModuleRunning,
    /// The interpreter is idle at the prompt; the line editor reports the interrupt.
    ReturnToPrompt,
}

/// Decide how an interrupt is handled given the current execution state.
pub fn classify_interrupt(state: &ExecutionState) -> InterruptAction {
    if state.is_running() {
        InterruptAction::LeaveModuleRunning
    } else {
        InterruptAction::ReturnToPrompt
    }
}

/// Install the process-wide Ctrl+C listener bound to `state`.
///
/// The listener never terminates the running module nor the interpreter.
pub fn install_interrupt_handler(state: ExecutionState) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || match classify_interrupt(&state) {
        InterruptAction::LeaveModuleRunning => {
            tracing::info!(target: "signals", pid = ?state.pid(), "interrupt while module running");
            eprintln!();
        }
        InterruptAction::ReturnToPrompt => {
            tracing::debug!(target: "signals", "interrupt while idle");
            eprintln!();
        }
    })
}
