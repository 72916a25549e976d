//! Batch execution state machine shared between the worker and control surface.
//!
//! ```text
//! STOPPED/CANCELLED --start--> RUNNING --pause--> PAUSED --resume--> RUNNING
//! RUNNING|PAUSED --stop--> STOPPED
//! RUNNING|PAUSED --cancel--> CANCELLED
//! ```
//!
//! The state lives in a single private atomic; every transition is a
//! compare-and-swap so the worker and a control thread never observe a
//! half-applied change.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Stopped,
    Running,
    Paused,
    Cancelled,
}

impl ExecutionState {
    fn to_u8(self) -> u8 {
        match self {
            ExecutionState::Stopped => 0,
            ExecutionState::Running => 1,
            ExecutionState::Paused => 2,
            ExecutionState::Cancelled => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ExecutionState::Running,
            2 => ExecutionState::Paused,
            3 => ExecutionState::Cancelled,
            _ => ExecutionState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Stopped => "STOPPED",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Paused => "PAUSED",
            ExecutionState::Cancelled => "CANCELLED",
        }
    }

    /// A batch is underway (possibly suspended).
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionState::Running | ExecutionState::Paused)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: ExecutionState,
        to: ExecutionState,
    },
    /// Control request while no batch is active; nothing changed.
    NothingInProgress { action: &'static str },
    /// `resume` while running.
    NotPaused,
    /// `pause` while already paused.
    AlreadyPaused,
    /// `start` while a batch is already active.
    AlreadyRunning,
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Applied { to, .. } => match to {
                ExecutionState::Running => f.write_str("Execution running"),
                ExecutionState::Paused => f.write_str("Execution paused"),
                ExecutionState::Stopped => {
                    f.write_str("Execution stopped; remaining todos left pending")
                }
                ExecutionState::Cancelled => {
                    f.write_str("Execution cancelled; remaining todos left pending")
                }
            },
            Transition::NothingInProgress { action } => {
                write!(f, "No execution in progress to {action}")
            }
            Transition::NotPaused => f.write_str("No paused execution to resume"),
            Transition::AlreadyPaused => f.write_str("Execution already paused"),
            Transition::AlreadyRunning => f.write_str("Execution already in progress"),
        }
    }
}

/// Shared execution state. Wrap in `Arc` to hand to a control thread.
#[derive(Debug)]
pub struct ExecutionControl {
    state: AtomicU8,
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ExecutionState::Stopped.to_u8()),
        }
    }
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// STOPPED|CANCELLED → RUNNING.
    pub fn start(&self) -> Transition {
        for from in [ExecutionState::Stopped, ExecutionState::Cancelled] {
            if self.swap(from, ExecutionState::Running) {
                return Transition::Applied {
                    from,
                    to: ExecutionState::Running,
                };
            }
        }
        Transition::AlreadyRunning
    }

    /// RUNNING → PAUSED.
    pub fn pause(&self) -> Transition {
        if self.swap(ExecutionState::Running, ExecutionState::Paused) {
            return Transition::Applied {
                from: ExecutionState::Running,
                to: ExecutionState::Paused,
            };
        }
        match self.state() {
            ExecutionState::Paused => Transition::AlreadyPaused,
            _ => Transition::NothingInProgress { action: "pause" },
        }
    }

    /// PAUSED → RUNNING.
    pub fn resume(&self) -> Transition {
        if self.swap(ExecutionState::Paused, ExecutionState::Running) {
            return Transition::Applied {
                from: ExecutionState::Paused,
                to: ExecutionState::Running,
            };
        }
        match self.state() {
            ExecutionState::Running => Transition::NotPaused,
            _ => Transition::NothingInProgress { action: "resume" },
        }
    }

    /// RUNNING|PAUSED → STOPPED.
    pub fn stop(&self) -> Transition {
        self.halt(ExecutionState::Stopped, "stop")
    }

    /// RUNNING|PAUSED → CANCELLED.
    pub fn cancel(&self) -> Transition {
        self.halt(ExecutionState::Cancelled, "cancel")
    }

    /// Worker-side end of a batch: RUNNING|PAUSED → STOPPED.
    ///
    /// A CANCELLED state set by the control surface is kept so it stays visible.
    pub fn finish(&self) {
        self.halt(ExecutionState::Stopped, "finish");
    }

    fn halt(&self, to: ExecutionState, action: &'static str) -> Transition {
        for from in [ExecutionState::Running, ExecutionState::Paused] {
            if self.swap(from, to) {
                return Transition::Applied { from, to };
            }
        }
        Transition::NothingInProgress { action }
    }

    fn swap(&self, from: ExecutionState, to: ExecutionState) -> bool {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The documented happy path: start, pause, resume, stop.
    #[test]
    fn full_cycle() {
        let control = ExecutionControl::new();
        assert_eq!(control.state(), ExecutionState::Stopped);
        assert!(control.start().applied());
        assert!(control.pause().applied());
        assert_eq!(control.state(), ExecutionState::Paused);
        assert!(control.resume().applied());
        assert_eq!(control.stop(), Transition::Applied {
            from: ExecutionState::Running,
            to: ExecutionState::Stopped,
        });
    }

    /// Control requests while idle change nothing and say so.
    #[test]
    fn idle_requests_report_nothing_in_progress() {
        let control = ExecutionControl::new();
        for (transition, action) in [
            (control.pause(), "pause"),
            (control.resume(), "resume"),
            (control.stop(), "stop"),
            (control.cancel(), "cancel"),
        ] {
            assert_eq!(transition, Transition::NothingInProgress { action });
        }
        assert_eq!(
            control.pause().to_string(),
            "No execution in progress to pause"
        );
        assert_eq!(control.state(), ExecutionState::Stopped);
    }

    /// Cancel works from paused and survives the worker's `finish`.
    #[test]
    fn cancel_from_paused_sticks() {
        let control = ExecutionControl::new();
        control.start();
        control.pause();
        assert!(control.cancel().applied());
        control.finish();
        assert_eq!(control.state(), ExecutionState::Cancelled);
        assert_eq!(
            control.cancel(),
            Transition::NothingInProgress { action: "cancel" }
        );
        assert!(control.start().applied());
    }

    /// Redundant requests are distinguished from idle ones.
    #[test]
    fn redundant_requests() {
        let control = ExecutionControl::new();
        control.start();
        assert_eq!(control.start(), Transition::AlreadyRunning);
        assert_eq!(control.resume(), Transition::NotPaused);
        assert_eq!(
            control.resume().to_string(),
            "No paused execution to resume"
        );
        control.pause();
        assert_eq!(control.pause(), Transition::AlreadyPaused);
    }

    /// Transitions are visible across threads.
    #[test]
    fn control_from_another_thread() {
        let control = std::sync::Arc::new(ExecutionControl::new());
        control.start();
        let remote = std::sync::Arc::clone(&control);
        std::thread::spawn(move || remote.pause())
            .join()
            .expect("join");
        assert_eq!(control.state(), ExecutionState::Paused);
    }
}
