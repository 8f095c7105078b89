// Queue Lifecycle State

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Queue lifecycle: Created -> Running -> ShuttingDown -> Terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Created,
    Running,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Created => write!(f, "CREATED"),
            QueueState::Running => write!(f, "RUNNING"),
            QueueState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            QueueState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Shared, lock-protected lifecycle state of one queue
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<QueueState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::Created),
        }
    }

    pub fn get(&self) -> QueueState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Created -> Running
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != QueueState::Created {
            return Err(DomainError::InvalidStateTransition {
                from: state.to_string(),
                to: QueueState::Running.to_string(),
            });
        }
        *state = QueueState::Running;
        Ok(())
    }

    /// Created/Running -> ShuttingDown.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            QueueState::Created | QueueState::Running => {
                *state = QueueState::ShuttingDown;
                true
            }
            QueueState::ShuttingDown | QueueState::Terminated => false,
        }
    }

    /// ShuttingDown -> Terminated.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn terminate(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            QueueState::Terminated => false,
            _ => {
                *state = QueueState::Terminated;
                true
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.get() == QueueState::Running
    }

    /// Shutdown has begun (or already finished)
    pub fn is_closed(&self) -> bool {
        matches!(
            self.get(),
            QueueState::ShuttingDown | QueueState::Terminated
        )
    }

    pub fn is_terminated(&self) -> bool {
        self.get() == QueueState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), QueueState::Created);

        cell.start().unwrap();
        assert!(cell.is_running());

        assert!(cell.begin_shutdown());
        assert!(!cell.begin_shutdown(), "second shutdown is a no-op");
        assert!(cell.is_closed());

        assert!(cell.terminate());
        assert!(!cell.terminate(), "terminate is idempotent");
        assert_eq!(cell.get(), QueueState::Terminated);
    }

    #[test]
    fn test_cannot_run_twice() {
        let cell = StateCell::new();
        cell.start().unwrap();
        let err = cell.start().unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidStateTransition {
                from: "RUNNING".to_string(),
                to: "RUNNING".to_string(),
            }
        );
    }

    #[test]
    fn test_cannot_run_after_shutdown() {
        let cell = StateCell::new();
        assert!(cell.begin_shutdown());
        assert!(cell.start().is_err());
    }
}
