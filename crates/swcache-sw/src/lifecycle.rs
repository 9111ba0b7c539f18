//! Worker lifecycle: states, worker versions, and the registration that
//! holds them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, install not yet dispatched.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active and handling fetches.
    Activated,
    /// Install failed or replaced by a newer version.
    Redundant,
}

impl WorkerState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (Installing | Installed | Activating | Activated, Redundant)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// One version of the worker.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Current state.
    pub state: WorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new worker version.
    pub fn new() -> Self {
        Self {
            id: ServiceWorkerId::new(),
            state: WorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceWorkerError::InvalidState(format!(
                "{} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

impl Default for ServiceWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// A registration: the worker versions serving one scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Worker running its activate handler.
    pub activating: Option<ServiceWorker>,

    /// Active worker. Keeps serving until the activating version completes.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            activating: None,
            active: None,
        }
    }

    /// Worker handling fetches, if any.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active.as_ref().filter(|w| w.is_active())
    }

    /// Start installing a new version.
    pub fn begin_install(&mut self) -> Result<ServiceWorkerId> {
        if let Some(ref worker) = self.installing {
            return Err(ServiceWorkerError::InvalidState(format!(
                "{} is already installing",
                worker.id
            )));
        }
        let mut worker = ServiceWorker::new();
        worker.transition(WorkerState::Installing)?;
        let id = worker.id;
        self.installing = Some(worker);
        Ok(id)
    }

    /// Installing → waiting. Returns the previously waiting version, now
    /// redundant.
    pub fn install_complete(&mut self) -> Result<Option<ServiceWorker>> {
        let mut worker = self
            .installing
            .take()
            .ok_or_else(|| ServiceWorkerError::InvalidState("nothing is installing".into()))?;
        worker.transition(WorkerState::Installed)?;
        retire(self.waiting.replace(worker))
    }

    /// Installing → redundant. The active version, if any, keeps serving.
    pub fn install_failed(&mut self, error: impl Into<String>) -> Result<ServiceWorker> {
        let mut worker = self
            .installing
            .take()
            .ok_or_else(|| ServiceWorkerError::InvalidState("nothing is installing".into()))?;
        worker.transition(WorkerState::Redundant)?;
        worker.error = Some(error.into());
        Ok(worker)
    }

    /// Waiting → activating.
    pub fn begin_activate(&mut self) -> Result<ServiceWorkerId> {
        if let Some(ref worker) = self.activating {
            return Err(ServiceWorkerError::InvalidState(format!(
                "{} is already activating",
                worker.id
            )));
        }
        let mut worker = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::InvalidState("no worker is waiting".into()))?;
        worker.transition(WorkerState::Activating)?;
        let id = worker.id;
        self.activating = Some(worker);
        Ok(id)
    }

    /// Activating → activated. Returns the previously active version, now
    /// redundant.
    pub fn activate_complete(&mut self) -> Result<Option<ServiceWorker>> {
        let mut worker = self
            .activating
            .take()
            .ok_or_else(|| ServiceWorkerError::InvalidState("no worker is activating".into()))?;
        worker.transition(WorkerState::Activated)?;
        retire(self.active.replace(worker))
    }

    /// Activating → redundant. The active version, if any, keeps serving.
    pub fn activate_failed(&mut self, error: impl Into<String>) -> Result<ServiceWorker> {
        let mut worker = self
            .activating
            .take()
            .ok_or_else(|| ServiceWorkerError::InvalidState("no worker is activating".into()))?;
        worker.transition(WorkerState::Redundant)?;
        worker.error = Some(error.into());
        Ok(worker)
    }
}

fn retire(displaced: Option<ServiceWorker>) -> Result<Option<ServiceWorker>> {
    match displaced {
        Some(mut worker) => {
            worker.transition(WorkerState::Redundant)?;
            Ok(Some(worker))
        }
        None => Ok(None),
    }
}
