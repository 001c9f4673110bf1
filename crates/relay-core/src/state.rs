//! Agent lifecycle state shared by the command loop and the heartbeat loop.
//!
//! The lock is taken only for the duration of a field read or update and is
//! never held across I/O or an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};

use relay_contracts::agent::AgentStatus;

#[derive(Debug)]
struct Inner {
    status: AgentStatus,
    task_id: Option<String>,
    last_activity_at: DateTime<Utc>,
    seq: u64,
}

/// What the heartbeat loop needs for one emission.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSnapshot {
    pub seq: u64,
    pub status: AgentStatus,
    pub task_id: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub uptime_s: u64,
}

/// Cloneable handle to the shared agent state.
#[derive(Debug, Clone)]
pub struct AgentState {
    inner: Arc<Mutex<Inner>>,
    started: Instant,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentState {
    /// A fresh state in `starting` with no heartbeat emitted yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                status: AgentStatus::Starting,
                task_id: None,
                last_activity_at: Utc::now(),
                seq: 0,
            })),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> AgentStatus {
        self.lock().status
    }

    pub fn task_id(&self) -> Option<String> {
        self.lock().task_id.clone()
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.lock().last_activity_at
    }

    pub fn touch(&self) {
        self.lock().last_activity_at = Utc::now();
    }

    /// `stopping` is terminal: later transitions are ignored.
    pub fn set_status(&self, status: AgentStatus) {
        let mut inner = self.lock();
        if inner.status != AgentStatus::Stopping {
            inner.status = status;
        }
    }

    pub fn begin_task(&self, task_id: &str) {
        let mut inner = self.lock();
        if inner.status != AgentStatus::Stopping {
            inner.status = AgentStatus::Busy;
        }
        inner.task_id = Some(task_id.to_string());
    }

    pub fn finish_task(&self) {
        let mut inner = self.lock();
        if inner.status != AgentStatus::Stopping {
            inner.status = AgentStatus::Ready;
        }
        inner.task_id = None;
    }

    /// Allocate the next heartbeat sequence number and read the fields it
    /// reports, all under one lock acquisition.
    pub fn next_heartbeat(&self) -> HeartbeatSnapshot {
        let mut inner = self.lock();
        inner.seq += 1;
        HeartbeatSnapshot {
            seq: inner.seq,
            status: inner.status,
            task_id: match inner.status {
                AgentStatus::Busy => inner.task_id.clone(),
                _ => None,
            },
            last_activity_at: inner.last_activity_at,
            uptime_s: self.started.elapsed().as_secs(),
        }
    }

    /// Resets the status to `ready` when dropped, on every exit path.
    pub fn busy_guard(&self, task_id: &str) -> BusyGuard {
        self.begin_task(task_id);
        BusyGuard {
            state: self.clone(),
        }
    }
}

pub struct BusyGuard {
    state: AgentState,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.finish_task();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one_and_never_skips() {
        let state = AgentState::new();
        let seqs: Vec<u64> = (0..5).map(|_| state.next_heartbeat().seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(state.next_heartbeat().seq, 6);
    }

    #[test]
    fn busy_guard_returns_to_ready_with_empty_task() {
        let state = AgentState::new();
        state.set_status(AgentStatus::Ready);
        {
            let _guard = state.busy_guard("task-1");
            let snapshot = state.next_heartbeat();
            assert_eq!(snapshot.status, AgentStatus::Busy);
            assert_eq!(snapshot.task_id.as_deref(), Some("task-1"));
        }
        assert_eq!(state.status(), AgentStatus::Ready);
        assert_eq!(state.task_id(), None);
    }

    #[test]
    fn task_id_reported_only_while_busy() {
        let state = AgentState::new();
        state.begin_task("task-1");
        state.set_status(AgentStatus::Backoff);
        assert_eq!(state.next_heartbeat().task_id, None);
    }

    #[test]
    fn stopping_is_terminal() {
        let state = AgentState::new();
        state.set_status(AgentStatus::Stopping);
        state.set_status(AgentStatus::Ready);
        {
            let _guard = state.busy_guard("task-1");
        }
        assert_eq!(state.status(), AgentStatus::Stopping);
    }

    #[test]
    fn clones_share_one_counter() {
        let state = AgentState::new();
        let other = state.clone();
        assert_eq!(state.next_heartbeat().seq, 1);
        assert_eq!(other.next_heartbeat().seq, 2);
    }
}
