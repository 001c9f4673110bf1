//! The heartbeat loop.
//!
//! A `Heartbeater` is the only writer of heartbeats for a process. It runs
//! as its own task next to the command loop and hands itself back when it
//! stops, so the dispatcher can send the final `stopping` heartbeat with the
//! next sequence number after the loop has been joined.

use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::io::AsyncWrite;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_contracts::{
    error::RelayResult,
    heartbeat::{Heartbeat, ProcessStats},
};
use relay_emit::Emitter;

use crate::state::AgentState;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    /// Sample rss and cpu usage of this process on every heartbeat.
    pub include_stats: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            include_stats: true,
        }
    }
}

/// Samples resource usage of the current process.
struct ProcessProbe {
    system: System,
    pid: Pid,
}

impl ProcessProbe {
    fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_process(pid);
        Self { system, pid }
    }

    fn parent_pid(&self) -> Option<u32> {
        self.system
            .process(self.pid)
            .and_then(|process| process.parent())
            .map(|parent| parent.as_u32())
    }

    fn sample(&mut self) -> Option<ProcessStats> {
        if !self.system.refresh_process(self.pid) {
            return None;
        }
        self.system.process(self.pid).map(|process| ProcessStats {
            rss_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        })
    }
}

pub struct Heartbeater<W> {
    emitter: Emitter<W>,
    state: AgentState,
    pid: u32,
    ppid: Option<u32>,
    probe: Option<ProcessProbe>,
}

impl<W> Heartbeater<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(emitter: Emitter<W>, state: AgentState, include_stats: bool) -> Self {
        let probe = ProcessProbe::new();
        let ppid = probe.parent_pid();
        Self {
            emitter,
            state,
            pid: std::process::id(),
            ppid,
            probe: include_stats.then_some(probe),
        }
    }

    /// Build the next heartbeat. Allocates its sequence number.
    pub fn next_heartbeat(&mut self) -> Heartbeat {
        let snapshot = self.state.next_heartbeat();
        Heartbeat {
            agent: self.emitter.agent().clone(),
            seq: snapshot.seq,
            status: snapshot.status,
            pid: self.pid,
            ppid: self.ppid,
            uptime_s: snapshot.uptime_s,
            last_activity_at: snapshot.last_activity_at,
            stats: self.probe.as_mut().and_then(ProcessProbe::sample),
            task_id: snapshot.task_id,
        }
    }

    /// Emit one heartbeat. The state lock is released before writing.
    pub async fn beat(&mut self) -> RelayResult<()> {
        let heartbeat = self.next_heartbeat();
        debug!(seq = heartbeat.seq, status = %heartbeat.status, "heartbeat");
        self.emitter.send_heartbeat(&heartbeat).await
    }

    /// Emit on every tick until `cancel` fires, then return self.
    ///
    /// The first tick of the interval is consumed without emitting; the
    /// caller is expected to have sent the initial heartbeat already.
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!(error = %e, "heartbeat emission failed");
                    }
                }
            }
        }
        self
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
