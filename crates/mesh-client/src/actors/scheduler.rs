//! Cancellable per-connection timers.
//!
//! Each pending task is keyed by `(remote, kind)`. Firing posts
//! [`OrchestratorMessage::TimerFired`] back to the orchestrator; a re-armed
//! or cancelled timer is recognised by its `timer_id` and ignored.

use crate::actors::messages::OrchestratorMessage;
use common::types::SessionId;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Liveness check for an unresolved connection attempt.
    HealthTimer,
    /// Backed-off ICE restart.
    IceRestart,
    /// Full recreation after a delay. Carries no reason; the scheduler
    /// records it alongside.
    Recreate,
    /// Second half of recreation, after the settle delay.
    RecreateSettle,
    /// First offer on a recreated endpoint.
    RecreateOffer,
    /// First offer to a participant that just joined.
    InitialOffer,
}

impl TaskKind {
    /// Tasks that belong to automatic recovery.
    #[must_use]
    pub fn is_recovery(self) -> bool {
        matches!(
            self,
            TaskKind::IceRestart
                | TaskKind::Recreate
                | TaskKind::RecreateSettle
                | TaskKind::RecreateOffer
        )
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::HealthTimer => "health_timer",
            TaskKind::IceRestart => "ice_restart",
            TaskKind::Recreate => "recreate",
            TaskKind::RecreateSettle => "recreate_settle",
            TaskKind::RecreateOffer => "recreate_offer",
            TaskKind::InitialOffer => "initial_offer",
        };
        f.write_str(name)
    }
}

struct ScheduledTask {
    timer_id: u64,
    reason: &'static str,
    handle: JoinHandle<()>,
}

/// Owns every pending timer of the orchestrator.
pub struct TaskScheduler {
    mailbox: mpsc::WeakSender<OrchestratorMessage>,
    tasks: HashMap<(SessionId, TaskKind), ScheduledTask>,
    next_timer_id: u64,
}

impl TaskScheduler {
    /// Timers post to `mailbox`. A weak sender keeps pending timers from
    /// holding the orchestrator alive.
    #[must_use]
    pub fn new(mailbox: mpsc::WeakSender<OrchestratorMessage>) -> Self {
        Self {
            mailbox,
            tasks: HashMap::new(),
            next_timer_id: 0,
        }
    }

    /// Arm (or re-arm) the `kind` task for `remote`.
    pub fn schedule(
        &mut self,
        remote: &SessionId,
        kind: TaskKind,
        delay: Duration,
        reason: &'static str,
    ) {
        self.cancel(remote, kind);
        self.next_timer_id += 1;
        let timer_id = self.next_timer_id;

        let mailbox = self.mailbox.clone();
        let target = remote.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender
                    .send(OrchestratorMessage::TimerFired {
                        remote: target,
                        kind,
                        timer_id,
                    })
                    .await;
            }
        });

        self.tasks.insert(
            (remote.clone(), kind),
            ScheduledTask {
                timer_id,
                reason,
                handle,
            },
        );
    }

    /// Cancel one pending task. Returns true if one was pending.
    pub fn cancel(&mut self, remote: &SessionId, kind: TaskKind) -> bool {
        match self.tasks.remove(&(remote.clone(), kind)) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every task for `remote`.
    pub fn cancel_all_for(&mut self, remote: &SessionId) {
        self.tasks.retain(|(r, _), task| {
            if r == remote {
                task.handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self, remote: &SessionId, kind: TaskKind) -> bool {
        self.tasks.contains_key(&(remote.clone(), kind))
    }

    /// Any recovery task pending for `remote`.
    #[must_use]
    pub fn recovery_pending(&self, remote: &SessionId) -> bool {
        self.tasks
            .keys()
            .any(|(r, kind)| r == remote && kind.is_recovery())
    }

    /// Claim a fired timer. Returns its reason if `timer_id` is still the
    /// armed one, removing the entry; otherwise the firing is stale.
    pub fn take_if_current(
        &mut self,
        remote: &SessionId,
        kind: TaskKind,
        timer_id: u64,
    ) -> Option<&'static str> {
        let key = (remote.clone(), kind);
        match self.tasks.get(&key) {
            Some(task) if task.timer_id == timer_id => {
                self.tasks.remove(&key).map(|task| task.reason)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn fired(msg: OrchestratorMessage) -> (SessionId, TaskKind, u64) {
        match msg {
            OrchestratorMessage::TimerFired {
                remote,
                kind,
                timer_id,
            } => (remote, kind, timer_id),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = TaskScheduler::new(tx.downgrade());
        let id = SessionId::from("sock-b");

        scheduler.schedule(&id, TaskKind::HealthTimer, Duration::from_secs(5), "");
        tokio::time::advance(Duration::from_millis(4900)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(200)).await;
        let (remote, kind, timer_id) = fired(rx.recv().await.unwrap());
        assert_eq!(remote, id);
        assert_eq!(kind, TaskKind::HealthTimer);
        assert!(scheduler
            .take_if_current(&id, TaskKind::HealthTimer, timer_id)
            .is_some());
        assert!(!scheduler.is_pending(&id, TaskKind::HealthTimer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = TaskScheduler::new(tx.downgrade());
        let id = SessionId::from("sock-b");

        scheduler.schedule(&id, TaskKind::IceRestart, Duration::from_secs(2), "");
        assert!(scheduler.recovery_pending(&id));
        assert!(scheduler.cancel(&id, TaskKind::IceRestart));

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_makes_old_firing_stale() {
        let (tx, _rx) = mpsc::channel(8);
        let mut scheduler = TaskScheduler::new(tx.downgrade());
        let id = SessionId::from("sock-b");

        scheduler.schedule(&id, TaskKind::Recreate, Duration::from_secs(1), "a");
        scheduler.schedule(&id, TaskKind::Recreate, Duration::from_secs(1), "b");
        // First arm had timer id 1.
        assert!(scheduler.take_if_current(&id, TaskKind::Recreate, 1).is_none());
        assert_eq!(
            scheduler.take_if_current(&id, TaskKind::Recreate, 2),
            Some("b")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_for_is_scoped() {
        let (tx, _rx) = mpsc::channel(8);
        let mut scheduler = TaskScheduler::new(tx.downgrade());
        let b = SessionId::from("sock-b");
        let c = SessionId::from("sock-c");

        scheduler.schedule(&b, TaskKind::HealthTimer, Duration::from_secs(5), "");
        scheduler.schedule(&b, TaskKind::IceRestart, Duration::from_secs(2), "");
        scheduler.schedule(&c, TaskKind::HealthTimer, Duration::from_secs(5), "");

        scheduler.cancel_all_for(&b);
        assert!(!scheduler.recovery_pending(&b));
        assert!(scheduler.is_pending(&c, TaskKind::HealthTimer));
        assert_eq!(scheduler.len(), 1);
    }
}
