//! Timer seam for the live session.
//!
//! The session never sleeps. It asks a [`Scheduler`] to deliver a [`Timer`]
//! after a delay and receives it back through `LiveStreamSession::on_timer`.
//! Every timer carries the session epoch it was armed in, so a timer that
//! outlives its generation is recognised and dropped.

use futures::future::poll_fn;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::time::{delay_queue, DelayQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// No frame or status arrived in time after `start_camera`.
    ConnectTimeout,
    /// Fixed-delay reconnect attempt.
    Reconnect,
    /// Grace period after `stop_camera` during a camera switch.
    SwitchGrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer {
    pub kind: TimerKind,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

pub trait Scheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) -> TimerId;

    /// Cancelling an unknown or already fired timer is a no-op.
    fn cancel(&mut self, id: TimerId);

    fn pending(&self) -> usize;
}

// ============================================================================
// Tokio scheduler
// ============================================================================

/// Production scheduler backed by a `DelayQueue`. Dropping it drops every
/// pending timer.
pub struct DelayQueueScheduler {
    queue: DelayQueue<(TimerId, Timer)>,
    keys: HashMap<TimerId, delay_queue::Key>,
    next_id: u64,
}

impl Default for DelayQueueScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayQueueScheduler {
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
            next_id: 0,
        }
    }

    /// Waits for the next expired timer. Returns `None` immediately when
    /// nothing is scheduled, so callers must guard on [`Scheduler::pending`].
    pub async fn next_expired(&mut self) -> Option<Timer> {
        let expired = poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let (id, timer) = expired.into_inner();
        self.keys.remove(&id);
        Some(timer)
    }
}

impl Scheduler for DelayQueueScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let key = self.queue.insert((id, timer), delay);
        self.keys.insert(id, key);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(key) = self.keys.remove(&id) {
            self.queue.try_remove(&key);
        }
    }

    fn pending(&self) -> usize {
        self.keys.len()
    }
}

// ============================================================================
// Manual scheduler
// ============================================================================

/// Deterministic scheduler driven by a virtual clock. Used by tests to step
/// through retry and timeout paths without sleeping.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    next_id: u64,
    entries: Vec<ManualEntry>,
}

#[derive(Debug, Clone, Copy)]
struct ManualEntry {
    id: TimerId,
    deadline: Duration,
    timer: Timer,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Moves the clock forward and returns the timers that became due,
    /// earliest deadline first.
    pub fn advance(&mut self, by: Duration) -> Vec<Timer> {
        self.now += by;
        let now = self.now;

        let mut due: Vec<ManualEntry> = Vec::new();
        self.entries.retain(|entry| {
            if entry.deadline <= now {
                due.push(*entry);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|entry| (entry.deadline, entry.id.0));
        due.into_iter().map(|entry| entry.timer).collect()
    }

    /// Pending timers of the given kind, with their remaining delay.
    pub fn scheduled(&self, kind: TimerKind) -> Vec<(Timer, Duration)> {
        self.entries
            .iter()
            .filter(|entry| entry.timer.kind == kind)
            .map(|entry| (entry.timer, entry.deadline - self.now))
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.entries.push(ManualEntry {
            id,
            deadline: self.now + delay,
            timer,
        });
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.entries.retain(|entry| entry.id != id);
    }

    fn pending(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(kind: TimerKind, epoch: u64) -> Timer {
        Timer { kind, epoch }
    }

    #[test]
    fn test_manual_scheduler_orders_by_deadline() {
        let mut scheduler = ManualScheduler::new();
        scheduler.schedule(timer(TimerKind::Reconnect, 1), Duration::from_secs(2));
        scheduler.schedule(timer(TimerKind::ConnectTimeout, 1), Duration::from_secs(1));

        assert!(scheduler.advance(Duration::from_millis(500)).is_empty());
        let due = scheduler.advance(Duration::from_secs(2));
        assert_eq!(
            due,
            vec![
                timer(TimerKind::ConnectTimeout, 1),
                timer(TimerKind::Reconnect, 1)
            ]
        );
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let mut scheduler = ManualScheduler::new();
        let id = scheduler.schedule(timer(TimerKind::Reconnect, 3), Duration::from_secs(2));
        scheduler.cancel(id);
        scheduler.cancel(id);
        assert!(scheduler.advance(Duration::from_secs(5)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_queue_scheduler_fires_and_cancels() {
        let mut scheduler = DelayQueueScheduler::new();
        let cancelled = scheduler.schedule(timer(TimerKind::ConnectTimeout, 1), Duration::from_millis(50));
        scheduler.schedule(timer(TimerKind::Reconnect, 1), Duration::from_millis(100));
        scheduler.cancel(cancelled);
        assert_eq!(scheduler.pending(), 1);

        let fired = scheduler.next_expired().await;
        assert_eq!(fired, Some(timer(TimerKind::Reconnect, 1)));
        assert_eq!(scheduler.pending(), 0);
    }
}
