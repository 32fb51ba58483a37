//! Periodic flush scheduling.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running timer created by [`PeriodicTimer::start`]. Stopping (or
/// dropping) it cancels future ticks; a tick already in progress is
/// allowed to finish.
pub trait TimerHandle: Send {
    fn stop(&mut self);
}

/// Schedules a callback at a fixed interval.
///
/// The client uses one timer to drive all three aggregators' `flush`
/// methods. Implementations only need approximate cadence; a late tick
/// delays eviction, it never corrupts state.
pub trait PeriodicTimer: Send + Sync {
    fn start(&self, interval: Duration, tick: Arc<dyn Fn() + Send + Sync>) -> Box<dyn TimerHandle>;
}

/// Timer backed by a spawned tokio task.
///
/// Must be started from within a tokio runtime; the task is aborted when
/// the handle stops or drops.
pub struct TokioTimer;

impl PeriodicTimer for TokioTimer {
    fn start(&self, interval: Duration, tick: Arc<dyn Fn() + Send + Sync>) -> Box<dyn TimerHandle> {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately;
            // swallow it so callbacks start one interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tick();
            }
        });
        Box::new(TokioTimerHandle { task })
    }
}

struct TokioTimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle for TokioTimerHandle {
    fn stop(&mut self) {
        self.task.abort();
    }
}

impl Drop for TokioTimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
