use crate::error::EngineError;
use chrono::Utc;
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::Notify;
use tracing::{debug, error, info};
use veloz_integration::queue::{BoundedQueue, QueueFull};

/// A unit of work enqueued onto the loop from any thread.
pub type Task = Box<dyn FnOnce() -> Result<(), EngineError> + Send>;

/// A timer callback, invoked on the loop thread with the current time.
pub type TimerFn = Box<dyn FnMut(chrono::DateTime<Utc>) -> Result<(), EngineError> + Send>;

/// Default cross-thread task queue capacity; submitters receive `QueueFull` beyond it and
/// are expected to shed load.
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 16 * 1024;

enum TimerKind {
    OneShot(Option<TimerFn>),
    Periodic { period: Duration, callback: TimerFn },
}

struct Timer {
    deadline: Instant,
    id: u64,
    kind: TimerKind,
}

// Heap ordering by (deadline, id); callbacks are opaque to the ordering.
impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Timer {}
impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.cmp(&other.id))
    }
}

/// Cloneable cross-thread handle to a running [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tasks: BoundedQueue<Task>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("notify", &self.notify)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

impl LoopHandle {
    /// Enqueue a unit of work to run on the loop thread. Safe from any thread.
    ///
    /// FIFO per submitting thread; no cross-thread ordering guarantee. Returns the task
    /// back inside [`QueueFull`] when the loop is saturated.
    pub fn submit_task<F>(&self, task: F) -> Result<(), QueueFull<Task>>
    where
        F: FnOnce() -> Result<(), EngineError> + Send + 'static,
    {
        self.tasks.push(Box::new(task))?;
        self.notify.notify_one();
        Ok(())
    }

    /// Request the loop stop after its current iteration.
    ///
    /// Only touches an atomic flag and a wake-up, so it is safe from a signal handler.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Single-threaded cooperative scheduler.
///
/// Owns a monotonic timer wheel and a cross-thread wake-up channel. All engine state is
/// touched only from the thread running [`EventLoop::run`]; other threads communicate
/// exclusively through [`LoopHandle::submit_task`].
///
/// Handlers that fail (the `Result`-typed return) are reported through the error sink and
/// the loop continues; panics propagate and terminate the run.
pub struct EventLoop {
    handle: LoopHandle,
    timers: BinaryHeap<Reverse<Timer>>,
    next_timer_id: u64,
    error_sink: Box<dyn FnMut(EngineError) + Send>,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("timers", &self.timers.len())
            .field("pending_tasks", &self.handle.tasks.len())
            .finish()
    }
}

impl EventLoop {
    pub fn new(error_sink: Box<dyn FnMut(EngineError) + Send>) -> Self {
        Self::with_capacity(DEFAULT_TASK_QUEUE_CAPACITY, error_sink)
    }

    pub fn with_capacity(capacity: usize, error_sink: Box<dyn FnMut(EngineError) + Send>) -> Self {
        Self {
            handle: LoopHandle {
                tasks: BoundedQueue::new(capacity),
                notify: Arc::new(Notify::new()),
                stop: Arc::new(AtomicBool::new(false)),
            },
            timers: BinaryHeap::new(),
            next_timer_id: 0,
            error_sink,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Schedule a one-shot timer. Guaranteed not to fire before `delay` elapses; may fire
    /// later under load.
    pub fn after<F>(&mut self, delay: Duration, callback: F)
    where
        F: FnOnce(chrono::DateTime<Utc>) -> Result<(), EngineError> + Send + 'static,
    {
        let id = self.next_timer_id;
        self.next_timer_id += 1;

        let mut callback = Some(callback);
        self.timers.push(Reverse(Timer {
            deadline: Instant::now() + delay,
            id,
            kind: TimerKind::OneShot(Some(Box::new(move |now| {
                match callback.take() {
                    Some(callback) => callback(now),
                    None => Ok(()),
                }
            }))),
        }));
    }

    /// Schedule a periodic timer. On overrun, missed ticks coalesce into a single delivery
    /// carrying the current time.
    pub fn every<F>(&mut self, period: Duration, callback: F)
    where
        F: FnMut(chrono::DateTime<Utc>) -> Result<(), EngineError> + Send + 'static,
    {
        let id = self.next_timer_id;
        self.next_timer_id += 1;

        self.timers.push(Reverse(Timer {
            deadline: Instant::now() + period,
            id,
            kind: TimerKind::Periodic {
                period,
                callback: Box::new(callback),
            },
        }));
    }

    /// Run until [`LoopHandle::stop`].
    ///
    /// Suspension points are exactly: cross-thread wake-up, and the next timer deadline.
    pub async fn run(&mut self) {
        info!("event loop running");

        loop {
            if self.handle.is_stopped() {
                break;
            }

            self.drain_tasks();
            self.fire_due_timers();

            if self.handle.is_stopped() {
                break;
            }

            match self.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.handle.notify.notified() => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                    }
                }
                None => self.handle.notify.notified().await,
            }
        }

        // Final drain so submitters racing the stop flag are not silently dropped
        self.drain_tasks();
        info!("event loop stopped");
    }

    fn drain_tasks(&mut self) {
        while let Some(task) = self.handle.tasks.try_pop() {
            if let Err(error) = task() {
                error!(?error, "loop task failed");
                (self.error_sink)(error);
            }
        }
    }

    fn fire_due_timers(&mut self) {
        let now_instant = Instant::now();
        let now = Utc::now();

        while let Some(Reverse(timer)) = self.timers.peek() {
            if timer.deadline > now_instant {
                break;
            }

            let Reverse(mut timer) = self.timers.pop().expect("peeked timer exists");
            match &mut timer.kind {
                TimerKind::OneShot(callback) => {
                    if let Some(mut callback) = callback.take() {
                        if let Err(error) = callback(now) {
                            error!(?error, "one-shot timer failed");
                            (self.error_sink)(error);
                        }
                    }
                }
                TimerKind::Periodic { period, callback } => {
                    if let Err(error) = callback(now) {
                        error!(?error, "periodic timer failed");
                        (self.error_sink)(error);
                    }
                    // Coalesce overruns: next tick is measured from now, so a stalled
                    // loop delivers one catch-up tick rather than a burst
                    let period = *period;
                    debug!(timer = timer.id, ?period, "periodic timer rescheduled");
                    timer.deadline = now_instant + period;
                    self.timers.push(Reverse(timer));
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(timer)| timer.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn noop_sink() -> Box<dyn FnMut(EngineError) + Send> {
        Box::new(|_| {})
    }

    #[tokio::test]
    async fn test_submitted_tasks_run_and_stop_works() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut event_loop = EventLoop::new(noop_sink());
        let handle = event_loop.handle();

        for value in 0..3 {
            let log = Arc::clone(&log);
            handle
                .submit_task(move || {
                    log.lock().unwrap().push(value);
                    Ok(())
                })
                .unwrap();
        }

        let stopper = event_loop.handle();
        handle
            .submit_task(move || {
                stopper.stop();
                Ok(())
            })
            .unwrap();

        event_loop.run().await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failing_task_reports_and_loop_continues() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_sink = Arc::clone(&errors);
        let mut event_loop = EventLoop::new(Box::new(move |error| {
            errors_sink.lock().unwrap().push(error);
        }));
        let handle = event_loop.handle();

        handle
            .submit_task(|| Err(EngineError::Recoverable("boom".into())))
            .unwrap();

        let ran_after_failure = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_after_failure);
        let stopper = event_loop.handle();
        handle
            .submit_task(move || {
                flag.store(true, Ordering::SeqCst);
                stopper.stop();
                Ok(())
            })
            .unwrap();

        event_loop.run().await;

        assert!(ran_after_failure.load(Ordering::SeqCst));
        assert_eq!(
            *errors.lock().unwrap(),
            vec![EngineError::Recoverable("boom".into())]
        );
    }

    #[tokio::test]
    async fn test_one_shot_timer_not_early() {
        let mut event_loop = EventLoop::new(noop_sink());
        let fired = Arc::new(Mutex::new(None));

        let scheduled = Instant::now();
        let fired_at = Arc::clone(&fired);
        let stopper = event_loop.handle();
        event_loop.after(Duration::from_millis(20), move |_now| {
            *fired_at.lock().unwrap() = Some(Instant::now());
            stopper.stop();
            Ok(())
        });

        event_loop.run().await;

        let fired_at = fired.lock().unwrap().expect("timer fired");
        assert!(fired_at.duration_since(scheduled) >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_periodic_timer_repeats() {
        let mut event_loop = EventLoop::new(noop_sink());
        let ticks = Arc::new(Mutex::new(0u32));

        let counter = Arc::clone(&ticks);
        let stopper = event_loop.handle();
        event_loop.every(Duration::from_millis(5), move |_now| {
            let mut count = counter.lock().unwrap();
            *count += 1;
            if *count >= 3 {
                stopper.stop();
            }
            Ok(())
        });

        event_loop.run().await;
        assert_eq!(*ticks.lock().unwrap(), 3);
    }
}
