use std::fmt;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info};

use super::driver::Periodic;

/// Name prefix of every timer thread. Thread dumps skip threads carrying it.
///
/// Kept within the 15 characters Linux preserves in `comm`.
pub const THREAD_NAME_PREFIX: &str = "profd-sampling";

pub type TimerThread = JoinHandle<Option<Box<dyn Periodic>>>;
pub type TimerBody = Box<dyn FnOnce() -> Option<Box<dyn Periodic>> + Send>;

/// Spawns the thread of one timer.
pub type Spawner = fn(thread::Builder, TimerBody) -> io::Result<TimerThread>;

fn spawn_thread(builder: thread::Builder, body: TimerBody) -> io::Result<TimerThread> {
    builder.spawn(body)
}

/// A timer that could not be started. The driver comes back untouched so the
/// caller can still stop it.
pub struct ScheduleError {
    pub error: io::Error,
    pub driver: Box<dyn Periodic>,
}

impl fmt::Debug for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleError")
            .field("error", &self.error)
            .field("driver", &self.driver.name())
            .finish()
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: cannot start timer: {}", self.driver.name(), self.error)
    }
}

impl std::error::Error for ScheduleError {}

/// A running timer. The driver lives on the timer thread and is handed back
/// when the timer is cancelled.
pub struct TimerHandle {
    name: String,
    cancel: Sender<()>,
    thread: TimerThread,
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and waits for an in-flight tick to finish.
    ///
    /// Returns the driver, or `None` if the timer thread died.
    pub fn cancel(self) -> Option<Box<dyn Periodic>> {
        drop(self.cancel);
        join(&self.name, self.thread)
    }
}

fn join(name: &str, thread: TimerThread) -> Option<Box<dyn Periodic>> {
    match thread.join() {
        Ok(driver) => driver,
        Err(_) => {
            error!("{}: timer thread panicked", name);
            None
        }
    }
}

/// Runs `driver` at a fixed rate on a dedicated thread, first tick immediately.
pub fn schedule(driver: Box<dyn Periodic>) -> Result<TimerHandle, ScheduleError> {
    schedule_with(spawn_thread, driver)
}

fn schedule_with(
    spawn: Spawner,
    driver: Box<dyn Periodic>,
) -> Result<TimerHandle, ScheduleError> {
    let name = driver.name().to_string();
    let (cancel, cancelled) = mpsc::channel();
    // The driver only moves to the thread once it exists.
    let (handoff, received) = mpsc::channel::<Box<dyn Periodic>>();
    let builder = thread::Builder::new().name(format!("{}-{}", THREAD_NAME_PREFIX, name));
    let body: TimerBody = Box::new(move || received.recv().ok().map(|d| run(d, cancelled)));

    let thread = match spawn(builder, body) {
        Ok(thread) => thread,
        Err(error) => return Err(ScheduleError { error, driver }),
    };
    if let Err(mpsc::SendError(driver)) = handoff.send(driver) {
        join(&name, thread);
        return Err(ScheduleError {
            error: io::Error::other("timer thread exited before receiving its driver"),
            driver,
        });
    }
    Ok(TimerHandle {
        name,
        cancel,
        thread,
    })
}

/// Fixed-rate loop. A late tick is followed immediately by the next one, so
/// the number of ticks tracks elapsed time; ticks never overlap.
fn run(mut driver: Box<dyn Periodic>, cancelled: Receiver<()>) -> Box<dyn Periodic> {
    let interval = driver.interval();
    let mut next = Instant::now();
    loop {
        driver.tick();
        next += interval;

        let now = Instant::now();
        let wait = if next > now {
            cancelled.recv_timeout(next - now)
        } else {
            cancelled.try_recv().map_err(|e| match e {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            })
        };
        match wait {
            Err(RecvTimeoutError::Timeout) => continue,
            // cancelled or sender dropped
            _ => break,
        }
    }
    debug!("{}: timer stopped", driver.name());
    driver
}

/// All timers of one agent.
pub struct Scheduler {
    timers: Vec<TimerHandle>,
    spawn: Spawner,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::with_spawner(spawn_thread)
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler that starts its timer threads through `spawn`.
    pub fn with_spawner(spawn: Spawner) -> Self {
        Self {
            timers: Vec::new(),
            spawn,
        }
    }

    pub fn schedule(&mut self, driver: Box<dyn Periodic>) -> Result<(), ScheduleError> {
        let interval = driver.interval();
        let timer = schedule_with(self.spawn, driver)?;
        info!("{}: scheduled every {:?}", timer.name(), interval);
        self.timers.push(timer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancels every timer and returns the drivers in scheduling order.
    /// When this returns no tick is running anywhere.
    pub fn cancel_all(&mut self) -> Vec<Box<dyn Periodic>> {
        // Signal everyone first so the joins do not add up.
        let timers: Vec<(String, TimerThread)> = self
            .timers
            .drain(..)
            .map(|t| {
                drop(t.cancel);
                (t.name, t.thread)
            })
            .collect();

        timers
            .into_iter()
            .filter_map(|(name, thread)| join(&name, thread))
            .collect()
    }
}
