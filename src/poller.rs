use std::{
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, error, info, trace};

use crate::{config::Recurrence, notifier::Notifier, store::AlarmStore};

/// where the poller gets the current local time from
pub trait TimeSource: Send {
    fn now(&self) -> NaiveDateTime;
}

/// the system's local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl TimeSource for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Compares the time against the stored alarms and rings the ones that are due.
pub struct Poller {
    store: Arc<AlarmStore>,
    notifier: Arc<dyn Notifier>,
    recurrence: Recurrence,
    today: Option<NaiveDate>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("store", &self.store.path())
            .field("recurrence", &self.recurrence)
            .field("today", &self.today)
            .finish_non_exhaustive()
    }
}

impl Poller {
    #[must_use]
    pub fn new(
        store: Arc<AlarmStore>,
        notifier: Arc<dyn Notifier>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            store,
            notifier,
            recurrence,
            today: None,
        }
    }

    /// One comparison pass at `now`. Returns how many alarms started ringing.
    pub fn tick(&mut self, now: NaiveDateTime) -> usize {
        let date = now.date();
        if self.today.is_some_and(|today| today != date) {
            info!("new day {date}, alarms may ring again");
            self.store.reset_triggered();
        }
        self.today = Some(date);

        let fired = self.store.fire_due(now.time());
        for alarm in &fired {
            info!("alarm {alarm} is due at {now}");
            self.notifier.play(alarm);
            if self.recurrence == Recurrence::Once {
                if let Err(e) = self.store.set_enabled(alarm.id, false) {
                    error!("couldn't disable one-shot alarm {}: {e}", alarm.id);
                }
            }
        }
        trace!("checked alarms at {now}, {} fired", fired.len());
        fired.len()
    }

    /// Run [`Self::tick`] every `interval` on a new thread until the handle is stopped.
    ///
    /// # Errors
    /// if the thread can't be spawned
    pub fn spawn(
        mut self,
        clock: impl TimeSource + 'static,
        interval: Duration,
    ) -> std::io::Result<PollerHandle> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("poller".to_string())
            .spawn(move || {
                debug!("poller started, checking every {interval:?}");
                loop {
                    self.tick(clock.now());
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("poller stopped");
            })?;
        Ok(PollerHandle { stop, thread })
    }
}

/// Stops the poller thread when asked to (or when dropped).
#[derive(Debug)]
pub struct PollerHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl PollerHandle {
    /// signal the poller and wait for its current pass to finish
    pub fn stop(self) {
        // a send error means the thread is already gone
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            error!("poller thread panicked");
        }
    }
}
