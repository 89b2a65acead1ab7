use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use chrono::NaiveTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{Alarm, AlarmBuilder, TimeOfDay},
    error::{Error, Result},
    io,
};

/// on-disk layout of the alarm file
#[derive(Debug, Serialize, Deserialize, Default)]
struct AlarmFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    alarms: Vec<Alarm>,
}

impl AlarmFile {
    /// Read the alarm file, dropping records that are out of range or reuse an
    /// id. Anything unreadable reads as no alarms.
    fn read(path: &Path) -> Self {
        let mut file = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str::<Self>(&text).unwrap_or_else(|e| {
                warn!(
                    "alarm file {} is corrupt, starting with no alarms: {e}",
                    path.display()
                );
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no alarm file at {}", path.display());
                Self::default()
            }
            Err(e) => {
                warn!(
                    "couldn't read alarm file {}, starting with no alarms: {e}",
                    path.display()
                );
                Self::default()
            }
        };
        let mut ids = HashSet::new();
        file.alarms.retain(|alarm| {
            if let Err(e) = alarm.validate() {
                warn!("dropping alarm #{} from {}: {e}", alarm.id, path.display());
                false
            } else if !ids.insert(alarm.id) {
                warn!(
                    "dropping alarm #{} from {}: the id is already taken",
                    alarm.id,
                    path.display()
                );
                false
            } else {
                true
            }
        });
        file
    }
}

/// what the alarm file looked like when this process last read or wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}

#[derive(Debug)]
struct Inner {
    next_id: u64,
    alarms: Vec<Alarm>,
    stamp: Option<FileStamp>,
}

impl Inner {
    /// Take the alarms from `file`. Today's triggered flags carry over by id
    /// and ids handed out before stay used.
    fn replace(&mut self, file: AlarmFile) {
        let highest = file.alarms.iter().map(|a| a.id).max().unwrap_or(0);
        let mut alarms = file.alarms;
        for alarm in &mut alarms {
            alarm.triggered_today = self
                .alarms
                .iter()
                .any(|old| old.id == alarm.id && old.triggered_today);
        }
        self.next_id = self.next_id.max(file.next_id).max(highest + 1);
        self.alarms = alarms;
    }
}

/// The list of alarms, kept in insertion order and written back to `path`
/// after every change.
///
/// Other processes may edit the same file (the CLI does while `serve` runs).
/// Every operation first reloads the file if it changed since this store last
/// read or wrote it.
#[derive(Debug)]
pub struct AlarmStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl AlarmStore {
    /// Load the store from `path`. A missing file is an empty store, and so is
    /// an unreadable or corrupt one (with a warning). Records with an out of
    /// range time or a repeated id are dropped with a warning.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stamp = FileStamp::of(&path);
        let file = AlarmFile::read(&path);
        info!("loaded {} alarm(s) from {}", file.alarms.len(), path.display());
        let mut inner = Inner {
            next_id: 1,
            alarms: Vec::new(),
            stamp,
        };
        inner.replace(file);
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    /// [`Self::load`], after making sure the alarm file can be written.
    ///
    /// # Errors
    /// `Error::Persistence` if the directory of `path` can't be created or written to
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        io::ensure_writable(&path)?;
        Ok(Self::load(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the lock, after reloading the file if someone else has written it
    fn lock_fresh(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.lock();
        let stamp = FileStamp::of(&self.path);
        if stamp != inner.stamp {
            debug!("{} changed on disk, reloading", self.path.display());
            inner.stamp = stamp;
            inner.replace(AlarmFile::read(&self.path));
        }
        inner
    }

    /// # Errors
    /// `Error::Validation` for an out of range time, or the error of the save
    pub fn add(
        &self,
        hour: u8,
        minute: u8,
        time_of_day: Option<TimeOfDay>,
        label: Option<String>,
    ) -> Result<Alarm> {
        self.insert(AlarmBuilder::new(hour, minute, time_of_day).label(label))
    }

    /// Validate and append a new alarm with a fresh id.
    ///
    /// If the save fails the alarm stays in memory and the error is returned.
    ///
    /// # Errors
    /// `Error::Validation` (nothing changes), or the error of the save
    pub fn insert(&self, builder: AlarmBuilder) -> Result<Alarm> {
        builder.validate()?;
        let mut inner = self.lock_fresh();
        let alarm = builder.build(inner.next_id)?;
        inner.next_id += 1;
        inner.alarms.push(alarm.clone());
        info!("added alarm {alarm}");
        self.persist(&mut inner)?;
        Ok(alarm)
    }

    /// snapshot of every alarm in insertion order
    #[must_use]
    pub fn list(&self) -> Vec<Alarm> {
        self.lock_fresh().alarms.clone()
    }

    /// # Errors
    /// `Error::NotFound` if there is no alarm with `id`
    pub fn get(&self, id: u64) -> Result<Alarm> {
        self.lock_fresh()
            .alarms
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    /// # Errors
    /// `Error::NotFound` (nothing changes), or the error of the save
    pub fn delete(&self, id: u64) -> Result<Alarm> {
        let mut inner = self.lock_fresh();
        let index = inner
            .alarms
            .iter()
            .position(|a| a.id == id)
            .ok_or(Error::NotFound(id))?;
        let alarm = inner.alarms.remove(index);
        info!("deleted alarm {alarm}");
        self.persist(&mut inner)?;
        Ok(alarm)
    }

    /// Turning an alarm back on lets it ring again today.
    ///
    /// # Errors
    /// `Error::NotFound` (nothing changes), or the error of the save
    pub fn set_enabled(&self, id: u64, enabled: bool) -> Result<Alarm> {
        let mut inner = self.lock_fresh();
        let alarm = inner
            .alarms
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(Error::NotFound(id))?;
        if enabled && !alarm.enabled {
            alarm.triggered_today = false;
        }
        alarm.enabled = enabled;
        let alarm = alarm.clone();
        info!("{} alarm {alarm}", if enabled { "enabled" } else { "disabled" });
        self.persist(&mut inner)?;
        Ok(alarm)
    }

    /// # Errors
    /// `Error::Encode` or `Error::Persistence`
    pub fn save(&self) -> Result<()> {
        self.persist(&mut self.lock_fresh())
    }

    fn persist(&self, inner: &mut Inner) -> Result<()> {
        #[derive(Serialize)]
        struct AlarmFileRef<'a> {
            next_id: u64,
            alarms: &'a [Alarm],
        }
        let text = toml::to_string(&AlarmFileRef {
            next_id: inner.next_id,
            alarms: &inner.alarms,
        })?;
        io::atomic_write(&self.path, text.as_bytes())?;
        inner.stamp = FileStamp::of(&self.path);
        Ok(())
    }

    /// Mark every enabled alarm that is due at `now` and hasn't rung today,
    /// returning the newly marked alarms.
    #[must_use]
    pub fn fire_due(&self, now: NaiveTime) -> Vec<Alarm> {
        let mut inner = self.lock_fresh();
        let fired = inner
            .alarms
            .iter_mut()
            .filter(|a| a.enabled && !a.triggered_today && a.matches(now))
            .map(|alarm| {
                alarm.triggered_today = true;
                alarm.clone()
            })
            .collect();
        fired
    }

    /// new day: every alarm may ring again
    pub fn reset_triggered(&self) {
        for alarm in &mut self.lock().alarms {
            alarm.triggered_today = false;
        }
    }
}
