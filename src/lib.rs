#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(
    clippy::use_self,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::missing_panics_doc
)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! A small alarm clock: alarms are kept in a file, a poller thread checks them
//! every second and rings the due ones through the audio thread.

pub mod alarm;
pub mod communication;
pub mod config;
pub mod error;
pub mod io;
pub mod notifier;
pub mod poller;
pub mod sounds;
pub mod store;
pub mod web;

pub use alarm::{Alarm, AlarmBuilder, TimeOfDay};
pub use config::{Config, Recurrence};
pub use error::{Error, Result};
pub use notifier::{AudioNotifier, Notifier};
pub use poller::{LocalClock, Poller, PollerHandle, TimeSource};
pub use sounds::{Sound, SoundLibrary};
pub use store::AlarmStore;
