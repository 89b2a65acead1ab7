use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use rodio::{source::SineWave, Decoder, OutputStream, OutputStreamBuilder, Sink, Source};

use crate::{
    alarm::Alarm,
    communication::{Message, MessageType},
    error::{Error, Result},
    sounds::SoundLibrary,
};

/// how long a ringtone preview plays for
pub const PREVIEW_LENGTH: Duration = Duration::from_secs(2);

/// Something that can make an alarm audible. None of these calls wait for the
/// sound to finish, and none of them fail because of the audio device.
pub trait Notifier: Send + Sync {
    /// start ringing for `alarm` until stopped
    fn play(&self, alarm: &Alarm);

    fn stop(&self, alarm_id: u64);

    fn stop_all(&self);

    /// Play a ringtone (or the default one) once.
    ///
    /// # Errors
    /// `Error::Playback` if there is no such ringtone
    fn preview(&self, sound: Option<&str>) -> Result<()>;

    /// ids of the alarms currently ringing
    fn ringing(&self) -> Vec<u64>;
}

type Ringing = Arc<Mutex<BTreeSet<u64>>>;

fn lock_ringing(ringing: &Mutex<BTreeSet<u64>>) -> MutexGuard<'_, BTreeSet<u64>> {
    ringing.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Notifier`] that hands playback to a dedicated audio thread.
#[derive(Debug)]
pub struct AudioNotifier {
    sender: Sender<Message>,
    sounds: SoundLibrary,
    /// shared with the audio thread, which drops alarms it couldn't play
    ringing: Ringing,
}

impl AudioNotifier {
    /// Start the audio thread. The audio device is opened lazily by that
    /// thread, so a missing device only shows up in the log.
    #[must_use]
    pub fn spawn(sounds: SoundLibrary) -> Self {
        let (sender, receiver) = mpsc::channel();
        let notifier = Self::with_sender(sender, sounds);
        let ringing = notifier.ringing.clone();
        if let Err(e) = thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || AudioWorker::new(ringing, default_output()).run(&receiver))
        {
            error!("couldn't start the audio thread, alarms will be silent: {e}");
        }
        notifier
    }

    pub(crate) fn with_sender(sender: Sender<Message>, sounds: SoundLibrary) -> Self {
        Self {
            sender,
            sounds,
            ringing: Arc::default(),
        }
    }

    fn send(&self, kind: MessageType, alarm_id: u64) {
        if self.sender.send(Message::new(kind, alarm_id)).is_err() {
            error!("audio thread is gone, dropping request for alarm {alarm_id}");
        }
    }

    fn ringing_set(&self) -> MutexGuard<'_, BTreeSet<u64>> {
        lock_ringing(&self.ringing)
    }
}

impl Notifier for AudioNotifier {
    fn play(&self, alarm: &Alarm) {
        let sound_path = self.sounds.resolve_or_default(alarm.sound.as_deref());
        if sound_path.is_none() {
            warn!(
                "no ringtone found for alarm {alarm} (looked for {:?} and {} in {}), using the built-in beep",
                alarm.sound,
                self.sounds.default_sound(),
                self.sounds.dir().display()
            );
        }
        self.ringing_set().insert(alarm.id);
        self.send(
            MessageType::AlarmTriggered {
                volume: alarm.volume,
                sound_path,
            },
            alarm.id,
        );
    }

    fn stop(&self, alarm_id: u64) {
        if self.ringing_set().remove(&alarm_id) {
            self.send(MessageType::AlarmStopped, alarm_id);
        }
    }

    fn stop_all(&self) {
        self.ringing_set().clear();
        self.send(MessageType::StopAll, 0);
    }

    fn preview(&self, sound: Option<&str>) -> Result<()> {
        let sound_path = match sound {
            Some(sound) => self.sounds.resolve(sound),
            None => self.sounds.resolve(self.sounds.default_sound()),
        }
        .ok_or_else(|| {
            Error::Playback(format!(
                "no ringtone {} in {}",
                sound.unwrap_or_else(|| self.sounds.default_sound()),
                self.sounds.dir().display()
            ))
        })?;
        self.send(
            MessageType::Preview {
                volume: 100.0,
                sound_path,
            },
            0,
        );
        Ok(())
    }

    fn ringing(&self) -> Vec<u64> {
        self.ringing_set().iter().copied().collect()
    }
}

/// hands out sinks connected to wherever the sound goes
type Output = Box<dyn FnMut() -> Result<Sink>>;

/// Sinks on the default audio device, which is opened on first use. A failed
/// open is retried with the next sink.
fn default_output() -> Output {
    let mut device: Option<OutputStream> = None;
    Box::new(move || -> Result<Sink> {
        let stream = match device.take() {
            Some(stream) => stream,
            None => OutputStreamBuilder::open_default_stream()
                .map_err(|e| Error::Playback(format!("audio device unavailable: {e}")))?,
        };
        let sink = Sink::connect_new(stream.mixer());
        device = Some(stream);
        Ok(sink)
    })
}

/// what an alarm rings with
enum Ringtone {
    File(Decoder<BufReader<File>>),
    Beep,
}

impl Ringtone {
    /// The ringtone at `path`, or the beep when there is none or it can't be decoded.
    fn open(path: Option<&Path>) -> Self {
        match path.map(open_sound) {
            Some(Ok(decoder)) => Self::File(decoder),
            Some(Err(e)) => {
                warn!("{e}, using the built-in beep");
                Self::Beep
            }
            None => Self::Beep,
        }
    }

    /// loops until the sink is stopped
    fn looped(self) -> Box<dyn Source + Send> {
        match self {
            Self::File(decoder) => Box::new(decoder.repeat_infinite()),
            Self::Beep => Box::new(beep()),
        }
    }
}

/// owns the output and one sink per ringing alarm
struct AudioWorker {
    output: Output,
    ringing: Ringing,
    sinks: HashMap<u64, Sink>,
    preview: Option<Sink>,
}

impl AudioWorker {
    fn new(ringing: Ringing, output: Output) -> Self {
        Self {
            output,
            ringing,
            sinks: HashMap::new(),
            preview: None,
        }
    }

    fn run(mut self, receiver: &Receiver<Message>) {
        while let Ok(message) = receiver.recv() {
            if let Err(e) = self.handle(message) {
                error!("{e}");
            }
        }
        debug!("audio thread stopped");
    }

    fn handle(&mut self, Message { kind, alarm_id }: Message) -> Result<()> {
        match kind {
            MessageType::AlarmTriggered { volume, sound_path } => {
                let sink = match (self.output)() {
                    Ok(sink) => sink,
                    Err(e) => {
                        // nothing is audible, so it isn't ringing
                        lock_ringing(&self.ringing).remove(&alarm_id);
                        return Err(e);
                    }
                };
                sink.set_volume(volume / 100.0);
                sink.append(Ringtone::open(sound_path.as_deref()).looped());
                sink.play();
                if let Some(old) = self.sinks.insert(alarm_id, sink) {
                    old.stop();
                }
                info!("alarm {alarm_id} ringing with volume {volume}");
            }
            MessageType::AlarmStopped => {
                if let Some(sink) = self.sinks.remove(&alarm_id) {
                    sink.stop();
                    info!("alarm {alarm_id} stopped");
                }
            }
            MessageType::StopAll => {
                for (id, sink) in self.sinks.drain() {
                    sink.stop();
                    info!("alarm {id} stopped");
                }
                if let Some(preview) = self.preview.take() {
                    preview.stop();
                }
            }
            MessageType::Preview { volume, sound_path } => {
                let source = open_sound(&sound_path)?;
                let sink = (self.output)()?;
                sink.set_volume(volume / 100.0);
                sink.append(source.take_duration(PREVIEW_LENGTH));
                sink.play();
                if let Some(old) = self.preview.replace(sink) {
                    old.stop();
                }
                info!("previewing {}", sound_path.display());
            }
        }
        Ok(())
    }
}

fn open_sound(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        Error::Playback(format!("couldn't open sound file {}: {e}", path.display()))
    })?;
    Decoder::new(BufReader::new(file))
        .map_err(|e| Error::Playback(format!("couldn't decode {}: {e}", path.display())))
}

/// beep-beep pattern used when there is no ringtone file
fn beep() -> impl Source + Send + 'static {
    SineWave::new(880.0)
        .take_duration(Duration::from_millis(300))
        .amplify(0.4)
        .delay(Duration::from_millis(300))
        .repeat_infinite()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmBuilder;
    use tempfile::TempDir;

    fn notifier(dir: &TempDir) -> (AudioNotifier, Receiver<Message>) {
        std::fs::write(dir.path().join("rain.mp3"), b"").unwrap();
        let (sender, receiver) = mpsc::channel();
        let sounds = SoundLibrary::new(dir.path(), "rain.mp3");
        (AudioNotifier::with_sender(sender, sounds), receiver)
    }

    fn alarm(id: u64, sound: Option<&str>) -> Alarm {
        AlarmBuilder::new(7, 30, None)
            .sound(sound.map(str::to_string))
            .volume(50.0)
            .build(id)
            .unwrap()
    }

    #[test]
    fn play_sends_resolved_sound_without_blocking() {
        let dir = TempDir::new().unwrap();
        let (notifier, receiver) = notifier(&dir);
        notifier.play(&alarm(3, None));

        let message = receiver.try_recv().unwrap();
        assert_eq!(message.alarm_id, 3);
        assert_eq!(
            message.kind,
            MessageType::AlarmTriggered {
                volume: 50.0,
                sound_path: Some(dir.path().join("rain.mp3")),
            }
        );
        assert_eq!(notifier.ringing(), vec![3]);
    }

    #[test]
    fn play_without_any_ringtone_uses_beep() {
        let dir = TempDir::new().unwrap();
        let (sender, receiver) = mpsc::channel();
        let notifier = AudioNotifier::with_sender(sender, SoundLibrary::new(dir.path(), "x.mp3"));
        notifier.play(&alarm(1, Some("missing.wav")));
        assert!(matches!(
            receiver.try_recv().unwrap().kind,
            MessageType::AlarmTriggered {
                sound_path: None,
                ..
            }
        ));
    }

    #[test]
    fn stop_only_messages_ringing_alarms() {
        let dir = TempDir::new().unwrap();
        let (notifier, receiver) = notifier(&dir);
        notifier.stop(9);
        assert!(receiver.try_recv().is_err());

        notifier.play(&alarm(9, None));
        notifier.play(&alarm(10, None));
        notifier.stop(9);
        let kinds: Vec<_> = receiver.try_iter().map(|m| (m.alarm_id, m.kind)).collect();
        assert_eq!(kinds.last(), Some(&(9, MessageType::AlarmStopped)));
        assert_eq!(notifier.ringing(), vec![10]);

        notifier.stop_all();
        assert_eq!(receiver.try_recv().unwrap().kind, MessageType::StopAll);
        assert!(notifier.ringing().is_empty());
    }

    #[test]
    fn preview_checks_the_ringtone_exists() {
        let dir = TempDir::new().unwrap();
        let (notifier, receiver) = notifier(&dir);
        assert!(matches!(
            notifier.preview(Some("missing.mp3")),
            Err(Error::Playback(_))
        ));
        assert!(receiver.try_recv().is_err());

        notifier.preview(None).unwrap();
        assert_eq!(
            receiver.try_recv().unwrap().kind,
            MessageType::Preview {
                volume: 100.0,
                sound_path: dir.path().join("rain.mp3"),
            }
        );
    }

    #[test]
    fn dead_audio_thread_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let (notifier, receiver) = notifier(&dir);
        drop(receiver);
        notifier.play(&alarm(1, None));
        notifier.stop_all();
    }

    /// sinks that aren't connected to any device
    fn silent_output() -> Output {
        Box::new(|| -> Result<Sink> { Ok(Sink::new().0) })
    }

    fn no_device() -> Output {
        Box::new(|| -> Result<Sink> {
            Err(Error::Playback("audio device unavailable".to_string()))
        })
    }

    fn triggered(alarm_id: u64, sound_path: Option<&Path>) -> Message {
        Message::new(
            MessageType::AlarmTriggered {
                volume: 80.0,
                sound_path: sound_path.map(Path::to_path_buf),
            },
            alarm_id,
        )
    }

    #[test]
    fn unplayable_alarm_is_not_left_ringing() {
        let ringing = Ringing::default();
        lock_ringing(&ringing).extend([7, 8]);
        let mut worker = AudioWorker::new(ringing.clone(), no_device());
        assert!(matches!(
            worker.handle(triggered(7, None)),
            Err(Error::Playback(_))
        ));
        assert_eq!(*lock_ringing(&ringing), BTreeSet::from([8]));
        assert!(worker.sinks.is_empty());
    }

    #[test]
    fn undecodable_ringtone_falls_back_to_beep() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("broken.mp3");
        std::fs::write(&garbage, b"definitely not audio").unwrap();
        assert!(matches!(Ringtone::open(Some(garbage.as_path())), Ringtone::Beep));
        assert!(matches!(
            Ringtone::open(Some(dir.path().join("gone.wav").as_path())),
            Ringtone::Beep
        ));
        assert!(matches!(Ringtone::open(None), Ringtone::Beep));

        let mut worker = AudioWorker::new(Ringing::default(), silent_output());
        worker.handle(triggered(1, Some(garbage.as_path()))).unwrap();
        assert!(worker.sinks.contains_key(&1));
    }

    #[test]
    fn stop_all_also_stops_the_preview() {
        let mut worker = AudioWorker::new(Ringing::default(), silent_output());
        worker.handle(triggered(1, None)).unwrap();
        worker.handle(triggered(2, None)).unwrap();
        worker.preview = Some(Sink::new().0);

        worker
            .handle(Message::new(MessageType::AlarmStopped, 1))
            .unwrap();
        assert_eq!(worker.sinks.keys().copied().collect::<Vec<_>>(), vec![2]);

        worker.handle(Message::new(MessageType::StopAll, 0)).unwrap();
        assert!(worker.sinks.is_empty());
        assert!(worker.preview.is_none());
    }

    #[test]
    fn preview_of_undecodable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("broken.wav");
        std::fs::write(&garbage, b"RIFF").unwrap();
        let mut worker = AudioWorker::new(Ringing::default(), silent_output());
        let preview = Message::new(
            MessageType::Preview {
                volume: 100.0,
                sound_path: garbage,
            },
            0,
        );
        assert!(matches!(worker.handle(preview), Err(Error::Playback(_))));
        assert!(worker.preview.is_none());
    }
}
