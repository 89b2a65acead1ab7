use std::path::PathBuf;

/// a request to the audio worker
#[derive(Debug)]
pub struct Message {
    pub kind: MessageType,
    pub alarm_id: u64,
}

impl Message {
    #[must_use]
    pub const fn new(kind: MessageType, alarm_id: u64) -> Self {
        Self { kind, alarm_id }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageType {
    /// loop the sound until stopped, `None` plays the built-in beep
    AlarmTriggered {
        volume: f32,
        sound_path: Option<PathBuf>,
    },
    // if the alarm is disabled/removed
    AlarmStopped,
    StopAll,
    /// play a sound once
    Preview { volume: f32, sound_path: PathBuf },
}
