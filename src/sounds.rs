use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

/// a ringtone file
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Sound {
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// The directory ringtones are kept in, and the ringtone to use when an alarm
/// doesn't name one.
#[derive(Debug, Clone)]
pub struct SoundLibrary {
    dir: PathBuf,
    default_sound: String,
}

impl SoundLibrary {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, default_sound: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            default_sound: default_sound.into(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn default_sound(&self) -> &str {
        &self.default_sound
    }

    /// every `.mp3`/`.wav` in the sounds directory, sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<Sound> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut sounds: Vec<Sound> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_audio(path))
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(Sound { name, path })
            })
            .collect();
        sounds.sort_by(|a, b| a.name.cmp(&b.name));
        sounds
    }

    /// Find the file for a ringtone reference: an existing absolute path, or a
    /// name inside the sounds directory.
    #[must_use]
    pub fn resolve(&self, sound: &str) -> Option<PathBuf> {
        let sound = sound.trim();
        if sound.is_empty() {
            return None;
        }
        let path = Path::new(sound);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        let in_dir = self.dir.join(path);
        in_dir.is_file().then_some(in_dir)
    }

    /// file for an alarm's ringtone, falling back to the default ringtone
    #[must_use]
    pub fn resolve_or_default(&self, sound: Option<&str>) -> Option<PathBuf> {
        sound
            .and_then(|s| self.resolve(s))
            .or_else(|| self.resolve(&self.default_sound))
    }
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3") || ext.eq_ignore_ascii_case("wav"))
}
