//! Alarm sound resolution.
//!
//! A sound is named in the escalation policy. The name is resolved to a
//! user-provided file when one exists, otherwise to the built-in siren.

use std::path::{Path, PathBuf};

use super::error::SoundError;

/// Name of the built-in siren.
pub const BUILTIN_SIREN: &str = "siren";

/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "aiff"];

/// Represents the source of the alarm sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundSource {
    /// An audio file on disk.
    File {
        /// The name of the sound (e.g., "klaxon").
        name: String,
        /// The full path to the sound file.
        path: PathBuf,
    },
    /// The synthesized siren.
    Builtin,
}

impl SoundSource {
    /// Creates a file sound source.
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::File {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Returns the name of the sound source.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } => name,
            Self::Builtin => BUILTIN_SIREN,
        }
    }

    /// Returns true for the built-in siren.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin)
    }

    /// Returns the file path of a file source.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Builtin => None,
        }
    }
}

/// Directories searched for named sounds, in priority order.
#[must_use]
pub fn sound_dirs() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".theftguard").join("sounds"));
    }
    paths.push(PathBuf::from("/usr/share/sounds/theftguard"));
    paths
}

/// Lists the sounds found in `dirs`, sorted by name.
#[must_use]
pub fn discover_sounds(dirs: &[PathBuf]) -> Vec<SoundSource> {
    let mut sounds = Vec::new();

    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !has_supported_extension(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                sounds.push(SoundSource::File {
                    name: stem.to_string_lossy().into_owned(),
                    path,
                });
            }
        }
    }

    sounds.sort_by(|a, b| a.name().cmp(b.name()));
    sounds
}

/// Finds a named sound in `dirs`.
///
/// # Errors
///
/// Returns `SoundError::FileNotFound` if no sound with the name exists.
pub fn find_sound(name: &str, dirs: &[PathBuf]) -> Result<SoundSource, SoundError> {
    discover_sounds(dirs)
        .into_iter()
        .find(|s| s.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| SoundError::FileNotFound(format!("サウンド '{}'", name)))
}

/// Resolves a policy sound name.
///
/// Accepts `siren`, a path to an audio file, or the name of a file in one of
/// the sound directories. Anything else falls back to the built-in siren.
#[must_use]
pub fn resolve_sound(name: &str, dirs: &[PathBuf]) -> SoundSource {
    if name.eq_ignore_ascii_case(BUILTIN_SIREN) {
        return SoundSource::Builtin;
    }

    let path = Path::new(name);
    if path.is_file() && has_supported_extension(path) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        return SoundSource::file(stem, path);
    }

    match find_sound(name, dirs) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!("{}、内蔵サイレンを使用します", e);
            SoundSource::Builtin
        }
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}
