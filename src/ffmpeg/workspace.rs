//! Private directory where staged inputs and encoder outputs live for one engine.
//!
//! The directory is removed when the workspace drops. Directories left behind by a
//! crashed process are swept by [`cleanup_stale_workspaces`]. A live workspace keeps
//! its activity marker fresh with [`Workspace::touch`] so the sweep skips it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::engine::EngineError;

pub const WORKSPACE_PREFIX: &str = "fit-vid-ws-";
/// Marker file whose mtime records the owning process's last sign of life.
const ACTIVITY_MARKER: &str = ".fit-vid-active";

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let parent = parent
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&parent)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)?;
        let ws = Self { dir };
        ws.touch()?;
        Ok(ws)
    }

    /// Refreshes the activity marker.
    pub fn touch(&self) -> io::Result<()> {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        fs::write(self.dir.path().join(ACTIVITY_MARKER), millis.to_string())
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Maps a staged name to its path. Names must be a single plain file name.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, EngineError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && name != ACTIVITY_MARKER
            && !name.contains(['/', '\\'])
            && Path::new(name).file_name().is_some_and(|n| n == name);
        if !valid {
            return Err(EngineError::from(format!(
                "Invalid staged name: {:?}",
                name
            )));
        }
        Ok(self.dir.path().join(name))
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        fs::write(self.resolve(name)?, bytes)?;
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.resolve(name)?;
        fs::read(&path).map_err(|e| {
            EngineError::from(format!("Failed to read staged output {}: {}", name, e))
        })
    }

    pub fn remove(&self, name: &str) -> Result<(), EngineError> {
        match fs::remove_file(self.resolve(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.exists()).unwrap_or(false)
    }

    /// Names currently present in the workspace.
    pub fn entries(&self) -> Vec<String> {
        fs::read_dir(self.dir.path())
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| name != ACTIVITY_MARKER)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Most recent of the directory mtime and its activity marker mtime.
fn last_activity(dir: &Path, dir_meta: &fs::Metadata) -> Option<SystemTime> {
    let dir_time = dir_meta.modified().ok();
    let marker_time = fs::metadata(dir.join(ACTIVITY_MARKER))
        .and_then(|m| m.modified())
        .ok();
    dir_time.max(marker_time)
}

/// Removes workspace directories under `parent` with no activity for `max_age`.
/// Returns how many were removed.
pub fn cleanup_stale_workspaces(parent: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(parent) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let age = last_activity(&entry.path(), &meta)
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!(
                target: "fit_vid::ffmpeg::workspace",
                "Failed to remove stale workspace {}: {}",
                entry.path().display(),
                e
            ),
        }
    }
    if removed > 0 {
        log::info!(
            target: "fit_vid::ffmpeg::workspace",
            "Removed {} stale workspace(s) from {}",
            removed,
            parent.display()
        );
    }
    removed
}
