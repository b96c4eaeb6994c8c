// Shader hot reload
//
// Watches the directories holding the SPIR-V files and queues changed shader
// paths. The render loop drains the queue once per frame and rebuilds the
// surface generation when anything changed.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    changed: Arc<Mutex<Vec<PathBuf>>>,
}

impl ShaderWatcher {
    pub fn new(shaders: &[PathBuf]) -> Result<Self> {
        let names: Vec<OsString> = shaders
            .iter()
            .filter_map(|p| p.file_name().map(OsString::from))
            .collect();

        let changed = Arc::new(Mutex::new(Vec::new()));
        let queue = changed.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_shader_change(&event, &names) {
                    queue.lock().extend(event.paths);
                }
            }
            Err(e) => log::warn!("Shader watcher error: {:?}", e),
        })
        .context("Failed to create shader watcher")?;

        // Compilers and editors often replace files, so watch the directory
        let dirs: BTreeSet<&Path> = shaders
            .iter()
            .map(|p| match p.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            })
            .collect();

        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {:?}", dir))?;
            log::info!("Watching {:?} for shader changes", dir);
        }

        Ok(Self {
            _watcher: watcher,
            changed,
        })
    }

    /// Paths changed since the last call, deduplicated
    pub fn take_changes(&self) -> Vec<PathBuf> {
        let drained: BTreeSet<PathBuf> = self.changed.lock().drain(..).collect();
        drained.into_iter().collect()
    }
}

/// Content or creation event touching one of the watched file names
fn is_shader_change(event: &Event, names: &[OsString]) -> bool {
    let relevant_kind = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    relevant_kind
        && event.paths.iter().any(|path| {
            path.file_name()
                .map(|name| names.iter().any(|n| n == name))
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};

    fn names() -> Vec<OsString> {
        vec!["model.vert.spv".into(), "model.frag.spv".into()]
    }

    #[test]
    fn modified_shader_is_a_change() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/project/shaders/model.frag.spv"));
        assert!(is_shader_change(&event, &names()));
    }

    #[test]
    fn recreated_shader_is_a_change() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("shaders/model.vert.spv"));
        assert!(is_shader_change(&event, &names()));
    }

    #[test]
    fn other_files_are_ignored() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("shaders/model.vert"));
        assert!(!is_shader_change(&event, &names()));
    }

    #[test]
    fn reads_are_ignored() {
        let event = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("shaders/model.vert.spv"));
        assert!(!is_shader_change(&event, &names()));
    }
}
