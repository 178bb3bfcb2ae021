//! Reference `notify`-backed watcher over a share directory.
//!
//! The directory-watching engine itself is an external collaborator per the
//! core's scope — this module only exists so the workspace has a real
//! producer for [`filewire_peer::LocalNode::dispatch_fs_event`] end to end.
//! It is not part of the protocol core's public contract beyond the
//! `FsEvent` type it feeds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher,
};

use filewire_peer::{FsEvent, LocalNode};
use filewire_proto::FileDescriptor;

use crate::exit::{CliError, CliResult, INTERNAL};

const STAGING_DIR_NAME: &str = ".filewire-staging";

/// Owns the live `notify` watch. Dropping this stops watching.
pub struct ShareWatcher {
    _inner: RecommendedWatcher,
}

/// Start watching `root` and fan every observed change into `node` as an
/// [`FsEvent`]. Runs its own background thread draining the `notify`
/// channel; events for paths inside the store's staging directory are
/// ignored so in-progress inbound transfers don't retrigger outbound
/// requests.
pub fn spawn(root: PathBuf, node: Arc<LocalNode>) -> CliResult<ShareWatcher> {
    let (tx, rx) = channel::<notify::Result<Event>>();

    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("watcher init failed: {err}")))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|err| CliError::new(INTERNAL, format!("watcher start failed: {err}")))?;

    let descriptors: Arc<Mutex<HashMap<String, FileDescriptor>>> =
        Arc::new(Mutex::new(HashMap::new()));

    std::thread::spawn(move || {
        for res in rx {
            match res {
                Ok(event) => handle_event(&root, &node, &descriptors, event),
                Err(err) => tracing::warn!(error = %err, "watch error"),
            }
        }
    });

    Ok(ShareWatcher { _inner: watcher })
}

fn handle_event(
    root: &Path,
    node: &Arc<LocalNode>,
    descriptors: &Arc<Mutex<HashMap<String, FileDescriptor>>>,
    event: Event,
) {
    for path in &event.paths {
        let Some(relative) = relative_path(root, path) else {
            continue;
        };
        if relative.starts_with(STAGING_DIR_NAME) {
            continue;
        }

        match &event.kind {
            EventKind::Create(notify::event::CreateKind::Folder) => {
                node.dispatch_fs_event(&FsEvent::DirectoryCreate {
                    path_name: relative,
                });
            }
            EventKind::Create(_) => {
                if let Some(fd) = describe_file(path) {
                    descriptors.lock().unwrap().insert(relative.clone(), fd.clone());
                    node.dispatch_fs_event(&FsEvent::FileCreate {
                        file_descriptor: fd,
                        path_name: relative,
                    });
                }
            }
            EventKind::Modify(_) => {
                if path.is_dir() {
                    continue;
                }
                if let Some(fd) = describe_file(path) {
                    descriptors.lock().unwrap().insert(relative.clone(), fd.clone());
                    node.dispatch_fs_event(&FsEvent::FileModify {
                        file_descriptor: fd,
                        path_name: relative,
                    });
                }
            }
            EventKind::Remove(notify::event::RemoveKind::Folder) => {
                node.dispatch_fs_event(&FsEvent::DirectoryDelete {
                    path_name: relative,
                });
            }
            EventKind::Remove(_) => {
                let last_known = descriptors.lock().unwrap().remove(&relative);
                if let Some(fd) = last_known {
                    node.dispatch_fs_event(&FsEvent::FileDelete {
                        file_descriptor: fd,
                        path_name: relative,
                    });
                } else {
                    tracing::debug!(path = %relative, "delete observed with no known descriptor, skipping");
                }
            }
            _ => {}
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn describe_file(path: &Path) -> Option<FileDescriptor> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    let md5 = format!("{:x}", md5::compute(&bytes));
    let last_modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Some(FileDescriptor::new(md5, last_modified, bytes.len() as u64))
}
