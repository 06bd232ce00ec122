// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Hot reload of the settings file.
//!
//! Modifications are debounced so an editor's burst of writes produces one
//! reload. Applying the reloaded settings is left to the host, which hands
//! them to `SequenceManager::apply_settings`.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{SequencerSettings, SettingsFormat};

const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Events emitted by the settings watcher
#[derive(Debug, Clone)]
pub enum SettingsEvent {
    /// Settings file was modified and parsed
    Reloaded(Box<SequencerSettings>),
    /// Settings file was modified but failed to load
    Error(String),
    /// Settings file was removed; the current settings stay in force
    Removed(PathBuf),
}

/// Watches a settings file (or a directory of them)
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
    event_receiver: Receiver<SettingsEvent>,
    watched_path: PathBuf,
}

impl SettingsWatcher {
    /// Start watching `path`, debouncing modifications by `debounce_ms`
    /// (500 ms when `None`)
    pub fn new<P: AsRef<Path>>(path: P, debounce_ms: Option<u64>) -> Result<Self> {
        let watched_path = path.as_ref().to_path_buf();
        let debounce = Duration::from_millis(debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

        let (event_tx, event_rx): (Sender<SettingsEvent>, Receiver<SettingsEvent>) = mpsc::channel();
        let (notify_tx, notify_rx): (Sender<Event>, Receiver<Event>) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            Config::default(),
        )
        .map_err(|e| anyhow!("Failed to create settings watcher: {}", e))?;

        let mode = if watched_path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&watched_path, mode)
            .map_err(|e| anyhow!("Failed to watch path {:?}: {}", watched_path, e))?;

        std::thread::spawn(move || debounce_loop(notify_rx, event_tx, debounce));

        debug!(path = ?watched_path, "watching settings");
        Ok(Self {
            _watcher: watcher,
            event_receiver: event_rx,
            watched_path,
        })
    }

    /// Non-blocking
    pub fn try_recv(&self) -> Option<SettingsEvent> {
        self.event_receiver.try_recv().ok()
    }

    /// Drain every pending event
    pub fn recv_all(&self) -> Vec<SettingsEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait at most `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SettingsEvent> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    pub fn watched_path(&self) -> &Path {
        &self.watched_path
    }
}

fn debounce_loop(notify_rx: Receiver<Event>, event_tx: Sender<SettingsEvent>, debounce: Duration) {
    let mut last_event_time: Option<Instant> = None;
    let mut pending_paths: Vec<PathBuf> = Vec::new();

    loop {
        match notify_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => {
                    for path in event.paths {
                        if SettingsFormat::is_settings_file(&path) && !pending_paths.contains(&path) {
                            pending_paths.push(path);
                        }
                    }
                    last_event_time = Some(Instant::now());
                }
                EventKind::Remove(_) => {
                    for path in event.paths {
                        pending_paths.retain(|p| p != &path);
                        if SettingsFormat::is_settings_file(&path) {
                            let _ = event_tx.send(SettingsEvent::Removed(path));
                        }
                    }
                }
                _ => {}
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let due = last_event_time.map_or(false, |at| at.elapsed() >= debounce);
                if !due {
                    continue;
                }
                for path in pending_paths.drain(..) {
                    let event = match SequencerSettings::load(&path) {
                        Ok(settings) => SettingsEvent::Reloaded(Box::new(settings)),
                        Err(e) => {
                            warn!(?path, "settings reload failed: {:#}", e);
                            SettingsEvent::Error(format!("Failed to load {:?}: {:#}", path, e))
                        }
                    };
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
                last_event_time = None;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Load a settings file without applying it
pub fn validate_settings<P: AsRef<Path>>(path: P) -> Result<SequencerSettings> {
    SequencerSettings::load(path)
}
