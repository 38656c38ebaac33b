//! Active-log-file detection under rotation.
//!
//! The log producer appends to exactly one file at a time and starts a new
//! one on rotation, but gives no direct signal of the switch. Three
//! heuristics are tried in strict order on every scan; the first unambiguous
//! answer wins, and an ambiguous directory (two candidates at once) is never
//! guessed at: the detector asks to wait and rescan instead.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

const LOG_EXTENSION: &str = "log";

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// A different file is now the active one. `start_at_end` is set on the
    /// very first detection, where history must not be replayed.
    Rotated { path: PathBuf, start_at_end: bool },
    /// The current file is still the active one.
    NoChange,
    /// The situation is ambiguous; wait and rescan.
    Sleep,
}

pub struct RotationDetector {
    dir: PathBuf,
    /// Path → size snapshot from the previous scan.
    previous_sizes: HashMap<PathBuf, u64>,
}

impl RotationDetector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RotationDetector {
            dir: dir.into(),
            previous_sizes: HashMap::new(),
        }
    }

    /// Scans the log directory once and decides whether the active file
    /// moved. The fresh snapshot replaces the previous one on every return
    /// path, `Sleep` and `NoChange` included.
    pub fn detect(&mut self, current: Option<&Path>) -> io::Result<Rotation> {
        let mut latest_time = match current {
            Some(path) => Some(std::fs::metadata(path)?.modified()?),
            None => None,
        };
        let mut newest: Option<PathBuf> = None;
        let mut current_sizes = HashMap::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "skipping file without mtime");
                    continue;
                }
            };
            current_sizes.insert(path.clone(), meta.len());
            match latest_time {
                None => {
                    debug!(file = %path.display(), "first file seen, starting with it");
                    latest_time = Some(modified);
                    newest = Some(path);
                }
                Some(t) => {
                    // The current file's own growth must not read as a
                    // rotation.
                    if Some(path.as_path()) == current {
                        continue;
                    }
                    if modified > t {
                        debug!(file = %path.display(), "newer file found");
                        latest_time = Some(modified);
                        newest = Some(path);
                    }
                }
            }
        }

        let outcome = if let Some(path) = newest {
            info!(file = %path.display(), "new log file detected");
            Rotation::Rotated {
                start_at_end: current.is_none(),
                path,
            }
        } else if current.is_none() {
            warn!(dir = %self.dir.display(), "no log files available, will wait before rescanning");
            Rotation::Sleep
        } else {
            self.fallback_strategies(current, &current_sizes)
        };
        self.previous_sizes = current_sizes;
        Ok(outcome)
    }

    /// Runs when timestamps gave no signal: first look for a single file
    /// that appeared since the previous scan, then for a single known file
    /// that grew.
    fn fallback_strategies(
        &self,
        current: Option<&Path>,
        current_sizes: &HashMap<PathBuf, u64>,
    ) -> Rotation {
        debug!("no timestamp signal, looking for previously unknown files");
        let new_files: Vec<&PathBuf> = current_sizes
            .keys()
            .filter(|path| !self.previous_sizes.contains_key(*path))
            .collect();
        match new_files.len() {
            1 => {
                info!(file = %new_files[0].display(), "found a unique new log file, taking it as the active one");
                return Rotation::Rotated {
                    path: new_files[0].clone(),
                    start_at_end: false,
                };
            }
            n if n > 1 => {
                warn!("too many directory changes to tell which file is new, will retry");
                return Rotation::Sleep;
            }
            _ => {}
        }

        debug!("no new-file signal, looking for growing files");
        let grown: Vec<&PathBuf> = current_sizes
            .iter()
            .filter(|(path, size)| {
                Some(path.as_path()) != current
                    && self
                        .previous_sizes
                        .get(*path)
                        .is_some_and(|previous| previous < *size)
            })
            .map(|(path, _)| path)
            .collect();
        match grown.len() {
            1 => {
                info!(file = %grown[0].display(), "found a unique growing log file, taking it as the active one");
                Rotation::Rotated {
                    path: grown[0].clone(),
                    start_at_end: false,
                }
            }
            n if n > 1 => {
                warn!("too many growing files to tell which one is active, will retry");
                Rotation::Sleep
            }
            _ => {
                debug!("current log file keeps being the latest one");
                Rotation::NoChange
            }
        }
    }
}
