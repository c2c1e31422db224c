use crate::process::{CancelToken, ProcessRunner, WaitStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, warn};

/// Entries kept before the cache is reset wholesale.
pub const MAX_CACHED_PATHS: usize = 100;

const PROBE_TIMEOUT_SECONDS: u64 = 30;

/// Shell convention for "command not found".
const NOT_FOUND_EXIT_CODE: i32 = 127;

/// Memoized availability per resolved executable path.
///
/// Not an LRU: once more than [`MAX_CACHED_PATHS`] paths are recorded the map
/// is cleared before the next insert. Re-probing after a reset is cheap.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    entries: Mutex<HashMap<String, bool>>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.lock().get(key).copied()
    }

    pub fn insert(&self, key: impl Into<String>, available: bool) {
        let mut entries = self.entries.lock();
        if entries.len() > MAX_CACHED_PATHS {
            debug!("availability cache over {MAX_CACHED_PATHS} entries; clearing");
            entries.clear();
        }
        entries.insert(key.into(), available);
    }

    /// Cached value for `key`, running `probe` only on a miss.
    ///
    /// The lock is not held while probing; two racing misses may both probe,
    /// and both write the same answer.
    pub fn get_or_probe(&self, key: &str, probe: impl FnOnce() -> bool) -> bool {
        if let Some(hit) = self.get(key) {
            return hit;
        }
        let available = probe();
        self.insert(key, available);
        available
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Is `program` usable from `root` (or from PATH when `root` is empty)?
///
/// A configured root that isn't a directory is recorded as unavailable
/// without spawning anything.
pub fn is_available(cache: &AvailabilityCache, root: &str, program: &str, args: &[&str]) -> bool {
    let exe = if root.is_empty() {
        Path::new(program).to_path_buf()
    } else {
        Path::new(root).join(program)
    };
    let key = exe.display().to_string();

    cache.get_or_probe(&key, || {
        if !root.is_empty() && !Path::new(root).is_dir() {
            warn!(
                "configured directory for {program} does not exist or is not a directory: {root}"
            );
            return false;
        }
        let available = check_executable(&exe, args);
        debug!("availability {key}: {available}");
        available
    })
}

/// Runs `exe args` once and reports whether it could be executed.
pub fn check_executable(exe: &Path, args: &[&str]) -> bool {
    let mut command: Vec<OsString> = vec![exe.as_os_str().to_owned()];
    command.extend(args.iter().map(OsString::from));

    let runner = ProcessRunner::new(PROBE_TIMEOUT_SECONDS).with_label("probe");
    match runner.run(&command, &BTreeMap::new(), &CancelToken::new()) {
        Ok(outcome) => match outcome.status {
            WaitStatus::Completed(status) => status.code() != Some(NOT_FOUND_EXIT_CODE),
            WaitStatus::TimedOut | WaitStatus::Interrupted => false,
        },
        Err(err) => {
            debug!("probe {} failed to start: {err}", exe.display());
            false
        }
    }
}
