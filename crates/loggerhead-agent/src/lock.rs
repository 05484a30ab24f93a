//! Named, reentrant, cross-process repository lock.
//!
//! Lock keys are `(normalized path, lock name)`. Path normalization is an
//! explicit policy, not an accident of the host OS: backslashes become
//! forward slashes, trailing separators are trimmed, and the result is
//! lowercased. Two paths differing only in case therefore collide onto one
//! lock. On case-sensitive filesystems this is a conservative collision:
//! extra exclusion, never a missed one.
//!
//! Within a process, a registry of lock states provides same-thread
//! reentrancy and cross-thread blocking with timeout. The first holder in
//! a process additionally takes an OS-level exclusive lock on a sentinel
//! file inside the locked directory, which the OS releases if the process
//! dies, so an abandoned lock can never wedge the repository.
//!
//! Contention is not an error: `acquire` returns `None` on timeout.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::{Condvar, Mutex};

/// Poll interval while waiting for another process's sentinel lock.
const OS_LOCK_POLL: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// Lock Key
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct LockKey {
    path: String,
    name: String,
}

impl LockKey {
    fn new(path: &Path, name: &str) -> Self {
        Self {
            path: normalize_path(path),
            name: name.to_string(),
        }
    }
}

fn normalize_path(path: &Path) -> String {
    let unified = path.to_string_lossy().replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    trimmed.to_lowercase()
}

// ----------------------------------------------------------------------------
// Lock State
// ----------------------------------------------------------------------------

struct LockState {
    owner: Option<ThreadId>,
    owner_label: String,
    reentrancy: u32,
    sentinel: Option<File>,
}

struct LockShared {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl LockShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                owner_label: String::new(),
                reentrancy: 0,
                sentinel: None,
            }),
            cond: Condvar::new(),
        }
    }
}

fn registry() -> &'static Mutex<HashMap<LockKey, Arc<LockShared>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<LockKey, Arc<LockShared>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

// ----------------------------------------------------------------------------
// Acquisition
// ----------------------------------------------------------------------------

/// Entry point for repository locking.
pub struct InterprocessLock;

impl InterprocessLock {
    /// Acquire `(path, lock_name)` exclusively.
    ///
    /// Same-thread re-acquisition succeeds immediately and nests; other
    /// threads and processes block up to `timeout`. A zero timeout probes
    /// once without blocking. Returns `None` on contention, which is an
    /// expected, recoverable outcome rather than a failure.
    pub fn acquire(
        requester: &str,
        path: &Path,
        lock_name: &str,
        timeout: Duration,
    ) -> Option<InterprocessLockGuard> {
        let key = LockKey::new(path, lock_name);
        let shared = registry()
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(LockShared::new()))
            .clone();

        let me = thread::current().id();
        let deadline = Instant::now() + timeout;

        let mut state = shared.state.lock();
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.reentrancy += 1;
                    drop(state);
                    return Some(InterprocessLockGuard::new(shared));
                }
                Some(_) => {
                    if timeout.is_zero() {
                        return None;
                    }
                    if shared.cond.wait_until(&mut state, deadline).timed_out()
                        && state.owner.is_some()
                    {
                        return None;
                    }
                }
                None => break,
            }
        }

        // Claim in-process ownership first so contending threads queue on
        // the condvar while we negotiate with other processes.
        state.owner = Some(me);
        state.owner_label = requester.to_string();
        state.reentrancy = 1;
        drop(state);

        match acquire_sentinel(path, lock_name, deadline, timeout.is_zero()) {
            Some(file) => {
                shared.state.lock().sentinel = Some(file);
                tracing::debug!(requester, lock_name, "repository lock acquired");
                Some(InterprocessLockGuard::new(shared))
            }
            None => {
                let mut state = shared.state.lock();
                state.owner = None;
                state.owner_label.clear();
                state.reentrancy = 0;
                shared.cond.notify_one();
                None
            }
        }
    }
}

/// Take the OS-level exclusive lock on the sentinel file, polling until the
/// deadline. The sentinel must be creatable by any process with write
/// access to the directory.
fn acquire_sentinel(
    path: &Path,
    lock_name: &str,
    deadline: Instant,
    probe_once: bool,
) -> Option<File> {
    if fs::create_dir_all(path).is_err() {
        return None;
    }
    let sentinel_path = path.join(format!("{lock_name}.lock"));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&sentinel_path)
        .ok()?;

    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Some(file),
            Err(_) if probe_once => return None,
            Err(_) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                thread::sleep(OS_LOCK_POLL.min(deadline - now));
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Guard
// ----------------------------------------------------------------------------

/// Scoped ownership of a repository lock.
///
/// Dropping the guard decrements the reentrancy count; the OS-level
/// sentinel is released when the count reaches zero. The guard is bound to
/// the acquiring thread and deliberately not `Send`.
pub struct InterprocessLockGuard {
    shared: Arc<LockShared>,
    _not_send: PhantomData<*const ()>,
}

impl InterprocessLockGuard {
    fn new(shared: Arc<LockShared>) -> Self {
        Self {
            shared,
            _not_send: PhantomData,
        }
    }
}

impl Drop for InterprocessLockGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.reentrancy = state.reentrancy.saturating_sub(1);
        if state.reentrancy == 0 {
            if let Some(sentinel) = state.sentinel.take() {
                let _ = fs2::FileExt::unlock(&sentinel);
            }
            state.owner = None;
            state.owner_label.clear();
            self.shared.cond.notify_one();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn probe(path: &Path, name: &str) -> bool {
        // Probe from another thread: same-thread probes would reenter.
        let path = path.to_path_buf();
        let name = name.to_string();
        thread::spawn(move || {
            InterprocessLock::acquire("probe", &path, &name, Duration::ZERO).is_some()
        })
        .join()
        .unwrap()
    }

    #[test]
    fn test_normalization_policy() {
        assert_eq!(
            normalize_path(Path::new("C:\\Logs\\Repo\\")),
            "c:/logs/repo"
        );
        assert_eq!(normalize_path(Path::new("/var/Logs/")), "/var/logs");
        assert_eq!(normalize_path(Path::new("/var/logs")), "/var/logs");
        assert_eq!(normalize_path(Path::new("/")), "/");
    }

    #[test]
    fn test_reentrant_acquisition() {
        let repo = TempDir::new().unwrap();

        let outer =
            InterprocessLock::acquire("test", repo.path(), "maint", Duration::from_secs(1))
                .expect("first acquire");
        let inner =
            InterprocessLock::acquire("test", repo.path(), "maint", Duration::from_secs(1))
                .expect("reentrant acquire");

        // Still held for everyone else after releasing the inner handle.
        drop(inner);
        assert!(!probe(repo.path(), "maint"));

        // Fully released after the outer handle goes.
        drop(outer);
        assert!(probe(repo.path(), "maint"));
    }

    #[test]
    fn test_cross_thread_zero_timeout_probe() {
        let repo = TempDir::new().unwrap();
        let _held =
            InterprocessLock::acquire("holder", repo.path(), "repo", Duration::from_secs(1))
                .unwrap();
        assert!(!probe(repo.path(), "repo"));
    }

    #[test]
    fn test_cross_thread_timeout_waits() {
        let repo = TempDir::new().unwrap();
        let _held =
            InterprocessLock::acquire("holder", repo.path(), "repo", Duration::from_secs(1))
                .unwrap();

        let path = repo.path().to_path_buf();
        let waited = thread::spawn(move || {
            let start = Instant::now();
            let result =
                InterprocessLock::acquire("waiter", &path, "repo", Duration::from_millis(120));
            (result.is_some(), start.elapsed())
        })
        .join()
        .unwrap();

        assert!(!waited.0);
        assert!(waited.1 >= Duration::from_millis(100));
    }

    #[test]
    fn test_waiter_gets_lock_on_release() {
        let repo = TempDir::new().unwrap();
        let held =
            InterprocessLock::acquire("holder", repo.path(), "repo", Duration::from_secs(1))
                .unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let path = repo.path().to_path_buf();
        let waiter = thread::spawn(move || {
            started_tx.send(()).unwrap();
            InterprocessLock::acquire("waiter", &path, "repo", Duration::from_secs(5)).is_some()
        });

        started_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        drop(held);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_case_and_separator_insensitive_collision() {
        let repo = TempDir::new().unwrap();
        let upper: std::path::PathBuf = repo
            .path()
            .to_string_lossy()
            .to_uppercase()
            .into();
        let mut with_sep = repo.path().as_os_str().to_os_string();
        with_sep.push("/");

        let _held =
            InterprocessLock::acquire("holder", repo.path(), "repo", Duration::from_secs(1))
                .unwrap();

        // Same key through a different spelling: reentrant success from
        // this thread proves the collision.
        let reentered = InterprocessLock::acquire(
            "holder",
            Path::new(&with_sep),
            "repo",
            Duration::from_secs(1),
        );
        assert!(reentered.is_some());

        // And the uppercase spelling is busy for other threads.
        let busy = {
            let upper = upper.clone();
            thread::spawn(move || {
                InterprocessLock::acquire("probe", &upper, "repo", Duration::ZERO).is_some()
            })
            .join()
            .unwrap()
        };
        assert!(!busy);
    }

    #[test]
    fn test_distinct_names_do_not_contend() {
        let repo = TempDir::new().unwrap();
        let _a = InterprocessLock::acquire("a", repo.path(), "repository", Duration::from_secs(1))
            .unwrap();
        let _b = InterprocessLock::acquire("b", repo.path(), "maintenance", Duration::from_secs(1))
            .unwrap();
    }

    #[test]
    fn test_sentinel_file_created() {
        let repo = TempDir::new().unwrap();
        let _held =
            InterprocessLock::acquire("holder", repo.path(), "repo", Duration::from_secs(1))
                .unwrap();
        assert!(repo.path().join("repo.lock").exists());
    }
}
