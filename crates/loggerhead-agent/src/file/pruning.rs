//! Oldest-first pruning of finished session files.
//!
//! Runs under the repository lock, after a rotation. Three limits apply in
//! order: file age, total repository size, and minimum free disk space.
//! Only finished files are candidates; the active pending file is never
//! touched. Pruning is best-effort: an unreadable or undeletable file is
//! logged and skipped, never fatal.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use loggerhead_core::FileMessengerConfig;

use super::SESSION_FILE_EXTENSION;

/// What one pruning pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
}

struct Candidate {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

pub(super) fn prune_repository(config: &FileMessengerConfig) -> PruneReport {
    let mut report = PruneReport::default();
    let mut candidates = collect_candidates(config);
    // Oldest first, so every removal below drops the oldest survivor.
    candidates.sort_by_key(|candidate| candidate.modified);

    let now = SystemTime::now();
    candidates.retain(|candidate| {
        let expired = now
            .duration_since(candidate.modified)
            .map(|age| age > config.max_local_file_age)
            .unwrap_or(false);
        if expired {
            remove(candidate, &mut report);
        }
        !expired
    });

    let mut total: u64 = candidates.iter().map(|candidate| candidate.len).sum();
    let mut index = 0;
    while total > config.max_local_disk_usage && index < candidates.len() {
        total -= candidates[index].len;
        remove(&candidates[index], &mut report);
        index += 1;
    }

    if config.minimum_free_disk > 0 {
        while index < candidates.len() {
            match fs2::available_space(&config.repository) {
                Ok(free) if free < config.minimum_free_disk => {
                    remove(&candidates[index], &mut report);
                    index += 1;
                }
                Ok(_) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "cannot query free disk space");
                    break;
                }
            }
        }
    }

    report
}

fn collect_candidates(config: &FileMessengerConfig) -> Vec<Candidate> {
    let Ok(entries) = fs::read_dir(&config.repository) else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_session_file = path
            .extension()
            .map(|ext| ext == SESSION_FILE_EXTENSION)
            .unwrap_or(false);
        if !is_session_file {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        candidates.push(Candidate {
            path,
            len: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    candidates
}

fn remove(candidate: &Candidate, report: &mut PruneReport) {
    match fs::remove_file(&candidate.path) {
        Ok(()) => {
            report.files_removed += 1;
            report.bytes_freed += candidate.len;
        }
        Err(err) => {
            tracing::warn!(file = %candidate.path.display(), error = %err, "prune failed");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_file(repo: &std::path::Path, name: &str, bytes: usize) -> PathBuf {
        let path = repo.join(name);
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    fn config(repo: &std::path::Path) -> FileMessengerConfig {
        FileMessengerConfig {
            repository: repo.to_path_buf(),
            enable_file_pruning: true,
            max_local_disk_usage: u64::MAX,
            max_local_file_age: Duration::from_secs(86_400),
            minimum_free_disk: 0,
            ..FileMessengerConfig::testing(repo)
        }
    }

    #[test]
    fn test_disk_usage_limit_removes_oldest_first() {
        let repo = TempDir::new().unwrap();
        let oldest = write_file(repo.path(), "a.lhf", 1_000);
        std::thread::sleep(Duration::from_millis(20));
        let middle = write_file(repo.path(), "b.lhf", 1_000);
        std::thread::sleep(Duration::from_millis(20));
        let newest = write_file(repo.path(), "c.lhf", 1_000);

        let mut config = config(repo.path());
        config.max_local_disk_usage = 2_000;

        let report = prune_repository(&config);
        assert_eq!(report.files_removed, 1);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[test]
    fn test_age_limit_removes_expired() {
        let repo = TempDir::new().unwrap();
        let target = write_file(repo.path(), "old.lhf", 100);

        let mut config = config(repo.path());
        config.max_local_file_age = Duration::ZERO;

        std::thread::sleep(Duration::from_millis(20));
        let report = prune_repository(&config);
        assert_eq!(report.files_removed, 1);
        assert!(!target.exists());
    }

    #[test]
    fn test_pending_and_foreign_files_untouched() {
        let repo = TempDir::new().unwrap();
        let pending = write_file(repo.path(), "active.lhf.pending", 10_000);
        let foreign = write_file(repo.path(), "notes.txt", 10_000);

        let mut config = config(repo.path());
        config.max_local_disk_usage = 0;

        let report = prune_repository(&config);
        assert_eq!(report.files_removed, 0);
        assert!(pending.exists());
        assert!(foreign.exists());
    }
}
