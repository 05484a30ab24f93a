//! File messenger: durable session files in a shared repository.
//!
//! The active file is written under a `.pending` name and only becomes
//! visible to readers through an atomic rename at rotation or close, so
//! repository enumeration never observes a partially-written file as the
//! latest. Every finished file re-emits the session header and all cached
//! packets seen so far, making each one independently decodable.
//!
//! Structural mutations (opening a file, rotating, pruning) hold the
//! interprocess repository lock; plain appends to the already-open file do
//! not, so concurrent sessions from other processes are not serialized on
//! the hot path.

mod pruning;
mod reader;

pub use pruning::PruneReport;
pub use reader::{finished_session_files, SessionFileReader};

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use loggerhead_core::errors::{CodecError, SinkError};
use loggerhead_core::{
    FileMessengerConfig, Packet, PacketFormat, PacketGuid, PacketStreamWriter, Result, SessionId,
};

use crate::lock::{InterprocessLock, InterprocessLockGuard};
use crate::messenger::Messenger;

/// Extension of finished, reader-visible session files.
pub const SESSION_FILE_EXTENSION: &str = "lhf";

/// Extension of the in-progress file; never enumerated by readers.
pub const PENDING_FILE_EXTENSION: &str = "lhf.pending";

/// Lock name guarding structural mutations of a repository.
pub const REPOSITORY_LOCK_NAME: &str = "repository";

// ----------------------------------------------------------------------------
// Active File
// ----------------------------------------------------------------------------

struct ActiveFile {
    stream: PacketStreamWriter<BufWriter<File>>,
    pending_path: PathBuf,
    final_path: PathBuf,
    opened_at: Instant,
    /// Stream size right after the cached-packet preamble; content exists
    /// only past this point.
    base_bytes: u64,
}

impl ActiveFile {
    fn has_content(&self) -> bool {
        self.stream.bytes_written() > self.base_bytes
    }
}

// ----------------------------------------------------------------------------
// File Messenger
// ----------------------------------------------------------------------------

/// The durable file sink.
pub struct FileMessenger {
    config: FileMessengerConfig,
    session_id: SessionId,
    active: Option<ActiveFile>,
    file_seq: u32,
    /// Latest value of every cached packet, in first-seen order, for the
    /// preamble of each new file.
    cached: Vec<Arc<Packet>>,
    cached_index: std::collections::HashMap<PacketGuid, usize>,
    unflushed_bytes: u64,
}

impl FileMessenger {
    pub fn new(config: FileMessengerConfig, session_id: SessionId) -> Self {
        Self {
            config,
            session_id,
            active: None,
            file_seq: 0,
            cached: Vec::new(),
            cached_index: std::collections::HashMap::new(),
            unflushed_bytes: 0,
        }
    }

    fn lock_repository(&self) -> Result<InterprocessLockGuard> {
        InterprocessLock::acquire(
            "file-messenger",
            &self.config.repository,
            REPOSITORY_LOCK_NAME,
            self.config.lock_timeout,
        )
        .ok_or_else(|| {
            SinkError::RepositoryBusy {
                path: self.config.repository.display().to_string(),
            }
            .into()
        })
    }

    fn remember_cached(&mut self, packet: &Arc<Packet>) {
        if let Some(guid) = packet.cache_id() {
            match self.cached_index.get(&guid) {
                Some(&index) => self.cached[index] = packet.clone(),
                None => {
                    self.cached_index.insert(guid, self.cached.len());
                    self.cached.push(packet.clone());
                }
            }
        }
    }

    /// Open a fresh pending file, re-emitting the cached preamble.
    fn ensure_active(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let guard = self.lock_repository()?;
        fs::create_dir_all(&self.config.repository)
            .map_err(|err| SinkError::io("file", err))?;

        self.file_seq += 1;
        let stem = format!("{}-{:04}", self.session_id, self.file_seq);
        let final_path = self
            .config
            .repository
            .join(format!("{stem}.{SESSION_FILE_EXTENSION}"));
        let pending_path = self
            .config
            .repository
            .join(format!("{stem}.{PENDING_FILE_EXTENSION}"));

        let file = File::create(&pending_path).map_err(|err| SinkError::io("file", err))?;
        let mut stream = PacketStreamWriter::new(BufWriter::new(file));
        for packet in &self.cached {
            stream.write_packet(packet)?;
        }
        let base_bytes = stream.bytes_written();
        self.unflushed_bytes += base_bytes;

        self.active = Some(ActiveFile {
            stream,
            pending_path,
            final_path,
            opened_at: Instant::now(),
            base_bytes,
        });
        drop(guard);

        tracing::debug!(file = %stem, "opened session file");
        Ok(())
    }

    /// Flush, sync, and atomically publish the active file.
    fn finalize_active(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Ok(());
        }
        // Lock before taking the file so a busy repository leaves the
        // active file intact for a later retry.
        let guard = self.lock_repository()?;
        let ActiveFile {
            mut stream,
            pending_path,
            final_path,
            ..
        } = self.active.take().expect("active file present");

        stream.flush()?;
        let buffered = stream.into_inner();
        let file = buffered
            .into_inner()
            .map_err(|err| SinkError::io("file", err.into_error()))?;
        file.sync_all().map_err(|err| SinkError::io("file", err))?;
        drop(file);

        fs::rename(&pending_path, &final_path).map_err(|err| SinkError::io("file", err))?;
        self.unflushed_bytes = 0;

        if self.config.enable_file_pruning {
            let report = pruning::prune_repository(&self.config);
            if report.files_removed > 0 {
                tracing::info!(
                    removed = report.files_removed,
                    bytes = report.bytes_freed,
                    "pruned repository"
                );
            }
        }
        drop(guard);

        tracing::debug!(file = %final_path.display(), "published session file");
        Ok(())
    }

    fn rotation_due(&self) -> bool {
        match &self.active {
            Some(active) => {
                active.has_content()
                    && (active.stream.bytes_written() >= self.config.max_file_size
                        || active.opened_at.elapsed() >= self.config.max_file_duration)
            }
            None => false,
        }
    }

    /// Path of the current pending file, for tests and diagnostics.
    pub fn pending_path(&self) -> Option<&std::path::Path> {
        self.active.as_ref().map(|active| active.pending_path.as_path())
    }
}

impl Messenger for FileMessenger {
    fn name(&self) -> &str {
        "file"
    }

    fn write_batch(&mut self, batch: &[Arc<Packet>]) -> Result<()> {
        self.ensure_active()?;
        for packet in batch {
            self.remember_cached(packet);
            let active = self.active.as_mut().expect("active file present");
            let written = active.stream.write_packet(packet).map_err(|err| {
                match err {
                    // Transport the I/O cause as a sink failure; codec
                    // errors pass through untouched.
                    loggerhead_core::LoggerheadError::Codec(CodecError::Io(io)) => {
                        SinkError::io("file", io).into()
                    }
                    other => other,
                }
            })?;
            self.unflushed_bytes += written;
        }

        if self.rotation_due() {
            self.finalize_active()?;
        }
        Ok(())
    }

    fn buffered_bytes(&self) -> u64 {
        self.unflushed_bytes
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(active) = self.active.as_mut() {
            active.stream.flush()?;
            self.unflushed_bytes = 0;
        }
        Ok(())
    }

    fn maintain(&mut self) -> Result<()> {
        if self.rotation_due() {
            self.finalize_active()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.finalize_active()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loggerhead_core::{
        LogMessage, Marker, SessionHeader, SessionInfo, Severity, ThreadInfo, Timestamp,
    };
    use tempfile::TempDir;

    fn header(session_id: SessionId) -> Arc<Packet> {
        let info = SessionInfo::new("Contoso", "Billing", "1.0.0");
        Arc::new(Packet::SessionHeader(SessionHeader::new(
            session_id,
            &info,
            Timestamp::now(),
        )))
    }

    fn marker(label: &str) -> Arc<Packet> {
        Arc::new(Packet::Marker(Marker::new(Timestamp::now(), label)))
    }

    #[test]
    fn test_close_publishes_decodable_file() {
        let repo = TempDir::new().unwrap();
        let session_id = SessionId::generate();
        let mut sink = FileMessenger::new(
            FileMessengerConfig::testing(repo.path()),
            session_id,
        );

        sink.write_batch(&[header(session_id), marker("one"), marker("two")])
            .unwrap();
        sink.close().unwrap();

        let files = finished_session_files(repo.path()).unwrap();
        assert_eq!(files.len(), 1);

        let mut reader = SessionFileReader::open(&files[0]).unwrap();
        let packets = reader.read_all().unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(reader.corrupt_packet_count(), 0);
    }

    #[test]
    fn test_pending_file_not_enumerated() {
        let repo = TempDir::new().unwrap();
        let session_id = SessionId::generate();
        let mut sink = FileMessenger::new(
            FileMessengerConfig::testing(repo.path()),
            session_id,
        );

        sink.write_batch(&[header(session_id)]).unwrap();
        sink.flush().unwrap();

        assert!(sink.pending_path().unwrap().exists());
        assert!(finished_session_files(repo.path()).unwrap().is_empty());

        sink.close().unwrap();
        assert_eq!(finished_session_files(repo.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_size_rotation_produces_standalone_files() {
        let repo = TempDir::new().unwrap();
        let session_id = SessionId::generate();
        let mut config = FileMessengerConfig::testing(repo.path());
        config.max_file_size = 2 * 1024;
        let mut sink = FileMessenger::new(config, session_id);

        let thread = ThreadInfo::new(1, "worker");
        sink.write_batch(&[header(session_id), Arc::new(Packet::ThreadInfo(thread.clone()))])
            .unwrap();

        for sequence in 0..200u64 {
            let message = LogMessage::new(
                sequence,
                Timestamp::now(),
                Severity::Information,
                "rotate.test",
                "x".repeat(64),
                thread.id,
            );
            sink.write_batch(&[Arc::new(Packet::LogMessage(message))])
                .unwrap();
        }
        sink.close().unwrap();

        let files = finished_session_files(repo.path()).unwrap();
        assert!(files.len() > 1, "expected rotation, got {} file(s)", files.len());

        // Every finished file decodes on its own: the cached preamble makes
        // log messages resolvable without the earlier files.
        let mut total_messages = 0;
        for file in &files {
            let mut reader = SessionFileReader::open(file).unwrap();
            let packets = reader.read_all().unwrap();
            assert_eq!(reader.corrupt_packet_count(), 0);
            total_messages += packets
                .iter()
                .filter(|p| matches!(p.as_ref(), Packet::LogMessage(_)))
                .count();
        }
        assert_eq!(total_messages, 200);
    }

    #[test]
    fn test_cached_update_survives_rotation() {
        let repo = TempDir::new().unwrap();
        let session_id = SessionId::generate();
        let mut config = FileMessengerConfig::testing(repo.path());
        config.max_file_size = 1024;
        let mut sink = FileMessenger::new(config, session_id);

        let mut thread = ThreadInfo::new(1, "old-name");
        sink.write_batch(&[header(session_id), Arc::new(Packet::ThreadInfo(thread.clone()))])
            .unwrap();
        thread.thread_name = "new-name".into();
        sink.write_batch(&[Arc::new(Packet::ThreadInfo(thread.clone()))])
            .unwrap();

        // Force rotation with filler, then check the next file's preamble
        // carries the updated thread name.
        for sequence in 0..50u64 {
            let message = LogMessage::new(
                sequence,
                Timestamp::now(),
                Severity::Verbose,
                "filler",
                "y".repeat(64),
                thread.id,
            );
            sink.write_batch(&[Arc::new(Packet::LogMessage(message))])
                .unwrap();
        }
        sink.close().unwrap();

        let files = finished_session_files(repo.path()).unwrap();
        assert!(files.len() > 1);
        let mut reader = SessionFileReader::open(files.last().unwrap()).unwrap();
        reader.read_all().unwrap();
        match reader.resolve_cached(&thread.id).unwrap().as_ref() {
            Packet::ThreadInfo(resolved) => assert_eq!(resolved.thread_name, "new-name"),
            other => panic!("unexpected packet {other:?}"),
        }
    }
}
