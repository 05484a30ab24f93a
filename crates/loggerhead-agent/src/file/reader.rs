//! Read path for finished session files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loggerhead_core::{Packet, PacketGuid, PacketRegistry, PacketStreamReader, Result};

use super::SESSION_FILE_EXTENSION;

/// Enumerate finished session files in a repository, sorted by name.
///
/// Pending files are invisible here by construction, so a concurrently
/// rotating writer can never expose a partially-written file.
pub fn finished_session_files(repository: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(repository)? {
        let path = entry?.path();
        let is_session_file = path
            .extension()
            .map(|ext| ext == SESSION_FILE_EXTENSION)
            .unwrap_or(false);
        if is_session_file {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Decodes one session file, tolerating damage.
///
/// Corrupt frames and undecodable packets are counted and skipped; a torn
/// trailing frame (crash shape) is reported via [`truncated`].
///
/// [`truncated`]: SessionFileReader::truncated
pub struct SessionFileReader {
    stream: PacketStreamReader<BufReader<File>>,
    path: PathBuf,
}

impl SessionFileReader {
    /// Open with the built-in packet registry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_registry(path, PacketRegistry::with_builtins())
    }

    /// Open with a caller-supplied registry (extension packet types).
    pub fn open_with_registry(path: impl AsRef<Path>, registry: PacketRegistry) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            stream: PacketStreamReader::new(BufReader::new(file), registry),
            path,
        })
    }

    /// Preserve unknown packet types as opaque packets instead of counting
    /// them as corrupt.
    pub fn with_opaque_fallback(mut self) -> Self {
        self.stream = self.stream.with_opaque_fallback();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next packet, or `None` at end of file.
    pub fn next_packet(&mut self) -> Result<Option<Arc<Packet>>> {
        self.stream.next_packet()
    }

    /// Drain the remaining packets.
    pub fn read_all(&mut self) -> Result<Vec<Arc<Packet>>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Damaged or undecodable packets skipped so far.
    pub fn corrupt_packet_count(&self) -> u64 {
        self.stream.corrupt_packet_count()
    }

    /// True when the file ends mid-frame.
    pub fn truncated(&self) -> bool {
        self.stream.truncated()
    }

    /// Latest decoded value of a cached packet.
    pub fn resolve_cached(&self, guid: &PacketGuid) -> Option<Arc<Packet>> {
        self.stream.resolve_cached(guid)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loggerhead_core::{Marker, PacketStreamWriter, Timestamp};
    use tempfile::TempDir;

    fn write_session_file(path: &Path, labels: &[&str]) {
        let file = File::create(path).unwrap();
        let mut writer = PacketStreamWriter::new(std::io::BufWriter::new(file));
        for label in labels {
            writer
                .write_packet(&Packet::Marker(Marker::new(Timestamp::now(), *label)))
                .unwrap();
        }
        writer.flush().unwrap();
    }

    #[test]
    fn test_reads_back_in_order() {
        let repo = TempDir::new().unwrap();
        let path = repo.path().join("s-0001.lhf");
        write_session_file(&path, &["a", "b", "c"]);

        let mut reader = SessionFileReader::open(&path).unwrap();
        let packets = reader.read_all().unwrap();
        let labels: Vec<&str> = packets
            .iter()
            .map(|packet| match packet.as_ref() {
                Packet::Marker(marker) => marker.label.as_str(),
                other => panic!("unexpected packet {other:?}"),
            })
            .collect();
        assert_eq!(labels, ["a", "b", "c"]);
        assert!(!reader.truncated());
    }

    #[test]
    fn test_damaged_file_partially_recovers() {
        let repo = TempDir::new().unwrap();
        let path = repo.path().join("s-0001.lhf");
        write_session_file(&path, &["a", "b", "c"]);

        // Stomp bytes somewhere in the middle of the file.
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        for byte in &mut bytes[mid..mid + 4] {
            *byte ^= 0xFF;
        }
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = SessionFileReader::open(&path).unwrap();
        let packets = reader.read_all().unwrap();
        assert!(packets.len() < 3);
        assert!(reader.corrupt_packet_count() > 0);
    }

    #[test]
    fn test_enumeration_skips_pending_and_sorts() {
        let repo = TempDir::new().unwrap();
        std::fs::write(repo.path().join("s-0002.lhf"), b"").unwrap();
        std::fs::write(repo.path().join("s-0001.lhf"), b"").unwrap();
        std::fs::write(repo.path().join("s-0003.lhf.pending"), b"").unwrap();

        let files = finished_session_files(repo.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["s-0001.lhf", "s-0002.lhf"]);
    }
}
