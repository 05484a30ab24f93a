//! Frame layer and packet streams.
//!
//! Every packet body travels inside a frame:
//! `[magic "LH"][body_len: u32][crc32(body): u32][body]`. Frames give a
//! reader two things the raw codec cannot: integrity (CRC32 per frame) and
//! resynchronization: after any damage the reader scans forward to the
//! next magic and keeps going, counting what it skipped instead of dying.
//!
//! [`PacketStreamWriter`] and [`PacketStreamReader`] add the per-stream
//! dependency table: cached packets get a stable slot on first appearance,
//! packet references travel as slot indices, and a re-encountered cached
//! GUID replaces its slot in place.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::errors::{CodecError, LoggerheadError, Result};
use crate::packet::codec::{decode_body, encode_body, RefDecoder, RefEncoder};
use crate::packet::registry::{DependencyResolver, PacketRegistry};
use crate::packet::{Packet, PacketFormat};
use crate::types::PacketGuid;

/// Frame sync marker: ASCII "LH".
pub const FRAME_MAGIC: [u8; 2] = *b"LH";

/// Bytes of frame header: magic + length + CRC.
pub const FRAME_HEADER_LEN: usize = 10;

/// Bodies larger than this are rejected on write and treated as corruption
/// on read.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

// ----------------------------------------------------------------------------
// Frame Writing
// ----------------------------------------------------------------------------

/// Write one framed body. Returns the total bytes emitted.
pub fn write_frame<W: Write>(out: &mut W, body: &[u8]) -> Result<usize> {
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::frame(format!("frame body of {} bytes exceeds limit", body.len())).into());
    }
    out.write_all(&FRAME_MAGIC).map_err(CodecError::from)?;
    out.write_all(&(body.len() as u32).to_be_bytes())
        .map_err(CodecError::from)?;
    out.write_all(&crc32fast::hash(body).to_be_bytes())
        .map_err(CodecError::from)?;
    out.write_all(body).map_err(CodecError::from)?;
    Ok(FRAME_HEADER_LEN + body.len())
}

// ----------------------------------------------------------------------------
// Frame Reading
// ----------------------------------------------------------------------------

/// Reads frames from a byte source, surviving damage.
///
/// Corruption is counted in runs: consecutive bad bytes/frames between two
/// good frames count once, so a single damaged frame reports exactly one
/// corruption regardless of how the scan stumbles through its bytes.
pub struct FrameReader<R: Read> {
    source: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    corrupt_runs: u64,
    in_corruption: bool,
    truncated: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            eof: false,
            corrupt_runs: 0,
            in_corruption: false,
            truncated: false,
        }
    }

    /// Corruption runs encountered so far.
    pub fn corrupt_runs(&self) -> u64 {
        self.corrupt_runs
    }

    /// True when the stream ended inside a frame, the expected shape of
    /// uncommitted data after a crash, distinct from corruption.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = self.source.read(&mut chunk).map_err(CodecError::from)?;
        if read == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    /// Make at least `n` bytes available, or return false at EOF.
    fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.available() < n && !self.eof {
            self.fill()?;
        }
        Ok(self.available() >= n)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn note_corruption(&mut self) {
        if !self.in_corruption {
            self.corrupt_runs += 1;
            self.in_corruption = true;
        }
    }

    /// Next intact frame body, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            self.compact();

            // Scan forward to the next magic pair.
            let mut skipped = false;
            loop {
                if !self.ensure(2)? {
                    if self.available() > 0 {
                        self.truncated = true;
                    }
                    if skipped {
                        self.note_corruption();
                    }
                    return Ok(None);
                }
                if self.buf[self.pos..self.pos + 2] == FRAME_MAGIC {
                    break;
                }
                self.pos += 1;
                skipped = true;
            }
            if skipped {
                self.note_corruption();
            }

            if !self.ensure(FRAME_HEADER_LEN)? {
                self.truncated = true;
                return Ok(None);
            }

            let len = u32::from_be_bytes(self.buf[self.pos + 2..self.pos + 6].try_into().unwrap())
                as usize;
            if len > MAX_FRAME_LEN {
                self.note_corruption();
                self.pos += 2;
                continue;
            }

            let crc =
                u32::from_be_bytes(self.buf[self.pos + 6..self.pos + 10].try_into().unwrap());

            if !self.ensure(FRAME_HEADER_LEN + len)? {
                self.truncated = true;
                return Ok(None);
            }

            let body = &self.buf[self.pos + FRAME_HEADER_LEN..self.pos + FRAME_HEADER_LEN + len];
            if crc32fast::hash(body) != crc {
                self.note_corruption();
                self.pos += 2;
                continue;
            }

            let body = body.to_vec();
            self.pos += FRAME_HEADER_LEN + len;
            self.in_corruption = false;
            return Ok(Some(body));
        }
    }
}

// ----------------------------------------------------------------------------
// Packet Stream Writer
// ----------------------------------------------------------------------------

struct SlotRefs<'a>(&'a HashMap<PacketGuid, u32>);

impl RefEncoder for SlotRefs<'_> {
    fn slot_for(&self, guid: &PacketGuid) -> Option<u32> {
        self.0.get(guid).copied()
    }
}

/// Writes framed packets while maintaining the stream's dependency table.
pub struct PacketStreamWriter<W: Write> {
    out: W,
    slots: HashMap<PacketGuid, u32>,
    next_slot: u32,
    bytes_written: u64,
}

impl<W: Write> PacketStreamWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            slots: HashMap::new(),
            next_slot: 0,
            bytes_written: 0,
        }
    }

    /// Encode and frame one packet. Returns the frame size in bytes.
    ///
    /// A cached packet claims its dependency-table slot on first write and
    /// reuses it on later writes of the same GUID, which is what lets a
    /// reader treat the re-encounter as an update. Encoding a packet whose
    /// referenced dependencies have not been written yet fails with an
    /// encoding error; write dependencies first.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<u64> {
        if let Some(guid) = packet.cache_id() {
            if !self.slots.contains_key(&guid) {
                self.slots.insert(guid, self.next_slot);
                self.next_slot += 1;
            }
        }

        let refs = SlotRefs(&self.slots);
        let body = match packet {
            Packet::Opaque(opaque) => {
                encode_body(&opaque.type_name, opaque.version, &opaque.fields, &refs)?
            }
            _ => encode_body(
                packet.type_name(),
                packet.schema_version(),
                &packet.declared_fields(),
                &refs,
            )?,
        };

        let written = write_frame(&mut self.out, &body)? as u64;
        self.bytes_written += written;
        Ok(written)
    }

    /// True when a cached packet with this GUID has been written to the
    /// stream (and may therefore be referenced).
    pub fn contains(&self, guid: &PacketGuid) -> bool {
        self.slots.contains_key(guid)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(CodecError::from)?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// ----------------------------------------------------------------------------
// Packet Stream Reader
// ----------------------------------------------------------------------------

struct TableResolver<'a> {
    table: &'a [(PacketGuid, Arc<Packet>)],
    slots: &'a HashMap<PacketGuid, u32>,
}

impl RefDecoder for TableResolver<'_> {
    fn guid_for_slot(&self, slot: u32) -> Option<PacketGuid> {
        self.table.get(slot as usize).map(|(guid, _)| *guid)
    }
}

impl DependencyResolver for TableResolver<'_> {
    fn resolve(&self, guid: &PacketGuid) -> Option<Arc<Packet>> {
        self.slots
            .get(guid)
            .and_then(|slot| self.table.get(*slot as usize))
            .map(|(_, packet)| packet.clone())
    }
}

/// Reads framed packets, maintaining the dependency table and skipping
/// past damage.
pub struct PacketStreamReader<R: Read> {
    frames: FrameReader<R>,
    registry: PacketRegistry,
    table: Vec<(PacketGuid, Arc<Packet>)>,
    slots: HashMap<PacketGuid, u32>,
    codec_failures: u64,
    decode_unknown_as_opaque: bool,
}

impl<R: Read> PacketStreamReader<R> {
    pub fn new(source: R, registry: PacketRegistry) -> Self {
        Self {
            frames: FrameReader::new(source),
            registry,
            table: Vec::new(),
            slots: HashMap::new(),
            codec_failures: 0,
            decode_unknown_as_opaque: false,
        }
    }

    /// Opt in to preserving unknown packet types as [`Packet::Opaque`]
    /// instead of counting them as corrupt.
    pub fn with_opaque_fallback(mut self) -> Self {
        self.decode_unknown_as_opaque = true;
        self
    }

    /// Next decodable packet, or `None` at end of stream.
    ///
    /// Frames that fail CRC or decoding are counted and skipped; only I/O
    /// failures on the underlying source abort the read.
    pub fn next_packet(&mut self) -> Result<Option<Arc<Packet>>> {
        loop {
            let Some(body) = self.frames.next_frame()? else {
                return Ok(None);
            };

            let resolver = TableResolver {
                table: &self.table,
                slots: &self.slots,
            };
            let outcome = decode_body(&body, &resolver).and_then(|record| {
                if self.decode_unknown_as_opaque && !self.registry.is_registered(&record.type_name)
                {
                    Ok(self.registry.decode_opaque(&record))
                } else {
                    self.registry.decode(&record, &resolver)
                }
            });

            match outcome {
                Ok(packet) => {
                    let packet = Arc::new(packet);
                    if let Some(guid) = packet.cache_id() {
                        match self.slots.get(&guid) {
                            // Update, not duplicate: the slot keeps its
                            // position so existing references stay valid.
                            Some(&slot) => self.table[slot as usize].1 = packet.clone(),
                            None => {
                                let slot = self.table.len() as u32;
                                self.slots.insert(guid, slot);
                                self.table.push((guid, packet.clone()));
                            }
                        }
                    }
                    return Ok(Some(packet));
                }
                Err(LoggerheadError::Codec(err)) => {
                    self.codec_failures += 1;
                    tracing::warn!(error = %err, "skipping undecodable packet");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Damaged or undecodable packets skipped so far.
    pub fn corrupt_packet_count(&self) -> u64 {
        self.frames.corrupt_runs() + self.codec_failures
    }

    /// True when the stream ended mid-frame (crash tail).
    pub fn truncated(&self) -> bool {
        self.frames.truncated()
    }

    /// Latest decoded value of a cached packet.
    pub fn resolve_cached(&self, guid: &PacketGuid) -> Option<Arc<Packet>> {
        self.slots
            .get(guid)
            .and_then(|slot| self.table.get(*slot as usize))
            .map(|(_, packet)| packet.clone())
    }

    /// Number of distinct cached identities seen.
    pub fn cached_count(&self) -> usize {
        self.table.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
