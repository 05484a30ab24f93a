//! Network command messages exchanged between agent and viewer/server.
//!
//! Commands are a closed set of typed, versioned messages. Each kind has a
//! numeric code that is stable across versions; payload layout may evolve
//! behind the version number, with the same read-every-shipped-version
//! discipline packets follow.
//!
//! Commands share the live channel with packet frames. A command body is
//! marked by a leading sentinel word that can never begin a packet body
//! (a packet body starts with its type-name length, which is always small).

use std::io::{Read, Write};

use crate::errors::{CodecError, Result};
use crate::packet::codec::{FieldReader, FieldWriter};
use crate::packet::framing::{write_frame, FrameReader};
use crate::packet::SessionStatus;
use crate::types::{PacketGuid, SessionId, Timestamp};

/// Leading word distinguishing command bodies from packet bodies.
pub const COMMAND_SENTINEL: u32 = 0xFFFF_FFFF;

// ----------------------------------------------------------------------------
// Command Messages
// ----------------------------------------------------------------------------

/// Control messages for the live-view channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMessage {
    /// Viewer asks the agent to start streaming packets.
    StartLiveView {
        viewer_id: PacketGuid,
        session_id: SessionId,
    },
    /// Viewer no longer wants the stream.
    StopLiveView { viewer_id: PacketGuid },
    /// Server asks the agent to submit the named session for collection.
    RequestSessionSend { session_id: SessionId },
    /// Agent announces a session has ended.
    SessionClosedNotice {
        session_id: SessionId,
        status: SessionStatus,
    },
    /// Round-trip time probe; the receiver echoes it back with
    /// `echoed_at` stamped.
    ClockDriftProbe {
        sent_at: Timestamp,
        echoed_at: Timestamp,
    },
    /// Suspend packet transmission without closing the channel.
    PauseHeaderStream,
    /// Resume packet transmission.
    ResumeHeaderStream,
}

impl CommandMessage {
    pub const CODE_START_LIVE_VIEW: u32 = 1;
    pub const CODE_STOP_LIVE_VIEW: u32 = 2;
    pub const CODE_REQUEST_SESSION_SEND: u32 = 3;
    pub const CODE_SESSION_CLOSED: u32 = 4;
    pub const CODE_CLOCK_DRIFT_PROBE: u32 = 5;
    pub const CODE_PAUSE_HEADER_STREAM: u32 = 6;
    pub const CODE_RESUME_HEADER_STREAM: u32 = 7;

    /// The numeric type code, stable across versions.
    pub const fn code(&self) -> u32 {
        match self {
            CommandMessage::StartLiveView { .. } => Self::CODE_START_LIVE_VIEW,
            CommandMessage::StopLiveView { .. } => Self::CODE_STOP_LIVE_VIEW,
            CommandMessage::RequestSessionSend { .. } => Self::CODE_REQUEST_SESSION_SEND,
            CommandMessage::SessionClosedNotice { .. } => Self::CODE_SESSION_CLOSED,
            CommandMessage::ClockDriftProbe { .. } => Self::CODE_CLOCK_DRIFT_PROBE,
            CommandMessage::PauseHeaderStream => Self::CODE_PAUSE_HEADER_STREAM,
            CommandMessage::ResumeHeaderStream => Self::CODE_RESUME_HEADER_STREAM,
        }
    }

    /// Version this build writes for each kind.
    pub const fn version(&self) -> u16 {
        1
    }

    /// Encode to a command body (sentinel + code + version + payload).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        let mut writer = FieldWriter::new(&mut out);
        writer.put_u32(COMMAND_SENTINEL);
        writer.put_u32(self.code());
        writer.put_u16(self.version());

        match self {
            CommandMessage::StartLiveView {
                viewer_id,
                session_id,
            } => {
                writer.put_guid(viewer_id);
                writer.put_guid(&session_id.as_packet_guid());
            }
            CommandMessage::StopLiveView { viewer_id } => {
                writer.put_guid(viewer_id);
            }
            CommandMessage::RequestSessionSend { session_id } => {
                writer.put_guid(&session_id.as_packet_guid());
            }
            CommandMessage::SessionClosedNotice { session_id, status } => {
                writer.put_guid(&session_id.as_packet_guid());
                writer.put_i32(status.as_i32());
            }
            CommandMessage::ClockDriftProbe { sent_at, echoed_at } => {
                writer.put_u64(sent_at.as_millis());
                writer.put_u64(echoed_at.as_millis());
            }
            CommandMessage::PauseHeaderStream | CommandMessage::ResumeHeaderStream => {}
        }

        out
    }

    /// True when a frame body is a command rather than a packet.
    pub fn is_command_body(body: &[u8]) -> bool {
        body.len() >= 4 && body[..4] == COMMAND_SENTINEL.to_be_bytes()
    }

    /// Decode a command body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(body);
        let sentinel = reader.get_u32()?;
        if sentinel != COMMAND_SENTINEL {
            return Err(CodecError::frame("not a command body").into());
        }
        let code = reader.get_u32()?;
        let version = reader.get_u16()?;
        if version != 1 {
            return Err(CodecError::UnsupportedVersion {
                type_name: format!("command #{code}"),
                version,
                newest: 1,
            }
            .into());
        }

        let message = match code {
            Self::CODE_START_LIVE_VIEW => CommandMessage::StartLiveView {
                viewer_id: reader.get_guid()?,
                session_id: SessionId::from_bytes(*reader.get_guid()?.as_bytes()),
            },
            Self::CODE_STOP_LIVE_VIEW => CommandMessage::StopLiveView {
                viewer_id: reader.get_guid()?,
            },
            Self::CODE_REQUEST_SESSION_SEND => CommandMessage::RequestSessionSend {
                session_id: SessionId::from_bytes(*reader.get_guid()?.as_bytes()),
            },
            Self::CODE_SESSION_CLOSED => CommandMessage::SessionClosedNotice {
                session_id: SessionId::from_bytes(*reader.get_guid()?.as_bytes()),
                status: SessionStatus::from_i32(reader.get_i32()?)?,
            },
            Self::CODE_CLOCK_DRIFT_PROBE => CommandMessage::ClockDriftProbe {
                sent_at: Timestamp::from_millis(reader.get_u64()?),
                echoed_at: Timestamp::from_millis(reader.get_u64()?),
            },
            Self::CODE_PAUSE_HEADER_STREAM => CommandMessage::PauseHeaderStream,
            Self::CODE_RESUME_HEADER_STREAM => CommandMessage::ResumeHeaderStream,
            unknown => return Err(CodecError::UnknownCommand(unknown).into()),
        };

        Ok(message)
    }

    /// Frame and write this command to a stream.
    pub fn write<W: Write>(&self, out: &mut W) -> Result<usize> {
        write_frame(out, &self.encode())
    }

    /// Read the next command frame, skipping non-command frames.
    pub fn read<R: Read>(frames: &mut FrameReader<R>) -> Result<Option<Self>> {
        loop {
            let Some(body) = frames.next_frame()? else {
                return Ok(None);
            };
            if Self::is_command_body(&body) {
                return Ok(Some(Self::decode(&body)?));
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
