//! Identity, time, and severity primitives shared across the agent.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CodecError, Result};

// ----------------------------------------------------------------------------
// Packet Identity
// ----------------------------------------------------------------------------

/// Stable identity of a cached packet.
///
/// Cached packets (session headers, thread descriptors, metric definitions)
/// carry a GUID that survives re-serialization: a later packet with the same
/// GUID replaces the earlier one rather than duplicating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketGuid(Uuid);

impl PacketGuid {
    pub const SIZE: usize = 16;

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build from raw wire bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get the raw wire bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PacketGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one capture session.
///
/// A session id doubles as the GUID of the session header packet, so the
/// header participates in cached-packet replacement like any other cached
/// packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// The session header packet's cached identity.
    pub fn as_packet_guid(&self) -> PacketGuid {
        PacketGuid(self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(millis)
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier` is
    /// in the future.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

// ----------------------------------------------------------------------------
// Severity
// ----------------------------------------------------------------------------

/// Message severity.
///
/// The numeric values are a wire-compatibility contract and the ordering is
/// INVERTED: a lower number means a more severe message (`Critical` = 1,
/// `Verbose` = 16). Never compare severities with raw integer operators;
/// use [`Severity::is_at_least`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Severity {
    /// Unrecoverable failure of the host application.
    Critical = 1,
    /// An operation failed.
    Error = 2,
    /// Something suspicious but survivable.
    Warning = 4,
    /// Routine informational message.
    Information = 8,
    /// High-volume diagnostic chatter.
    Verbose = 16,
}

impl Severity {
    /// Convert from the raw wire value.
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Severity::Critical),
            2 => Ok(Severity::Error),
            4 => Ok(Severity::Warning),
            8 => Ok(Severity::Information),
            16 => Ok(Severity::Verbose),
            _ => Err(CodecError::InvalidSeverity(value).into()),
        }
    }

    /// Convert to the raw wire value.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// True when `self` is at least as severe as `threshold`.
    ///
    /// This is the only sanctioned severity comparison: because the numeric
    /// ordering is inverted, "at least as severe" means numerically less
    /// than or equal.
    pub const fn is_at_least(self, threshold: Severity) -> bool {
        (self as i32) <= (threshold as i32)
    }

    /// The more severe of two severities.
    pub const fn escalate(self, other: Severity) -> Severity {
        if other.is_at_least(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "information",
            Severity::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Session Description
// ----------------------------------------------------------------------------

/// Static facts about the application a session captures.
///
/// Collected once at `start_session` and embedded in the session header
/// packet of every file the session produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Product family, e.g. "Contoso Suite".
    pub product: String,
    /// Application within the product, e.g. "Billing Service".
    pub application: String,
    /// Application version string.
    pub version: String,
    /// Deployment environment, e.g. "production".
    pub environment: String,
    /// Hostname of the capturing machine.
    pub host: String,
    /// Operating system description.
    pub os: String,
    /// Version of the capturing agent itself.
    pub agent_version: String,
}

impl SessionInfo {
    /// Build a description with host/os/agent fields filled from the
    /// current process environment.
    pub fn new(
        product: impl Into<String>,
        application: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            product: product.into(),
            application: application.into(),
            version: version.into(),
            environment: String::new(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into()),
            os: std::env::consts::OS.into(),
            agent_version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
