use std::fmt;

/// The state of a single stream's ICE connection, as tracked internally by
/// the checklist scheduler. This is finer-grained than the three-valued
/// `SessionState` surfaced to callers via `on_session_state`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unspecified,

    /// ICE agent is gathering addresses.
    New,

    /// ICE agent has been given local and remote candidates, and is attempting to find a match.
    Checking,

    /// ICE agent has a pairing, but is still checking other pairs.
    Connected,

    /// ICE agent has finished.
    Completed,

    /// ICE agent never could successfully connect.
    Failed,

    /// ICE agent connected successfully, but has entered a failed state.
    Disconnected,

    /// ICE agent has finished and is no longer handling requests.
    Closed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Unspecified => "Unspecified",
            Self::New => "New",
            Self::Checking => "Checking",
            Self::Connected => "Connected",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Disconnected => "Disconnected",
            Self::Closed => "Closed",
        };
        write!(f, "{s}")
    }
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::New,
            2 => Self::Checking,
            3 => Self::Connected,
            4 => Self::Completed,
            5 => Self::Failed,
            6 => Self::Disconnected,
            7 => Self::Closed,
            _ => Self::Unspecified,
        }
    }
}

/// The three-valued session state surfaced to callers via `on_session_state`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Per-stream sub-state for the three fused subsystems (STUN checklist, DTLS
/// handshake, SRTP installation). A stream is `completed` only once all three
/// read `Completed`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SubState {
    #[default]
    Pending,
    Completed,
}

/// DTLS role negotiated for a stream (section 3: `active/passive/actpass→
/// derived`). `Actpass` only ever appears in an offer; it is resolved to
/// `Active` or `Passive` once the answer is known and is never stored on a
/// `Stream` past that point.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsRole {
    Active,
    Passive,
}

impl fmt::Display for DtlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Active => "active",
            Self::Passive => "passive",
        };
        write!(f, "{s}")
    }
}
