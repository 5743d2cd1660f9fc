use serde::Serialize;
use std::fmt;

/// ICE candidate pair state (section 4.4), with `Frozen` as the initial
/// state per RFC 8445 section 6.1.2.1 — unlike a flatter design that starts
/// pairs directly at `Waiting`, foundation-based freezing requires a
/// distinct frozen state that `Stream::unfreeze` later promotes out of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    #[serde(rename = "frozen")]
    Frozen,

    /// A check has not been performed for this pair.
    #[serde(rename = "waiting")]
    Waiting,

    /// A check has been sent for this pair, but the transaction is in progress.
    #[serde(rename = "in-progress")]
    InProgress,

    /// A check for this pair was already done and failed, either never
    /// producing any response or producing an unrecoverable failure response.
    #[serde(rename = "failed")]
    Failed,

    /// A check for this pair was already done and produced a successful result.
    #[serde(rename = "succeeded")]
    Succeeded,
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        };
        write!(f, "{s}")
    }
}

/// Maximum outstanding retransmissions for a single pair's connectivity
/// check before it is declared `Failed` (section 5, "Timeouts").
pub const MAX_PROGRESS_COUNT: u16 = 100;

/// A `(local, remote)` candidate pairing undergoing checking. Local and
/// remote candidates are referenced by index into the owning `Stream`'s
/// candidate arenas rather than borrowed directly, following the
/// arena-plus-index scheme of section 9.
#[derive(Clone, Copy)]
pub struct CandidatePair {
    pub local_index: usize,
    pub remote_index: usize,
    pub local_priority: u32,
    pub remote_priority: u32,
    pub(crate) ice_role_controlling: bool,
    pub(crate) binding_request_count: u16,
    pub(crate) progress_count: u16,
    pub(crate) success_count: u16,
    pub state: CandidatePairState,
    pub nominated: bool,
}

impl fmt::Debug for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {}) [{}]",
            self.priority(),
            self.local_priority,
            self.local_index,
            self.remote_index,
            self.remote_priority,
            self.state,
        )
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local_index == other.local_index && self.remote_index == other.remote_index
    }
}

impl CandidatePair {
    #[must_use]
    pub fn new(
        local_index: usize,
        remote_index: usize,
        local_priority: u32,
        remote_priority: u32,
        ice_role_controlling: bool,
    ) -> Self {
        Self {
            local_index,
            remote_index,
            local_priority,
            remote_priority,
            ice_role_controlling,
            state: CandidatePairState::Frozen,
            binding_request_count: 0,
            progress_count: 0,
            success_count: 0,
            nominated: false,
        }
    }

    /// RFC 8445 section 6.1.2.3 "Computing Pair Priority and Ordering Pairs".
    /// Let G be the priority for the candidate provided by the controlling
    /// agent, D the priority for the candidate provided by the controlled
    /// agent: `priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)`.
    #[must_use]
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.ice_role_controlling {
            (self.local_priority, self.remote_priority)
        } else {
            (self.remote_priority, self.local_priority)
        };

        (1u64 << 32) * u64::from(std::cmp::min(g, d))
            + 2 * u64::from(std::cmp::max(g, d))
            + u64::from(g > d)
    }

    /// Eligible for nomination once `success_count` reaches the threshold
    /// named in section 4.4 ("regular nomination").
    #[must_use]
    pub fn is_nominatable(&self) -> bool {
        self.success_count >= 5
    }
}
