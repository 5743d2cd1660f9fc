use std::time::Duration;

use crate::candidate::CandidateType;
use crate::session::{
    DEFAULT_CONNECTIVITY_PACE, DEFAULT_NOMINATE_START, DEFAULT_SESSION_TIMEOUT,
    DEFAULT_TRICKLING_START,
};
use crate::stream::DEFAULT_CHECK_INTERVAL;
use crate::url::*;

/// The interval used to keep candidates alive.
pub(crate) const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// The default time till a stream transitions to disconnected.
pub(crate) const DEFAULT_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(5);

/// The default time till a stream transitions to failed after disconnected.
pub(crate) const DEFAULT_FAILED_TIMEOUT: Duration = Duration::from_secs(25);

/// GC horizon for certificate-bound DTLS cookies (section 4.7).
pub(crate) const DEFAULT_TRANSACTION_LIFETIME: Duration = Duration::from_secs(5 * 60);

pub(crate) fn default_candidate_types() -> Vec<CandidateType> {
    vec![
        CandidateType::Host,
        CandidateType::ServerReflexive,
        CandidateType::Relay,
    ]
}

/// DTLS surface of the configuration table (section 6.1): certificate/key
/// material and the SRTP profiles this agent is willing to negotiate. The
/// certificate and key themselves are supplied as DER bytes rather than file
/// paths, since this crate never touches the filesystem.
#[derive(Default, Clone)]
pub struct DtlsConfig {
    pub certificate_der: Vec<u8>,
    pub private_key_der: Vec<u8>,
    /// RFC 8122 fingerprint algorithm name, e.g. `"sha-256"`.
    pub fingerprint_algorithm: String,
    pub srtp_profiles: Vec<String>,
    pub insecure_skip_verify: bool,
}

/// Collects the arguments to `ice::Agent` construction into a single
/// structure (section 6.1), following the teacher's `AgentConfig` shape with
/// mDNS removed (out of scope per the non-goals) and the per-candidate-type
/// acceptance waits replaced by the session-wide `nominate_timeout`, since
/// nomination now gates on `CandidatePair::is_nominatable` (`success_count >=
/// 5`) rather than a per-type clock.
#[derive(Default)]
pub struct AgentConfig {
    pub urls: Vec<Url>,

    /// An optional configuration for disabling or enabling support for specific candidate types.
    pub candidate_types: Vec<CandidateType>,

    /// lite agents do not perform connectivity check and only provide host candidates.
    pub lite: bool,

    pub dtls: DtlsConfig,

    /// Controls how often the checklist scheduler runs per stream once
    /// connectivity checks have started.
    pub check_interval: Duration,

    /// Defaults to 5 seconds. If the duration is 0, a stream never goes to disconnected.
    pub disconnected_timeout: Option<Duration>,

    /// Defaults to 25 seconds. If the duration is 0, a stream never goes to failed.
    pub failed_timeout: Option<Duration>,

    /// Determines how often keepalives are sent on the selected pair.
    /// A keepalive interval of 0 means keepalives are never sent.
    pub keepalive_interval: Option<Duration>,

    /// Connectivity-check pacing interval shared by every stream in a session.
    pub connectivity_pace: Option<Duration>,

    /// Delay after session start before trickled candidates are emitted.
    pub trickling_start: Option<Duration>,

    /// Delay after stream start before the controlling side may nominate.
    pub nominate_start: Option<Duration>,

    /// Overall per-session timeout; exceeding it without completing fails the session.
    pub session_timeout: Option<Duration>,

    /// GC horizon for DTLS cookie / transaction bookkeeping.
    pub transaction_lifetime: Option<Duration>,
}

impl AgentConfig {
    pub(crate) fn check_interval(&self) -> Duration {
        if self.check_interval.is_zero() {
            DEFAULT_CHECK_INTERVAL
        } else {
            self.check_interval
        }
    }

    pub(crate) fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval.unwrap_or(DEFAULT_KEEPALIVE_INTERVAL)
    }

    pub(crate) fn disconnected_timeout(&self) -> Duration {
        self.disconnected_timeout.unwrap_or(DEFAULT_DISCONNECTED_TIMEOUT)
    }

    pub(crate) fn failed_timeout(&self) -> Duration {
        self.failed_timeout.unwrap_or(DEFAULT_FAILED_TIMEOUT)
    }

    pub(crate) fn connectivity_pace(&self) -> Duration {
        self.connectivity_pace.unwrap_or(DEFAULT_CONNECTIVITY_PACE)
    }

    pub(crate) fn trickling_start(&self) -> Duration {
        self.trickling_start.unwrap_or(DEFAULT_TRICKLING_START)
    }

    pub(crate) fn nominate_start(&self) -> Duration {
        self.nominate_start.unwrap_or(DEFAULT_NOMINATE_START)
    }

    pub(crate) fn session_timeout(&self) -> Duration {
        self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT)
    }

    pub(crate) fn transaction_lifetime(&self) -> Duration {
        self.transaction_lifetime.unwrap_or(DEFAULT_TRANSACTION_LIFETIME)
    }

    pub(crate) fn candidate_types(&self) -> Vec<CandidateType> {
        if self.candidate_types.is_empty() {
            default_candidate_types()
        } else {
            self.candidate_types.clone()
        }
    }
}
