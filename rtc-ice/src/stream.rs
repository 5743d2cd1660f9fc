//! Media stream within a session (section 4.5): owns bases, local/remote
//! candidates, checklist (ordered pairs, triggered-check queue, valid list),
//! per-stream credentials, DTLS role and SRTP sub-state.
//!
//! This is the direct descendant of the teacher's flat single-checklist
//! `Agent`: a session with exactly one stream behaves identically to the
//! teacher's original `rtc-ice::agent::Agent`. What changes is that a
//! `Session` can now own several `Stream`s, each with its own checklist, and
//! that pairs start `Frozen` rather than `Waiting` until the foundation-based
//! unfreezing algorithm promotes them (section 4.6).

#[cfg(test)]
mod stream_test;

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, error, trace, warn};
use stun::attributes::*;
use stun::message::*;

use stun::error_code::ErrorCode;
use stun::xoraddr::XorMappedAddress;

use crate::base::Base;
use crate::candidate::candidate_pair::{CandidatePair, CandidatePairState, MAX_PROGRESS_COUNT};
use crate::candidate::candidate_peer_reflexive::CandidatePeerReflexiveConfig;
use crate::candidate::{Candidate, CandidateConfig, CandidateType};
use crate::dtls::{DtlsEngine, DtlsProgress, SrtpKeyingMaterial};
use crate::network_type::NetworkType;
use crate::state::{DtlsRole, SubState};
use crate::wire;
use shared::error::*;
use shared::{TransportContext, TransportMessage, TransportProtocol};

/// Wait before nominating, per section 4.6 (`nominate_start`).
pub const DEFAULT_NOMINATE_TIMEOUT: Duration = Duration::from_millis(500);
/// section 4.6 (`trickling_start`).
pub const DEFAULT_TRICKLE_TIMEOUT: Duration = Duration::from_millis(50);
pub(crate) const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub(crate) struct BindingRequest {
    pub(crate) timestamp: Instant,
    pub(crate) transaction_id: TransactionId,
    pub(crate) destination: SocketAddr,
    pub(crate) is_use_candidate: bool,
    /// The `PRIORITY` this request carried (section 7.1.1): if the peer's
    /// success response maps us to an address that isn't our local
    /// candidate, this is the priority the synthesised peer-reflexive local
    /// candidate is given (section 4.4 `in-progress -> succeeded`, S2).
    pub(crate) priority: u32,
}

impl Default for BindingRequest {
    fn default() -> Self {
        Self {
            timestamp: Instant::now(),
            transaction_id: TransactionId::default(),
            destination: SocketAddr::new(Ipv4Addr::new(0, 0, 0, 0).into(), 0),
            is_use_candidate: false,
            priority: 0,
        }
    }
}

#[derive(Default, Clone)]
pub struct Credentials {
    pub ufrag: String,
    pub pwd: String,
}

/// Emitted by a `Stream` for its owning `Session` to act on; unlike
/// `agent::Event` (which crosses the public API boundary), these never leave
/// the `Session`.
pub(crate) enum StreamEvent {
    /// An inbound message carried the peer's role attribute and it
    /// contradicts ours; carries the peer's tiebreaker so the session can
    /// run RFC 8445 7.3.1.1 and, if it loses, flip every stream's role.
    RoleConflict(u64),
    SelectedPairChanged,
    NewLocalCandidate(usize),
    /// The DTLS handshake on the selected pair finished (section 4.1
    /// `ExportSrtpKeys`, S5): the owning `Session` installs the keying
    /// material into its SRTP context keyed by this stream's SSRCs.
    DtlsComplete(SrtpKeyingMaterial),
}

/// A media stream's checklist and candidate state (section 4.5).
pub struct Stream {
    pub index: usize,

    pub(crate) tie_breaker: u64,
    pub(crate) is_controlling: bool,
    pub(crate) start_time: Instant,

    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,
    pub(crate) remote_credentials: Option<Credentials>,

    pub(crate) bases: Vec<Base>,
    pub(crate) local_candidates: Vec<Candidate>,
    pub(crate) remote_candidates: Vec<Candidate>,
    pub(crate) candidate_pairs: Vec<CandidatePair>,

    /// FIFO of pair indices awaiting a retriggered check (section 3).
    pub(crate) trigger: VecDeque<usize>,
    /// Pairs that produced a symmetric STUN success response (append-only).
    pub(crate) valid: Vec<usize>,

    pub(crate) nominated_pair: Option<usize>,
    pub(crate) selected_pair: Option<usize>,

    pub(crate) dtls_role: Option<DtlsRole>,
    pub(crate) stun_state: SubState,
    pub(crate) dtls_state: SubState,
    pub(crate) srtp_state: SubState,
    /// This stream's stable local SSRC (section 3 `Stream`): inbound SRTP is
    /// rewritten to carry this value regardless of the remote's own SSRC
    /// (section 4.3 point 4).
    pub(crate) local_ssrc: u32,
    pub(crate) remote_ssrc: u32,

    pub(crate) local_gathered: bool,
    pub(crate) remote_gathered: bool,
    pub(crate) trickled: usize,

    pub(crate) pending_binding_requests: Vec<BindingRequest>,

    pub(crate) nominate_timeout: Duration,
    pub(crate) check_interval: Duration,
    pub(crate) keepalive_interval: Duration,
    pub(crate) disconnected_timeout: Duration,
    pub(crate) failed_timeout: Duration,
    pub(crate) last_checking_time: Instant,

    pub(crate) transmits: VecDeque<TransportMessage<BytesMut>>,
    pub(crate) events: VecDeque<StreamEvent>,
}

impl Stream {
    pub fn new(
        index: usize,
        tie_breaker: u64,
        is_controlling: bool,
        local_ufrag: String,
        local_pwd: String,
    ) -> Result<Self> {
        if local_ufrag.len() * 8 < 24 {
            return Err(Error::ErrLocalUfragInsufficientBits);
        }
        if local_pwd.len() * 8 < 128 {
            return Err(Error::ErrLocalPwdInsufficientBits);
        }

        Ok(Self {
            index,
            tie_breaker,
            is_controlling,
            start_time: Instant::now(),
            local_ufrag,
            local_pwd,
            remote_credentials: None,
            bases: Vec::new(),
            local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            candidate_pairs: Vec::new(),
            trigger: VecDeque::new(),
            valid: Vec::new(),
            nominated_pair: None,
            selected_pair: None,
            dtls_role: None,
            stun_state: SubState::Pending,
            dtls_state: SubState::Pending,
            srtp_state: SubState::Pending,
            local_ssrc: rand::random(),
            remote_ssrc: 0,
            local_gathered: false,
            remote_gathered: false,
            trickled: 0,
            pending_binding_requests: Vec::new(),
            nominate_timeout: DEFAULT_NOMINATE_TIMEOUT,
            check_interval: DEFAULT_CHECK_INTERVAL,
            keepalive_interval: Duration::from_secs(2),
            disconnected_timeout: Duration::from_secs(5),
            failed_timeout: Duration::from_secs(25),
            last_checking_time: Instant::now(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    pub fn local_credentials(&self) -> Credentials {
        Credentials {
            ufrag: self.local_ufrag.clone(),
            pwd: self.local_pwd.clone(),
        }
    }

    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) -> Result<()> {
        if ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if pwd.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }
        self.remote_credentials = Some(Credentials { ufrag, pwd });
        Ok(())
    }

    pub fn set_role(&mut self, is_controlling: bool, tie_breaker: u64) {
        self.is_controlling = is_controlling;
        self.tie_breaker = tie_breaker;
        // Role change: recompute priorities, re-order (section 4.5).
        for p in &mut self.candidate_pairs {
            p.ice_role_controlling = is_controlling;
        }
        self.candidate_pairs
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Binds a new local base and its host candidate.
    pub fn add_local_base(&mut self, local_addr: SocketAddr) -> Result<usize> {
        let (mut base, config) = Base::new(local_addr)?;
        let candidate = crate::candidate::candidate_host::CandidateHostConfig {
            base_config: config,
        }
        .new_candidate_host()?;
        let candidate_index = self.push_local_candidate(candidate)?;
        base.push_candidate(candidate_index);
        self.bases.push(base);
        Ok(candidate_index)
    }

    fn push_local_candidate(&mut self, c: Candidate) -> Result<usize> {
        for existing in &self.local_candidates {
            if *existing == c {
                return Err(Error::ErrCandidateIpNotFound);
            }
        }
        self.local_candidates.push(c);
        let local_index = self.local_candidates.len() - 1;
        for remote_index in 0..self.remote_candidates.len() {
            self.add_pair(local_index, remote_index);
        }
        self.events
            .push_back(StreamEvent::NewLocalCandidate(local_index));
        Ok(local_index)
    }

    pub fn add_local_candidate(&mut self, c: Candidate) -> Result<()> {
        self.push_local_candidate(c)?;
        Ok(())
    }

    pub fn add_remote_candidate(&mut self, c: Candidate) -> Result<()> {
        for existing in &self.remote_candidates {
            if *existing == c {
                return Ok(());
            }
        }
        self.remote_candidates.push(c);
        let remote_index = self.remote_candidates.len() - 1;
        for local_index in 0..self.local_candidates.len() {
            self.add_pair(local_index, remote_index);
        }
        self.unfreeze_foundations();
        Ok(())
    }

    pub(crate) fn add_pair(&mut self, local_index: usize, remote_index: usize) {
        if self.find_pair(local_index, remote_index).is_some() {
            return;
        }
        let p = CandidatePair::new(
            local_index,
            remote_index,
            self.local_candidates[local_index].priority(),
            self.remote_candidates[remote_index].priority(),
            self.is_controlling,
        );
        self.candidate_pairs.push(p);
        self.candidate_pairs
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub(crate) fn find_pair(&self, local_index: usize, remote_index: usize) -> Option<usize> {
        self.candidate_pairs
            .iter()
            .position(|p| p.local_index == local_index && p.remote_index == remote_index)
    }

    /// Foundation-based unfreezing (section 4.6): per `(local.foundation,
    /// remote.foundation)` group, the highest-priority `Frozen` pair is
    /// promoted to `Waiting`, unless some pair in that group already left
    /// `Frozen`.
    pub(crate) fn unfreeze_foundations(&mut self) {
        let mut unfrozen_groups: HashSet<(String, String)> = HashSet::new();
        for p in &self.candidate_pairs {
            if p.state != CandidatePairState::Frozen {
                unfrozen_groups.insert(self.foundation_pair(p));
            }
        }

        let mut best_per_group: HashMap<(String, String), usize> = HashMap::new();
        for (idx, p) in self.candidate_pairs.iter().enumerate() {
            if p.state != CandidatePairState::Frozen {
                continue;
            }
            let key = self.foundation_pair(p);
            if unfrozen_groups.contains(&key) {
                continue;
            }
            match best_per_group.get(&key) {
                Some(&best_idx) if self.candidate_pairs[best_idx].priority() >= p.priority() => {}
                _ => {
                    best_per_group.insert(key, idx);
                }
            }
        }

        for idx in best_per_group.into_values() {
            self.candidate_pairs[idx].state = CandidatePairState::Waiting;
        }
    }

    fn foundation_pair(&self, p: &CandidatePair) -> (String, String) {
        (
            self.local_candidates[p.local_index].foundation(),
            self.remote_candidates[p.remote_index].foundation(),
        )
    }

    /// Trickling (section 4.5): successfully gathered, not-yet-trickled
    /// local candidates, oldest first.
    pub fn poll_new_local_candidate(&mut self) -> Option<&Candidate> {
        if self.trickled < self.local_candidates.len() {
            let c = &self.local_candidates[self.trickled];
            self.trickled += 1;
            Some(c)
        } else {
            None
        }
    }

    pub fn state_completed(&self) -> bool {
        self.stun_state == SubState::Completed
            && self.dtls_state == SubState::Completed
            && self.srtp_state == SubState::Completed
    }

    pub fn state_failed(&self) -> bool {
        let checklist_exhausted = self.local_gathered
            && self.remote_gathered
            && !self.candidate_pairs.is_empty()
            && self
                .candidate_pairs
                .iter()
                .all(|p| p.state == CandidatePairState::Failed);
        checklist_exhausted || self.disconnected_past_failed_timeout()
    }

    /// A previously-selected pair that has gone silent longer than
    /// `disconnected_timeout + failed_timeout` is treated as failed rather
    /// than left connected forever (section 4.5 "connection state").
    fn disconnected_past_failed_timeout(&self) -> bool {
        let Some(pair_index) = self.selected_pair else {
            return false;
        };
        let p = self.candidate_pairs[pair_index];
        let Some(last_received) = self.remote_candidates[p.remote_index].last_received else {
            return false;
        };
        if self.disconnected_timeout.is_zero() || self.failed_timeout.is_zero() {
            return false;
        }
        Instant::now().duration_since(last_received) > self.disconnected_timeout + self.failed_timeout
    }

    fn get_name(&self) -> &'static str {
        if self.is_controlling {
            "controlling"
        } else {
            "controlled"
        }
    }

    pub(crate) fn get_best_available_pair(&self) -> Option<usize> {
        self.candidate_pairs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state != CandidatePairState::Failed)
            .max_by_key(|(_, p)| p.priority())
            .map(|(idx, _)| idx)
    }

    pub(crate) fn get_best_valid_pair(&self) -> Option<usize> {
        self.valid
            .iter()
            .copied()
            .max_by_key(|&idx| self.candidate_pairs[idx].priority())
    }

    pub(crate) fn set_selected_pair(&mut self, pair_index: Option<usize>) {
        if let Some(pair_index) = pair_index {
            trace!(
                "[{}]: set selected candidate pair: {}",
                self.get_name(),
                self.candidate_pairs[pair_index]
            );
            self.candidate_pairs[pair_index].nominated = true;
            self.selected_pair = Some(pair_index);
            self.stun_state = SubState::Completed;
            self.events.push_back(StreamEvent::SelectedPairChanged);
        } else {
            self.selected_pair = None;
        }
    }

    pub fn set_dtls_role(&mut self, role: DtlsRole) {
        self.dtls_role = Some(role);
    }

    pub fn set_remote_ssrc(&mut self, ssrc: u32) {
        self.remote_ssrc = ssrc;
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    /// Every pair's DTLS association is addressed by this stream's index;
    /// at most one pair per stream is ever selected (section 3 `Stream`
    /// invariant), so a stream never needs more than one live association.
    fn dtls_token(&self) -> u64 {
        self.index as u64
    }

    fn drain_dtls_transmits(&mut self, engine: &mut dyn DtlsEngine) {
        let Some(pair_index) = self.selected_pair else {
            return;
        };
        let remote_index = self.candidate_pairs[pair_index].remote_index;
        let local_index = self.candidate_pairs[pair_index].local_index;
        while let Some(payload) = engine.poll_transmit(self.dtls_token()) {
            self.transmits.push_back(TransportMessage {
                now: Instant::now(),
                transport: TransportContext {
                    local_addr: self.local_candidates[local_index].addr(),
                    peer_addr: self.remote_candidates[remote_index].addr(),
                    ecn: None,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: BytesMut::from(&payload[..]),
            });
        }
    }

    /// Initiates the DTLS handshake once a pair is selected (section 4.4
    /// "if the stream's DTLS role is active, initiate DTLS connect";
    /// section 4.3 point 3 for the passive side, which instead waits to be
    /// fed the peer's ClientHello). A no-op once already started.
    pub(crate) fn drive_dtls(&mut self, engine: &mut dyn DtlsEngine) {
        if self.dtls_state != SubState::Pending || self.selected_pair.is_none() {
            return;
        }
        let Some(role) = self.dtls_role else {
            return;
        };
        let pair_index = self.selected_pair.expect("checked above");
        let remote_addr = self.remote_candidates[self.candidate_pairs[pair_index].remote_index].addr();
        let result = match role {
            DtlsRole::Active => engine.connect(self.dtls_token(), remote_addr),
            DtlsRole::Passive => engine.listen(self.dtls_token(), remote_addr),
        };
        if let Err(err) = result {
            warn!("[{}]: failed to start dtls handshake: {err}", self.get_name());
            return;
        }
        self.drain_dtls_transmits(engine);
    }

    /// Feeds one inbound datagram already classified as DTLS to this
    /// stream's association (section 4.3 point 3). On completion, exports
    /// keying material and raises `StreamEvent::DtlsComplete` for the
    /// owning `Session` to install into its SRTP context.
    pub(crate) fn feed_dtls(&mut self, engine: &mut dyn DtlsEngine, data: &[u8]) -> Result<()> {
        if self.dtls_state == SubState::Completed {
            return Ok(());
        }
        match engine.feed(self.dtls_token(), data)? {
            DtlsProgress::InProgress => {
                self.drain_dtls_transmits(engine);
            }
            DtlsProgress::Complete => {
                self.drain_dtls_transmits(engine);
                let keys = engine.export_keys(self.dtls_token())?;
                self.dtls_state = SubState::Completed;
                self.events.push_back(StreamEvent::DtlsComplete(keys));
            }
        }
        Ok(())
    }

    /// Marks SRTP as installed for this stream once the owning `Session`
    /// has pushed the exported keys into its SRTP context (section 4.5
    /// state reconciliation: `stun ∧ dtls ∧ srtp = completed`).
    pub(crate) fn mark_srtp_installed(&mut self) {
        self.srtp_state = SubState::Completed;
    }

    fn send_stun(&mut self, msg: &Message, local_index: usize, remote_index: usize) {
        let peer_addr = self.remote_candidates[remote_index].addr();
        let local_addr = self.local_candidates[local_index].addr();
        self.transmits.push_back(TransportMessage {
            now: Instant::now(),
            transport: TransportContext {
                local_addr,
                peer_addr,
                ecn: None,
                transport_protocol: TransportProtocol::UDP,
            },
            message: BytesMut::from(&msg.raw[..]),
        });
        self.local_candidates[local_index].seen(true);
    }

    fn send_binding_request(&mut self, m: &Message, local_index: usize, remote_index: usize) {
        self.invalidate_pending_binding_requests(Instant::now());
        self.pending_binding_requests.push(BindingRequest {
            timestamp: Instant::now(),
            transaction_id: m.transaction_id,
            destination: self.remote_candidates[remote_index].addr(),
            is_use_candidate: m.contains(ATTR_USE_CANDIDATE),
            priority: self.local_candidates[local_index].priority(),
        });
        self.send_stun(m, local_index, remote_index);
    }

    fn invalidate_pending_binding_requests(&mut self, now: Instant) {
        self.pending_binding_requests.retain(|r| {
            now.checked_duration_since(r.timestamp)
                .map(|d| d < Duration::from_secs(4))
                .unwrap_or(true)
        });
    }

    fn take_pending_binding_request(&mut self, id: TransactionId) -> Option<BindingRequest> {
        self.invalidate_pending_binding_requests(Instant::now());
        let i = self
            .pending_binding_requests
            .iter()
            .position(|r| r.transaction_id == id)?;
        Some(self.pending_binding_requests.remove(i))
    }

    fn find_remote_candidate(&self, addr: SocketAddr) -> Option<usize> {
        self.remote_candidates.iter().position(|c| c.addr() == addr)
    }

    pub(crate) fn find_local_candidate(&self, addr: SocketAddr) -> Option<usize> {
        self.local_candidates.iter().position(|c| c.addr() == addr)
    }

    fn ping_candidate(&mut self, local_index: usize, remote_index: usize, use_candidate: bool) {
        let Some(remote) = self.remote_credentials.clone() else {
            error!("ping_candidate with no remote credentials");
            return;
        };
        let username = format!("{}:{}", remote.ufrag, self.local_ufrag);
        let role = if self.is_controlling {
            wire::Role::Controlling(self.tie_breaker)
        } else {
            wire::Role::Controlled(self.tie_breaker)
        };
        match wire::build_binding_request(
            username,
            role,
            self.local_candidates[local_index].priority(),
            use_candidate,
            &remote.pwd,
        ) {
            Ok(msg) => self.send_binding_request(&msg, local_index, remote_index),
            Err(err) => error!("[{}]: failed to build binding request: {err}", self.get_name()),
        }
    }

    fn nominate_pair(&mut self) {
        let Some(pair_index) = self.nominated_pair else {
            return;
        };
        let p = self.candidate_pairs[pair_index];
        self.ping_candidate(p.local_index, p.remote_index, true);
    }

    /// One tick of the checklist scheduler (section 4.6 pacing): dequeue the
    /// trigger queue first, else drive waiting/in-progress pairs, else
    /// consider nomination, else maintain keepalives on the selected pair.
    pub(crate) fn tick(&mut self, now: Instant) {
        if let Some(pair_index) = self.trigger.pop_front() {
            let p = self.candidate_pairs[pair_index];
            self.candidate_pairs[pair_index].state = CandidatePairState::InProgress;
            self.ping_candidate(p.local_index, p.remote_index, p.nominated);
            return;
        }

        if self.selected_pair.is_some() {
            self.check_keepalive(now);
            return;
        }

        if self.nominated_pair.is_some() {
            self.nominate_pair();
            return;
        }

        if self.is_controlling {
            if let Some(pair_index) = self.get_best_valid_pair() {
                let p = self.candidate_pairs[pair_index];
                if p.is_nominatable()
                    && now.duration_since(self.start_time) > self.nominate_timeout
                {
                    trace!("[{}]: nominating pair {}", self.get_name(), p);
                    self.candidate_pairs[pair_index].nominated = true;
                    self.nominated_pair = Some(pair_index);
                    self.nominate_pair();
                    return;
                }
            }
        }

        self.ping_all_waiting(now);
    }

    fn ping_all_waiting(&mut self, _now: Instant) {
        let mut to_ping = Vec::new();
        for p in &mut self.candidate_pairs {
            match p.state {
                CandidatePairState::Waiting => p.state = CandidatePairState::InProgress,
                CandidatePairState::InProgress => {}
                _ => continue,
            }
            if p.progress_count >= MAX_PROGRESS_COUNT {
                p.state = CandidatePairState::Failed;
                continue;
            }
            p.progress_count += 1;
            to_ping.push((p.local_index, p.remote_index));
        }
        for (local, remote) in to_ping {
            self.ping_candidate(local, remote, false);
        }
    }

    fn check_keepalive(&mut self, now: Instant) {
        let Some(pair_index) = self.selected_pair else {
            return;
        };
        let p = self.candidate_pairs[pair_index];
        let last_sent = self.local_candidates[p.local_index]
            .last_sent
            .map(|t| now.duration_since(t))
            .unwrap_or(Duration::MAX);
        let last_received = self.remote_candidates[p.remote_index]
            .last_received
            .map(|t| now.duration_since(t))
            .unwrap_or(Duration::MAX);
        if self.keepalive_interval != Duration::ZERO
            && (last_sent > self.keepalive_interval || last_received > self.keepalive_interval)
        {
            self.ping_candidate(p.local_index, p.remote_index, false);
        }
    }

    /// Processes an inbound STUN message already classified and decoded by
    /// the owning `Base`/`Agent` (section 4.3 steps 2).
    pub(crate) fn handle_inbound(
        &mut self,
        m: &mut Message,
        local_index: usize,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        if m.typ.method != METHOD_BINDING
            || !(m.typ.class == CLASS_SUCCESS_RESPONSE
                || m.typ.class == CLASS_REQUEST
                || m.typ.class == CLASS_INDICATION)
        {
            return Err(Error::ErrUnhandledStunpacket);
        }

        if self.is_controlling && m.contains(ATTR_ICE_CONTROLLING) {
            if let Some(peer_tie_breaker) = read_tiebreaker(m, ATTR_ICE_CONTROLLING) {
                self.handle_role_conflict(m, local_index, remote_addr, peer_tie_breaker);
            }
            return Err(Error::ErrUnexpectedStunrequestMessage);
        } else if !self.is_controlling && m.contains(ATTR_ICE_CONTROLLED) {
            if let Some(peer_tie_breaker) = read_tiebreaker(m, ATTR_ICE_CONTROLLED) {
                self.handle_role_conflict(m, local_index, remote_addr, peer_tie_breaker);
            }
            return Err(Error::ErrUnexpectedStunrequestMessage);
        }

        let Some(remote_credentials) = self.remote_credentials.clone() else {
            return Err(Error::ErrPasswordEmpty);
        };

        let mut remote_index = self.find_remote_candidate(remote_addr);

        if m.typ.class == CLASS_SUCCESS_RESPONSE {
            wire::assert_inbound_message_integrity(m, remote_credentials.pwd.as_bytes())?;
            let Some(remote_index) = remote_index else {
                return Err(Error::ErrUnhandledStunpacket);
            };
            self.handle_success_response(m, local_index, remote_index, remote_addr);
        } else if m.typ.class == CLASS_REQUEST {
            if !m.contains(ATTR_ICE_CONTROLLING) && !m.contains(ATTR_ICE_CONTROLLED) {
                self.send_error_response(m, local_index, remote_addr, wire::BAD_REQUEST);
                return Err(Error::ErrAttributeTooShortIceCandidate);
            }
            if !m.contains(ATTR_PRIORITY) {
                self.send_error_response(m, local_index, remote_addr, wire::BAD_REQUEST);
                return Err(Error::ErrAttributeTooShortIceCandidate);
            }

            let username = format!("{}:{}", self.local_ufrag, remote_credentials.ufrag);
            if let Err(err) = wire::assert_inbound_username(m, &username) {
                self.send_error_response(m, local_index, remote_addr, wire::UNAUTHORIZED);
                return Err(err);
            }
            if let Err(err) = wire::assert_inbound_message_integrity(m, self.local_pwd.as_bytes()) {
                self.send_error_response(m, local_index, remote_addr, wire::UNAUTHORIZED);
                return Err(err);
            }

            if remote_index.is_none() {
                let prflx = CandidatePeerReflexiveConfig {
                    base_config: CandidateConfig {
                        network: NetworkType::Udp4.to_string(),
                        address: remote_addr.ip().to_string(),
                        port: remote_addr.port(),
                        component: self.local_candidates[local_index].component,
                        ..CandidateConfig::default()
                    },
                    rel_addr: String::new(),
                    rel_port: 0,
                }
                .new_candidate_peer_reflexive()?;
                debug!(
                    "[{}]: synthesising peer-reflexive candidate for {remote_addr}",
                    self.get_name()
                );
                self.add_remote_candidate(prflx)?;
                remote_index = Some(self.remote_candidates.len() - 1);
            }

            if let Some(remote_index) = remote_index {
                self.handle_binding_request(m, local_index, remote_index);
            }
        }

        if let Some(remote_index) = remote_index {
            self.remote_candidates[remote_index].seen(false);
        }

        Ok(())
    }

    fn handle_success_response(
        &mut self,
        m: &Message,
        local_index: usize,
        remote_index: usize,
        remote_addr: SocketAddr,
    ) {
        let Some(pending) = self.take_pending_binding_request(m.transaction_id) else {
            warn!("[{}]: unknown transaction id in success response", self.get_name());
            return;
        };
        if pending.destination != remote_addr {
            debug!(
                "[{}]: discard message: source/destination mismatch (symmetric NAT)",
                self.get_name()
            );
            return;
        }

        if let Some(pair_index) =
            self.synthesize_peer_reflexive_pair(m, local_index, remote_index, pending.priority)
        {
            self.trigger_check(pair_index);
            return;
        }

        let Some(pair_index) = self.find_pair(local_index, remote_index) else {
            error!("[{}]: success response for unknown pair", self.get_name());
            return;
        };

        let was_frozen_or_waiting = self.candidate_pairs[pair_index].state != CandidatePairState::Succeeded;
        self.candidate_pairs[pair_index].state = CandidatePairState::Succeeded;
        self.candidate_pairs[pair_index].success_count += 1;
        if !self.valid.contains(&pair_index) {
            self.valid.push(pair_index);
        }
        if was_frozen_or_waiting {
            self.unfreeze_foundations();
        }

        if pending.is_use_candidate && self.selected_pair.is_none() {
            self.set_selected_pair(Some(pair_index));
        }
    }

    /// RFC 8445 section 7.2.5.3.1 (section 4.4 "in-progress -> succeeded",
    /// S2): if the success response's `XOR-MAPPED-ADDRESS` doesn't match the
    /// local candidate the check was sent from, the peer sees us through a
    /// translation we didn't know about. Synthesises a peer-reflexive local
    /// candidate for the mapped address, wires up the `(C', remote)` pair,
    /// and returns it for a fresh check rather than crediting a pair that
    /// was never actually pinged. Returns `None` when the mapped address
    /// matches (the common case), so the caller falls back to its existing
    /// `(local_index, remote_index)` pair.
    fn synthesize_peer_reflexive_pair(
        &mut self,
        m: &Message,
        local_index: usize,
        remote_index: usize,
        priority: u32,
    ) -> Option<usize> {
        let mut mapped = XorMappedAddress::default();
        mapped.get_from(m).ok()?;
        let mapped_addr = SocketAddr::new(mapped.ip, mapped.port);
        if self.local_candidates[local_index].addr() == mapped_addr {
            return None;
        }

        let prflx_index = if let Some(existing) = self.find_local_candidate(mapped_addr) {
            existing
        } else {
            let config = CandidatePeerReflexiveConfig {
                base_config: CandidateConfig {
                    network: NetworkType::Udp4.to_string(),
                    address: mapped_addr.ip().to_string(),
                    port: mapped_addr.port(),
                    component: self.local_candidates[local_index].component,
                    priority: Some(priority),
                    ..CandidateConfig::default()
                },
                rel_addr: String::new(),
                rel_port: 0,
            };
            let candidate = match config.new_candidate_peer_reflexive() {
                Ok(c) => c,
                Err(err) => {
                    warn!("[{}]: failed to build local peer-reflexive candidate: {err}", self.get_name());
                    return None;
                }
            };
            match self.push_local_candidate(candidate) {
                Ok(idx) => idx,
                Err(_) => return None,
            }
        };

        debug!(
            "[{}]: synthesising local peer-reflexive candidate for mapped address {mapped_addr}",
            self.get_name()
        );
        self.find_pair(prflx_index, remote_index)
    }

    /// Section 4.6 / RFC 8445 7.3.1.1: if our tiebreaker wins (is strictly
    /// greater than the peer's), reply `487` so the peer knows to switch its
    /// role (S3); if we lose, we stay silent here and flip our own role once
    /// the drained `RoleConflict` event reaches the owning `Session`.
    fn handle_role_conflict(
        &mut self,
        m: &Message,
        local_index: usize,
        remote_addr: SocketAddr,
        peer_tie_breaker: u64,
    ) {
        if self.tie_breaker > peer_tie_breaker {
            self.send_error_response(m, local_index, remote_addr, wire::ROLE_CONFLICT);
        }
        self.events
            .push_back(StreamEvent::RoleConflict(peer_tie_breaker));
    }

    fn send_error_response(&mut self, m: &Message, local_index: usize, remote_addr: SocketAddr, code: ErrorCode) {
        match wire::build_error_response(m, code) {
            Ok(resp) => {
                self.transmits.push_back(TransportMessage {
                    now: Instant::now(),
                    transport: TransportContext {
                        local_addr: self.local_candidates[local_index].addr(),
                        peer_addr: remote_addr,
                        ecn: None,
                        transport_protocol: TransportProtocol::UDP,
                    },
                    message: BytesMut::from(&resp.raw[..]),
                });
            }
            Err(err) => warn!("[{}]: failed to build error response: {err}", self.get_name()),
        }
    }

    fn handle_binding_request(&mut self, m: &Message, local_index: usize, remote_index: usize) {
        let local_pwd = self.local_pwd.clone();
        match wire::build_success_response(
            m,
            self.remote_candidates[remote_index].addr(),
            &local_pwd,
        ) {
            Ok(resp) => self.send_stun(&resp, local_index, remote_index),
            Err(err) => {
                warn!("[{}]: failed to build success response: {err}", self.get_name());
                return;
            }
        }

        if self.find_pair(local_index, remote_index).is_none() {
            self.add_pair(local_index, remote_index);
        }
        let Some(pair_index) = self.find_pair(local_index, remote_index) else {
            return;
        };

        let use_candidate = m.contains(ATTR_USE_CANDIDATE);
        if use_candidate {
            // RFC 8445 section 7.3.1.5: controlled-agent nomination handling.
            if self.candidate_pairs[pair_index].state == CandidatePairState::Succeeded {
                if self.selected_pair.is_none() {
                    self.set_selected_pair(Some(pair_index));
                }
            } else {
                self.trigger_check(pair_index);
            }
        } else if self.is_controlling {
            if self.candidate_pairs[pair_index].state == CandidatePairState::Succeeded
                && self.nominated_pair.is_none()
                && self.selected_pair.is_none()
            {
                if let Some(best) = self.get_best_available_pair() {
                    let p = self.candidate_pairs[best];
                    if best == pair_index && p.is_nominatable() {
                        self.nominated_pair = Some(pair_index);
                        self.nominate_pair();
                    }
                }
            } else {
                self.trigger_check(pair_index);
            }
        } else {
            self.trigger_check(pair_index);
        }
    }

    /// Retriggered check (section 4.4 `* -> waiting`): dedups against pairs
    /// already queued.
    fn trigger_check(&mut self, pair_index: usize) {
        if self.candidate_pairs[pair_index].state == CandidatePairState::Failed {
            return;
        }
        if !self.trigger.contains(&pair_index) {
            self.candidate_pairs[pair_index].state = CandidatePairState::Waiting;
            self.trigger.push_back(pair_index);
        }
    }

    pub(crate) fn validate_non_stun_traffic(&mut self, remote_addr: SocketAddr) -> bool {
        if let Some(remote_index) = self.find_remote_candidate(remote_addr) {
            self.remote_candidates[remote_index].seen(false);
            true
        } else {
            false
        }
    }

    pub(crate) fn get_selected_candidate_pair(&self) -> Option<(Candidate, Candidate)> {
        let pair_index = self.selected_pair?;
        let p = &self.candidate_pairs[pair_index];
        Some((
            self.local_candidates[p.local_index].clone(),
            self.remote_candidates[p.remote_index].clone(),
        ))
    }

    pub(crate) fn timeout_interval(&self) -> Duration {
        if self.selected_pair.is_some() {
            self.keepalive_interval.max(Duration::from_millis(1))
        } else {
            self.check_interval
        }
    }
}

fn read_tiebreaker(m: &Message, attr: u16) -> Option<u64> {
    let raw = m.get(attr).ok()?;
    if raw.len() != 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_be_bytes(buf))
}
