//! Top-level registry (section 4.7): configuration, certificate/DTLS
//! context, STUN/TURN server list, transaction table, and the session table
//! an embedder drives through `sansio::Protocol`. Unlike the teacher's flat
//! `Agent` (which conflated a single stream's checklist with process-wide
//! state), this `Agent` owns a table of `Session`s and nothing below that
//! line directly — all checklist/candidate/pair state lives in `Stream`.


pub mod agent_config;
mod agent_proto;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, warn};
use stun::message::TransactionId;

use agent_config::AgentConfig;

use crate::candidate::candidate_server_reflexive::CandidateServerReflexiveConfig;
use crate::candidate::CandidateConfig;
use crate::dtls::{DtlsEngine, SrtpEngine};
use crate::session::Session;
use crate::state::DtlsRole;
use crate::url::Url;
use shared::error::*;

/// What an in-flight transaction the `Agent` itself issued (as opposed to a
/// `Stream`'s connectivity checks, tracked in `Stream::pending_binding_requests`)
/// is waiting to resolve: a server-reflexive candidate gathered against a STUN
/// server, or (stubbed, section 1 non-goals) a TURN allocation.
enum TxnOwner {
    ServerReflexiveGathering {
        session: usize,
        stream: usize,
        local_index: usize,
    },
}

struct PendingTransaction {
    owner: TxnOwner,
    created_at: Instant,
}

/// ICE parameters exchanged out-of-band (section 4.7: offer/answer creation
/// and processing). This crate works at the ICE-parameter level; assembling
/// these into a full SDP body is the embedder's/an `rtc-sdp`-level concern.
#[derive(Clone, Debug)]
pub struct IceParameters {
    pub ufrag: String,
    pub pwd: String,
    pub candidates: Vec<String>,
}

/// Top-level agent (section 3 `Agent`): process-wide or embedder-owned,
/// destroyed last. Exclusively owns `Session`s; a `Session` exclusively owns
/// its `Stream`s (section 3 ownership summary).
pub struct Agent {
    config: AgentConfig,
    sessions: Vec<Session>,
    transactions: HashMap<TransactionId, PendingTransaction>,
    /// RFC 8122 certificate fingerprint, e.g. `"sha-256 AB:CD:..."`, surfaced
    /// to the embedder for inclusion in the SDP `a=fingerprint` line.
    pub fingerprint: String,
}

impl Agent {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let fingerprint = if config.dtls.fingerprint_algorithm.is_empty() {
            String::new()
        } else {
            format!("{} (unattested)", config.dtls.fingerprint_algorithm)
        };
        Self {
            config,
            sessions: Vec::new(),
            transactions: HashMap::new(),
            fingerprint,
        }
    }

    /// Creates a new controlling or controlled session (section 4.7).
    pub fn new_session(&mut self, id: String, controlling: bool) -> usize {
        let mut session = Session::new(id, controlling);
        session.connectivity_pace = self.config.connectivity_pace();
        session.trickling_start = self.config.trickling_start();
        session.nominate_start = self.config.nominate_start();
        session.session_timeout = self.config.session_timeout();
        session.stream_check_interval = self.config.check_interval();
        session.stream_keepalive_interval = self.config.keepalive_interval();
        session.stream_disconnected_timeout = self.config.disconnected_timeout();
        session.stream_failed_timeout = self.config.failed_timeout();
        let index = self.sessions.len();
        self.sessions.push(session);
        index
    }

    pub fn session(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn session_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.sessions.get_mut(index)
    }

    /// Adds a stream to `session`, binds `local_addrs` as its bases, and
    /// returns the ICE parameters to offer the peer (section 4.7 "offer
    /// creation"). Each address becomes one `Base`; interface enumeration
    /// beyond an explicit address list is the embedder's responsibility,
    /// since this sans-io crate never touches a socket API itself.
    pub fn create_offer(&mut self, session_index: usize, local_addrs: &[SocketAddr]) -> Result<IceParameters> {
        let session = self
            .sessions
            .get_mut(session_index)
            .ok_or(Error::ErrNotFound)?;
        let stream_index = session.add_stream(None)?;
        let stream = session.stream_mut(stream_index).expect("just inserted");
        for addr in local_addrs {
            stream.add_local_base(*addr)?;
        }

        let mut candidates = Vec::new();
        while let Some(c) = stream.poll_new_local_candidate() {
            candidates.push(c.marshal());
        }

        Ok(IceParameters {
            ufrag: stream.local_ufrag.clone(),
            pwd: stream.local_pwd.clone(),
            candidates,
        })
    }

    /// Answers an offer (section 4.7 "answer creation"): binds local bases,
    /// records the peer's ICE parameters and initial remote candidates, and
    /// returns this side's own parameters.
    pub fn create_answer(
        &mut self,
        session_index: usize,
        local_addrs: &[SocketAddr],
        remote: &IceParameters,
    ) -> Result<IceParameters> {
        let params = self.create_offer(session_index, local_addrs)?;
        self.set_remote_parameters(session_index, 0, remote)?;
        Ok(params)
    }

    /// Processes a received answer/offer's ICE parameters against an
    /// already-created stream (section 4.7 "answer processing").
    pub fn set_remote_parameters(
        &mut self,
        session_index: usize,
        stream_index: usize,
        remote: &IceParameters,
    ) -> Result<()> {
        let stream = self
            .sessions
            .get_mut(session_index)
            .and_then(|s| s.stream_mut(stream_index))
            .ok_or(Error::ErrNotFound)?;
        stream.set_remote_credentials(remote.ufrag.clone(), remote.pwd.clone())?;
        for line in &remote.candidates {
            let c = crate::candidate::unmarshal_candidate(line)?;
            stream.add_remote_candidate(c)?;
        }
        stream.remote_gathered = true;
        Ok(())
    }

    /// Installs the embedder's DTLS engine for `session_index` (section 1:
    /// "treated as external collaborators via their interfaces"). Until
    /// called, every stream's DTLS/SRTP sub-state stays `Pending` and the
    /// session never reaches `SessionState::Completed`.
    pub fn set_dtls_engine(&mut self, session_index: usize, engine: Box<dyn DtlsEngine>) -> Result<()> {
        self.sessions
            .get_mut(session_index)
            .ok_or(Error::ErrNotFound)?
            .set_dtls_engine(engine);
        Ok(())
    }

    /// Installs the embedder's SRTP context for `session_index`.
    pub fn set_srtp_engine(&mut self, session_index: usize, engine: Box<dyn SrtpEngine>) -> Result<()> {
        self.sessions
            .get_mut(session_index)
            .ok_or(Error::ErrNotFound)?
            .set_srtp_engine(engine);
        Ok(())
    }

    /// Records the negotiated DTLS role for a stream (section 4.4: the SDP
    /// `a=setup` answer determines which side runs `DtlsConnect` and which
    /// runs `DtlsListen`). Must be set before the pair on that stream is
    /// selected, or the handshake never starts.
    pub fn set_dtls_role(&mut self, session_index: usize, stream_index: usize, role: DtlsRole) -> Result<()> {
        self.sessions
            .get_mut(session_index)
            .and_then(|s| s.stream_mut(stream_index))
            .ok_or(Error::ErrNotFound)?
            .set_dtls_role(role);
        Ok(())
    }

    /// Records the peer's SSRC for a stream (section 3 `Stream`), so inbound
    /// SRTP carrying it can be routed to this stream's policy.
    pub fn set_remote_ssrc(&mut self, session_index: usize, stream_index: usize, ssrc: u32) -> Result<()> {
        self.sessions
            .get_mut(session_index)
            .and_then(|s| s.stream_mut(stream_index))
            .ok_or(Error::ErrNotFound)?
            .set_remote_ssrc(ssrc);
        Ok(())
    }

    /// Feeds one inbound datagram already classified as DTLS (`wire::classify`,
    /// section 4.3 point 3) to `stream_index`'s handshake.
    pub fn handle_dtls(&mut self, session_index: usize, stream_index: usize, data: &[u8]) -> Result<()> {
        self.sessions
            .get_mut(session_index)
            .ok_or(Error::ErrNotFound)?
            .handle_dtls(stream_index, data)
    }

    /// `srtp_unprotect` dispatch (section 4.3 point 4) for one inbound
    /// datagram already classified as SRTP, in place.
    pub fn handle_srtp(&mut self, session_index: usize, buf: &mut Vec<u8>) -> Result<()> {
        self.sessions
            .get_mut(session_index)
            .ok_or(Error::ErrNotFound)?
            .handle_srtp(buf)
    }

    /// Out-of-band candidate addition for trickle ICE (section 4.7): adds one
    /// more remote candidate line to an already-running stream.
    pub fn add_remote_candidate(
        &mut self,
        session_index: usize,
        stream_index: usize,
        candidate_line: &str,
    ) -> Result<()> {
        let stream = self
            .sessions
            .get_mut(session_index)
            .and_then(|s| s.stream_mut(stream_index))
            .ok_or(Error::ErrNotFound)?;
        let c = crate::candidate::unmarshal_candidate(candidate_line)?;
        stream.add_remote_candidate(c)
    }

    /// Issues a STUN Binding request to a configured STUN/TURN server to
    /// learn this host's server-reflexive address (section 4.3, gathering).
    /// TURN relay allocation is out of scope (section 1 non-goals: TURN
    /// channel-data/refresh/allocate handling is stubbed).
    pub fn gather_server_reflexive(
        &mut self,
        session_index: usize,
        stream_index: usize,
        local_index: usize,
        server: &Url,
    ) -> Result<()> {
        if server.is_turn() {
            return Err(Error::ErrTurnNotImplemented);
        }
        let stream = self
            .sessions
            .get(session_index)
            .and_then(|s| s.stream(stream_index))
            .ok_or(Error::ErrNotFound)?;
        let _ = stream.local_candidates.get(local_index).ok_or(Error::ErrCandidateIpNotFound)?;

        let mut msg = stun::message::Message::new();
        msg.build(&[
            Box::new(stun::message::BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(stun::fingerprint::FINGERPRINT),
        ])?;

        self.transactions.insert(
            msg.transaction_id,
            PendingTransaction {
                owner: TxnOwner::ServerReflexiveGathering {
                    session: session_index,
                    stream: stream_index,
                    local_index,
                },
                created_at: Instant::now(),
            },
        );

        debug!(target: "ice", "gathering srflx against {server} for stream {stream_index}");
        let stream = self.sessions[session_index].stream_mut(stream_index).unwrap();
        let local_addr = stream.local_candidates[local_index].addr();
        let server_addr: SocketAddr = format!("{}:{}", server.host, server.port)
            .parse()
            .map_err(|_| Error::ErrUrlParse)?;
        stream.transmits.push_back(shared::TransportMessage {
            now: Instant::now(),
            transport: shared::TransportContext {
                local_addr,
                peer_addr: server_addr,
                ecn: None,
                transport_protocol: shared::TransportProtocol::UDP,
            },
            message: bytes::BytesMut::from(&msg.raw[..]),
        });
        Ok(())
    }

    /// Completes a gathering transaction when its success response arrives
    /// (section 4.3). Not a STUN connectivity check, so it is routed here
    /// rather than through `Stream::handle_inbound`.
    fn handle_gathering_response(&mut self, m: &stun::message::Message, mapped: SocketAddr) {
        let Some(pending) = self.transactions.remove(&m.transaction_id) else {
            return;
        };
        let TxnOwner::ServerReflexiveGathering { session, stream, local_index } = pending.owner;
        let Some(stream) = self.sessions.get_mut(session).and_then(|s| s.stream_mut(stream)) else {
            return;
        };
        let Some(local) = stream.local_candidates.get(local_index) else {
            return;
        };
        let config = CandidateConfig {
            network: local.network_type.to_string(),
            address: mapped.ip().to_string(),
            port: mapped.port(),
            component: local.component,
            ..Default::default()
        };
        match (CandidateServerReflexiveConfig {
            base_config: config,
            rel_addr: local.address.clone(),
            rel_port: local.port,
        }
        .new_candidate_server_reflexive())
        {
            Ok(c) => {
                if let Err(err) = stream.add_local_candidate(c) {
                    warn!(target: "ice", "failed to add gathered srflx candidate: {err}");
                }
            }
            Err(err) => warn!(target: "ice", "failed to build srflx candidate: {err}"),
        }
    }

    fn gc_transactions(&mut self, now: Instant) {
        let lifetime = self.config.transaction_lifetime();
        self.transactions
            .retain(|_, t| now.duration_since(t.created_at) < lifetime);
    }
}
