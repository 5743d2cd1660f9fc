use super::*;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::CandidateConfig;
use crate::dtls::{DtlsProgress, SrtpKey, SrtpKeyingMaterial};
use std::collections::HashMap;

fn host_candidate(port: u16) -> Candidate {
    CandidateHostConfig {
        base_config: CandidateConfig {
            network: "udp4".to_owned(),
            address: "127.0.0.1".to_owned(),
            port,
            component: 1,
            ..Default::default()
        },
    }
    .new_candidate_host()
    .unwrap()
}

#[test]
fn test_add_stream_generates_valid_credentials() {
    let mut session = Session::new("s1".to_owned(), true);
    let idx = session.add_stream(None).unwrap();
    let stream = session.stream(idx).unwrap();
    assert!(stream.local_ufrag.len() * 8 >= 24);
    assert!(stream.local_pwd.len() * 8 >= 128);
}

#[test]
fn test_add_stream_reuses_supplied_credentials() {
    let mut session = Session::new("s1".to_owned(), true);
    let creds = Credentials {
        ufrag: "aaaaaaaaaaaaaaaa".to_owned(),
        pwd: "b".repeat(32),
    };
    let idx = session.add_stream(Some(creds.clone())).unwrap();
    let stream = session.stream(idx).unwrap();
    assert_eq!(stream.local_ufrag, creds.ufrag);
    assert_eq!(stream.local_pwd, creds.pwd);
}

#[test]
fn test_role_conflict_smaller_tiebreaker_switches() {
    let mut session = Session::new("s1".to_owned(), true);
    session.tie_breaker = 10;
    session.add_stream(None).unwrap();

    session.resolve_role_conflict(20);

    assert!(!session.controlling);
    assert!(!session.streams[0].is_controlling);
}

#[test]
fn test_role_conflict_larger_tiebreaker_keeps_role() {
    let mut session = Session::new("s1".to_owned(), true);
    session.tie_breaker = 20;
    session.add_stream(None).unwrap();

    session.resolve_role_conflict(10);

    assert!(session.controlling);
    assert!(session.streams[0].is_controlling);
    assert_eq!(session.tie_breaker, 20);
}

/// S3: a flip to controlled regenerates a tiebreaker strictly less than the
/// peer's, so a stale re-delivery of the same conflicting request can't
/// immediately flip this side back.
#[test]
fn test_role_conflict_switch_regenerates_tiebreaker_below_peer() {
    let mut session = Session::new("s1".to_owned(), true);
    session.tie_breaker = 10;
    session.add_stream(None).unwrap();

    session.resolve_role_conflict(20);

    assert!(session.tie_breaker < 20);
    assert_eq!(session.streams[0].tie_breaker, session.tie_breaker);
}

#[test]
fn test_role_conflict_switch_to_controlling_regenerates_tiebreaker_above_peer() {
    let mut session = Session::new("s1".to_owned(), false);
    session.tie_breaker = 5;
    session.add_stream(None).unwrap();

    session.resolve_role_conflict(9);

    assert!(session.controlling);
    assert!(session.tie_breaker > 9);
}

#[test]
fn test_reconcile_state_completed_when_all_streams_completed() {
    let mut session = Session::new("s1".to_owned(), true);
    session.add_stream(None).unwrap();
    session.streams[0].stun_state = crate::state::SubState::Completed;
    session.streams[0].dtls_state = crate::state::SubState::Completed;
    session.streams[0].srtp_state = crate::state::SubState::Completed;

    session.reconcile_state();

    assert_eq!(session.state, SessionState::Completed);
    assert!(matches!(
        session.poll_event(),
        Some(Event::SessionStateChange(SessionState::Completed))
    ));
}

#[test]
fn test_reconcile_state_failed_when_gathering_done_and_all_pairs_failed() {
    let mut session = Session::new("s1".to_owned(), true);
    session.add_stream(None).unwrap();
    {
        let stream = &mut session.streams[0];
        stream.local_gathered = true;
        stream.remote_gathered = true;
        stream.add_local_candidate(host_candidate(4000)).unwrap();
        stream.add_remote_candidate(host_candidate(5000)).unwrap();
        stream.candidate_pairs[0].state = crate::candidate::candidate_pair::CandidatePairState::Failed;
    }

    session.reconcile_state();

    assert_eq!(session.state, SessionState::Failed);
}

#[test]
fn test_handle_timeout_trickles_new_candidates_after_start_delay() {
    let mut session = Session::new("s1".to_owned(), true);
    session.trickling_start = Duration::from_millis(0);
    session.add_stream(None).unwrap();
    session.streams[0]
        .add_local_candidate(host_candidate(4000))
        .unwrap();

    session.handle_timeout(Instant::now() + Duration::from_millis(1));

    let mut saw_new_candidate = false;
    while let Some(evt) = session.poll_event() {
        if matches!(evt, Event::NewLocalCandidate { stream: 0, .. }) {
            saw_new_candidate = true;
        }
    }
    assert!(saw_new_candidate);
}

#[test]
fn test_poll_timeout_none_without_streams() {
    let session = Session::new("s1".to_owned(), true);
    assert!(session.poll_timeout().is_none());
}

/// Completes every handshake on the first `feed` call; keying material is
/// fixed so tests can assert on exactly which bytes an engine installed.
#[derive(Default)]
struct MockDtlsEngine;

impl DtlsEngine for MockDtlsEngine {
    fn connect(&mut self, _token: u64, _remote: std::net::SocketAddr) -> Result<()> {
        Ok(())
    }

    fn listen(&mut self, _token: u64, _remote: std::net::SocketAddr) -> Result<()> {
        Ok(())
    }

    fn feed(&mut self, _token: u64, _data: &[u8]) -> Result<DtlsProgress> {
        Ok(DtlsProgress::Complete)
    }

    fn poll_transmit(&mut self, _token: u64) -> Option<Vec<u8>> {
        None
    }

    fn export_keys(&mut self, _token: u64) -> Result<SrtpKeyingMaterial> {
        Ok(SrtpKeyingMaterial {
            profile_name: "SRTP_AES128_CM_SHA1_80".to_owned(),
            client: SrtpKey { key: vec![1; 16], salt: vec![2; 14] },
            server: SrtpKey { key: vec![3; 16], salt: vec![4; 14] },
        })
    }
}

/// Records the exact arguments `install` was last called with, so tests can
/// assert on the client/server-to-local/remote key swap (S5).
#[derive(Default)]
struct MockSrtpEngine {
    installed: Option<(u32, u32, String, SrtpKey, SrtpKey)>,
    policies: HashMap<u32, ()>,
}

impl SrtpEngine for MockSrtpEngine {
    fn install(
        &mut self,
        local_ssrc: u32,
        remote_ssrc: u32,
        profile_name: &str,
        local_key: &SrtpKey,
        remote_key: &SrtpKey,
    ) -> Result<()> {
        self.policies.insert(remote_ssrc, ());
        self.installed = Some((
            local_ssrc,
            remote_ssrc,
            profile_name.to_owned(),
            local_key.clone(),
            remote_key.clone(),
        ));
        Ok(())
    }

    fn unprotect(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remote_ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if self.policies.contains_key(&remote_ssrc) {
            // Simulate stripping a 4-byte auth tag, as SRTP_AES128_CM_SHA1_32 would.
            Ok(buf.len() - 4)
        } else {
            Err(Error::ErrUnsupportedNetwork)
        }
    }

    fn protect(&mut self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

fn completed_pair_session(is_controlling: bool) -> (Session, usize) {
    let mut session = Session::new("s1".to_owned(), is_controlling);
    let idx = session.add_stream(None).unwrap();
    {
        let stream = &mut session.streams[idx];
        stream.add_local_candidate(host_candidate(4000)).unwrap();
        stream.add_remote_candidate(host_candidate(5000)).unwrap();
        let pair_index = stream.find_pair(0, 0).unwrap();
        stream.set_selected_pair(Some(pair_index));
    }
    (session, idx)
}

#[test]
fn test_drive_dtls_runs_on_selected_pair_change() {
    let (mut session, idx) = completed_pair_session(true);
    session.streams[idx].set_dtls_role(crate::state::DtlsRole::Active);
    session.set_dtls_engine(Box::new(MockDtlsEngine));

    session.drain_stream_events(idx);

    assert_eq!(session.streams[idx].dtls_state, crate::state::SubState::Pending);
}

#[test]
fn test_handle_dtls_to_completion_installs_srtp_and_reconciles_completed() {
    let (mut session, idx) = completed_pair_session(true);
    session.streams[idx].set_dtls_role(crate::state::DtlsRole::Active);
    session.streams[idx].set_remote_ssrc(4242);
    session.set_dtls_engine(Box::new(MockDtlsEngine));
    session.set_srtp_engine(Box::new(MockSrtpEngine::default()));

    session.handle_dtls(idx, b"clienthello").unwrap();

    assert_eq!(session.streams[idx].dtls_state, crate::state::SubState::Completed);
    assert_eq!(session.streams[idx].srtp_state, crate::state::SubState::Completed);
    assert_eq!(session.state, SessionState::Completed);
}

#[test]
fn test_install_srtp_keys_active_role_uses_server_keys_locally() {
    let mut stream = new_test_stream();
    stream.dtls_role = Some(crate::state::DtlsRole::Active);
    let mut engine = MockSrtpEngine::default();
    let keys = SrtpKeyingMaterial {
        profile_name: "SRTP_AES128_CM_SHA1_80".to_owned(),
        client: SrtpKey { key: vec![1; 16], salt: vec![2; 14] },
        server: SrtpKey { key: vec![3; 16], salt: vec![4; 14] },
    };

    install_srtp_keys(&mut stream, Some(&mut engine), &keys);

    let (_, _, _, local_key, remote_key) = engine.installed.unwrap();
    assert_eq!(local_key, keys.server);
    assert_eq!(remote_key, keys.client);
    assert_eq!(stream.srtp_state, crate::state::SubState::Completed);
}

#[test]
fn test_install_srtp_keys_passive_role_swaps_local_and_remote() {
    let mut stream = new_test_stream();
    stream.dtls_role = Some(crate::state::DtlsRole::Passive);
    let mut engine = MockSrtpEngine::default();
    let keys = SrtpKeyingMaterial {
        profile_name: "SRTP_AES128_CM_SHA1_80".to_owned(),
        client: SrtpKey { key: vec![1; 16], salt: vec![2; 14] },
        server: SrtpKey { key: vec![3; 16], salt: vec![4; 14] },
    };

    install_srtp_keys(&mut stream, Some(&mut engine), &keys);

    let (_, _, _, local_key, remote_key) = engine.installed.unwrap();
    assert_eq!(local_key, keys.client);
    assert_eq!(remote_key, keys.server);
}

#[test]
fn test_install_srtp_keys_without_dtls_role_drops_keys() {
    let mut stream = new_test_stream();
    let mut engine = MockSrtpEngine::default();
    let keys = SrtpKeyingMaterial::default();

    install_srtp_keys(&mut stream, Some(&mut engine), &keys);

    assert!(engine.installed.is_none());
    assert_eq!(stream.srtp_state, crate::state::SubState::Pending);
}

fn new_test_stream() -> Stream {
    Stream::new(0, 1, true, "aaaaaaaaaaaaaaaa".to_owned(), "b".repeat(32)).unwrap()
}

/// S6: an inbound SRTP datagram whose SSRC matches no installed policy is
/// dropped silently rather than surfaced as an error or a `StreamIo` event.
#[test]
fn test_handle_srtp_drops_datagram_for_unknown_ssrc() {
    let (mut session, idx) = completed_pair_session(true);
    session.streams[idx].set_remote_ssrc(100);
    session.set_srtp_engine(Box::new(MockSrtpEngine::default()));

    let mut buf = vec![0x80u8; 20];
    buf[8..12].copy_from_slice(&999u32.to_be_bytes());

    let result = session.handle_srtp(&mut buf);

    assert!(result.is_ok());
    assert!(session.poll_event().is_none());
}

#[test]
fn test_handle_srtp_rewrites_ssrc_to_local_value_and_raises_stream_io() {
    let (mut session, idx) = completed_pair_session(true);
    session.streams[idx].set_remote_ssrc(100);
    let local_ssrc = session.streams[idx].local_ssrc();
    let mut engine = MockSrtpEngine::default();
    engine.policies.insert(100, ());
    session.set_srtp_engine(Box::new(engine));

    let mut buf = vec![0x80u8; 20];
    buf[8..12].copy_from_slice(&100u32.to_be_bytes());

    session.handle_srtp(&mut buf).unwrap();

    match session.poll_event() {
        Some(Event::StreamIo { stream, data }) => {
            assert_eq!(stream, idx);
            assert_eq!(u32::from_be_bytes([data[8], data[9], data[10], data[11]]), local_ssrc);
        }
        other => panic!("expected StreamIo event, got {other:?}"),
    }
}
