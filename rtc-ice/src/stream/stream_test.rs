use super::*;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::candidate::candidate_pair::CandidatePairState;
use crate::candidate::{CandidateConfig, CandidateType};
use crate::dtls::{DtlsProgress, SrtpKeyingMaterial};
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

fn new_stream(is_controlling: bool) -> Stream {
    Stream::new(
        0,
        if is_controlling { 100 } else { 1 },
        is_controlling,
        "aaaaaaaaaaaaaaaa".to_owned(),
        "b".repeat(32),
    )
    .unwrap()
}

/// Builds a message the way `Message::build` leaves it, then round-trips it
/// through `decode` so attribute byte offsets are populated exactly as an
/// inbound datagram would produce them.
fn roundtrip(built: Message) -> Message {
    let mut m = Message::new();
    m.raw = built.raw;
    m.decode().unwrap();
    m
}

#[test]
fn test_new_rejects_short_ufrag() {
    let err = Stream::new(0, 1, true, "short".to_owned(), "b".repeat(32));
    assert!(err.is_err());
}

#[test]
fn test_new_rejects_short_pwd() {
    let err = Stream::new(0, 1, true, "aaaaaaaaaaaaaaaa".to_owned(), "short".to_owned());
    assert!(err.is_err());
}

#[test]
fn test_add_remote_candidate_pairs_with_existing_local() {
    let mut stream = new_stream(true);
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();

    assert_eq!(stream.candidate_pairs.len(), 1);
}

#[test]
fn test_new_pairs_start_frozen_then_unfreeze_on_add() {
    let mut stream = new_stream(true);
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    // add_remote_candidate triggers unfreeze_foundations internally.
    stream.add_remote_candidate(host_candidate(5000)).unwrap();

    assert_eq!(stream.candidate_pairs[0].state, CandidatePairState::Waiting);
}

#[test]
fn test_unfreeze_promotes_one_pair_per_foundation_group() {
    let mut stream = new_stream(true);
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_local_candidate(host_candidate(4001)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();

    // Both locals share one base's foundation family only if identical
    // {type, address, network}; distinct ports still mean distinct
    // candidates but can land in the same foundation group since foundation
    // ignores port. Only the single highest-priority pair per group should
    // leave Frozen.
    let waiting = stream
        .candidate_pairs
        .iter()
        .filter(|p| p.state == CandidatePairState::Waiting)
        .count();
    assert_eq!(waiting, 1);
}

#[test]
fn test_trickling_returns_each_local_candidate_once() {
    let mut stream = new_stream(true);
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_local_candidate(host_candidate(4001)).unwrap();

    assert!(stream.poll_new_local_candidate().is_some());
    assert!(stream.poll_new_local_candidate().is_some());
    assert!(stream.poll_new_local_candidate().is_none());
}

#[test]
fn test_handle_inbound_request_with_use_candidate_selects_on_controlled_side() {
    let mut stream = new_stream(false);
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    let pair_index = stream.find_pair(0, 0).unwrap();
    stream.candidate_pairs[pair_index].state = CandidatePairState::Succeeded;
    stream.candidate_pairs[pair_index].success_count = 5;

    let username = "aaaaaaaaaaaaaaaa:remoteufrag".to_owned();
    let built = wire::build_binding_request(
        username,
        wire::Role::Controlling(999),
        1234,
        true,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    stream
        .handle_inbound(&mut m, 0, "127.0.0.1:5000".parse().unwrap())
        .unwrap();

    assert_eq!(stream.selected_pair, Some(pair_index));
}

#[test]
fn test_handle_inbound_request_without_use_candidate_triggers_check() {
    let mut stream = new_stream(true);
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    let pair_index = stream.find_pair(0, 0).unwrap();
    stream.candidate_pairs[pair_index].state = CandidatePairState::Waiting;
    stream.trigger.clear();

    let username = "aaaaaaaaaaaaaaaa:remoteufrag".to_owned();
    let built = wire::build_binding_request(
        username,
        wire::Role::Controlled(1),
        1234,
        false,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    stream
        .handle_inbound(&mut m, 0, "127.0.0.1:5000".parse().unwrap())
        .unwrap();

    assert!(stream.trigger.contains(&pair_index));
}

#[test]
fn test_handle_inbound_request_synthesises_peer_reflexive_for_unknown_source() {
    let mut stream = new_stream(true);
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();

    let username = "aaaaaaaaaaaaaaaa:remoteufrag".to_owned();
    let built = wire::build_binding_request(
        username,
        wire::Role::Controlled(1),
        1234,
        false,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    stream
        .handle_inbound(&mut m, 0, "127.0.0.1:6000".parse().unwrap())
        .unwrap();

    assert_eq!(stream.remote_candidates.len(), 1);
    assert_eq!(stream.remote_candidates[0].candidate_type, CandidateType::PeerReflexive);
}

#[test]
fn test_handle_inbound_detects_role_conflict_when_both_controlling() {
    let mut stream = new_stream(true);
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();

    let username = "aaaaaaaaaaaaaaaa:remoteufrag".to_owned();
    let built = wire::build_binding_request(
        username,
        wire::Role::Controlling(12345),
        1234,
        false,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    let result = stream.handle_inbound(&mut m, 0, "127.0.0.1:5000".parse().unwrap());

    assert!(result.is_err());
    assert!(matches!(
        stream.events.pop_front(),
        Some(StreamEvent::RoleConflict(12345))
    ));
}

#[test]
fn test_handle_inbound_role_conflict_winner_sends_487() {
    let mut stream = new_stream(true); // tie_breaker = 100
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    stream.transmits.clear();

    let username = "aaaaaaaaaaaaaaaa:remoteufrag".to_owned();
    let built = wire::build_binding_request(
        username,
        wire::Role::Controlling(1), // loses to our 100
        1234,
        false,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    let result = stream.handle_inbound(&mut m, 0, "127.0.0.1:5000".parse().unwrap());

    assert!(result.is_err());
    assert_eq!(stream.transmits.len(), 1);
}

#[test]
fn test_handle_inbound_role_conflict_loser_sends_nothing() {
    let mut stream = new_stream(true); // tie_breaker = 100
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    stream.transmits.clear();

    let username = "aaaaaaaaaaaaaaaa:remoteufrag".to_owned();
    let built = wire::build_binding_request(
        username,
        wire::Role::Controlling(999_999), // beats our 100
        1234,
        false,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    let result = stream.handle_inbound(&mut m, 0, "127.0.0.1:5000".parse().unwrap());

    assert!(result.is_err());
    assert!(stream.transmits.is_empty());
}

#[test]
fn test_handle_inbound_bad_username_sends_401() {
    let mut stream = new_stream(false);
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    stream.transmits.clear();

    let built = wire::build_binding_request(
        "wrong:username".to_owned(),
        wire::Role::Controlling(999),
        1234,
        false,
        &"b".repeat(32),
    )
    .unwrap();
    let mut m = roundtrip(built);

    let result = stream.handle_inbound(&mut m, 0, "127.0.0.1:5000".parse().unwrap());

    assert!(result.is_err());
    assert_eq!(stream.transmits.len(), 1);
}

#[test]
fn test_handle_success_response_with_mismatched_mapped_address_synthesizes_local_prflx() {
    let mut stream = new_stream(true);
    stream
        .set_remote_credentials("remoteufrag".to_owned(), "r".repeat(32))
        .unwrap();
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();

    let request = wire::build_binding_request(
        "remoteufrag:aaaaaaaaaaaaaaaa".to_owned(),
        wire::Role::Controlling(100),
        4321,
        false,
        &"r".repeat(32),
    )
    .unwrap();
    stream.pending_binding_requests.push(BindingRequest {
        timestamp: Instant::now(),
        transaction_id: request.transaction_id,
        destination: "127.0.0.1:5000".parse().unwrap(),
        is_use_candidate: false,
        priority: 4321,
    });

    let success =
        wire::build_success_response(&request, "127.0.0.1:9999".parse().unwrap(), &"b".repeat(32))
            .unwrap();
    let m = roundtrip(success);

    stream.handle_success_response(&m, 0, 0, "127.0.0.1:5000".parse().unwrap());

    assert_eq!(stream.local_candidates.len(), 2);
    assert_eq!(stream.local_candidates[1].candidate_type, CandidateType::PeerReflexive);
    assert_eq!(stream.local_candidates[1].priority(), 4321);
    let prflx_pair = stream
        .find_pair(1, 0)
        .expect("pair created for synthesized local candidate");
    assert!(stream.trigger.contains(&prflx_pair));
}

#[test]
fn test_set_role_reorders_pairs_by_new_priority() {
    let mut stream = new_stream(true);
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    let before = stream.candidate_pairs[0].priority();

    stream.set_role(false, stream.tie_breaker);

    let after = stream.candidate_pairs[0].priority();
    assert_ne!(before, after);
}

/// In-memory `DtlsEngine` standing in for `rtc-dtls`: `feed` reports
/// `Complete` after a fixed number of calls regardless of the bytes handed
/// to it, which is all the checklist-driving code under test cares about.
#[derive(Default)]
struct MockDtlsEngine {
    connected: Vec<(u64, SocketAddr)>,
    listened: Vec<(u64, SocketAddr)>,
    feeds: HashMap<u64, usize>,
    complete_after: usize,
}

impl DtlsEngine for MockDtlsEngine {
    fn connect(&mut self, token: u64, remote: SocketAddr) -> Result<()> {
        self.connected.push((token, remote));
        Ok(())
    }

    fn listen(&mut self, token: u64, remote: SocketAddr) -> Result<()> {
        self.listened.push((token, remote));
        Ok(())
    }

    fn feed(&mut self, token: u64, _data: &[u8]) -> Result<DtlsProgress> {
        let count = self.feeds.entry(token).or_insert(0);
        *count += 1;
        if *count >= self.complete_after {
            Ok(DtlsProgress::Complete)
        } else {
            Ok(DtlsProgress::InProgress)
        }
    }

    fn poll_transmit(&mut self, _token: u64) -> Option<Vec<u8>> {
        None
    }

    fn export_keys(&mut self, _token: u64) -> Result<SrtpKeyingMaterial> {
        Ok(SrtpKeyingMaterial {
            profile_name: "SRTP_AES128_CM_SHA1_80".to_owned(),
            client: crate::dtls::SrtpKey {
                key: vec![1; 16],
                salt: vec![2; 14],
            },
            server: crate::dtls::SrtpKey {
                key: vec![3; 16],
                salt: vec![4; 14],
            },
        })
    }
}

fn selected_stream(is_controlling: bool) -> Stream {
    let mut stream = new_stream(is_controlling);
    stream.add_local_candidate(host_candidate(4000)).unwrap();
    stream.add_remote_candidate(host_candidate(5000)).unwrap();
    let pair_index = stream.find_pair(0, 0).unwrap();
    stream.set_selected_pair(Some(pair_index));
    stream.events.clear();
    stream
}

#[test]
fn test_drive_dtls_active_role_connects_to_selected_pair() {
    let mut stream = selected_stream(true);
    stream.set_dtls_role(DtlsRole::Active);
    let mut engine = MockDtlsEngine::default();

    stream.drive_dtls(&mut engine);

    assert_eq!(engine.connected, vec![(stream.dtls_token(), "127.0.0.1:5000".parse().unwrap())]);
    assert!(engine.listened.is_empty());
}

#[test]
fn test_drive_dtls_passive_role_listens() {
    let mut stream = selected_stream(false);
    stream.set_dtls_role(DtlsRole::Passive);
    let mut engine = MockDtlsEngine::default();

    stream.drive_dtls(&mut engine);

    assert!(engine.connected.is_empty());
    assert_eq!(engine.listened, vec![(stream.dtls_token(), "127.0.0.1:5000".parse().unwrap())]);
}

#[test]
fn test_drive_dtls_is_a_noop_once_already_in_progress() {
    let mut stream = selected_stream(true);
    stream.set_dtls_role(DtlsRole::Active);
    let mut engine = MockDtlsEngine::default();

    stream.drive_dtls(&mut engine);
    stream.drive_dtls(&mut engine);

    assert_eq!(engine.connected.len(), 1);
}

#[test]
fn test_feed_dtls_completion_exports_keys_and_raises_event() {
    let mut stream = selected_stream(true);
    stream.set_dtls_role(DtlsRole::Active);
    let mut engine = MockDtlsEngine {
        complete_after: 1,
        ..Default::default()
    };

    stream.feed_dtls(&mut engine, b"clienthello").unwrap();

    assert_eq!(stream.dtls_state, SubState::Completed);
    assert!(matches!(stream.events.pop_front(), Some(StreamEvent::DtlsComplete(_))));
}

#[test]
fn test_feed_dtls_in_progress_does_not_complete() {
    let mut stream = selected_stream(true);
    stream.set_dtls_role(DtlsRole::Active);
    let mut engine = MockDtlsEngine {
        complete_after: 2,
        ..Default::default()
    };

    stream.feed_dtls(&mut engine, b"clienthello").unwrap();

    assert_eq!(stream.dtls_state, SubState::Pending);
    assert!(stream.events.is_empty());
}

#[test]
fn test_state_completed_requires_all_three_substates() {
    let mut stream = selected_stream(true);
    assert!(!stream.state_completed());

    stream.dtls_state = SubState::Completed;
    stream.mark_srtp_installed();
    assert!(stream.state_completed());
}
