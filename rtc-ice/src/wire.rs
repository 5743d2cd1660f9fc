//! Thin wrapper over the STUN/TURN/DTLS libraries (section 4.1): classify an
//! inbound datagram by its first octet, build outbound connectivity-check
//! messages, and verify inbound STUN credentials. DTLS/SRTP key export lives
//! on the `rtc-dtls`/`rtc-srtp` side of the wire and is invoked from
//! `Pair`/`Stream` directly; this module only covers the STUN half, which is
//! the half this crate builds and parses itself.

use shared::error::*;
use stun::attributes::*;
use stun::error_code::ErrorCode;
use stun::fingerprint::*;
use stun::integrity::*;
use stun::message::*;
use stun::textattrs::*;
use stun::xoraddr::XorMappedAddress;

use crate::attributes::control::{AttrControlled, AttrControlling};
use crate::attributes::priority::PriorityAttr;
use crate::attributes::use_candidate::UseCandidateAttr;

/// RFC 7983 first-octet demultiplexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    Stun,
    Dtls,
    Srtp,
    Other,
}

#[must_use]
pub fn classify(first_octet: u8) -> DatagramKind {
    match first_octet {
        0..=3 => DatagramKind::Stun,
        20..=63 => DatagramKind::Dtls,
        128..=191 => DatagramKind::Srtp,
        _ => DatagramKind::Other,
    }
}

/// Role attribute to attach to an outbound Binding request/response.
pub enum Role {
    Controlling(u64),
    Controlled(u64),
}

/// Builds a connectivity-check Binding request (section 4.4): username
/// `"<remote-ufrag>:<local-ufrag>"`, role + tiebreaker attribute, candidate
/// priority, optional `USE-CANDIDATE`, message-integrity keyed by the remote
/// password, fingerprint trailing.
pub fn build_binding_request(
    username: String,
    role: Role,
    priority: u32,
    use_candidate: bool,
    remote_pwd: &str,
) -> Result<Message> {
    let mut setters: Vec<Box<dyn Setter>> = vec![
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(Username::new(ATTR_USERNAME, username)),
    ];
    match role {
        Role::Controlling(tie_breaker) => setters.push(Box::new(AttrControlling(tie_breaker))),
        Role::Controlled(tie_breaker) => setters.push(Box::new(AttrControlled(tie_breaker))),
    }
    setters.push(Box::new(PriorityAttr(priority)));
    if use_candidate {
        setters.push(Box::<UseCandidateAttr>::default());
    }
    setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
        remote_pwd.to_owned(),
    )));
    setters.push(Box::new(FINGERPRINT));

    let mut msg = Message::new();
    msg.build(&setters)?;
    Ok(msg)
}

/// Builds a Binding success response (section 4.1 `EncodeSuccessResponse`):
/// echoes the request's transaction id, carries `XOR-MAPPED-ADDRESS` of the
/// sender, integrity keyed by the local password.
pub fn build_success_response(
    request: &Message,
    mapped: std::net::SocketAddr,
    local_pwd: &str,
) -> Result<Message> {
    let mut msg = Message::new();
    msg.build(&[
        Box::new(request.clone()),
        Box::new(BINDING_SUCCESS),
        Box::new(XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        }),
        Box::new(MessageIntegrity::new_short_term_integrity(
            local_pwd.to_owned(),
        )),
        Box::new(FINGERPRINT),
    ])?;
    Ok(msg)
}

/// Builds a Binding error response (section 4.1 `EncodeErrorResponse`) for
/// the 487 (role conflict), 400 (bad request) and 401 (unauthorized) cases.
pub fn build_error_response(request: &Message, code: ErrorCode) -> Result<Message> {
    let mut msg = Message::new();
    msg.build(&[
        Box::new(request.clone()),
        Box::new(BINDING_ERROR),
        Box::new(code),
        Box::new(FINGERPRINT),
    ])?;
    Ok(msg)
}

pub const ROLE_CONFLICT: ErrorCode = ErrorCode {
    code: 487,
    reason: Vec::new(),
};

/// `MESSAGE-INTEGRITY`/`USERNAME` check failed (section 7 `StunAuthFailed`).
pub const UNAUTHORIZED: ErrorCode = ErrorCode {
    code: 401,
    reason: Vec::new(),
};

/// A required attribute (`PRIORITY`, `USERNAME`, or a role attribute) was
/// absent (section 7 `StunBadRequest`).
pub const BAD_REQUEST: ErrorCode = ErrorCode {
    code: 400,
    reason: Vec::new(),
};

/// Verifies the `USERNAME` attribute of an inbound message equals
/// `expected_username` exactly.
pub fn assert_inbound_username(m: &Message, expected_username: &str) -> Result<()> {
    let mut username = Username::new(ATTR_USERNAME, String::new());
    username.get_from(m)?;
    if username.to_string() != expected_username {
        return Err(Error::ErrMismatchUsername);
    }
    Ok(())
}

/// Verifies the `MESSAGE-INTEGRITY` attribute of an inbound message using
/// HMAC-SHA1 per RFC 5389, keyed by `key` (the appropriate stream password).
pub fn assert_inbound_message_integrity(m: &mut Message, key: &[u8]) -> Result<()> {
    let message_integrity_attr = MessageIntegrity(key.to_vec());
    message_integrity_attr.check(m)
}

#[cfg(test)]
mod wire_test {
    use super::*;

    #[test]
    fn test_classify_stun_range() {
        assert_eq!(classify(0), DatagramKind::Stun);
        assert_eq!(classify(3), DatagramKind::Stun);
        assert_eq!(classify(4), DatagramKind::Other);
    }

    #[test]
    fn test_classify_dtls_range() {
        assert_eq!(classify(20), DatagramKind::Dtls);
        assert_eq!(classify(63), DatagramKind::Dtls);
        assert_eq!(classify(64), DatagramKind::Other);
    }

    #[test]
    fn test_classify_srtp_range() {
        assert_eq!(classify(128), DatagramKind::Srtp);
        assert_eq!(classify(191), DatagramKind::Srtp);
        assert_eq!(classify(192), DatagramKind::Other);
    }

    #[test]
    fn test_build_binding_request_is_a_stun_message() {
        let msg = build_binding_request(
            "ROLE:LOCAL".to_owned(),
            Role::Controlling(42),
            1234,
            false,
            "password",
        )
        .expect("valid message");
        assert_eq!(msg.typ.method, METHOD_BINDING);
        assert_eq!(msg.typ.class, CLASS_REQUEST);
    }

    #[test]
    fn test_build_error_response_carries_the_code_and_transaction_id() {
        let request = build_binding_request(
            "ROLE:LOCAL".to_owned(),
            Role::Controlling(42),
            1234,
            false,
            "password",
        )
        .expect("valid message");

        let resp = build_error_response(&request, ROLE_CONFLICT).expect("valid message");
        assert_eq!(resp.typ.class, BINDING_ERROR.class);
        assert_eq!(resp.transaction_id, request.transaction_id);
    }

    #[test]
    fn test_build_binding_request_with_use_candidate() {
        let msg = build_binding_request(
            "ROLE:LOCAL".to_owned(),
            Role::Controlled(7),
            1234,
            true,
            "password",
        )
        .expect("valid message");
        assert!(msg.contains(ATTR_USE_CANDIDATE));
    }
}
