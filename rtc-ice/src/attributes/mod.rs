//! ICE-specific STUN attributes (RFC 8445 section 7.1.1), layered on top of
//! the generic STUN attribute machinery in the `stun` codec library.

pub mod control;
pub mod priority;
pub mod use_candidate;
