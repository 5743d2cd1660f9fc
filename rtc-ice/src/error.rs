//! Crate-wide error type. ICE shares its error enum with the rest of the
//! `webrtc-rs/rtc` workspace (`rtc-shared::error::Error`) rather than
//! defining a parallel one; this module just re-exports it under a
//! locally-idiomatic name so call sites can `use crate::error::*;`.

pub use shared::error::{Error, Result};
