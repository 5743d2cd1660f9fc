//! `sansio::Protocol` implementation (section 5): the one suspension point an
//! embedder drives. Mirrors the teacher's `agent::agent_proto` shape exactly
//! (`Rout = ()`, `Wout = TransportMessage<BytesMut>`, `Eout = Event`, `Time =
//! Instant`), generalized to dispatch an inbound STUN message to whichever
//! `Session`/`Stream` owns the local address it arrived on instead of
//! assuming a single implicit stream.

use std::time::Instant;

use bytes::BytesMut;
use log::{trace, warn};
use sansio::Protocol;
use stun::message::{Getter, Message, CLASS_SUCCESS_RESPONSE};

use super::Agent;
use crate::session::{Event, Session};
use shared::error::*;
use shared::TransportMessage;

impl Agent {
    /// Finds the `(session, stream, local_candidate_index)` whose base owns
    /// `local_addr`; `None` if no stream has bound it (a stale/foreign
    /// datagram, section 7 `DatagramMalformed`-adjacent "drop and log").
    fn locate_by_local_addr(&self, local_addr: std::net::SocketAddr) -> Option<(usize, usize, usize)> {
        for (session_index, session) in self.sessions.iter().enumerate() {
            for stream_index in 0..session.streams.len() {
                let stream = session.stream(stream_index)?;
                if let Some(local_index) = stream.find_local_candidate(local_addr) {
                    return Some((session_index, stream_index, local_index));
                }
            }
        }
        None
    }
}

impl Protocol<TransportMessage<Message>, (), ()> for Agent {
    type Rout = ();
    type Wout = TransportMessage<BytesMut>;
    type Eout = Event;
    type Error = Error;
    type Time = Instant;

    /// A decoded inbound STUN message (classification/decoding already
    /// performed by the caller per RFC 7983, section 4.1 wire codec facade).
    fn handle_read(&mut self, msg: TransportMessage<Message>) -> std::result::Result<(), Self::Error> {
        let mut m = msg.message;

        // A gathering response the Agent itself is waiting on, not a
        // connectivity check owned by any Stream's checklist.
        if m.typ.class == CLASS_SUCCESS_RESPONSE && self.transactions.contains_key(&m.transaction_id) {
            let mut mapped = stun::xoraddr::XorMappedAddress::default();
            if mapped.get_from(&m).is_ok() {
                let addr = std::net::SocketAddr::new(mapped.ip, mapped.port);
                self.handle_gathering_response(&m, addr);
            }
            return Ok(());
        }

        let Some((session_index, stream_index, local_index)) =
            self.locate_by_local_addr(msg.transport.local_addr)
        else {
            trace!(
                target: "ice",
                "dropping STUN message for unknown local address {}",
                msg.transport.local_addr
            );
            return Ok(());
        };

        if let Some(session) = self.sessions.get_mut(session_index) {
            if let Err(err) =
                session.handle_stun(stream_index, &mut m, local_index, msg.transport.peer_addr)
            {
                warn!(target: "ice", "stream {stream_index} rejected inbound STUN message: {err}");
            }
        }
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, _msg: ()) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        for session in &mut self.sessions {
            if let Some(t) = session.poll_transmit() {
                return Some(t);
            }
        }
        None
    }

    fn handle_event(&mut self, _evt: ()) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        for session in &mut self.sessions {
            if let Some(evt) = session.poll_event() {
                return Some(evt);
            }
        }
        None
    }

    fn handle_timeout(&mut self, now: Self::Time) -> std::result::Result<(), Self::Error> {
        for session in &mut self.sessions {
            session.handle_timeout(now);
        }
        self.gc_transactions(now);
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        self.sessions.iter().filter_map(Session::poll_timeout).min()
    }

    fn close(&mut self) -> std::result::Result<(), Self::Error> {
        self.sessions.clear();
        Ok(())
    }
}
