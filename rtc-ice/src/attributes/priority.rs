use stun::attributes::ATTR_PRIORITY;
use stun::message::{Getter, Message, Setter};
use shared::error::*;

/// `PRIORITY` attribute (RFC 8445 section 7.1.1): the priority the sender
/// would assign to the candidate pair formed from this transaction, used by
/// the receiver when synthesizing a peer-reflexive candidate.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityAttr(pub u32);

impl Setter for PriorityAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_PRIORITY, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for PriorityAttr {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_PRIORITY)?;
        if v.len() != 4 {
            return Err(Error::ErrAttributeTooShortIceCandidate);
        }
        let mut b = [0u8; 4];
        b.copy_from_slice(&v);
        self.0 = u32::from_be_bytes(b);
        Ok(())
    }
}
