use stun::attributes::ATTR_ICE_CONTROLLED;
use stun::attributes::ATTR_ICE_CONTROLLING;
use stun::message::{Getter, Message, Setter};
use shared::error::*;

/// `ICE-CONTROLLING` attribute (RFC 8445 section 7.1.1), carrying the sender's
/// 64-bit tiebreaker value.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrControlling(pub u64);

impl Setter for AttrControlling {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_ICE_CONTROLLING, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for AttrControlling {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ICE_CONTROLLING)?;
        if v.len() != 8 {
            return Err(Error::ErrAttributeTooShortIceCandidate);
        }
        let mut b = [0u8; 8];
        b.copy_from_slice(&v);
        self.0 = u64::from_be_bytes(b);
        Ok(())
    }
}

/// `ICE-CONTROLLED` attribute (RFC 8445 section 7.1.1), carrying the sender's
/// 64-bit tiebreaker value.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrControlled(pub u64);

impl Setter for AttrControlled {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_ICE_CONTROLLED, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for AttrControlled {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ICE_CONTROLLED)?;
        if v.len() != 8 {
            return Err(Error::ErrAttributeTooShortIceCandidate);
        }
        let mut b = [0u8; 8];
        b.copy_from_slice(&v);
        self.0 = u64::from_be_bytes(b);
        Ok(())
    }
}
