use stun::attributes::ATTR_USE_CANDIDATE;
use stun::message::{Getter, Message, Setter};
use shared::error::*;

/// `USE-CANDIDATE` attribute (RFC 8445 section 7.1.1): a flag attribute with
/// no value, present iff the controlling agent is nominating this pair.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl Getter for UseCandidateAttr {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        m.get(ATTR_USE_CANDIDATE)?;
        Ok(())
    }
}
