use super::*;

/// Config required to create a new peer-reflexive candidate, synthesised
/// from the XOR-MAPPED-ADDRESS of a STUN success response or from an inbound
/// request's source address (section 4.4, scenario S2).
#[derive(Default)]
pub struct CandidatePeerReflexiveConfig {
    pub base_config: CandidateConfig,
    pub rel_addr: String,
    pub rel_port: u16,
}

impl CandidatePeerReflexiveConfig {
    pub fn new_candidate_peer_reflexive(self) -> Result<Candidate> {
        let mut c = Candidate::apply_base(&self.base_config, CandidateType::PeerReflexive)?;
        c.related_address = Some(CandidateRelatedAddress {
            address: self.rel_addr,
            port: self.rel_port,
        });
        Ok(c)
    }
}
