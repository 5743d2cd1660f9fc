use super::*;

/// Config required to create a new server-reflexive candidate, learned from
/// a STUN Binding response issued to a STUN/TURN server.
#[derive(Default)]
pub struct CandidateServerReflexiveConfig {
    pub base_config: CandidateConfig,
    pub rel_addr: String,
    pub rel_port: u16,
}

impl CandidateServerReflexiveConfig {
    pub fn new_candidate_server_reflexive(self) -> Result<Candidate> {
        let mut c = Candidate::apply_base(&self.base_config, CandidateType::ServerReflexive)?;
        c.related_address = Some(CandidateRelatedAddress {
            address: self.rel_addr,
            port: self.rel_port,
        });
        Ok(c)
    }
}
