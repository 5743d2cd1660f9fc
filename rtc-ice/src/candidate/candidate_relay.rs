use super::*;

/// Config required to create a new relayed candidate, learned from a TURN
/// Allocate response.
#[derive(Default)]
pub struct CandidateRelayConfig {
    pub base_config: CandidateConfig,
    pub rel_addr: String,
    pub rel_port: u16,
    pub url: Option<String>,
}

impl CandidateRelayConfig {
    pub fn new_candidate_relay(self) -> Result<Candidate> {
        let mut c = Candidate::apply_base(&self.base_config, CandidateType::Relay)?;
        c.related_address = Some(CandidateRelatedAddress {
            address: self.rel_addr,
            port: self.rel_port,
        });
        c.url = self.url;
        Ok(c)
    }
}
