use super::*;

/// Config required to create a new host candidate.
#[derive(Default)]
pub struct CandidateHostConfig {
    pub base_config: CandidateConfig,
}

impl CandidateHostConfig {
    /// Creates a new host candidate (the first candidate synthesised by a
    /// `Base`, section 4.3).
    pub fn new_candidate_host(self) -> Result<Candidate> {
        Candidate::apply_base(&self.base_config, CandidateType::Host)
    }
}
