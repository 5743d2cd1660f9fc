//! One local bound address owned by a `Stream`, plus the set of candidates
//! derived from it (section 4.3). The actual UDP socket is owned by the host
//! binary embedding this sans-io crate; a `Base` only tracks the local
//! address and which candidate indices in the owning `Stream` were
//! synthesised from it (host first, then any server-reflexive/relayed
//! candidates discovered through this base's servers).

use std::net::SocketAddr;

use crate::candidate::CandidateConfig;
use crate::candidate::candidate_host::CandidateHostConfig;
use crate::network_type::NetworkType;
use shared::error::*;

#[derive(Clone, Debug)]
pub struct Base {
    pub local_addr: SocketAddr,
    pub network_type: NetworkType,
    /// Indices into the owning `Stream::local_candidates`, host candidate
    /// always first.
    pub candidate_indices: Vec<usize>,
}

impl Base {
    /// Binds a new base at `local_addr` and builds its host candidate
    /// config (component 1, per the non-goal against multi-component
    /// support). The caller inserts the resulting candidate into the
    /// owning `Stream`'s arena and records its index via `push_candidate`.
    pub fn new(local_addr: SocketAddr) -> Result<(Self, CandidateConfig)> {
        let network_type = crate::network_type::determine_network_type("udp", &local_addr.ip())?;
        let base = Self {
            local_addr,
            network_type,
            candidate_indices: Vec::new(),
        };
        let config = CandidateConfig {
            network: network_type.to_string(),
            address: local_addr.ip().to_string(),
            port: local_addr.port(),
            component: crate::candidate::COMPONENT_RTP,
            ..Default::default()
        };
        Ok((base, config))
    }

    pub fn host_candidate_config(&self) -> CandidateHostConfig {
        CandidateHostConfig {
            base_config: CandidateConfig {
                network: self.network_type.to_string(),
                address: self.local_addr.ip().to_string(),
                port: self.local_addr.port(),
                component: crate::candidate::COMPONENT_RTP,
                ..Default::default()
            },
        }
    }

    pub fn push_candidate(&mut self, candidate_index: usize) {
        self.candidate_indices.push(candidate_index);
    }
}
