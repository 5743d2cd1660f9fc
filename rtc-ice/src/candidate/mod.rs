
pub mod candidate_host;
pub mod candidate_pair;
pub mod candidate_peer_reflexive;
pub mod candidate_relay;
pub mod candidate_server_reflexive;

use crate::network_type::{determine_network_type, NetworkType};
use crate::rand::generate_cand_id;
use serde::Serialize;
use shared::error::*;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

pub(crate) const RECEIVE_MTU: usize = 8192;
pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// Indicates that the candidate is used for RTP. RTCP is always muxed onto
/// the same component (section 1, non-goals: no multi-component support).
pub(crate) const COMPONENT_RTP: u16 = 1;

/// Represents the type of candidate, `CandidateType` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidateType {
    #[serde(rename = "unspecified")]
    Unspecified,
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Unspecified => "unspecified",
        };
        write!(f, "{s}")
    }
}

impl Default for CandidateType {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl CandidateType {
    /// Returns the preference weight of a `CandidateType`.
    ///
    /// RFC 8445 section 5.1.2.2: the RECOMMENDED values are 126 for host
    /// candidates, 110 for peer reflexive, 100 for server reflexive, and 0
    /// for relayed.
    #[must_use]
    pub const fn preference(self) -> u32 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay | Self::Unspecified => 0,
        }
    }
}

/// Gathering state of a single candidate (section 3: `gathering ∈
/// {in-progress, success, failed}`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GatheringState {
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

impl Default for GatheringState {
    fn default() -> Self {
        Self::InProgress
    }
}

/// A transport address related to a candidate, useful for diagnostics and
/// required for reflexive/relayed candidates (`raddr`/`rport`).
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CandidateRelatedAddress {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for CandidateRelatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " related {}:{}", self.address, self.port)
    }
}

/// Shared construction parameters for every candidate kind.
#[derive(Default, Clone)]
pub struct CandidateConfig {
    pub candidate_id: String,
    pub network: String,
    pub address: String,
    pub port: u16,
    pub component: u16,
    pub priority: Option<u32>,
    pub foundation: Option<String>,
}

/// `Candidate` is the single concrete value type describing one transport
/// address a party might use (section 3 of the specification). Unlike the
/// multi-trait-impl hierarchy of older designs, every candidate kind (host,
/// server-reflexive, peer-reflexive, relayed) is this one type distinguished
/// by `candidate_type`; `related_address` and `url` are populated only for
/// the kinds that need them.
#[derive(Clone, Debug, Default)]
pub struct Candidate {
    pub id: String,
    pub network_type: NetworkType,
    pub candidate_type: CandidateType,
    pub component: u16,
    pub address: String,
    pub port: u16,
    pub resolved_addr: SocketAddr,
    pub related_address: Option<CandidateRelatedAddress>,
    pub foundation_override: Option<String>,
    pub priority_override: Option<u32>,
    pub network: String,
    /// Textual identity of the STUN/TURN server this candidate was obtained
    /// through, if any; participates in foundation computation.
    pub url: Option<String>,
    pub gathering: GatheringState,
    /// Extension key/value pairs, preserved in insertion order (round-trip
    /// law 10).
    pub extensions: Vec<(String, String)>,
    pub last_sent: Option<Instant>,
    pub last_received: Option<Instant>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.network_type == other.network_type
            && self.candidate_type == other.candidate_type
            && self.address == other.address
            && self.port == other.port
            && self.related_address == other.related_address
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.candidate_type, self.address, self.port)?;
        if let Some(r) = &self.related_address {
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

impl Candidate {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.resolved_addr
    }

    pub fn set_ip(&mut self, ip: &IpAddr) -> Result<()> {
        let network_type = determine_network_type(&self.network, ip)?;
        self.network_type = network_type;
        self.resolved_addr = SocketAddr::new(*ip, self.port);
        Ok(())
    }

    pub fn seen(&mut self, outbound: bool) {
        let now = Instant::now();
        if outbound {
            self.last_sent = Some(now);
        } else {
            self.last_received = Some(now);
        }
    }

    /// An arbitrary string used in the freezing algorithm to group similar
    /// candidates: the same for two candidates that share `{type, base
    /// address, protocol, STUN/TURN server}` (section 4.2 `ComputeFoundation`).
    #[must_use]
    pub fn foundation(&self) -> String {
        if let Some(f) = &self.foundation_override {
            return f.clone();
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(self.candidate_type.to_string().as_bytes());
        buf.extend_from_slice(self.address.as_bytes());
        buf.extend_from_slice(self.network_type.to_string().as_bytes());
        if let Some(url) = &self.url {
            buf.extend_from_slice(url.as_bytes());
        }
        format!("{}", crc32(&buf))
    }

    /// `ComputePriority` (section 4.2): `2^24·TYPE_PREF + 2^8·LOCAL_PREF +
    /// (256 − component_id)`.
    #[must_use]
    pub fn priority(&self) -> u32 {
        if let Some(p) = self.priority_override {
            return p;
        }
        let local_preference = u32::from(DEFAULT_LOCAL_PREFERENCE);
        (1 << 24) * self.candidate_type.preference()
            + (1 << 8) * local_preference
            + (256 - u32::from(self.component))
    }

    /// Local preference for this candidate given the number of local
    /// interfaces and this candidate's rank among same-family, same-type
    /// siblings (section 4.2). `rank` is zero-based.
    #[must_use]
    pub fn local_preference(&self, n_interfaces: usize, rank: u32) -> u16 {
        if n_interfaces <= 1 {
            return DEFAULT_LOCAL_PREFERENCE;
        }
        let base = self.network_type.default_local_preference();
        base.saturating_sub(rank as u16)
    }

    /// `Format(c)` (section 4.2): canonical ICE candidate-line string.
    #[must_use]
    pub fn marshal(&self) -> String {
        let mut s = format!(
            "{} {} udp {} {} {} typ {}",
            self.foundation(),
            self.component,
            self.priority(),
            self.address,
            self.port,
            self.candidate_type,
        );
        if let Some(r) = &self.related_address {
            s.push_str(&format!(" raddr {} rport {}", r.address, r.port));
        }
        for (k, v) in &self.extensions {
            s.push_str(&format!(" {k} {v}"));
        }
        s
    }

    fn apply_base(config: &CandidateConfig, candidate_type: CandidateType) -> Result<Self> {
        let mut candidate_id = config.candidate_id.clone();
        if candidate_id.is_empty() {
            candidate_id = generate_cand_id();
        }
        let ip: IpAddr = config
            .address
            .parse()
            .map_err(|_| Error::ErrAddressParseFailed)?;
        let network_type = determine_network_type(&config.network, &ip)?;
        Ok(Self {
            id: candidate_id,
            network_type,
            candidate_type,
            address: config.address.clone(),
            port: config.port,
            resolved_addr: SocketAddr::new(ip, config.port),
            component: config.component,
            foundation_override: config.foundation.clone(),
            priority_override: config.priority,
            network: config.network.clone(),
            ..Default::default()
        })
    }
}

/// `Parse(str)` (section 4.2): parses a canonical ICE candidate-line of the
/// form `foundation component transport priority address port "typ" type
/// [raddr addr rport port] [key value]*`.
pub fn unmarshal_candidate(raw: &str) -> Result<Candidate> {
    let split: Vec<&str> = raw.split_whitespace().collect();
    if split.len() < 8 {
        return Err(Error::ErrAttributeTooShortIceCandidate);
    }

    let foundation = split[0].to_owned();
    let component: u16 = split[1].parse().map_err(|_| Error::ErrParseComponent)?;
    let network = split[2].to_owned();
    if network.to_lowercase() != "udp" {
        return Err(Error::ErrDetermineNetworkType);
    }
    let priority: u32 = split[3].parse().map_err(|_| Error::ErrParsePriority)?;
    let address = split[4].to_owned();
    let port: u16 = split[5].parse().map_err(|_| Error::ErrParsePort)?;

    if split[6] != "typ" {
        return Err(Error::ErrParseType);
    }
    let typ = split[7];

    let mut rel_addr = String::new();
    let mut rel_port: u16 = 0;
    let mut extensions = Vec::new();
    let mut i = 8;
    while i + 1 < split.len() {
        match split[i] {
            "raddr" => {
                rel_addr = split[i + 1].to_owned();
            }
            "rport" => {
                rel_port = split[i + 1].parse().map_err(|_| Error::ErrParseRelatedAddr)?;
            }
            key => {
                extensions.push((key.to_owned(), split[i + 1].to_owned()));
            }
        }
        i += 2;
    }

    let base_config = CandidateConfig {
        network,
        address,
        port,
        component,
        priority: Some(priority),
        foundation: Some(foundation),
        ..Default::default()
    };

    let mut c = match typ {
        "host" => candidate_host::CandidateHostConfig { base_config }.new_candidate_host()?,
        "srflx" => candidate_server_reflexive::CandidateServerReflexiveConfig {
            base_config,
            rel_addr,
            rel_port,
        }
        .new_candidate_server_reflexive()?,
        "prflx" => candidate_peer_reflexive::CandidatePeerReflexiveConfig {
            base_config,
            rel_addr,
            rel_port,
        }
        .new_candidate_peer_reflexive()?,
        "relay" => candidate_relay::CandidateRelayConfig {
            base_config,
            rel_addr,
            rel_port,
            url: None,
        }
        .new_candidate_relay()?,
        _ => return Err(Error::ErrUnknownCandidateType),
    };
    c.extensions = extensions;
    Ok(c)
}

fn crc32(data: &[u8]) -> u32 {
    crc::Crc::<u32>::new(&crc::CRC_32_ISCSI).checksum(data)
}
