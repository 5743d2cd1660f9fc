//! DTLS-SRTP sequencing on the selected pair (section 4.1 / 4.4 / S5).
//!
//! This crate never links a concrete DTLS or SRTP implementation itself —
//! `shared::crypto::KeyingMaterialExporter` already exists for exactly this
//! reason ("to avoid getting a direct dependency between the dtls and srtp
//! crates"). `DtlsEngine` extends that seam one layer further out: it is the
//! boundary between the checklist scheduler (which knows *when* a handshake
//! should start or which bytes belong to it) and whatever `rtc-dtls`
//! `Endpoint`/`DTLSConn` pair the embedder constructs (which knows *how* to
//! run one). A `Stream` drives the trait; it never reaches into a cipher
//! suite or a record layer.
//!
//! Key length table from section 4.1 `ExportSrtpKeys`.

use std::net::SocketAddr;

use shared::error::Result;

/// One exported SRTP key/salt for a single direction (section 4.1).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SrtpKey {
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

/// `ExportSrtpKeys` result (section 4.1): profile name plus both directions'
/// keying material, still labeled client/server rather than local/remote —
/// `Stream::install_srtp_keys` does the client/server-to-local/remote
/// swap appropriate to the negotiated `DtlsRole`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SrtpKeyingMaterial {
    pub profile_name: String,
    pub client: SrtpKey,
    pub server: SrtpKey,
}

/// `SRTP_*` profile key/salt lengths (section 4.1 table), keyed by the IANA
/// profile name negotiated in the DTLS `use_srtp` extension.
#[must_use]
pub fn profile_key_salt_len(profile_name: &str) -> Option<(usize, usize)> {
    match profile_name {
        "SRTP_AES128_CM_SHA1_80" => Some((16, 14)),
        "SRTP_AES128_CM_SHA1_32" => Some((16, 14)),
        "SRTP_AEAD_AES_128_GCM" => Some((16, 12)),
        "SRTP_AEAD_AES_256_GCM" => Some((32, 12)),
        _ => None,
    }
}

/// Progress report from feeding bytes into a handshake in progress (section
/// 4.1 `DtlsFeed`).
pub enum DtlsProgress {
    /// The handshake needs more flights; any bytes it wants to send have
    /// already been queued on the engine's own transmit path.
    InProgress,
    /// The handshake finished; keying material is ready to export.
    Complete,
}

/// The DTLS/SRTP cryptography library's contract, from the `Stream`'s point
/// of view (section 4.1 `DtlsListen`/`DtlsConnect`/`DtlsFeed`/
/// `ExportSrtpKeys`, section 6 "Socket/DTLS/SRTP library requirements").
/// `token` identifies which pair's association this call concerns; it is
/// opaque to the engine beyond using it as a connection-table key, since
/// engines (e.g. `rtc-dtls::Endpoint`) key associations by remote address,
/// and a `Stream` may run more than one pair's handshake concurrently before
/// one is selected.
pub trait DtlsEngine {
    /// Active side: begin a client handshake toward `remote` (section 4.4
    /// "if the stream's DTLS role is active, initiate DTLS connect").
    fn connect(&mut self, token: u64, remote: SocketAddr) -> Result<()>;

    /// Passive side: prepare to receive a server handshake from `remote`;
    /// does not itself send anything until fed the peer's ClientHello.
    fn listen(&mut self, token: u64, remote: SocketAddr) -> Result<()>;

    /// Feeds one inbound datagram already classified as DTLS (section 4.3
    /// point 3) to the association identified by `token`.
    fn feed(&mut self, token: u64, data: &[u8]) -> Result<DtlsProgress>;

    /// Drains one outbound datagram the engine wants sent for `token`, if
    /// any (handshake flights, retransmissions).
    fn poll_transmit(&mut self, token: u64) -> Option<Vec<u8>>;

    /// `ExportSrtpKeys` (section 4.1): valid only once `feed`/`connect` most
    /// recently reported `DtlsProgress::Complete` for `token`.
    fn export_keys(&mut self, token: u64) -> Result<SrtpKeyingMaterial>;
}

/// Per-session SRTP context (section 3 `Session`: "SRTP context handle";
/// section 4.3 point 4 `srtp_unprotect`). Streams install one send and one
/// receive policy, keyed by SSRC, once their DTLS handshake completes
/// (section 4.5 / S5).
pub trait SrtpEngine {
    /// Installs (or replaces) the policy used to unprotect inbound packets
    /// carrying `remote_ssrc` and to protect outbound packets under
    /// `local_ssrc`, per the profile/key/salt pair exported from DTLS.
    fn install(
        &mut self,
        local_ssrc: u32,
        remote_ssrc: u32,
        profile_name: &str,
        local_key: &SrtpKey,
        remote_key: &SrtpKey,
    ) -> Result<()>;

    /// `srtp_unprotect` (section 4.3 point 4): in-place authenticate and
    /// decrypt; `Ok(n)` is the plaintext length (the auth tag is stripped).
    /// Fails (and the caller drops the datagram, per S6) when the packet's
    /// SSRC has no installed policy or authentication fails.
    fn unprotect(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// `srtp_protect` mirror for outbound media; appends the auth tag and
    /// returns the total on-wire length.
    fn protect(&mut self, buf: &mut Vec<u8>) -> Result<()>;
}
