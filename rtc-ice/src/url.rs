use std::fmt;

use serde::Serialize;
use shared::error::*;

/// Scheme of a STUN/TURN server URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SchemeType {
    #[serde(rename = "stun")]
    Stun,
    #[serde(rename = "stuns")]
    Stuns,
    #[serde(rename = "turn")]
    Turn,
    #[serde(rename = "turns")]
    Turns,
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Stun => "stun",
            Self::Stuns => "stuns",
            Self::Turn => "turn",
            Self::Turns => "turns",
        };
        write!(f, "{s}")
    }
}

/// Transport protocol a server URL is reached over. TURN over TCP/TLS is
/// accepted at the server-config level even though ICE candidates themselves
/// never use TCP, since a TURN relay may itself be reached over TCP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProtoType {
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "tcp")]
    Tcp,
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        };
        write!(f, "{s}")
    }
}

/// A STUN or TURN server configuration, parsed from a `stun:`/`turn:` URL plus
/// optional long-term credentials for TURN.
#[derive(Clone, Debug, PartialEq)]
pub struct Url {
    pub scheme: SchemeType,
    pub host: String,
    pub port: u16,
    pub proto: ProtoType,
    pub username: String,
    pub password: String,
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scheme, self.host, self.port)
    }
}

impl Url {
    /// Parses a `stun:`/`stuns:`/`turn:`/`turns:` URL of the form
    /// `scheme:host[:port][?transport=udp|tcp]`.
    pub fn parse_url(raw: &str) -> Result<Self> {
        let (scheme_str, rest) = raw.split_once(':').ok_or(Error::ErrUrlParse)?;
        let scheme = match scheme_str {
            "stun" => SchemeType::Stun,
            "stuns" => SchemeType::Stuns,
            "turn" => SchemeType::Turn,
            "turns" => SchemeType::Turns,
            _ => return Err(Error::ErrMissingProtocolScheme),
        };

        let (host_port, query) = match rest.split_once('?') {
            Some((a, b)) => (a, Some(b)),
            None => (rest, None),
        };

        let mut parts = host_port.rsplitn(2, ':');
        let maybe_port = parts.next().ok_or(Error::ErrUrlParse)?;
        let (host, port) = match maybe_port.parse::<u16>() {
            Ok(p) => (
                parts.next().ok_or(Error::ErrUrlParse)?.to_owned(),
                p,
            ),
            Err(_) => {
                let default_port = match scheme {
                    SchemeType::Stun | SchemeType::Turn => 3478,
                    SchemeType::Stuns | SchemeType::Turns => 5349,
                };
                (host_port.to_owned(), default_port)
            }
        };

        let mut proto = match scheme {
            SchemeType::Turns | SchemeType::Stuns => ProtoType::Tcp,
            _ => ProtoType::Udp,
        };
        if let Some(q) = query {
            for kv in q.split('&') {
                if let Some((k, v)) = kv.split_once('=') {
                    if k == "transport" {
                        proto = match v {
                            "udp" => ProtoType::Udp,
                            "tcp" => ProtoType::Tcp,
                            _ => return Err(Error::ErrTooManyColonsAddr),
                        };
                    }
                }
            }
        }

        Ok(Self {
            scheme,
            host,
            port,
            proto,
            username: String::new(),
            password: String::new(),
        })
    }

    #[must_use]
    pub fn is_turn(&self) -> bool {
        matches!(self.scheme, SchemeType::Turn | SchemeType::Turns)
    }
}

#[cfg(test)]
mod url_test {
    use super::*;

    #[test]
    fn test_parse_stun_url() {
        let u = Url::parse_url("stun:stun.example.com:19302").unwrap();
        assert_eq!(u.scheme, SchemeType::Stun);
        assert_eq!(u.host, "stun.example.com");
        assert_eq!(u.port, 19302);
        assert_eq!(u.proto, ProtoType::Udp);
    }

    #[test]
    fn test_parse_turn_url_default_port() {
        let u = Url::parse_url("turn:turn.example.com").unwrap();
        assert_eq!(u.scheme, SchemeType::Turn);
        assert_eq!(u.port, 3478);
        assert!(u.is_turn());
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(Url::parse_url("http:example.com").is_err());
    }
}
