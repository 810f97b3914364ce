//! Process identity used to detect requests a node sends to itself.

use std::str::FromStr;

use http::HeaderMap;
use rand::RngCore;

/// Header carrying the random identity of the requesting process.
pub const IDENTITY_HEADER: &str = "x-delta-random-identity";

/// A random token identifying one running process.
///
/// Outbound delta requests carry it in [`IDENTITY_HEADER`]. A server that receives its own token
/// back is being asked for a delta by itself, which happens when a peer mesh lists the local node
/// among its peers.
#[derive(Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Debug)]
#[display("{_0}")]
#[debug("Identity({_0})")]
pub struct Identity(String);

impl Identity {
    /// Generate a fresh identity from 16 random bytes.
    pub fn generate(mut rng: impl RngCore) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Self(data_encoding::HEXLOWER.encode(&bytes))
    }

    /// The identity as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `headers` carry this identity, i.e. the request originates from ourselves.
    ///
    /// Only the first value of the header is considered.
    pub fn is_self_request(&self, headers: &HeaderMap) -> bool {
        headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| !value.is_empty() && value == self.0)
    }
}

impl FromStr for Identity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        anyhow::ensure!(!s.is_empty(), "identity must not be empty");
        anyhow::ensure!(
            s.chars().all(|c| c.is_ascii_graphic()),
            "identity must be printable ascii"
        );
        Ok(Self(s.to_string()))
    }
}
