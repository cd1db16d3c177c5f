use base64::prelude::*;
use serde::Deserialize;

pub const TYPE_CREATE: &str = "webauthn.create";
pub const TYPE_GET: &str = "webauthn.get";

#[derive(Debug, thiserror::Error)]
pub enum ClientDataError {
    #[error("malformed client data: {0}")]
    Malformed(String),
    #[error("client data type is {got:?}, expected {expected:?}")]
    TypeMismatch { expected: &'static str, got: String },
    #[error("challenge mismatch")]
    ChallengeMismatch,
    #[error("origin {0:?} not allowed")]
    OriginMismatch(String),
}

/// The collectedClientData JSON a browser embeds in every ceremony response.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub type_: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default, rename = "crossOrigin")]
    pub cross_origin: bool,
}

impl CollectedClientData {
    pub fn parse(json: &[u8]) -> Result<Self, ClientDataError> {
        serde_json::from_slice(json).map_err(|e| ClientDataError::Malformed(e.to_string()))
    }

    /// Check type, challenge and origin against relying-party expectations.
    ///
    /// The challenge is compared as the client's literal base64url string
    /// against the canonical encoding of the stored bytes; the client's
    /// value is never decoded and re-encoded, so encoding ambiguity
    /// (padding, alternate alphabets) cannot smuggle a stale challenge past
    /// the check.
    pub fn validate(
        &self,
        expected_type: &'static str,
        expected_challenge: &[u8],
        allowed_origins: &[String],
    ) -> Result<(), ClientDataError> {
        if self.type_ != expected_type {
            return Err(ClientDataError::TypeMismatch {
                expected: expected_type,
                got: self.type_.clone(),
            });
        }
        let canonical = BASE64_URL_SAFE_NO_PAD.encode(expected_challenge);
        if self.challenge != canonical {
            return Err(ClientDataError::ChallengeMismatch);
        }
        if !allowed_origins.iter().any(|o| o == &self.origin) {
            return Err(ClientDataError::OriginMismatch(self.origin.clone()));
        }
        Ok(())
    }
}
