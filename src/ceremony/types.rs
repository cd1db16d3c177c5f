use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SESSION_TOKEN_LEN;
use crate::store::StoreError;
use crate::webauthn::{AssertionError, AttestationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

/// Opaque handle to a pending ceremony, issued at begin and consumed at
/// finish. Random, never derived from user data.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken([u8; SESSION_TOKEN_LEN]);

impl SessionToken {
    pub fn generate() -> Self {
        Self(rand::Rng::r#gen(&mut rand::thread_rng()))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_TOKEN_LEN] {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&BASE64_URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken({self})")
    }
}

impl std::str::FromStr for SessionToken {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| CeremonyError::Validation("malformed session token".into()))?;
        let bytes: [u8; SESSION_TOKEN_LEN] = bytes
            .try_into()
            .map_err(|_| CeremonyError::Validation("malformed session token".into()))?;
        Ok(Self(bytes))
    }
}

// Serde helper for base64url-no-pad byte fields, the encoding browsers use
// in PublicKeyCredential JSON.
pub(crate) mod b64 {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        BASE64_URL_SAFE_NO_PAD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntity {
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredParam {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(with = "b64")]
    pub id: Vec<u8>,
}

/// PublicKeyCredentialCreationOptions, serialized for the boundary to hand
/// to `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationChallengeOptions {
    pub challenge: String,
    pub rp: RpEntity,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<CredParam>,
    pub timeout: u64,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub attestation: String,
    pub user_verification: String,
}

/// PublicKeyCredentialRequestOptions for `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestChallengeOptions {
    pub challenge: String,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub timeout: u64,
    pub user_verification: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponseBody {
    #[serde(rename = "clientDataJSON", with = "b64")]
    pub client_data_json: Vec<u8>,
    #[serde(rename = "attestationObject", with = "b64")]
    pub attestation_object: Vec<u8>,
    #[serde(default)]
    pub transports: Vec<String>,
}

/// Browser-shaped registration response (`PublicKeyCredential` with an
/// `AuthenticatorAttestationResponse`).
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    pub id: String,
    #[serde(rename = "rawId", with = "b64")]
    pub raw_id: Vec<u8>,
    pub response: RegistrationResponseBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationResponseBody {
    #[serde(rename = "clientDataJSON", with = "b64")]
    pub client_data_json: Vec<u8>,
    #[serde(rename = "authenticatorData", with = "b64")]
    pub authenticator_data: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// Browser-shaped login response (`AuthenticatorAssertionResponse`).
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticationResponse {
    pub id: String,
    #[serde(rename = "rawId", with = "b64")]
    pub raw_id: Vec<u8>,
    pub response: AuthenticationResponseBody,
}

/// How a failure should look to the client. Everything verification-adjacent
/// collapses to one generic class so responses cannot be used as an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Malformed input; do not retry unchanged.
    BadRequest,
    /// Generic "verification failed"; restart the ceremony.
    VerificationFailed,
    /// Unknown user or credential.
    NotFound,
    /// Storage or crypto fault; retry with backoff.
    Internal,
}

impl ClientStatus {
    pub fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::VerificationFailed => 401,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CeremonyError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unknown user")]
    UnknownUser,
    #[error("unknown credential")]
    UnknownCredential,
    #[error("no pending session")]
    SessionNotFound,
    #[error("origin mismatch")]
    OriginMismatch,
    #[error("challenge mismatch")]
    ChallengeMismatch,
    #[error("attestation invalid: {0}")]
    AttestationInvalid(#[source] AttestationError),
    #[error("assertion invalid: {0}")]
    AssertionInvalid(#[source] AssertionError),
    #[error("counter regression: stored {stored}, asserted {asserted}")]
    CounterRegression { stored: u32, asserted: u32 },
    #[error("credential already registered")]
    DuplicateCredential,
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("internal: {0}")]
    Internal(String),
}

impl CeremonyError {
    pub fn client_status(&self) -> ClientStatus {
        match self {
            Self::Validation(_) => ClientStatus::BadRequest,
            Self::UnknownUser | Self::UnknownCredential => ClientStatus::NotFound,
            Self::SessionNotFound
            | Self::OriginMismatch
            | Self::ChallengeMismatch
            | Self::AttestationInvalid(_)
            | Self::AssertionInvalid(_)
            | Self::CounterRegression { .. }
            | Self::DuplicateCredential => ClientStatus::VerificationFailed,
            Self::Store(_) | Self::Internal(_) => ClientStatus::Internal,
        }
    }

    /// The only text a client ever sees; detail stays in server logs.
    pub fn client_message(&self) -> &'static str {
        match self.client_status() {
            ClientStatus::BadRequest => "invalid request",
            ClientStatus::VerificationFailed => "verification failed",
            ClientStatus::NotFound => "not found",
            ClientStatus::Internal => "internal error",
        }
    }
}
