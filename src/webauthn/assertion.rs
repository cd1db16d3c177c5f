use sha2::{Digest, Sha256};

use crate::config::RpConfig;

use super::authenticator_data::{AuthDataError, AuthenticatorData};
use super::client_data::{ClientDataError, CollectedClientData, TYPE_GET};
use super::cose::{CoseError, CoseKey};

#[derive(Debug, thiserror::Error)]
pub enum AssertionError {
    #[error("client data: {0}")]
    ClientData(#[from] ClientDataError),
    #[error("authenticator data: {0}")]
    AuthData(#[from] AuthDataError),
    #[error("assertion signature rejected")]
    BadSignature(#[source] CoseError),
}

pub struct AssertionVerifier {
    rp_id: String,
    allowed_origins: Vec<String>,
    require_uv: bool,
}

impl AssertionVerifier {
    pub fn new(config: &RpConfig) -> Self {
        Self {
            rp_id: config.rp_id.clone(),
            allowed_origins: config.allowed_origins.clone(),
            require_uv: config.require_user_verification(),
        }
    }

    /// Validate a login response and verify the signature over
    /// `authenticatorData || SHA-256(clientDataJSON)` with the stored key.
    /// Returns the authenticator's reported signature counter; monotonicity
    /// against the stored counter is the caller's decision.
    pub fn verify(
        &self,
        expected_challenge: &[u8],
        client_data_json: &[u8],
        authenticator_data: &[u8],
        signature: &[u8],
        public_key: &CoseKey,
    ) -> Result<u32, AssertionError> {
        let client_data = CollectedClientData::parse(client_data_json)?;
        client_data.validate(TYPE_GET, expected_challenge, &self.allowed_origins)?;

        let auth_data = AuthenticatorData::parse(authenticator_data)?;
        auth_data.verify_rp_id_hash(&self.rp_id)?;
        auth_data.verify_flags(self.require_uv)?;

        let mut signed = authenticator_data.to_vec();
        signed.extend_from_slice(&Sha256::digest(client_data_json));
        public_key
            .verify(&signed, signature)
            .map_err(AssertionError::BadSignature)?;

        Ok(auth_data.sign_count)
    }
}
