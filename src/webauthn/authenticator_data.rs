use sha2::{Digest, Sha256};

use super::cose::{CoseError, CoseKey};

pub const FLAG_UP: u8 = 0x01;
pub const FLAG_UV: u8 = 0x04;
pub const FLAG_BE: u8 = 0x08;
pub const FLAG_BS: u8 = 0x10;
pub const FLAG_AT: u8 = 0x40;
pub const FLAG_ED: u8 = 0x80;

/// rpIdHash (32) + flags (1) + signCount (4).
const HEADER_LEN: usize = 37;
/// AAGUID (16) + credIdLen (2).
const ATTESTED_HEADER_LEN: usize = 18;

#[derive(Debug, thiserror::Error)]
pub enum AuthDataError {
    #[error("authenticator data truncated at {0} bytes")]
    Truncated(usize),
    #[error("rpIdHash does not match relying party id")]
    RpIdHashMismatch,
    #[error("user presence flag not set")]
    UserPresenceRequired,
    #[error("user verification flag not set")]
    UserVerificationRequired,
    #[error("attested credential data missing")]
    NoAttestedCredential,
    #[error("credential public key: {0}")]
    Key(#[from] CoseError),
}

#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
}

/// Parsed authenticator data: rpIdHash | flags | signCount | [attested credential].
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self, AuthDataError> {
        if data.len() < HEADER_LEN {
            return Err(AuthDataError::Truncated(data.len()));
        }
        let rp_id_hash: [u8; 32] = data[0..32].try_into().expect("32-byte slice");
        let flags = data[32];
        let sign_count = u32::from_be_bytes(data[33..37].try_into().expect("4-byte slice"));

        let attested = if flags & FLAG_AT != 0 {
            let rest = &data[HEADER_LEN..];
            if rest.len() < ATTESTED_HEADER_LEN {
                return Err(AuthDataError::Truncated(data.len()));
            }
            let aaguid: [u8; 16] = rest[0..16].try_into().expect("16-byte slice");
            let cred_id_len = u16::from_be_bytes([rest[16], rest[17]]) as usize;
            if rest.len() < ATTESTED_HEADER_LEN + cred_id_len {
                return Err(AuthDataError::Truncated(data.len()));
            }
            let credential_id = rest[18..18 + cred_id_len].to_vec();
            // The COSE key is CBOR-self-delimiting; extension bytes may follow.
            let public_key = CoseKey::decode(&rest[18 + cred_id_len..])?;
            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                public_key,
            })
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested,
        })
    }

    pub fn verify_rp_id_hash(&self, rp_id: &str) -> Result<(), AuthDataError> {
        let expected: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
        if self.rp_id_hash != expected {
            return Err(AuthDataError::RpIdHashMismatch);
        }
        Ok(())
    }

    /// User presence is mandatory; user verification only when required by policy.
    pub fn verify_flags(&self, require_uv: bool) -> Result<(), AuthDataError> {
        if self.flags & FLAG_UP == 0 {
            return Err(AuthDataError::UserPresenceRequired);
        }
        if require_uv && self.flags & FLAG_UV == 0 {
            return Err(AuthDataError::UserVerificationRequired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::cose::CoseAlg;

    fn build_auth_data(
        rp_id: &str,
        flags: u8,
        sign_count: u32,
        attested: Option<(&[u8], &CoseKey)>,
    ) -> Vec<u8> {
        let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
        let mut data = Vec::new();
        data.extend_from_slice(&rp_id_hash);
        data.push(flags);
        data.extend_from_slice(&sign_count.to_be_bytes());
        if let Some((cred_id, key)) = attested {
            data.extend_from_slice(&[0u8; 16]); // AAGUID
            data.extend_from_slice(&(cred_id.len() as u16).to_be_bytes());
            data.extend_from_slice(cred_id);
            data.extend_from_slice(&key.encode());
        }
        data
    }

    fn key() -> CoseKey {
        CoseKey {
            alg: CoseAlg::Es256,
            x: [0x11; 32],
            y: [0x22; 32],
        }
    }

    #[test]
    fn test_parse_assertion_auth_data() {
        let raw = build_auth_data("example.com", FLAG_UP, 42, None);
        let parsed = AuthenticatorData::parse(&raw).unwrap();
        assert_eq!(parsed.sign_count, 42);
        assert_eq!(parsed.flags, FLAG_UP);
        assert!(parsed.attested.is_none());
        parsed.verify_rp_id_hash("example.com").unwrap();
    }

    #[test]
    fn test_parse_attested_credential() {
        let k = key();
        let cred_id = [0x77u8; 32];
        let raw = build_auth_data("example.com", FLAG_UP | FLAG_AT, 0, Some((&cred_id, &k)));
        let parsed = AuthenticatorData::parse(&raw).unwrap();
        let attested = parsed.attested.expect("attested credential data");
        assert_eq!(attested.credential_id, cred_id);
        assert_eq!(attested.public_key, k);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let err = AuthenticatorData::parse(&[0u8; 36]).unwrap_err();
        assert!(matches!(err, AuthDataError::Truncated(36)));
    }

    #[test]
    fn test_truncated_credential_id_rejected() {
        let k = key();
        let cred_id = [0x77u8; 32];
        let mut raw =
            build_auth_data("example.com", FLAG_UP | FLAG_AT, 0, Some((&cred_id, &k)));
        raw.truncate(60); // inside the credential id
        let err = AuthenticatorData::parse(&raw).unwrap_err();
        assert!(matches!(err, AuthDataError::Truncated(_)));
    }

    #[test]
    fn test_rp_id_hash_mismatch() {
        let raw = build_auth_data("example.com", FLAG_UP, 1, None);
        let parsed = AuthenticatorData::parse(&raw).unwrap();
        let err = parsed.verify_rp_id_hash("other.example").unwrap_err();
        assert!(matches!(err, AuthDataError::RpIdHashMismatch));
    }

    #[test]
    fn test_flags_require_user_presence() {
        let raw = build_auth_data("example.com", 0, 1, None);
        let parsed = AuthenticatorData::parse(&raw).unwrap();
        let err = parsed.verify_flags(false).unwrap_err();
        assert!(matches!(err, AuthDataError::UserPresenceRequired));
    }

    #[test]
    fn test_flags_uv_only_when_required() {
        let raw = build_auth_data("example.com", FLAG_UP, 1, None);
        let parsed = AuthenticatorData::parse(&raw).unwrap();
        parsed.verify_flags(false).unwrap();
        let err = parsed.verify_flags(true).unwrap_err();
        assert!(matches!(err, AuthDataError::UserVerificationRequired));
    }
}
