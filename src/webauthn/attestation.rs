use ciborium::value::Value;
use sha2::{Digest, Sha256};

use crate::config::{AttestationPolicy, RpConfig};

use super::authenticator_data::{AuthDataError, AuthenticatorData, FLAG_BE, FLAG_BS};
use super::client_data::{ClientDataError, CollectedClientData, TYPE_CREATE};
use super::cose::{cbor_bytes, cbor_get_str, cbor_int, cbor_map, cbor_text, COSE_ALG_ES256};
use super::cose::{CoseError, CoseKey};

/// Internal reason codes. Logged server-side; callers collapse all of these
/// to a generic verification failure before anything reaches a client.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("client data: {0}")]
    ClientData(#[from] ClientDataError),
    #[error("authenticator data: {0}")]
    AuthData(#[from] AuthDataError),
    #[error("attestation object cbor: {0}")]
    Cbor(String),
    #[error("attestation object missing {0}")]
    MissingField(&'static str),
    #[error("attestation format {0:?} not recognized")]
    UnknownFormat(String),
    #[error("attestation policy rejects {0}")]
    PolicyRejected(&'static str),
    #[error("attestation statement algorithm {0} unsupported")]
    UnsupportedAlgorithm(i64),
    #[error("attestation signature rejected")]
    BadSignature(#[source] CoseError),
}

/// What a successful registration verification yields: everything the
/// engine needs to mint a credential record.
#[derive(Debug, Clone)]
pub struct AttestedKey {
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
    pub sign_count: u32,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

pub struct AttestationVerifier {
    rp_id: String,
    allowed_origins: Vec<String>,
    policy: AttestationPolicy,
    require_uv: bool,
}

impl AttestationVerifier {
    pub fn new(config: &RpConfig) -> Self {
        Self {
            rp_id: config.rp_id.clone(),
            allowed_origins: config.allowed_origins.clone(),
            policy: config.attestation,
            require_uv: config.require_user_verification(),
        }
    }

    /// Validate a registration response against the session challenge and
    /// relying-party configuration, returning the newly attested key.
    pub fn verify(
        &self,
        expected_challenge: &[u8],
        client_data_json: &[u8],
        attestation_object: &[u8],
    ) -> Result<AttestedKey, AttestationError> {
        let client_data = CollectedClientData::parse(client_data_json)?;
        client_data.validate(TYPE_CREATE, expected_challenge, &self.allowed_origins)?;

        let (fmt, att_stmt, auth_data_bytes) = parse_attestation_object(attestation_object)?;

        let auth_data = AuthenticatorData::parse(&auth_data_bytes)?;
        auth_data.verify_rp_id_hash(&self.rp_id)?;
        auth_data.verify_flags(self.require_uv)?;
        let attested = auth_data
            .attested
            .as_ref()
            .ok_or(AuthDataError::NoAttestedCredential)?;

        match fmt.as_str() {
            "none" => {
                if !matches!(
                    self.policy,
                    AttestationPolicy::None | AttestationPolicy::NoneAcceptable
                ) {
                    return Err(AttestationError::PolicyRejected("format \"none\""));
                }
            }
            "packed" => {
                self.verify_packed(&att_stmt, &auth_data_bytes, client_data_json, attested)?
            }
            other => {
                if self.policy != AttestationPolicy::NoneAcceptable {
                    return Err(AttestationError::UnknownFormat(other.to_string()));
                }
            }
        }

        Ok(AttestedKey {
            credential_id: attested.credential_id.clone(),
            public_key: attested.public_key.clone(),
            sign_count: auth_data.sign_count,
            backup_eligible: auth_data.flags & FLAG_BE != 0,
            backup_state: auth_data.flags & FLAG_BS != 0,
        })
    }

    /// "packed" statement: self-attestation verifies with the credential's
    /// own key; a certificate chain needs an x509 trust store we do not
    /// carry, so x5c is only admissible under the none-acceptable policy.
    fn verify_packed(
        &self,
        att_stmt: &[(Value, Value)],
        auth_data_bytes: &[u8],
        client_data_json: &[u8],
        attested: &super::authenticator_data::AttestedCredentialData,
    ) -> Result<(), AttestationError> {
        if cbor_get_str(att_stmt, "x5c").is_some() {
            if self.policy == AttestationPolicy::NoneAcceptable {
                return Ok(());
            }
            return Err(AttestationError::PolicyRejected(
                "packed statement with certificate chain",
            ));
        }

        let alg = cbor_get_str(att_stmt, "alg")
            .and_then(cbor_int)
            .ok_or(AttestationError::MissingField("attStmt.alg"))?;
        if alg != COSE_ALG_ES256 {
            return Err(AttestationError::UnsupportedAlgorithm(alg));
        }
        let sig = cbor_get_str(att_stmt, "sig")
            .and_then(cbor_bytes)
            .ok_or(AttestationError::MissingField("attStmt.sig"))?;

        let mut signed = auth_data_bytes.to_vec();
        signed.extend_from_slice(&Sha256::digest(client_data_json));
        attested
            .public_key
            .verify(&signed, sig)
            .map_err(AttestationError::BadSignature)
    }
}

/// Split `{fmt, attStmt, authData}` (string keys, per WebAuthn; CTAP2 uses
/// integer keys on the authenticator side of the same object).
fn parse_attestation_object(
    data: &[u8],
) -> Result<(String, Vec<(Value, Value)>, Vec<u8>), AttestationError> {
    let value: Value =
        ciborium::from_reader(data).map_err(|e| AttestationError::Cbor(e.to_string()))?;
    let map = cbor_map(&value).ok_or_else(|| AttestationError::Cbor("expected map".into()))?;

    let fmt = cbor_get_str(map, "fmt")
        .and_then(cbor_text)
        .ok_or(AttestationError::MissingField("fmt"))?
        .to_string();
    let att_stmt = cbor_get_str(map, "attStmt")
        .and_then(cbor_map)
        .ok_or(AttestationError::MissingField("attStmt"))?
        .to_vec();
    let auth_data = cbor_get_str(map, "authData")
        .and_then(cbor_bytes)
        .ok_or(AttestationError::MissingField("authData"))?
        .to_vec();
    Ok((fmt, att_stmt, auth_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::softtoken::SoftToken;
    use crate::webauthn::client_data::TYPE_GET;
    use base64::prelude::*;

    fn config() -> RpConfig {
        RpConfig::new("localhost", "http://localhost:8000")
    }

    fn token() -> SoftToken {
        SoftToken::new("localhost", "http://localhost:8000")
    }

    #[test]
    fn test_packed_self_attestation_accepted() {
        let challenge = [5u8; 32];
        let mut tok = token();
        let (cdj, att_obj) = tok.register_raw(&challenge);
        let verifier = AttestationVerifier::new(&config());
        let key = verifier.verify(&challenge, &cdj, &att_obj).unwrap();
        assert_eq!(key.credential_id.len(), 32);
        assert_eq!(key.sign_count, 0);
    }

    #[test]
    fn test_none_format_needs_permissive_policy() {
        let challenge = [5u8; 32];
        let mut tok = token();
        tok.attestation_none = true;
        let (cdj, att_obj) = tok.register_raw(&challenge);

        let mut cfg = config();
        cfg.attestation = AttestationPolicy::Direct;
        let err = AttestationVerifier::new(&cfg)
            .verify(&challenge, &cdj, &att_obj)
            .unwrap_err();
        assert!(matches!(err, AttestationError::PolicyRejected(_)));

        cfg.attestation = AttestationPolicy::None;
        AttestationVerifier::new(&cfg)
            .verify(&challenge, &cdj, &att_obj)
            .unwrap();
    }

    #[test]
    fn test_unknown_format_rejected_unless_none_acceptable() {
        let challenge = [5u8; 32];
        let mut tok = token();
        tok.attestation_fmt_override = Some("fido-u2f".to_string());
        let (cdj, att_obj) = tok.register_raw(&challenge);

        let mut cfg = config();
        cfg.attestation = AttestationPolicy::Indirect;
        let err = AttestationVerifier::new(&cfg)
            .verify(&challenge, &cdj, &att_obj)
            .unwrap_err();
        assert!(matches!(err, AttestationError::UnknownFormat(f) if f == "fido-u2f"));

        cfg.attestation = AttestationPolicy::NoneAcceptable;
        AttestationVerifier::new(&cfg)
            .verify(&challenge, &cdj, &att_obj)
            .unwrap();
    }

    #[test]
    fn test_challenge_mismatch_surfaces() {
        let mut tok = token();
        let (cdj, att_obj) = tok.register_raw(&[5u8; 32]);
        let err = AttestationVerifier::new(&config())
            .verify(&[6u8; 32], &cdj, &att_obj)
            .unwrap_err();
        assert!(matches!(
            err,
            AttestationError::ClientData(ClientDataError::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_origin_mismatch_surfaces() {
        let challenge = [5u8; 32];
        let mut tok = SoftToken::new("localhost", "https://evil.example");
        let (cdj, att_obj) = tok.register_raw(&challenge);
        let err = AttestationVerifier::new(&config())
            .verify(&challenge, &cdj, &att_obj)
            .unwrap_err();
        assert!(matches!(
            err,
            AttestationError::ClientData(ClientDataError::OriginMismatch(_))
        ));
    }

    #[test]
    fn test_wrong_client_data_type_rejected() {
        let challenge = [5u8; 32];
        let mut tok = token();
        let (_, att_obj) = tok.register_raw(&challenge);
        let cdj = format!(
            r#"{{"type":"{TYPE_GET}","challenge":"{}","origin":"http://localhost:8000"}}"#,
            BASE64_URL_SAFE_NO_PAD.encode(challenge)
        );
        let err = AttestationVerifier::new(&config())
            .verify(&challenge, cdj.as_bytes(), &att_obj)
            .unwrap_err();
        assert!(matches!(
            err,
            AttestationError::ClientData(ClientDataError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_rp_id_mismatch_rejected() {
        let challenge = [5u8; 32];
        let mut tok = SoftToken::new("other.example", "http://localhost:8000");
        let (cdj, att_obj) = tok.register_raw(&challenge);
        let err = AttestationVerifier::new(&config())
            .verify(&challenge, &cdj, &att_obj)
            .unwrap_err();
        assert!(matches!(
            err,
            AttestationError::AuthData(AuthDataError::RpIdHashMismatch)
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let challenge = [5u8; 32];
        let mut tok = token();
        tok.corrupt_signature = true;
        let (cdj, att_obj) = tok.register_raw(&challenge);
        let err = AttestationVerifier::new(&config())
            .verify(&challenge, &cdj, &att_obj)
            .unwrap_err();
        assert!(matches!(err, AttestationError::BadSignature(_)));
    }

    #[test]
    fn test_garbage_attestation_object() {
        let challenge = [5u8; 32];
        let cdj = format!(
            r#"{{"type":"webauthn.create","challenge":"{}","origin":"http://localhost:8000"}}"#,
            BASE64_URL_SAFE_NO_PAD.encode(challenge)
        );
        let err = AttestationVerifier::new(&config())
            .verify(&challenge, cdj.as_bytes(), &[0xff, 0xff])
            .unwrap_err();
        assert!(matches!(err, AttestationError::Cbor(_)));
    }
}
