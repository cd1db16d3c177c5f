//! In-process software authenticator. Produces well-formed registration and
//! login responses for any challenge, with hooks to misbehave on demand:
//! wrong origin, frozen counters, corrupted signatures, exotic attestation
//! formats. Used by the test suite and the self-check binary; never a
//! security boundary.

use std::collections::HashMap;

use base64::prelude::*;
use ciborium::value::Value;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::ceremony::types::{CreationChallengeOptions, RequestChallengeOptions};
use crate::webauthn::authenticator_data::{FLAG_AT, FLAG_UP, FLAG_UV};
use crate::webauthn::{CoseAlg, CoseKey};

const AAGUID: [u8; 16] = [0u8; 16];

pub struct SoftToken {
    pub rp_id: String,
    pub origin: String,
    /// Emit fmt "none" with an empty statement instead of packed self-attestation.
    pub attestation_none: bool,
    /// Emit an arbitrary fmt string (for unknown-format tests).
    pub attestation_fmt_override: Option<String>,
    /// Flip a signature byte after signing.
    pub corrupt_signature: bool,
    /// Mint the next credential with this id instead of a random one.
    pub fixed_credential_id: Option<[u8; 32]>,
    /// Whether the UV flag is reported.
    pub user_verified: bool,
    /// When false, every assertion reports counter 0 (a never-incrementing
    /// authenticator).
    pub auto_increment: bool,
    keys: HashMap<Vec<u8>, SigningKey>,
    counters: HashMap<Vec<u8>, u32>,
}

impl SoftToken {
    pub fn new(rp_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            origin: origin.into(),
            attestation_none: false,
            attestation_fmt_override: None,
            corrupt_signature: false,
            fixed_credential_id: None,
            user_verified: true,
            auto_increment: true,
            keys: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    pub fn credential_ids(&self) -> Vec<Vec<u8>> {
        self.keys.keys().cloned().collect()
    }

    /// Answer creation options with a browser-shaped registration response.
    pub fn register(&mut self, options: &CreationChallengeOptions) -> serde_json::Value {
        let (cred_id, cdj, att_obj) = self.make_credential(&options.challenge);
        serde_json::json!({
            "id": BASE64_URL_SAFE_NO_PAD.encode(&cred_id),
            "rawId": BASE64_URL_SAFE_NO_PAD.encode(&cred_id),
            "type": "public-key",
            "response": {
                "clientDataJSON": BASE64_URL_SAFE_NO_PAD.encode(&cdj),
                "attestationObject": BASE64_URL_SAFE_NO_PAD.encode(&att_obj),
                "transports": ["internal"],
            },
        })
    }

    /// Raw-format registration for verifier-level tests: returns
    /// (clientDataJSON, attestationObject).
    pub fn register_raw(&mut self, challenge: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let challenge = BASE64_URL_SAFE_NO_PAD.encode(challenge);
        let (_, cdj, att_obj) = self.make_credential(&challenge);
        (cdj, att_obj)
    }

    /// Answer request options with the first allowed credential we hold.
    pub fn assert(&mut self, options: &RequestChallengeOptions) -> Option<serde_json::Value> {
        let cred_id = options
            .allow_credentials
            .iter()
            .map(|d| d.id.clone())
            .find(|id| self.keys.contains_key(id))?;
        let counter = if self.auto_increment {
            self.counters.get(&cred_id).copied().unwrap_or(0) + 1
        } else {
            0
        };
        self.assert_with_counter(options, &cred_id, counter)
    }

    /// Like `assert` but with an explicit counter value, for replay and
    /// regression tests.
    pub fn assert_with_counter(
        &mut self,
        options: &RequestChallengeOptions,
        credential_id: &[u8],
        counter: u32,
    ) -> Option<serde_json::Value> {
        let (cdj, auth_data, sig) =
            self.sign_assertion(&options.challenge, credential_id, counter)?;
        Some(serde_json::json!({
            "id": BASE64_URL_SAFE_NO_PAD.encode(credential_id),
            "rawId": BASE64_URL_SAFE_NO_PAD.encode(credential_id),
            "type": "public-key",
            "response": {
                "clientDataJSON": BASE64_URL_SAFE_NO_PAD.encode(&cdj),
                "authenticatorData": BASE64_URL_SAFE_NO_PAD.encode(&auth_data),
                "signature": BASE64_URL_SAFE_NO_PAD.encode(&sig),
            },
        }))
    }

    /// Raw-format assertion: (clientDataJSON, authenticatorData, signature).
    pub fn assert_raw(
        &mut self,
        challenge: &[u8],
        credential_id: &[u8],
        counter: u32,
    ) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let challenge = BASE64_URL_SAFE_NO_PAD.encode(challenge);
        self.sign_assertion(&challenge, credential_id, counter)
    }

    fn make_credential(&mut self, challenge_b64: &str) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let cred_id: [u8; 32] = self
            .fixed_credential_id
            .take()
            .unwrap_or_else(|| rand::thread_rng().r#gen());
        let key = SigningKey::random(&mut rand::rngs::OsRng);

        let cdj = self.client_data("webauthn.create", challenge_b64);
        let cose = cose_key(&key);
        let auth_data = build_attested_auth_data(
            &self.rp_id,
            self.flags() | FLAG_AT,
            &cred_id,
            &cose.encode(),
        );

        let mut to_sign = auth_data.clone();
        to_sign.extend_from_slice(&Sha256::digest(&cdj));
        let sig: Signature = key.sign(&to_sign);
        let mut der_sig = sig.to_der().as_bytes().to_vec();
        if self.corrupt_signature {
            let last = der_sig.len() - 1;
            der_sig[last] ^= 0x01;
        }

        let att_obj = self.attestation_object(&auth_data, &der_sig);

        self.keys.insert(cred_id.to_vec(), key);
        self.counters.insert(cred_id.to_vec(), 0);
        (cred_id.to_vec(), cdj, att_obj)
    }

    fn sign_assertion(
        &mut self,
        challenge_b64: &str,
        credential_id: &[u8],
        counter: u32,
    ) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let key = self.keys.get(credential_id)?;

        let cdj = self.client_data("webauthn.get", challenge_b64);
        let auth_data = build_assertion_auth_data(&self.rp_id, self.flags(), counter);

        let mut to_sign = auth_data.clone();
        to_sign.extend_from_slice(&Sha256::digest(&cdj));
        let sig: Signature = key.sign(&to_sign);
        let mut der_sig = sig.to_der().as_bytes().to_vec();
        if self.corrupt_signature {
            let last = der_sig.len() - 1;
            der_sig[last] ^= 0x01;
        }

        self.counters.insert(credential_id.to_vec(), counter);
        Some((cdj, auth_data, der_sig))
    }

    fn client_data(&self, type_: &str, challenge_b64: &str) -> Vec<u8> {
        serde_json::json!({
            "type": type_,
            "challenge": challenge_b64,
            "origin": self.origin,
            "crossOrigin": false,
        })
        .to_string()
        .into_bytes()
    }

    fn flags(&self) -> u8 {
        if self.user_verified {
            FLAG_UP | FLAG_UV
        } else {
            FLAG_UP
        }
    }

    fn attestation_object(&self, auth_data: &[u8], der_sig: &[u8]) -> Vec<u8> {
        let fmt = if self.attestation_none {
            "none".to_string()
        } else {
            self.attestation_fmt_override
                .clone()
                .unwrap_or_else(|| "packed".to_string())
        };
        let att_stmt = if fmt == "none" {
            Value::Map(vec![])
        } else {
            Value::Map(vec![
                (Value::Text("alg".into()), Value::Integer((-7i64).into())),
                (Value::Text("sig".into()), Value::Bytes(der_sig.to_vec())),
            ])
        };
        let map = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(fmt)),
            (Value::Text("attStmt".into()), att_stmt),
            (Value::Text("authData".into()), Value::Bytes(auth_data.to_vec())),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).expect("attestation object encoding is infallible");
        buf
    }
}

fn cose_key(key: &SigningKey) -> CoseKey {
    let point = key.verifying_key().to_encoded_point(false);
    CoseKey {
        alg: CoseAlg::Es256,
        x: point.x().expect("uncompressed point").as_slice().try_into().expect("32 bytes"),
        y: point.y().expect("uncompressed point").as_slice().try_into().expect("32 bytes"),
    }
}

fn build_attested_auth_data(
    rp_id: &str,
    flags: u8,
    credential_id: &[u8],
    cose_key: &[u8],
) -> Vec<u8> {
    let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
    let mut data = Vec::new();
    data.extend_from_slice(&rp_id_hash);
    data.push(flags);
    data.extend_from_slice(&[0, 0, 0, 0]); // signCount = 0 at creation
    data.extend_from_slice(&AAGUID);
    data.extend_from_slice(&(credential_id.len() as u16).to_be_bytes());
    data.extend_from_slice(credential_id);
    data.extend_from_slice(cose_key);
    data
}

fn build_assertion_auth_data(rp_id: &str, flags: u8, sign_count: u32) -> Vec<u8> {
    let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
    let mut data = Vec::new();
    data.extend_from_slice(&rp_id_hash);
    data.push(flags);
    data.extend_from_slice(&sign_count.to_be_bytes());
    data
}
