use std::sync::Arc;

use base64::prelude::*;
use rand::Rng;
use std::time::Instant;

use crate::config::{RpConfig, CHALLENGE_LEN, DEFAULT_CEREMONY_TIMEOUT_MS};
use crate::hex;
use crate::store::{CredentialRecord, CredentialStore, StoreError, UserIdentity};
use crate::webauthn::cose::COSE_ALG_ES256;
use crate::webauthn::{
    AssertionError, AssertionVerifier, AttestationError, AttestationVerifier, ClientDataError,
};

use super::session::{ChallengeSession, SessionStore};
use super::types::{
    AuthenticationResponse, CeremonyError, CeremonyKind, CreationChallengeOptions, CredParam,
    CredentialDescriptor, RegistrationResponse, RequestChallengeOptions, RpEntity, SessionToken,
    UserEntity,
};

const COUNTER_CAS_RETRIES: usize = 4;
const USER_HANDLE_LEN: usize = 16;

/// Orchestrates the two two-step ceremonies. Safe to share across tasks;
/// per-(user, kind) ordering comes from the session store, per-credential
/// counter atomicity from the credential store's compare-and-swap.
pub struct CeremonyEngine {
    config: RpConfig,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    attestation: AttestationVerifier,
    assertion: AssertionVerifier,
}

impl CeremonyEngine {
    pub fn new(
        config: RpConfig,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            attestation: AttestationVerifier::new(&config),
            assertion: AssertionVerifier::new(&config),
            config,
            credentials,
            sessions,
        }
    }

    /// Start a registration ceremony. A never-seen name is the normal path:
    /// identity creation and session creation happen in the same call.
    pub fn begin_registration(
        &self,
        name: &str,
        display_name: &str,
    ) -> Result<(CreationChallengeOptions, SessionToken), CeremonyError> {
        if name.is_empty() {
            return Err(CeremonyError::Validation("username is required".into()));
        }

        let user = match self.credentials.find_user(name)? {
            Some(user) => user,
            None => {
                let mut handle = vec![0u8; USER_HANDLE_LEN];
                rand::thread_rng().fill(handle.as_mut_slice());
                let user = UserIdentity {
                    handle,
                    name: name.to_string(),
                    display_name: if display_name.is_empty() {
                        name.to_string()
                    } else {
                        display_name.to_string()
                    },
                };
                self.credentials.put_user(user.clone())?;
                user
            }
        };

        // Anti-re-registration: everything the user already owns is excluded.
        let exclude: Vec<Vec<u8>> = self
            .credentials
            .credentials_for(&user.handle)?
            .into_iter()
            .map(|c| c.credential_id)
            .collect();

        let (session, token) = self.new_session(&user, CeremonyKind::Registration, exclude.clone());
        let options = CreationChallengeOptions {
            challenge: BASE64_URL_SAFE_NO_PAD.encode(session.challenge),
            rp: RpEntity {
                id: self.config.rp_id.clone(),
                name: self.config.rp_name.clone(),
            },
            user: UserEntity {
                id: user.handle.clone(),
                name: user.name.clone(),
                display_name: user.display_name.clone(),
            },
            pub_key_cred_params: vec![CredParam {
                type_: "public-key".into(),
                alg: COSE_ALG_ES256,
            }],
            timeout: DEFAULT_CEREMONY_TIMEOUT_MS,
            exclude_credentials: descriptors(&exclude),
            attestation: self.config.attestation.conveyance().into(),
            user_verification: self.config.user_verification.as_str().into(),
        };
        self.sessions.put(session);

        tracing::info!(user = name, %token, "Registration ceremony started");
        Ok((options, token))
    }

    pub fn finish_registration(
        &self,
        name: &str,
        token: &SessionToken,
        response: &serde_json::Value,
    ) -> Result<CredentialRecord, CeremonyError> {
        let user = self
            .credentials
            .find_user(name)?
            .ok_or(CeremonyError::UnknownUser)?;
        let session = self.take_session(token, &user, CeremonyKind::Registration)?;

        let response: RegistrationResponse = serde_json::from_value(response.clone())
            .map_err(|e| CeremonyError::Validation(e.to_string()))?;

        let attested = self
            .attestation
            .verify(
                &session.challenge,
                &response.response.client_data_json,
                &response.response.attestation_object,
            )
            .map_err(map_attestation)?;

        if response.raw_id != attested.credential_id {
            return Err(CeremonyError::Validation(
                "rawId does not match attested credential id".into(),
            ));
        }
        if self
            .credentials
            .find_credential(&attested.credential_id)?
            .is_some()
        {
            return Err(CeremonyError::DuplicateCredential);
        }

        let record = CredentialRecord {
            credential_id: attested.credential_id,
            user_handle: user.handle,
            public_key: attested.public_key,
            sign_count: attested.sign_count,
            transports: response.response.transports,
            backup_eligible: attested.backup_eligible,
            backup_state: attested.backup_state,
            created_at: unix_now(),
        };
        match self.credentials.put_credential(record.clone()) {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return Err(CeremonyError::DuplicateCredential),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            user = name,
            cred_id = hex(&record.credential_id),
            "Credential registered"
        );
        Ok(record)
    }

    pub fn begin_login(
        &self,
        name: &str,
    ) -> Result<(RequestChallengeOptions, SessionToken), CeremonyError> {
        let user = self
            .credentials
            .find_user(name)?
            .ok_or(CeremonyError::UnknownUser)?;
        let allow: Vec<Vec<u8>> = self
            .credentials
            .credentials_for(&user.handle)?
            .into_iter()
            .map(|c| c.credential_id)
            .collect();
        if allow.is_empty() {
            // An identity with nothing to assert against cannot log in.
            return Err(CeremonyError::UnknownUser);
        }

        let (session, token) = self.new_session(&user, CeremonyKind::Authentication, allow.clone());
        let options = RequestChallengeOptions {
            challenge: BASE64_URL_SAFE_NO_PAD.encode(session.challenge),
            rp_id: self.config.rp_id.clone(),
            allow_credentials: descriptors(&allow),
            timeout: DEFAULT_CEREMONY_TIMEOUT_MS,
            user_verification: self.config.user_verification.as_str().into(),
        };
        self.sessions.put(session);

        tracing::info!(user = name, %token, "Login ceremony started");
        Ok((options, token))
    }

    pub fn finish_login(
        &self,
        name: &str,
        token: &SessionToken,
        response: &serde_json::Value,
    ) -> Result<CredentialRecord, CeremonyError> {
        let user = self
            .credentials
            .find_user(name)?
            .ok_or(CeremonyError::UnknownUser)?;
        let session = self.take_session(token, &user, CeremonyKind::Authentication)?;

        let response: AuthenticationResponse = serde_json::from_value(response.clone())
            .map_err(|e| CeremonyError::Validation(e.to_string()))?;

        if !session.credential_ids.iter().any(|id| id == &response.raw_id) {
            return Err(CeremonyError::UnknownCredential);
        }
        let record = self
            .credentials
            .find_credential(&response.raw_id)?
            .filter(|r| r.user_handle == user.handle)
            .ok_or(CeremonyError::UnknownCredential)?;

        let asserted = self
            .assertion
            .verify(
                &session.challenge,
                &response.response.client_data_json,
                &response.response.authenticator_data,
                &response.response.signature,
                &record.public_key,
            )
            .map_err(map_assertion)?;

        let stored = self.advance_counter(&record.credential_id, record.sign_count, asserted)?;

        tracing::info!(
            user = name,
            cred_id = hex(&record.credential_id),
            count = asserted,
            "Login verified"
        );
        Ok(CredentialRecord {
            sign_count: stored,
            ..record
        })
    }

    fn new_session(
        &self,
        user: &UserIdentity,
        kind: CeremonyKind,
        credential_ids: Vec<Vec<u8>>,
    ) -> (ChallengeSession, SessionToken) {
        let challenge: [u8; CHALLENGE_LEN] = rand::thread_rng().r#gen();
        let token = SessionToken::generate();
        let session = ChallengeSession {
            token,
            challenge,
            user_handle: user.handle.clone(),
            kind,
            expires_at: Instant::now() + self.config.session_ttl,
            credential_ids,
        };
        (session, token)
    }

    /// Consuming lookup. A token for another user or the wrong ceremony kind
    /// reads as absent, and still burns the session it pointed at.
    fn take_session(
        &self,
        token: &SessionToken,
        user: &UserIdentity,
        kind: CeremonyKind,
    ) -> Result<ChallengeSession, CeremonyError> {
        let session = self
            .sessions
            .take(token)
            .ok_or(CeremonyError::SessionNotFound)?;
        if session.kind != kind || session.user_handle != user.handle {
            return Err(CeremonyError::SessionNotFound);
        }
        Ok(session)
    }

    /// Replay defense: the asserted counter must advance past the stored one,
    /// except 0→0 for authenticators that never increment. The CAS retry
    /// handles the two-concurrent-logins case: whoever lands second re-checks
    /// against the winner's value and fails if it no longer advances.
    fn advance_counter(
        &self,
        credential_id: &[u8],
        stored: u32,
        asserted: u32,
    ) -> Result<u32, CeremonyError> {
        let mut stored = stored;
        for _ in 0..COUNTER_CAS_RETRIES {
            if !(asserted > stored || (asserted == 0 && stored == 0)) {
                return Err(CeremonyError::CounterRegression { stored, asserted });
            }
            match self.credentials.update_counter(credential_id, stored, asserted) {
                Ok(()) => return Ok(asserted),
                Err(StoreError::CounterConflict { stored: current }) => stored = current,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CeremonyError::Internal("counter update contention".into()))
    }
}

fn descriptors(ids: &[Vec<u8>]) -> Vec<CredentialDescriptor> {
    ids.iter()
        .map(|id| CredentialDescriptor {
            type_: "public-key".into(),
            id: id.clone(),
        })
        .collect()
}

fn map_attestation(err: AttestationError) -> CeremonyError {
    match err {
        AttestationError::ClientData(ClientDataError::ChallengeMismatch) => {
            CeremonyError::ChallengeMismatch
        }
        AttestationError::ClientData(ClientDataError::OriginMismatch(_)) => {
            CeremonyError::OriginMismatch
        }
        AttestationError::ClientData(ClientDataError::Malformed(m)) => {
            CeremonyError::Validation(m)
        }
        other => CeremonyError::AttestationInvalid(other),
    }
}

fn map_assertion(err: AssertionError) -> CeremonyError {
    match err {
        AssertionError::ClientData(ClientDataError::ChallengeMismatch) => {
            CeremonyError::ChallengeMismatch
        }
        AssertionError::ClientData(ClientDataError::OriginMismatch(_)) => {
            CeremonyError::OriginMismatch
        }
        AssertionError::ClientData(ClientDataError::Malformed(m)) => CeremonyError::Validation(m),
        other => CeremonyError::AssertionInvalid(other),
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
