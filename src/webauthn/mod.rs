//! Wire formats and verifiers for the two WebAuthn ceremonies: collected
//! client data (JSON), authenticator data (fixed binary layout), COSE keys
//! and attestation objects (CBOR).

pub mod assertion;
pub mod attestation;
pub mod authenticator_data;
pub mod client_data;
pub mod cose;

pub use assertion::{AssertionError, AssertionVerifier};
pub use attestation::{AttestationError, AttestationVerifier, AttestedKey};
pub use authenticator_data::{AuthDataError, AuthenticatorData};
pub use client_data::{ClientDataError, CollectedClientData};
pub use cose::{CoseAlg, CoseError, CoseKey};
