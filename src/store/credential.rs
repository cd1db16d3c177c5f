use serde::{Deserialize, Serialize};

use crate::webauthn::CoseKey;

/// A registered account. Immutable once created; the opaque handle is what
/// credentials and sessions key on, never the human-readable name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub handle: Vec<u8>, // 16 random bytes
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub credential_id: Vec<u8>,
    pub user_handle: Vec<u8>,
    pub public_key: CoseKey,
    /// Monotonically non-decreasing; bumped on every successful login.
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub created_at: u64, // Unix timestamp
}
