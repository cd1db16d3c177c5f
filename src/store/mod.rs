pub mod credential;
pub mod disk;
pub mod memory;

pub use credential::{CredentialRecord, UserIdentity};
pub use disk::DiskCredentialStore;
pub use memory::MemoryCredentialStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Encrypt: {0}")]
    Encryption(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("Not found")]
    NotFound,
    #[error("Credential id already registered")]
    Duplicate,
    #[error("Counter conflict, stored value is {stored}")]
    CounterConflict { stored: u32 },
}

/// Injected persistence boundary for the ceremony engine. Implementations
/// must be safe to call from parallel tasks and give read-your-writes
/// consistency within the process.
pub trait CredentialStore: Send + Sync {
    fn find_user(&self, name: &str) -> Result<Option<UserIdentity>, StoreError>;
    fn put_user(&self, user: UserIdentity) -> Result<(), StoreError>;

    /// All credentials registered to one user handle.
    fn credentials_for(&self, user_handle: &[u8]) -> Result<Vec<CredentialRecord>, StoreError>;
    /// Store-wide lookup; credential ids are unique across users.
    fn find_credential(&self, credential_id: &[u8]) -> Result<Option<CredentialRecord>, StoreError>;
    /// Fails with `Duplicate` if the credential id exists, for any user.
    fn put_credential(&self, record: CredentialRecord) -> Result<(), StoreError>;
    /// Atomic compare-and-swap on the signature counter. Fails with
    /// `CounterConflict` carrying the current value when `expected` is stale,
    /// closing the two-concurrent-logins lost-update window.
    fn update_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        new: u32,
    ) -> Result<(), StoreError>;
    /// Explicit revocation hook; the engine never deletes automatically.
    fn delete_credential(&self, credential_id: &[u8]) -> Result<bool, StoreError>;
}
