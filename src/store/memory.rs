use std::collections::HashMap;
use std::sync::Mutex;

use super::{CredentialRecord, CredentialStore, StoreError, UserIdentity};

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserIdentity>,
    by_id: HashMap<Vec<u8>, CredentialRecord>,
    by_user: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

/// In-memory backend: the default for tests and the self-check binary.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Inner>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn find_user(&self, name: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(name).cloned())
    }

    fn put_user(&self, user: UserIdentity) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .users
            .insert(user.name.clone(), user);
        Ok(())
    }

    fn credentials_for(&self, user_handle: &[u8]) -> Result<Vec<CredentialRecord>, StoreError> {
        let guard = self.inner.lock().unwrap();
        let ids = match guard.by_user.get(user_handle) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids.iter().filter_map(|id| guard.by_id.get(id).cloned()).collect())
    }

    fn find_credential(&self, credential_id: &[u8]) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().by_id.get(credential_id).cloned())
    }

    fn put_credential(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.by_id.contains_key(&record.credential_id) {
            return Err(StoreError::Duplicate);
        }
        guard
            .by_user
            .entry(record.user_handle.clone())
            .or_default()
            .push(record.credential_id.clone());
        guard.by_id.insert(record.credential_id.clone(), record);
        Ok(())
    }

    fn update_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        new: u32,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let record = guard
            .by_id
            .get_mut(credential_id)
            .ok_or(StoreError::NotFound)?;
        if record.sign_count != expected {
            return Err(StoreError::CounterConflict {
                stored: record.sign_count,
            });
        }
        record.sign_count = new;
        Ok(())
    }

    fn delete_credential(&self, credential_id: &[u8]) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock().unwrap();
        match guard.by_id.remove(credential_id) {
            Some(record) => {
                if let Some(ids) = guard.by_user.get_mut(&record.user_handle) {
                    ids.retain(|id| id != credential_id);
                    if ids.is_empty() {
                        guard.by_user.remove(&record.user_handle);
                    }
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
