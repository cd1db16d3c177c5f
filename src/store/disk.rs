use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};

use super::{CredentialRecord, CredentialStore, StoreError, UserIdentity};

const USERS_FILE: &str = "users.bin";

struct Inner {
    users: HashMap<String, UserIdentity>,
    by_id: HashMap<Vec<u8>, CredentialRecord>,
}

/// Encrypted file-backed store: one AES-256-GCM-sealed CBOR file per
/// credential (`{credential_id_hex}.bin`) plus a sealed users file, with a
/// full in-memory index loaded at construction. Corrupt files are skipped
/// with a warning rather than failing the whole store.
pub struct DiskCredentialStore {
    aes_key: [u8; 32],
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl DiskCredentialStore {
    pub fn load(aes_key: [u8; 32], dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;

        let users_path = dir.join(USERS_FILE);
        let users: Vec<UserIdentity> = if users_path.exists() {
            read_sealed(&aes_key, &users_path)?
        } else {
            Vec::new()
        };

        let mut by_id = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin")
                || path.file_name().and_then(|n| n.to_str()) == Some(USERS_FILE)
            {
                continue;
            }
            match read_sealed::<CredentialRecord>(&aes_key, &path) {
                Ok(record) => {
                    by_id.insert(record.credential_id.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt credential file");
                }
            }
        }

        Ok(Self {
            aes_key,
            dir,
            inner: Mutex::new(Inner {
                users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
                by_id,
            }),
        })
    }

    pub fn credential_count(&self) -> usize {
        self.inner.lock().unwrap().by_id.len()
    }

    fn credential_path(&self, credential_id: &[u8]) -> PathBuf {
        self.dir.join(format!("{}.bin", crate::hex(credential_id)))
    }
}

impl CredentialStore for DiskCredentialStore {
    fn find_user(&self, name: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(name).cloned())
    }

    fn put_user(&self, user: UserIdentity) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        // Disk first: the in-memory view must never run ahead of the file.
        let users: Vec<&UserIdentity> = guard
            .users
            .values()
            .filter(|u| u.name != user.name)
            .chain(std::iter::once(&user))
            .collect();
        write_sealed(&self.aes_key, &self.dir.join(USERS_FILE), &users)?;
        guard.users.insert(user.name.clone(), user);
        Ok(())
    }

    fn credentials_for(&self, user_handle: &[u8]) -> Result<Vec<CredentialRecord>, StoreError> {
        let guard = self.inner.lock().unwrap();
        Ok(guard
            .by_id
            .values()
            .filter(|r| r.user_handle == user_handle)
            .cloned()
            .collect())
    }

    fn find_credential(&self, credential_id: &[u8]) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().by_id.get(credential_id).cloned())
    }

    fn put_credential(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.by_id.contains_key(&record.credential_id) {
            return Err(StoreError::Duplicate);
        }
        write_sealed(
            &self.aes_key,
            &self.credential_path(&record.credential_id),
            &record,
        )?;
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
            .get(credential_id)
            .ok_or(StoreError::NotFound)?;
        if record.sign_count != expected {
            return Err(StoreError::CounterConflict {
                stored: record.sign_count,
            });
        }
        // Commit to the map only once the file holds the new counter. If the
        // map advanced on a failed write, a restart would reload the stale
        // on-disk value and re-open the replay window.
        let mut updated = record.clone();
        updated.sign_count = new;
        write_sealed(&self.aes_key, &self.credential_path(credential_id), &updated)?;
        guard.by_id.insert(credential_id.to_vec(), updated);
        Ok(())
    }

    fn delete_credential(&self, credential_id: &[u8]) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.by_id.remove(credential_id).is_none() {
            return Ok(false);
        }
        std::fs::remove_file(self.credential_path(credential_id))?;
        Ok(true)
    }
}

/// Encrypt + write `value` as nonce-prefixed AES-GCM-sealed CBOR.
fn write_sealed<T: Serialize>(
    aes_key: &[u8; 32],
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(aes_key)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), buf.as_slice())
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    let mut file_bytes = Vec::with_capacity(12 + ciphertext.len());
    file_bytes.extend_from_slice(&nonce_bytes);
    file_bytes.extend_from_slice(&ciphertext);
    std::fs::write(path, file_bytes)?;
    Ok(())
}

fn read_sealed<T: DeserializeOwned>(aes_key: &[u8; 32], path: &Path) -> Result<T, StoreError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 12 {
        return Err(StoreError::Corrupt("file too short".into()));
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(12);

    let cipher = Aes256Gcm::new_from_slice(aes_key)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    ciborium::from_reader(plaintext.as_slice())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}
