//! Encrypted on-disk snapshot of the account tables.

use crate::error::StoreError;
use crate::memory::AccountTables;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Context mixed into passphrase-derived keys.
const KEY_DERIVATION_CONTEXT: &str = "account-store/snapshot";

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// AES-256-GCM sealed snapshot file.
///
/// File format: [12 bytes nonce][ciphertext with auth tag]
pub struct EncryptedSnapshot {
    path: PathBuf,
    key: [u8; 32],
}

impl EncryptedSnapshot {
    pub fn new(path: PathBuf, key: [u8; 32]) -> Self {
        Self { path, key }
    }

    /// Derive the key as SHA256(context || passphrase).
    pub fn from_passphrase(path: PathBuf, passphrase: &SecretString) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_CONTEXT.as_bytes());
        hasher.update(passphrase.expose_secret().as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        Self { path, key }
    }

    /// Use a raw 32-byte key given in base64.
    pub fn from_base64_key(path: PathBuf, encoded: &SecretString) -> Result<Self, StoreError> {
        let bytes = STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|e| StoreError::Encryption(format!("Invalid snapshot key: {}", e)))?;
        if bytes.len() != 32 {
            return Err(StoreError::Encryption(format!(
                "Snapshot key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { path, key })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Seal and write the tables, replacing the previous snapshot atomically.
    pub async fn save(&self, tables: &AccountTables) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(tables)?;
        let data = self.seal(&plaintext)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(
            "Saved account snapshot ({} bytes) to {:?}",
            data.len(),
            self.path
        );
        Ok(())
    }

    /// Read the tables back. A missing file yields empty tables.
    pub async fn load(&self) -> Result<AccountTables, StoreError> {
        if !self.path.exists() {
            info!(
                "Snapshot not found at {:?}, starting with empty tables",
                self.path
            );
            return Ok(AccountTables::default());
        }

        let data = fs::read(&self.path).await?;
        if data.len() < NONCE_SIZE {
            warn!("Snapshot file too short, starting with empty tables");
            return Ok(AccountTables::default());
        }

        let plaintext = self.open(&data)?;
        let tables: AccountTables = serde_json::from_slice(&plaintext)?;
        Ok(tables)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext)?;

        let mut data = nonce_bytes.to_vec();
        data.extend(ciphertext);
        Ok(data)
    }

    fn open(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher.decrypt(nonce, &data[NONCE_SIZE..]).map_err(|_| {
            StoreError::Encryption(
                "Failed to decrypt account snapshot. The key may have changed.".to_string(),
            )
        })
    }
}
