//! Software-backed protected key store.
//!
//! Keys live in process memory (zeroized on drop). A persistent store also
//! seals every key to disk with a passphrase-derived key encryption key, so no
//! plaintext private key is ever written.
//!
//! # On-disk layout
//!
//! ```text
//! <dir>/keystore.salt          16-byte Argon2id salt
//! <dir>/<hex(alias)>.key.json  sealed key + certificate chain
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use p256::SecretKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::crypto::{
    self, derive_key_encryption_key, generate_random_bytes, generate_secret_key, public_key_bytes,
    seal, sign_der, unseal, DelegatedKeyPair, NONCE_LEN, SALT_LEN,
};
use super::{
    ImportSpec, KeyHandle, KeyPurpose, KeySpec, ProtectedKeyStore, WrapTransform,
    PLACEHOLDER_SUBJECT,
};
use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

const SALT_FILE: &str = "keystore.salt";
const KEY_FILE_SUFFIX: &str = ".key.json";

// =============================================================================
// Entries
// =============================================================================

struct KeyEntry {
    secret: SecretKey,
    purpose: KeyPurpose,
    chain: Option<CertificateChain>,
    created_at: DateTime<Utc>,
}

impl KeyEntry {
    fn handle(&self, alias: &KeyAlias) -> KeyHandle {
        KeyHandle {
            alias: alias.clone(),
            public_key: public_key_bytes(&self.secret.public_key()),
            purpose: self.purpose,
            is_hardware_backed: false,
        }
    }
}

/// Sealed form of a key entry.
#[derive(Debug, Serialize, Deserialize)]
struct SealedEntry {
    alias: KeyAlias,
    purpose: KeyPurpose,
    sealed_private_key: String,
    nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate_chain: Option<CertificateChain>,
    created_at: DateTime<Utc>,
}

/// Passphrase-sealed persistence directory.
struct Vault {
    dir: PathBuf,
    kek: Zeroizing<[u8; 32]>,
}

impl Vault {
    fn entry_path(&self, alias: &KeyAlias) -> PathBuf {
        self.dir
            .join(format!("{}{}", hex::encode(alias.as_str()), KEY_FILE_SUFFIX))
    }

    fn write(&self, alias: &KeyAlias, entry: &KeyEntry) -> Result<()> {
        let nonce: [u8; NONCE_LEN] = generate_random_bytes();
        let pkcs8 = crypto::secret_key_pkcs8(&entry.secret)?;
        let sealed = seal(&pkcs8, &self.kek, &nonce)?;

        let record = SealedEntry {
            alias: alias.clone(),
            purpose: entry.purpose,
            sealed_private_key: BASE64.encode(sealed),
            nonce: BASE64.encode(nonce),
            certificate_chain: entry.chain.clone(),
            created_at: entry.created_at,
        };

        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| ProofmarkError::KeyStore(format!("Key record encoding failed: {e}")))?;

        let path = self.entry_path(alias);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(store_io)?;
        fs::rename(&tmp, &path).map_err(store_io)?;
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<(KeyAlias, KeyEntry)> {
        let bytes = fs::read(path).map_err(store_io)?;
        let record: SealedEntry = serde_json::from_slice(&bytes).map_err(|e| {
            ProofmarkError::KeyStore(format!("Corrupt key record {}: {e}", path.display()))
        })?;

        let nonce: [u8; NONCE_LEN] = BASE64
            .decode(&record.nonce)
            .map_err(|e| ProofmarkError::KeyStore(format!("Invalid nonce encoding: {e}")))?
            .try_into()
            .map_err(|_| ProofmarkError::KeyStore("Invalid nonce length".into()))?;
        let sealed = BASE64
            .decode(&record.sealed_private_key)
            .map_err(|e| ProofmarkError::KeyStore(format!("Invalid key encoding: {e}")))?;

        let pkcs8 = unseal(&sealed, &self.kek, &nonce)?;
        let secret = crypto::secret_key_from_pkcs8(&pkcs8)?;

        Ok((
            record.alias,
            KeyEntry {
                secret,
                purpose: record.purpose,
                chain: record.certificate_chain,
                created_at: record.created_at,
            },
        ))
    }

    fn remove(&self, alias: &KeyAlias) -> Result<()> {
        match fs::remove_file(self.entry_path(alias)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_io(e)),
        }
    }
}

fn store_io(err: std::io::Error) -> ProofmarkError {
    ProofmarkError::KeyStore(format!("Key store I/O failed: {err}"))
}

// =============================================================================
// Software Key Store
// =============================================================================

/// Software-protected key store.
pub struct SoftwareKeyStore {
    entries: DashMap<KeyAlias, KeyEntry>,
    vault: Option<Vault>,
}

impl SoftwareKeyStore {
    /// Volatile store; keys vanish with the process.
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            vault: None,
        }
    }

    /// Open a persistent store in `dir`, sealing keys under `passphrase`.
    ///
    /// Fails with a key store error if the passphrase does not match the one
    /// the existing keys were sealed with.
    pub fn persistent(dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(store_io)?;

        let salt_path = dir.join(SALT_FILE);
        let salt: [u8; SALT_LEN] = match fs::read(&salt_path) {
            Ok(bytes) => bytes
                .try_into()
                .map_err(|_| ProofmarkError::KeyStore("Corrupt keystore salt".into()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let salt = generate_random_bytes();
                fs::write(&salt_path, salt).map_err(store_io)?;
                salt
            }
            Err(e) => return Err(store_io(e)),
        };

        let vault = Vault {
            kek: derive_key_encryption_key(passphrase.as_bytes(), &salt)?,
            dir,
        };

        let entries = DashMap::new();
        for dirent in fs::read_dir(&vault.dir).map_err(store_io)? {
            let path = dirent.map_err(store_io)?.path();
            let is_key_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(KEY_FILE_SUFFIX));
            if !is_key_file {
                continue;
            }
            let (alias, entry) = vault.read(&path)?;
            entries.insert(alias, entry);
        }

        info!(
            dir = %vault.dir.display(),
            keys = entries.len(),
            "Opened persistent software key store"
        );

        Ok(Self {
            entries,
            vault: Some(vault),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self, alias: &KeyAlias) -> Result<()> {
        if let (Some(vault), Some(entry)) = (&self.vault, self.entries.get(alias)) {
            vault.write(alias, entry.value())?;
        }
        Ok(())
    }

    fn insert(&self, alias: &KeyAlias, secret: SecretKey, purpose: KeyPurpose) -> Result<KeyHandle> {
        let chain = match purpose {
            KeyPurpose::Sign => Some(placeholder_for(&secret)?),
            KeyPurpose::Wrap => None,
        };

        let entry = KeyEntry {
            secret,
            purpose,
            chain,
            created_at: Utc::now(),
        };
        let handle = entry.handle(alias);
        self.entries.insert(alias.clone(), entry);
        self.persist(alias)?;
        Ok(handle)
    }

    fn secret(&self, alias: &KeyAlias, purpose: KeyPurpose) -> Result<SecretKey> {
        let entry = self
            .entries
            .get(alias)
            .ok_or_else(|| ProofmarkError::KeyStore(format!("No key under alias {alias}")))?;
        if entry.purpose != purpose {
            return Err(ProofmarkError::KeyStore(format!(
                "Key {alias} is a {:?} key, not a {purpose:?} key",
                entry.purpose
            )));
        }
        Ok(entry.secret.clone())
    }
}

fn placeholder_for(secret: &SecretKey) -> Result<CertificateChain> {
    let signer = secret.clone();
    let key_pair = DelegatedKeyPair::new(
        public_key_bytes(&secret.public_key()),
        Box::new(move |msg: &[u8]| Ok(sign_der(&signer, msg))),
    )
    .into_key_pair()?;
    crypto::placeholder_certificate(PLACEHOLDER_SUBJECT, &key_pair)
}

impl ProtectedKeyStore for SoftwareKeyStore {
    fn name(&self) -> &str {
        match self.vault {
            Some(_) => "software-sealed",
            None => "software-memory",
        }
    }

    fn supports_hardware_isolation(&self) -> bool {
        false
    }

    fn key_handle(&self, alias: &KeyAlias) -> Result<Option<KeyHandle>> {
        Ok(self.entries.get(alias).map(|e| e.handle(alias)))
    }

    fn generate_key(&self, alias: &KeyAlias, spec: KeySpec) -> Result<KeyHandle> {
        if self.entries.contains_key(alias) {
            return Err(ProofmarkError::KeyStore(format!(
                "Alias {alias} already holds a key"
            )));
        }
        if spec.hardware_isolated {
            debug!(alias = %alias, "Hardware isolation unavailable, using software protection");
        }
        self.insert(alias, generate_secret_key(), spec.purpose)
    }

    fn sign(&self, alias: &KeyAlias, message: &[u8]) -> Result<Vec<u8>> {
        let secret = self.secret(alias, KeyPurpose::Sign)?;
        Ok(sign_der(&secret, message))
    }

    fn certificate_chain(&self, alias: &KeyAlias) -> Result<Option<CertificateChain>> {
        Ok(self.entries.get(alias).and_then(|e| e.chain.clone()))
    }

    fn set_certificate_chain(&self, alias: &KeyAlias, chain: &CertificateChain) -> Result<()> {
        {
            let mut entry = self
                .entries
                .get_mut(alias)
                .ok_or_else(|| ProofmarkError::KeyStore(format!("No key under alias {alias}")))?;
            entry.chain = Some(chain.clone());
        }
        self.persist(alias)
    }

    fn import_wrapped_key(
        &self,
        wrapped: &[u8],
        wrapping_alias: &KeyAlias,
        transform: WrapTransform,
        target: &ImportSpec,
    ) -> Result<KeyHandle> {
        match transform {
            WrapTransform::EcdhP256ChaCha20Poly1305 => {}
        }

        let wrapping = self
            .secret(wrapping_alias, KeyPurpose::Wrap)
            .map_err(|e| ProofmarkError::KeyImport(e.to_string()))?;
        let pkcs8 = crypto::unwrap_key_material(wrapped, |peer| crypto::agree(&wrapping, peer))?;
        let secret = crypto::secret_key_from_pkcs8(&pkcs8)
            .map_err(|e| ProofmarkError::KeyImport(e.to_string()))?;

        self.insert(&target.alias, secret, KeyPurpose::Sign)
    }

    fn delete_alias(&self, alias: &KeyAlias) -> Result<bool> {
        let removed = self.entries.remove(alias).is_some();
        if let Some(vault) = &self.vault {
            vault.remove(alias)?;
        }
        Ok(removed)
    }
}
