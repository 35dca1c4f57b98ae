//! Hardware-isolated key store.
//!
//! Wraps a vendor [`SecureElement`] (slot-addressed P-256 keys that never
//! leave the element) and keeps an inner [`SoftwareKeyStore`] for keys the
//! element refuses to create. Falling back is logged and visible on the
//! returned [`KeyHandle`] through `is_hardware_backed`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use p256::SecretKey;
use tracing::{info, warn};

use super::crypto::{self, DelegatedKeyPair};
use super::software::SoftwareKeyStore;
use super::{
    ImportSpec, KeyHandle, KeyPurpose, KeySpec, ProtectedKeyStore, WrapTransform,
    PLACEHOLDER_SUBJECT,
};
use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

// =============================================================================
// Secure Element Capability
// =============================================================================

/// Slot-addressed secure element holding P-256 keys.
///
/// Public keys are exchanged as uncompressed SEC1 points; signatures are DER.
pub trait SecureElement: Send + Sync {
    fn name(&self) -> &str;

    /// Create a key in `slot`, returning its public key.
    fn generate_p256(&self, slot: &str) -> Result<Vec<u8>>;

    fn sign_p256(&self, slot: &str, message: &[u8]) -> Result<Vec<u8>>;

    /// Unwrap `wrapped` with the key in `wrapping_slot` and store the result
    /// in `slot`, without the plaintext leaving the element.
    fn import_wrapped(&self, slot: &str, wrapping_slot: &str, wrapped: &[u8]) -> Result<Vec<u8>>;

    fn destroy(&self, slot: &str) -> Result<()>;
}

// =============================================================================
// Hardware Key Store
// =============================================================================

struct HardwareEntry {
    purpose: KeyPurpose,
    public_key: Vec<u8>,
    chain: Option<CertificateChain>,
}

/// [`ProtectedKeyStore`] over a secure element with software fallback.
pub struct HardwareKeyStore {
    element: Arc<dyn SecureElement>,
    fallback: SoftwareKeyStore,
    hardware: DashMap<KeyAlias, HardwareEntry>,
}

impl HardwareKeyStore {
    pub fn new(element: Arc<dyn SecureElement>, fallback: SoftwareKeyStore) -> Self {
        Self {
            element,
            fallback,
            hardware: DashMap::new(),
        }
    }

    fn hardware_handle(alias: &KeyAlias, entry: &HardwareEntry) -> KeyHandle {
        KeyHandle {
            alias: alias.clone(),
            public_key: entry.public_key.clone(),
            purpose: entry.purpose,
            is_hardware_backed: true,
        }
    }

    fn placeholder(&self, slot: &KeyAlias, public_key: &[u8]) -> Result<CertificateChain> {
        let element = Arc::clone(&self.element);
        let slot = slot.as_str().to_string();
        let key_pair = DelegatedKeyPair::new(
            public_key.to_vec(),
            Box::new(move |msg: &[u8]| element.sign_p256(&slot, msg)),
        )
        .into_key_pair()?;
        crypto::placeholder_certificate(PLACEHOLDER_SUBJECT, &key_pair)
    }

    fn generate_in_element(&self, alias: &KeyAlias, purpose: KeyPurpose) -> Result<KeyHandle> {
        let public_key = self.element.generate_p256(alias.as_str())?;
        let chain = match purpose {
            KeyPurpose::Sign => Some(self.placeholder(alias, &public_key)?),
            KeyPurpose::Wrap => None,
        };

        let entry = HardwareEntry {
            purpose,
            public_key,
            chain,
        };
        let handle = Self::hardware_handle(alias, &entry);
        self.hardware.insert(alias.clone(), entry);
        Ok(handle)
    }
}

impl ProtectedKeyStore for HardwareKeyStore {
    fn name(&self) -> &str {
        self.element.name()
    }

    fn supports_hardware_isolation(&self) -> bool {
        true
    }

    fn key_handle(&self, alias: &KeyAlias) -> Result<Option<KeyHandle>> {
        if let Some(entry) = self.hardware.get(alias) {
            return Ok(Some(Self::hardware_handle(alias, entry.value())));
        }
        self.fallback.key_handle(alias)
    }

    fn generate_key(&self, alias: &KeyAlias, spec: KeySpec) -> Result<KeyHandle> {
        if self.contains_alias(alias)? {
            return Err(ProofmarkError::KeyStore(format!(
                "Alias {alias} already holds a key"
            )));
        }

        if !spec.hardware_isolated {
            return self.fallback.generate_key(alias, spec);
        }

        match self.generate_in_element(alias, spec.purpose) {
            Ok(handle) => {
                info!(alias = %alias, element = self.element.name(), "Created hardware-isolated key");
                Ok(handle)
            }
            Err(e) => {
                warn!(
                    alias = %alias,
                    element = self.element.name(),
                    error = %e,
                    "Secure element refused key creation, falling back to software protection"
                );
                // Best effort: the slot may be half-initialised
                let _ = self.element.destroy(alias.as_str());
                self.fallback.generate_key(alias, spec)
            }
        }
    }

    fn sign(&self, alias: &KeyAlias, message: &[u8]) -> Result<Vec<u8>> {
        match self.hardware.get(alias).map(|e| e.purpose) {
            Some(KeyPurpose::Sign) => self.element.sign_p256(alias.as_str(), message),
            Some(KeyPurpose::Wrap) => Err(ProofmarkError::KeyStore(format!(
                "Key {alias} is a wrapping key"
            ))),
            None => self.fallback.sign(alias, message),
        }
    }

    fn certificate_chain(&self, alias: &KeyAlias) -> Result<Option<CertificateChain>> {
        if let Some(entry) = self.hardware.get(alias) {
            return Ok(entry.chain.clone());
        }
        self.fallback.certificate_chain(alias)
    }

    fn set_certificate_chain(&self, alias: &KeyAlias, chain: &CertificateChain) -> Result<()> {
        if let Some(mut entry) = self.hardware.get_mut(alias) {
            entry.chain = Some(chain.clone());
            return Ok(());
        }
        self.fallback.set_certificate_chain(alias, chain)
    }

    fn import_wrapped_key(
        &self,
        wrapped: &[u8],
        wrapping_alias: &KeyAlias,
        transform: WrapTransform,
        target: &ImportSpec,
    ) -> Result<KeyHandle> {
        let wrapping_in_element = self
            .hardware
            .get(wrapping_alias)
            .is_some_and(|e| e.purpose == KeyPurpose::Wrap);

        if !wrapping_in_element {
            if self.hardware.remove(&target.alias).is_some() {
                let _ = self.element.destroy(target.alias.as_str());
            }
            return self
                .fallback
                .import_wrapped_key(wrapped, wrapping_alias, transform, target);
        }

        let public_key = self
            .element
            .import_wrapped(target.alias.as_str(), wrapping_alias.as_str(), wrapped)
            .map_err(|e| ProofmarkError::KeyImport(format!("Secure element import failed: {e}")))?;

        self.fallback.delete_alias(&target.alias)?;
        let entry = HardwareEntry {
            purpose: KeyPurpose::Sign,
            public_key,
            chain: None,
        };
        let handle = Self::hardware_handle(&target.alias, &entry);
        self.hardware.insert(target.alias.clone(), entry);
        Ok(handle)
    }

    fn delete_alias(&self, alias: &KeyAlias) -> Result<bool> {
        let in_element = match self.hardware.remove(alias) {
            Some(_) => {
                self.element.destroy(alias.as_str())?;
                true
            }
            None => false,
        };
        let in_fallback = self.fallback.delete_alias(alias)?;
        Ok(in_element || in_fallback)
    }
}

// =============================================================================
// Simulated Element
// =============================================================================

/// Process-local secure element for tests and machines without one.
///
/// Can be switched off to exercise the software fallback path.
pub struct SimulatedElement {
    slots: DashMap<String, SecretKey>,
    available: AtomicBool,
    generate_calls: AtomicU32,
}

impl SimulatedElement {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            available: AtomicBool::new(true),
            generate_calls: AtomicU32::new(0),
        }
    }

    /// Simulate an element that refuses every operation
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProofmarkError::KeyStore("Secure element unavailable".into()))
        }
    }

    fn slot(&self, slot: &str) -> Result<SecretKey> {
        self.slots
            .get(slot)
            .map(|s| s.value().clone())
            .ok_or_else(|| ProofmarkError::KeyStore(format!("Empty slot {slot}")))
    }
}

impl Default for SimulatedElement {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureElement for SimulatedElement {
    fn name(&self) -> &str {
        "simulated-element"
    }

    fn generate_p256(&self, slot: &str) -> Result<Vec<u8>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let secret = crypto::generate_secret_key();
        let public = crypto::public_key_bytes(&secret.public_key());
        self.slots.insert(slot.to_string(), secret);
        Ok(public)
    }

    fn sign_p256(&self, slot: &str, message: &[u8]) -> Result<Vec<u8>> {
        self.check_available()?;
        Ok(crypto::sign_der(&self.slot(slot)?, message))
    }

    fn import_wrapped(&self, slot: &str, wrapping_slot: &str, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.check_available()?;
        let wrapping = self.slot(wrapping_slot)?;
        let pkcs8 = crypto::unwrap_key_material(wrapped, |peer| crypto::agree(&wrapping, peer))?;
        let secret = crypto::secret_key_from_pkcs8(&pkcs8)?;
        let public = crypto::public_key_bytes(&secret.public_key());
        self.slots.insert(slot.to_string(), secret);
        Ok(public)
    }

    fn destroy(&self, slot: &str) -> Result<()> {
        self.slots.remove(slot);
        Ok(())
    }
}
