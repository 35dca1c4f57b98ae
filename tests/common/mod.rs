//! Shared fixtures for integration tests

#![allow(dead_code)]

pub mod remote;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use proofmark::enrollment::{CertificateSubject, EnrollmentClient, MockAuthority};
use proofmark::keystore::{
    HardwareKeyStore, ImportSpec, KeyHandle, KeyMaterialStore, KeySpec, ProtectedKeyStore,
    SecureKeyImporter, SimulatedElement, SoftwareKeyStore, WrapTransform,
};
use proofmark::prefs::{MemoryPreferences, PreferenceStore};
use proofmark::signer::{SignerFactory, SignerSettings};
use proofmark::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

/// Software store that counts calls and can be told to refuse imports
pub struct CountingStore {
    inner: SoftwareKeyStore,
    pub generates: AtomicU32,
    pub imports: AtomicU32,
    pub signs: AtomicU32,
    refuse_imports: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: SoftwareKeyStore::in_memory(),
            generates: AtomicU32::new(0),
            imports: AtomicU32::new(0),
            signs: AtomicU32::new(0),
            refuse_imports: AtomicBool::new(false),
        }
    }

    pub fn set_refuse_imports(&self, refuse: bool) {
        self.refuse_imports.store(refuse, Ordering::SeqCst);
    }

    pub fn import_count(&self) -> u32 {
        self.imports.load(Ordering::SeqCst)
    }

    pub fn generate_count(&self) -> u32 {
        self.generates.load(Ordering::SeqCst)
    }

    /// Aliases currently held
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl ProtectedKeyStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    fn supports_hardware_isolation(&self) -> bool {
        false
    }

    fn key_handle(&self, alias: &KeyAlias) -> Result<Option<KeyHandle>> {
        self.inner.key_handle(alias)
    }

    fn generate_key(&self, alias: &KeyAlias, spec: KeySpec) -> Result<KeyHandle> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_key(alias, spec)
    }

    fn sign(&self, alias: &KeyAlias, message: &[u8]) -> Result<Vec<u8>> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(alias, message)
    }

    fn certificate_chain(&self, alias: &KeyAlias) -> Result<Option<CertificateChain>> {
        self.inner.certificate_chain(alias)
    }

    fn set_certificate_chain(&self, alias: &KeyAlias, chain: &CertificateChain) -> Result<()> {
        self.inner.set_certificate_chain(alias, chain)
    }

    fn import_wrapped_key(
        &self,
        wrapped: &[u8],
        wrapping_alias: &KeyAlias,
        transform: WrapTransform,
        target: &ImportSpec,
    ) -> Result<KeyHandle> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if self.refuse_imports.load(Ordering::SeqCst) {
            return Err(ProofmarkError::KeyImport("Import refused by test store".into()));
        }
        self.inner
            .import_wrapped_key(wrapped, wrapping_alias, transform, target)
    }

    fn delete_alias(&self, alias: &KeyAlias) -> Result<bool> {
        self.inner.delete_alias(alias)
    }
}

/// Factory wired to in-memory collaborators
pub struct Fixture {
    pub factory: Arc<SignerFactory>,
    pub store: Arc<CountingStore>,
    pub keys: KeyMaterialStore,
    pub prefs: Arc<MemoryPreferences>,
    pub authority: Arc<MockAuthority>,
    pub enrollment: EnrollmentClient,
    pub importer: SecureKeyImporter,
}

pub fn fixture() -> Fixture {
    fixture_with(MemoryPreferences::new(), MockAuthority::new().unwrap())
}

pub fn fixture_with(prefs: MemoryPreferences, authority: MockAuthority) -> Fixture {
    fixture_with_settings(prefs, authority, SignerSettings::default())
}

pub fn fixture_with_settings(
    prefs: MemoryPreferences,
    authority: MockAuthority,
    settings: SignerSettings,
) -> Fixture {
    let store = Arc::new(CountingStore::new());
    let keys = KeyMaterialStore::new(store.clone());
    let prefs = Arc::new(prefs);
    let shared_prefs: Arc<dyn PreferenceStore> = prefs.clone();
    let authority = Arc::new(authority);

    let enrollment = EnrollmentClient::new(
        keys.clone(),
        authority.clone(),
        shared_prefs.clone(),
        CertificateSubject::default(),
    );
    let importer = SecureKeyImporter::new(keys.clone(), shared_prefs.clone());
    let factory = Arc::new(SignerFactory::new(
        keys.clone(),
        enrollment.clone(),
        importer.clone(),
        shared_prefs,
        settings,
    ));

    Fixture {
        factory,
        store,
        keys,
        prefs,
        authority,
        enrollment,
        importer,
    }
}

/// Factory over a simulated secure element
pub struct HardwareFixture {
    pub factory: Arc<SignerFactory>,
    pub element: Arc<SimulatedElement>,
    pub authority: Arc<MockAuthority>,
}

pub fn hardware_fixture() -> HardwareFixture {
    let element = Arc::new(SimulatedElement::new());
    let store = HardwareKeyStore::new(element.clone(), SoftwareKeyStore::in_memory());
    let keys = KeyMaterialStore::new(Arc::new(store));
    let prefs: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferences::new());
    let authority = Arc::new(MockAuthority::new().unwrap());

    let enrollment = EnrollmentClient::new(
        keys.clone(),
        authority.clone(),
        prefs.clone(),
        CertificateSubject::default(),
    );
    let importer = SecureKeyImporter::new(keys.clone(), prefs.clone());
    let factory = Arc::new(SignerFactory::new(
        keys,
        enrollment,
        importer,
        prefs,
        SignerSettings::default(),
    ));

    HardwareFixture {
        factory,
        element,
        authority,
    }
}

/// Self-signed certificate and its PKCS#8 private key, both PEM
pub fn custom_key_material() -> (String, String) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["custom.proofmark.test".to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}
