//! Signer Factory
//!
//! Resolves a [`SigningMode`] to a cached [`Signer`], constructing it at most
//! once per mode. Concurrent callers for a mode that is still being built wait
//! on the same construction instead of generating duplicate keys or enrolling
//! twice.
//!
//! ## Construction per mode
//!
//! ```text
//! PlatformKeystore  ensure key ──▶ load-or-enroll chain ──▶ KeystoreSigner
//! HardwareIsolated  ensure hw key (fallback logged) ──▶ load-or-enroll ──▶ HardwareSigner
//! CustomKey         cert + key from prefs ──▶ import ──▶ KeystoreSigner
//!                                               └─ KeyImport error ──▶ DirectKeySigner
//! RemoteService     url + token from prefs ──▶ fetch configuration ──▶ RemoteSigner
//! ```
//!
//! Failed constructions are not cached; the next call tries again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::direct::DirectKeySigner;
use super::keystore::{HardwareConfig, HardwareSigner, KeystoreSigner};
use super::remote::RemoteSigner;
use super::{Signer, SigningMode};
use crate::enrollment::EnrollmentClient;
use crate::keystore::crypto::same_public_key;
use crate::keystore::{KeyMaterialStore, SecureKeyImporter};
use crate::prefs::{PrefKey, PreferenceStore};
use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

/// Default alias of the platform keystore signing key
pub const DEFAULT_PLATFORM_ALIAS: &str = "proofmark.platform";

/// Default alias of the hardware-isolated signing key
pub const DEFAULT_HARDWARE_ALIAS: &str = "proofmark.hardware";

/// Modes whose signer depends on preference values
const CONFIGURED_MODES: [SigningMode; 3] = [
    SigningMode::HardwareIsolated,
    SigningMode::CustomKey,
    SigningMode::RemoteService,
];

/// Static factory settings.
#[derive(Debug, Clone)]
pub struct SignerSettings {
    /// Timestamp authority URL attached to locally held signers
    pub timestamp_url: Option<String>,
    pub platform_alias: KeyAlias,
    /// Used when no hardware alias is stored in preferences
    pub hardware_alias: KeyAlias,
    /// Fall back to an in-memory signer when a custom key cannot be imported
    pub allow_direct_key_fallback: bool,
}

impl Default for SignerSettings {
    fn default() -> Self {
        Self {
            timestamp_url: None,
            platform_alias: KeyAlias::from(DEFAULT_PLATFORM_ALIAS),
            hardware_alias: KeyAlias::from(DEFAULT_HARDWARE_ALIAS),
            allow_direct_key_fallback: true,
        }
    }
}

type SignerCell = Arc<OnceCell<Arc<Signer>>>;

/// Single-flight, per-mode signer cache.
pub struct SignerFactory {
    keys: KeyMaterialStore,
    enrollment: EnrollmentClient,
    importer: SecureKeyImporter,
    prefs: Arc<dyn PreferenceStore>,
    settings: SignerSettings,
    http: reqwest::Client,
    cache: DashMap<SigningMode, SignerCell>,
    constructions: AtomicU64,
}

impl SignerFactory {
    pub fn new(
        keys: KeyMaterialStore,
        enrollment: EnrollmentClient,
        importer: SecureKeyImporter,
        prefs: Arc<dyn PreferenceStore>,
        settings: SignerSettings,
    ) -> Self {
        Self {
            keys,
            enrollment,
            importer,
            prefs,
            settings,
            http: reqwest::Client::new(),
            cache: DashMap::new(),
            constructions: AtomicU64::new(0),
        }
    }

    /// Use a preconfigured HTTP client for remote signers.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn settings(&self) -> &SignerSettings {
        &self.settings
    }

    /// Number of signer constructions started since creation.
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Resolve the signer for `mode`, constructing it on first use.
    pub async fn resolve_signer(&self, mode: SigningMode) -> Result<Arc<Signer>> {
        let cell = Arc::clone(self.cache.entry(mode).or_default().value());

        let signer = cell.get_or_try_init(|| self.construct(mode)).await?;
        Ok(Arc::clone(signer))
    }

    /// Resolve the signer for the mode selected in preferences.
    pub async fn resolve_current(&self) -> Result<Arc<Signer>> {
        let mode = self
            .prefs
            .get(&PrefKey::SigningMode)
            .map(|value| value.parse::<SigningMode>())
            .transpose()?
            .unwrap_or_default();
        self.resolve_signer(mode).await
    }

    /// Cached signer for `mode`, without constructing one.
    pub fn cached(&self, mode: SigningMode) -> Option<Arc<Signer>> {
        self.cache
            .get(&mode)
            .and_then(|cell| cell.get().cloned())
    }

    /// Drop the cached signer for `mode`; the next resolve rebuilds it.
    ///
    /// A construction still in flight is left in place so later callers join
    /// it instead of starting a second one.
    pub fn invalidate(&self, mode: SigningMode) {
        if self
            .cache
            .remove_if(&mode, |_, cell| cell.initialized())
            .is_some()
        {
            info!(mode = %mode, "Invalidated cached signer");
        } else if self.cache.contains_key(&mode) {
            debug!(mode = %mode, "Signer still under construction, not invalidated");
        }
    }

    /// Invalidate cached signers whose preferences change.
    ///
    /// Only the mode that depends on the changed key is dropped. The task
    /// ends when the factory is dropped or the preference store closes.
    pub fn spawn_invalidation_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.prefs.subscribe();
        let factory = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let change = changes.recv().await;
                let Some(factory) = factory.upgrade() else {
                    break;
                };

                match change {
                    Ok(key) => {
                        if let Some(mode) = key.affected_mode() {
                            debug!(key = %key.storage_key(), mode = %mode, "Preference changed");
                            factory.invalidate(mode);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed preference changes, invalidating configured signers");
                        for mode in CONFIGURED_MODES {
                            factory.invalidate(mode);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // =========================================================================
    // Construction
    // =========================================================================

    async fn construct(&self, mode: SigningMode) -> Result<Arc<Signer>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        debug!(mode = %mode, "Constructing signer");

        let signer = match mode {
            SigningMode::PlatformKeystore => self.build_platform().await,
            SigningMode::HardwareIsolated => self.build_hardware().await,
            SigningMode::CustomKey => self.build_custom().await,
            SigningMode::RemoteService => self.build_remote().await,
        };

        match signer {
            Ok(signer) => {
                let info = signer.info();
                info!(
                    mode = %mode,
                    variant = %info.variant,
                    hardware_backed = info.hardware_backed,
                    certificates = info.certificate_count,
                    "Signer ready"
                );
                Ok(Arc::new(signer))
            }
            Err(e) => {
                warn!(mode = %mode, error = %e, "Signer construction failed");
                Err(e)
            }
        }
    }

    async fn build_platform(&self) -> Result<Signer> {
        let alias = &self.settings.platform_alias;
        let handle = self.keys.ensure_key(alias, false).await?;
        let chain = self.enrollment.enroll(alias).await?;

        Ok(Signer::Keystore(KeystoreSigner::new(
            SigningMode::PlatformKeystore,
            alias.clone(),
            self.keys.clone(),
            chain,
            self.settings.timestamp_url.clone(),
            handle.is_hardware_backed,
        )))
    }

    async fn build_hardware(&self) -> Result<Signer> {
        let alias = self
            .prefs
            .get(&PrefKey::HardwareAlias)
            .filter(|a| !a.trim().is_empty())
            .map(KeyAlias::from)
            .unwrap_or_else(|| self.settings.hardware_alias.clone());

        if !self.keys.supports_hardware_isolation() {
            warn!(
                store = self.keys.store_name(),
                "Key store has no hardware isolation, key will be software-protected"
            );
        }

        let handle = self.keys.ensure_key(&alias, true).await?;
        let chain = self.enrollment.enroll(&alias).await?;

        Ok(Signer::Hardware(HardwareSigner::new(
            alias,
            self.keys.clone(),
            chain,
            self.settings.timestamp_url.clone(),
            HardwareConfig {
                hardware_backed: handle.is_hardware_backed,
                store_name: self.keys.store_name().to_string(),
            },
        )))
    }

    async fn build_custom(&self) -> Result<Signer> {
        let certificate = required_pref(
            self.prefs.as_ref(),
            &PrefKey::CustomCertificate,
            "Custom key signing requires a certificate",
        )?;
        let private_key = Zeroizing::new(required_pref(
            self.prefs.as_ref(),
            &PrefKey::CustomPrivateKey,
            "Custom key signing requires a private key",
        )?);
        let chain = CertificateChain::from_pem(&certificate)?;
        let alias = SecureKeyImporter::derive_alias(&private_key);

        match self.importer.import_private_key(&alias, &private_key).await {
            Ok(outcome) => {
                let handle = outcome.into_handle();
                if !same_public_key(&chain.leaf_public_key()?, &handle.public_key) {
                    return Err(ProofmarkError::Configuration(
                        "Custom private key does not match the certificate".into(),
                    ));
                }
                self.keys.set_certificate_chain(&alias, &chain).await?;

                Ok(Signer::Keystore(KeystoreSigner::new(
                    SigningMode::CustomKey,
                    alias,
                    self.keys.clone(),
                    chain,
                    self.settings.timestamp_url.clone(),
                    handle.is_hardware_backed,
                )))
            }
            Err(ProofmarkError::KeyImport(reason)) if self.settings.allow_direct_key_fallback => {
                warn!(
                    alias = %alias,
                    error = %reason,
                    "Custom key import failed, using in-memory direct key signer"
                );
                Ok(Signer::DirectKey(DirectKeySigner::new(
                    chain,
                    Arc::clone(&self.prefs),
                    self.settings.timestamp_url.clone(),
                )?))
            }
            Err(e) => Err(e),
        }
    }

    async fn build_remote(&self) -> Result<Signer> {
        let url = required_pref(
            self.prefs.as_ref(),
            &PrefKey::RemoteUrl,
            "Remote signing requires a service URL",
        )?;
        let token = self
            .prefs
            .get(&PrefKey::RemoteToken)
            .filter(|t| !t.trim().is_empty());

        let signer = RemoteSigner::connect(self.http.clone(), &url, token).await?;
        Ok(Signer::Remote(signer))
    }
}

fn required_pref(prefs: &dyn PreferenceStore, key: &PrefKey, missing: &str) -> Result<String> {
    prefs
        .get(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ProofmarkError::Configuration(missing.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::{CertificateSubject, MockAuthority};
    use crate::keystore::SoftwareKeyStore;
    use crate::prefs::MemoryPreferences;

    fn factory(prefs: MemoryPreferences) -> (Arc<MockAuthority>, Arc<SignerFactory>) {
        let keys = KeyMaterialStore::new(Arc::new(SoftwareKeyStore::in_memory()));
        let prefs: Arc<dyn PreferenceStore> = Arc::new(prefs);
        let authority = Arc::new(MockAuthority::new().unwrap());
        let enrollment = EnrollmentClient::new(
            keys.clone(),
            authority.clone(),
            prefs.clone(),
            CertificateSubject::default(),
        );
        let importer = SecureKeyImporter::new(keys.clone(), prefs.clone());
        let factory = SignerFactory::new(
            keys,
            enrollment,
            importer,
            prefs,
            SignerSettings::default(),
        );
        (authority, Arc::new(factory))
    }

    #[tokio::test]
    async fn test_resolve_caches_per_mode() {
        let (authority, factory) = factory(MemoryPreferences::new());

        let first = factory
            .resolve_signer(SigningMode::PlatformKeystore)
            .await
            .unwrap();
        let second = factory
            .resolve_signer(SigningMode::PlatformKeystore)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(), 1);
        assert_eq!(authority.request_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_cached() {
        let (_, factory) = factory(MemoryPreferences::new());

        assert!(factory.resolve_signer(SigningMode::RemoteService).await.is_err());
        assert!(factory.resolve_signer(SigningMode::RemoteService).await.is_err());
        assert_eq!(factory.constructions(), 2);
        assert!(factory.cached(SigningMode::RemoteService).is_none());
    }

    #[tokio::test]
    async fn test_remote_without_url_is_configuration_error() {
        let (_, factory) = factory(MemoryPreferences::new());
        let result = factory.resolve_signer(SigningMode::RemoteService).await;
        assert!(matches!(result, Err(ProofmarkError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_invalidate_rebuilds() {
        let (_, factory) = factory(MemoryPreferences::new());

        let first = factory
            .resolve_signer(SigningMode::PlatformKeystore)
            .await
            .unwrap();
        factory.invalidate(SigningMode::PlatformKeystore);
        let second = factory
            .resolve_signer(SigningMode::PlatformKeystore)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(), 2);
    }

    #[tokio::test]
    async fn test_resolve_current_reads_mode_preference() {
        let prefs = MemoryPreferences::new().with(PrefKey::SigningMode, "custom_key");
        let (_, factory) = factory(prefs);

        let result = factory.resolve_current().await;
        assert!(matches!(result, Err(ProofmarkError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_hardware_mode_on_software_store_reports_fallback() {
        let (_, factory) = factory(MemoryPreferences::new());

        let signer = factory
            .resolve_signer(SigningMode::HardwareIsolated)
            .await
            .unwrap();
        assert_eq!(signer.mode(), SigningMode::HardwareIsolated);
        assert!(!signer.is_hardware_backed());
        assert_eq!(
            signer.info().alias,
            Some(KeyAlias::from(DEFAULT_HARDWARE_ALIAS))
        );
    }
}
