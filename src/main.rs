//! Proofmark - signing orchestration for media provenance manifests
//!
//! Resolves signers, imports keys, enrolls certificates and assembles
//! manifests from the command line.

use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use proofmark::{
    config::{Args, Command},
    enrollment::{CertificateAuthority, EnrollmentClient, HttpCertificateAuthority},
    keystore::{ImportOutcome, KeyMaterialStore, SecureKeyImporter, SoftwareKeyStore},
    logging,
    manifest::{ManifestAssembler, ManifestRequest},
    prefs::{FilePreferences, PrefKey, PreferenceStore},
    signer::SignerFactory,
    types::{KeyAlias, Location},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        anyhow::bail!("Configuration error: {}", e);
    }

    info!(
        prefs = %args.prefs_file.display(),
        persistent_keystore = args.persistent_keystore(),
        "Starting proofmark"
    );

    let prefs: Arc<dyn PreferenceStore> = Arc::new(FilePreferences::open(&args.prefs_file).await?);
    seed_preferences(&args, prefs.as_ref()).await?;

    let software = match (&args.keystore_dir, &args.keystore_passphrase) {
        (Some(dir), Some(passphrase)) => SoftwareKeyStore::persistent(dir.clone(), passphrase)?,
        _ => SoftwareKeyStore::in_memory(),
    };
    let keys = KeyMaterialStore::new(Arc::new(software));

    let authority: Arc<dyn CertificateAuthority> = Arc::new(HttpCertificateAuthority::new(
        args.ca.ca_url.clone(),
        args.ca.ca_api_key.clone(),
    ));
    let enrollment = EnrollmentClient::new(
        keys.clone(),
        authority,
        Arc::clone(&prefs),
        args.certificate_subject(),
    );
    let importer = SecureKeyImporter::new(keys.clone(), Arc::clone(&prefs));

    match args.command.clone() {
        Command::Resolve { mode } => {
            let factory = SignerFactory::new(
                keys,
                enrollment,
                importer,
                Arc::clone(&prefs),
                args.signer_settings(),
            );
            let signer = match mode {
                Some(mode) => factory.resolve_signer(mode).await?,
                None => factory.resolve_current().await?,
            };
            println!("{}", serde_json::to_string_pretty(&signer.info())?);
        }

        Command::ImportKey { key, alias } => {
            if !args.persistent_keystore() {
                warn!("No KEYSTORE_DIR configured, imported key will not outlive this process");
            }
            let pem = Zeroizing::new(tokio::fs::read_to_string(&key).await?);
            let alias = alias
                .map(KeyAlias::new)
                .unwrap_or_else(|| SecureKeyImporter::derive_alias(&pem));

            let outcome = importer.import_private_key(&alias, &pem).await?;
            let status = match &outcome {
                ImportOutcome::Imported(_) => "imported",
                ImportOutcome::AlreadyPresent(_) => "already_present",
            };
            let handle = outcome.into_handle();
            let summary = serde_json::json!({
                "alias": handle.alias.as_str(),
                "status": status,
                "hardware_backed": handle.is_hardware_backed,
                "store": keys.store_name(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Enroll { alias, force } => {
            let alias = KeyAlias::new(alias.unwrap_or_else(|| args.platform_alias.clone()));
            keys.ensure_key(&alias, false).await?;
            if force {
                enrollment.invalidate(&alias).await?;
            }
            let chain = enrollment.enroll(&alias).await?;
            info!(alias = %alias, certificates = chain.len(), "Enrollment complete");
            print!("{}", chain.to_pem_bundle());
        }

        Command::Manifest {
            file,
            format,
            direct_capture,
            author,
            allow_ai_training,
            latitude,
            longitude,
        } => {
            let assembler = args
                .claim_generator
                .clone()
                .map(ManifestAssembler::new)
                .unwrap_or_default();

            let location = match (latitude, longitude) {
                (Some(lat), Some(lon)) => Some(Location::new(lat, lon, Utc::now())),
                _ => None,
            };
            let mut request = ManifestRequest::new(file, format)
                .direct_capture(direct_capture)
                .software_agent(assembler.claim_generator())
                .location(location)
                .allow_ai_training(allow_ai_training);
            if let Some(author) = author {
                request = request.author(author);
            }

            let manifest = assembler.build_manifest(&request)?;
            println!("{}", manifest);
        }
    }

    Ok(())
}

/// Copy mode and signer configuration given on the command line into preferences.
async fn seed_preferences(args: &Args, prefs: &dyn PreferenceStore) -> anyhow::Result<()> {
    if let Some(mode) = args.signing_mode {
        prefs.set(&PrefKey::SigningMode, mode.as_str().to_string()).await?;
    }
    if let Some(url) = &args.remote_url {
        prefs.set(&PrefKey::RemoteUrl, url.clone()).await?;
    }
    if let Some(token) = &args.remote_token {
        prefs.set(&PrefKey::RemoteToken, token.clone()).await?;
    }
    if let (Some(cert), Some(key)) = (&args.custom_cert, &args.custom_key) {
        let chain = tokio::fs::read_to_string(cert).await?;
        let pem = Zeroizing::new(tokio::fs::read_to_string(key).await?);
        prefs.set(&PrefKey::CustomCertificate, chain).await?;
        prefs.set(&PrefKey::CustomPrivateKey, pem.to_string()).await?;
    }
    Ok(())
}
