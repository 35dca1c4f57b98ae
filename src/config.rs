//! Configuration for Proofmark
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::enrollment::CertificateSubject;
use crate::signer::factory::{DEFAULT_HARDWARE_ALIAS, DEFAULT_PLATFORM_ALIAS};
use crate::signer::{SignerSettings, SigningMode};
use crate::types::KeyAlias;

/// Proofmark - sign media provenance manifests
#[derive(Parser, Debug, Clone)]
#[command(name = "proofmark")]
#[command(about = "Signing orchestration for media provenance manifests")]
pub struct Args {
    /// Signing mode to select (stored in preferences when given)
    #[arg(long, env = "SIGNING_MODE", value_enum)]
    pub signing_mode: Option<SigningMode>,

    /// Preferences file (JSON)
    #[arg(long, env = "PREFS_FILE", default_value = "proofmark-prefs.json")]
    pub prefs_file: PathBuf,

    /// Directory of the persistent software key store
    /// Keys are kept in memory only when unset
    #[arg(long, env = "KEYSTORE_DIR")]
    pub keystore_dir: Option<PathBuf>,

    /// Passphrase sealing the persistent key store
    #[arg(long, env = "KEYSTORE_PASSPHRASE", hide_env_values = true)]
    pub keystore_passphrase: Option<String>,

    /// Alias of the platform signing key
    #[arg(long, env = "PLATFORM_ALIAS", default_value = DEFAULT_PLATFORM_ALIAS)]
    pub platform_alias: String,

    /// Alias of the hardware-isolated signing key
    #[arg(long, env = "HARDWARE_ALIAS", default_value = DEFAULT_HARDWARE_ALIAS)]
    pub hardware_alias: String,

    /// Certificate authority configuration
    #[command(flatten)]
    pub ca: CaArgs,

    /// Remote signing service URL (stored in preferences when given)
    #[arg(long, env = "REMOTE_SIGNER_URL")]
    pub remote_url: Option<String>,

    /// Bearer token for the remote signing service
    #[arg(long, env = "REMOTE_SIGNER_TOKEN", hide_env_values = true)]
    pub remote_token: Option<String>,

    /// PEM certificate chain for custom-key signing
    #[arg(long, env = "CUSTOM_CERT_PATH")]
    pub custom_cert: Option<PathBuf>,

    /// PEM private key for custom-key signing
    #[arg(long, env = "CUSTOM_KEY_PATH")]
    pub custom_key: Option<PathBuf>,

    /// Refuse to sign with an unprotected custom key when import fails
    #[arg(long, env = "NO_DIRECT_KEY_FALLBACK", default_value = "false")]
    pub no_direct_key_fallback: bool,

    /// Timestamp authority URL attached to local signers
    #[arg(long, env = "TSA_URL")]
    pub tsa_url: Option<String>,

    /// Claim generator recorded in manifests
    #[arg(long, env = "CLAIM_GENERATOR")]
    pub claim_generator: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Certificate authority connection and CSR subject
#[derive(Parser, Debug, Clone)]
pub struct CaArgs {
    /// Enrollment service base URL
    #[arg(long, env = "CA_URL")]
    pub ca_url: Option<String>,

    /// API key for the enrollment service
    #[arg(long, env = "CA_API_KEY", hide_env_values = true)]
    pub ca_api_key: Option<String>,

    /// CSR common name
    #[arg(long, env = "CSR_COMMON_NAME", default_value = "Proofmark Signer")]
    pub common_name: String,

    #[arg(long, env = "CSR_ORGANIZATION")]
    pub organization: Option<String>,

    #[arg(long, env = "CSR_ORGANIZATIONAL_UNIT")]
    pub organizational_unit: Option<String>,

    /// Two-letter country code
    #[arg(long, env = "CSR_COUNTRY")]
    pub country: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve the signer for a mode and print its description
    Resolve {
        /// Mode to resolve; the stored preference when omitted
        #[arg(long, value_enum)]
        mode: Option<SigningMode>,
    },

    /// Import a PEM private key into the protected key store
    ImportKey {
        /// PEM private key file
        #[arg(long)]
        key: PathBuf,

        /// Target alias; derived from the key when omitted
        #[arg(long)]
        alias: Option<String>,
    },

    /// Enroll a key alias and print its certificate chain
    Enroll {
        /// Alias to enroll; the platform alias when omitted
        #[arg(long)]
        alias: Option<String>,

        /// Discard any cached chain first
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Print the manifest JSON that would be signed for a file
    Manifest {
        /// File name recorded as title and ingredient
        #[arg(long)]
        file: String,

        /// MIME type of the file
        #[arg(long)]
        format: String,

        /// Mark the file as a direct capture
        #[arg(long, default_value = "false")]
        direct_capture: bool,

        #[arg(long)]
        author: Option<String>,

        /// Permit AI training and data mining
        #[arg(long, default_value = "false")]
        allow_ai_training: bool,

        /// Capture latitude (requires --longitude)
        #[arg(long, allow_hyphen_values = true)]
        latitude: Option<f64>,

        /// Capture longitude (requires --latitude)
        #[arg(long, allow_hyphen_values = true)]
        longitude: Option<f64>,
    },
}

impl Args {
    /// CSR subject built from the CA arguments
    pub fn certificate_subject(&self) -> CertificateSubject {
        CertificateSubject {
            common_name: self.ca.common_name.clone(),
            organization: self.ca.organization.clone(),
            organizational_unit: self.ca.organizational_unit.clone(),
            country: self.ca.country.clone(),
        }
    }

    pub fn signer_settings(&self) -> SignerSettings {
        SignerSettings {
            timestamp_url: self.tsa_url.clone(),
            platform_alias: KeyAlias::new(self.platform_alias.clone()),
            hardware_alias: KeyAlias::new(self.hardware_alias.clone()),
            allow_direct_key_fallback: !self.no_direct_key_fallback,
        }
    }

    /// Whether the persistent key store is configured
    pub fn persistent_keystore(&self) -> bool {
        self.keystore_dir.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.keystore_dir.is_some() && self.keystore_passphrase.is_none() {
            return Err("KEYSTORE_PASSPHRASE is required with KEYSTORE_DIR".to_string());
        }

        if self.custom_cert.is_some() != self.custom_key.is_some() {
            return Err("CUSTOM_CERT_PATH and CUSTOM_KEY_PATH must be set together".to_string());
        }

        for (name, url) in [
            ("CA_URL", &self.ca.ca_url),
            ("REMOTE_SIGNER_URL", &self.remote_url),
            ("TSA_URL", &self.tsa_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("{name} must be an http(s) URL, got {url}"));
                }
            }
        }

        if self.platform_alias.trim().is_empty() || self.hardware_alias.trim().is_empty() {
            return Err("Key aliases must not be empty".to_string());
        }

        if let Some(country) = &self.ca.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(format!("CSR_COUNTRY must be a two-letter code, got {country}"));
            }
        }

        if let Command::Manifest {
            latitude,
            longitude,
            ..
        } = &self.command
        {
            match (latitude, longitude) {
                (Some(lat), Some(lon)) => {
                    if !(-90.0..=90.0).contains(lat) || !(-180.0..=180.0).contains(lon) {
                        return Err(format!("Coordinates out of range: {lat}, {lon}"));
                    }
                }
                (None, None) => {}
                _ => return Err("--latitude and --longitude must be given together".to_string()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["proofmark"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&["resolve"]);
        assert!(args.validate().is_ok());
        assert!(!args.persistent_keystore());

        let settings = args.signer_settings();
        assert_eq!(settings.platform_alias.as_str(), DEFAULT_PLATFORM_ALIAS);
        assert!(settings.allow_direct_key_fallback);
        assert_eq!(args.certificate_subject(), CertificateSubject::default());
    }

    #[test]
    fn test_signing_only_flags_are_not_accepted() {
        // The binary never signs, so it takes no staging or audit paths
        for flag in ["--staging-dir", "--audit-log"] {
            let result = Args::try_parse_from(["proofmark", flag, "/tmp/x", "resolve"]);
            assert!(result.is_err(), "{flag} should be rejected");
        }
    }

    #[test]
    fn test_signing_mode_parses_kebab_case() {
        let args = parse(&["--signing-mode", "custom-key", "resolve"]);
        assert_eq!(args.signing_mode, Some(SigningMode::CustomKey));
    }

    #[test]
    fn test_keystore_dir_requires_passphrase() {
        let args = parse(&["--keystore-dir", "/tmp/keys", "resolve"]);
        assert!(args.validate().unwrap_err().contains("KEYSTORE_PASSPHRASE"));
    }

    #[test]
    fn test_custom_key_paths_must_pair() {
        let args = parse(&["--custom-cert", "chain.pem", "resolve"]);
        assert!(args.validate().is_err());

        let args = parse(&["--custom-cert", "chain.pem", "--custom-key", "key.pem", "resolve"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_http_urls() {
        let args = parse(&["--ca-url", "ftp://ca.example", "enroll"]);
        assert!(args.validate().unwrap_err().contains("CA_URL"));
    }

    #[test]
    fn test_manifest_coordinates_must_pair() {
        let args = parse(&[
            "manifest",
            "--file",
            "a.jpg",
            "--format",
            "image/jpeg",
            "--latitude",
            "-33.9",
        ]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "manifest",
            "--file",
            "a.jpg",
            "--format",
            "image/jpeg",
            "--latitude",
            "-33.9",
            "--longitude",
            "151.2",
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_no_fallback_flag_disables_direct_key() {
        let args = parse(&["--no-direct-key-fallback", "resolve"]);
        assert!(!args.signer_settings().allow_direct_key_fallback);
    }
}
