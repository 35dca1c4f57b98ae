//! Cryptographic primitives for the protected key stores.
//!
//! # Algorithms
//!
//! - **Signing keys**: ECDSA P-256 with SHA-256, DER-encoded signatures
//! - **Sealing at rest**: Argon2id-derived key encryption key + ChaCha20-Poly1305
//! - **Key wrapping (import)**: ephemeral ECDH P-256 agreement, SHA-256 key
//!   derivation, ChaCha20-Poly1305
//!
//! # Wrapped key layout
//!
//! ```text
//! ┌────────────────────────┬────────────┬──────────────────────────────┐
//! │ sender public (65 B)   │ nonce 12 B │ ChaCha20-Poly1305(PKCS#8 DER)│
//! └────────────────────────┴────────────┴──────────────────────────────┘
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, RemoteKeyPair, SerialNumber};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::types::{CertificateChain, ProofmarkError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Argon2id memory cost in KiB (64 MB)
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism (threads)
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Uncompressed SEC1 P-256 point length
pub const P256_PUBLIC_KEY_LEN: usize = 65;

/// Domain separation label for key-wrapping KEK derivation
const WRAP_KDF_LABEL: &[u8] = b"proofmark/key-wrap/v1";

/// Validity of the self-signed placeholder certificate
pub const PLACEHOLDER_VALIDITY_DAYS: i64 = 365;

// =============================================================================
// Randomness
// =============================================================================

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a fresh P-256 secret key.
pub fn generate_secret_key() -> SecretKey {
    SecretKey::random(&mut OsRng)
}

// =============================================================================
// Key Encoding
// =============================================================================

/// Uncompressed SEC1 encoding of a P-256 public key.
pub fn public_key_bytes(public: &PublicKey) -> Vec<u8> {
    public.to_encoded_point(false).as_bytes().to_vec()
}

/// Whether two SEC1 encodings name the same P-256 point.
pub fn same_public_key(a: &[u8], b: &[u8]) -> bool {
    match (PublicKey::from_sec1_bytes(a), PublicKey::from_sec1_bytes(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Parse a PEM-encoded P-256 private key (PKCS#8 or SEC1 "EC PRIVATE KEY").
pub fn parse_private_key_pem(pem: &str) -> Result<SecretKey> {
    let pem = pem.trim();
    SecretKey::from_pkcs8_pem(pem)
        .or_else(|_| SecretKey::from_sec1_pem(pem))
        .map_err(|e| ProofmarkError::KeyImport(format!("Unsupported private key PEM: {e}")))
}

/// PKCS#8 DER encoding of a secret key (zeroized on drop).
pub fn secret_key_pkcs8(secret: &SecretKey) -> Result<Zeroizing<Vec<u8>>> {
    let doc = secret
        .to_pkcs8_der()
        .map_err(|e| ProofmarkError::KeyStore(format!("PKCS#8 encoding failed: {e}")))?;
    Ok(Zeroizing::new(doc.as_bytes().to_vec()))
}

/// Decode a PKCS#8 DER private key.
pub fn secret_key_from_pkcs8(der: &[u8]) -> Result<SecretKey> {
    SecretKey::from_pkcs8_der(der)
        .map_err(|e| ProofmarkError::KeyStore(format!("PKCS#8 decoding failed: {e}")))
}

/// SHA-256 content hash (hex) of supplied key material.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// =============================================================================
// Signing
// =============================================================================

/// ECDSA P-256/SHA-256 signature in DER form.
pub fn sign_der(secret: &SecretKey, message: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from(secret);
    let signature: Signature = signing_key.sign(message);
    signature.to_der().as_bytes().to_vec()
}

// =============================================================================
// Sealing (keys at rest)
// =============================================================================

/// Derive a 256-bit key encryption key from a passphrase using Argon2id.
pub fn derive_key_encryption_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| ProofmarkError::KeyStore(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, &mut key[..])
        .map_err(|e| ProofmarkError::KeyStore(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

/// Encrypt key material under a key encryption key.
pub fn seal(plaintext: &[u8], kek: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(kek));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| ProofmarkError::KeyStore(format!("Sealing failed: {e}")))
}

/// Decrypt sealed key material.
pub fn unseal(
    ciphertext: &[u8],
    kek: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(kek));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| ProofmarkError::KeyStore("Failed to unseal key (wrong passphrase?)".into()))
}

// =============================================================================
// Key Wrapping (import)
// =============================================================================

fn derive_wrapping_kek(shared_secret: &[u8], sender_public: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(WRAP_KDF_LABEL);
    hasher.update(shared_secret);
    hasher.update(sender_public);

    let mut kek = Zeroizing::new([0u8; 32]);
    kek.copy_from_slice(&hasher.finalize());
    kek
}

/// Wrap `plaintext` for the holder of `wrapping_public` (SEC1).
pub fn wrap_key_material(wrapping_public: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let recipient = PublicKey::from_sec1_bytes(wrapping_public)
        .map_err(|e| ProofmarkError::KeyImport(format!("Invalid wrapping public key: {e}")))?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let sender_public = public_key_bytes(&ephemeral.public_key());
    let shared = ephemeral.diffie_hellman(&recipient);
    let kek = derive_wrapping_kek(shared.raw_secret_bytes().as_slice(), &sender_public);

    let nonce: [u8; NONCE_LEN] = generate_random_bytes();
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&kek[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| ProofmarkError::KeyImport(format!("Key wrapping failed: {e}")))?;

    let mut wrapped = Vec::with_capacity(sender_public.len() + NONCE_LEN + ciphertext.len());
    wrapped.extend_from_slice(&sender_public);
    wrapped.extend_from_slice(&nonce);
    wrapped.extend_from_slice(&ciphertext);
    Ok(wrapped)
}

/// Unwrap key material with an ECDH agreement function.
///
/// `agree` receives the sender's SEC1 public key and returns the raw shared
/// secret. Hardware stores perform the agreement inside their boundary.
pub fn unwrap_key_material<F>(wrapped: &[u8], agree: F) -> Result<Zeroizing<Vec<u8>>>
where
    F: FnOnce(&[u8]) -> Result<Zeroizing<Vec<u8>>>,
{
    if wrapped.len() <= P256_PUBLIC_KEY_LEN + NONCE_LEN {
        return Err(ProofmarkError::KeyImport(format!(
            "Wrapped key too short: {} bytes",
            wrapped.len()
        )));
    }

    let (sender_public, rest) = wrapped.split_at(P256_PUBLIC_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let shared = agree(sender_public)?;
    let kek = derive_wrapping_kek(&shared, sender_public);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&kek[..]));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| ProofmarkError::KeyImport("Wrapped key failed authentication".into()))
}

/// ECDH agreement between a held secret key and a peer SEC1 public key.
pub fn agree(secret: &SecretKey, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let peer = PublicKey::from_sec1_bytes(peer_public)
        .map_err(|e| ProofmarkError::KeyImport(format!("Invalid peer public key: {e}")))?;
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}

// =============================================================================
// Certificates
// =============================================================================

/// Signing callback used by [`DelegatedKeyPair`].
pub type SignFn = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// An rcgen key pair whose private half lives behind a store boundary.
///
/// rcgen only sees the public key and a signing callback, so certificates
/// and CSRs can be produced for keys that are never exported.
pub struct DelegatedKeyPair {
    public_key: Vec<u8>,
    sign: SignFn,
}

impl DelegatedKeyPair {
    pub fn new(public_key: Vec<u8>, sign: SignFn) -> Self {
        Self { public_key, sign }
    }

    /// Convert into an rcgen [`KeyPair`].
    pub fn into_key_pair(self) -> Result<KeyPair> {
        KeyPair::from_remote(Box::new(self))
            .map_err(|e| ProofmarkError::KeyStore(format!("Remote key pair rejected: {e}")))
    }
}

impl RemoteKeyPair for DelegatedKeyPair {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        (self.sign)(msg).map_err(|_| rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        &rcgen::PKCS_ECDSA_P256_SHA256
    }
}

/// Self-signed placeholder certificate issued when a key is created.
///
/// It is only used to bootstrap enrollment; subject and serial are fixed at
/// creation and the certificate is valid for one year.
pub fn placeholder_certificate(common_name: &str, key_pair: &KeyPair) -> Result<CertificateChain> {
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name);

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name;
    params.serial_number = Some(SerialNumber::from_slice(&generate_random_bytes::<16>()));

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(PLACEHOLDER_VALIDITY_DAYS);

    let certificate = params
        .self_signed(key_pair)
        .map_err(|e| ProofmarkError::KeyStore(format!("Placeholder certificate failed: {e}")))?;

    CertificateChain::from_pem(&certificate.pem())
}

// =============================================================================
// Tests
// =============================================================================
