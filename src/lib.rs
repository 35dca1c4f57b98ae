//! Proofmark - signing orchestration for media provenance manifests
//!
//! Proofmark binds a provenance manifest (who captured a piece of media, with
//! what software, where, and under which AI-training terms) to the bytes of a
//! media file using one of several signing backends.
//!
//! ## Components
//!
//! - **Keystore**: protected key material by alias (software or hardware-backed)
//!   plus secure wrap/unwrap import of externally supplied keys
//! - **Enrollment**: CSR generation and certificate chain issuance, cached per alias
//! - **Signer**: single-flight signer resolution across the four signing modes
//! - **Manifest**: claim assembly and wire serialization for the signing engine
//! - **Staging**: stage-sign-commit protocol for in-place signing of opaque handles
//!
//! The signing engine that embeds a signed manifest into a media container is an
//! external capability, consumed through [`engine::SigningEngine`].

pub mod config;
pub mod engine;
pub mod enrollment;
pub mod keystore;
pub mod logging;
pub mod manifest;
pub mod prefs;
pub mod signer;
pub mod staging;
pub mod types;

pub use config::Args;
pub use signer::{Signer, SignerFactory, SigningMode};
pub use staging::StagedFileSigner;
pub use types::{ProofmarkError, Result};
