//! Justifai Issuer Library
//!
//! Verifiable certificate issuance: documents are hashed, fingerprinted
//! against their expiries, signed over secp256k1, committed into a
//! two-level sorted-pair Merkle scheme, anchored on chain, and augmented
//! with an embedded verification bundle and QR link. Verification inverts
//! the whole chain offline from the document bytes alone, plus one
//! on-chain event check.
//!
//! ## Modules
//!
//! - [`crypto`] - Keccak-256 kernel, secp256k1 signatures, fingerprint and
//!   canonical-JSON codecs
//! - [`domain`] - entities, the sorted-pair Merkle engine, wire objects
//! - [`infra`] - state store, object storage, renderer seam, shutdown
//! - [`scheduler`] - the six-stage issuance pipeline
//! - [`anchor`] - chain submission and event verification
//! - [`pdf`] - augmentation, extraction, and the verification pipeline
//! - [`qr`] - QR rasterization
//! - [`api`] / [`server`] - HTTP surface and composition root

pub mod anchor;
pub mod api;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod infra;
pub mod migrations;
pub mod pdf;
pub mod qr;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use domain::{
    Batch, BatchId, BatchStatus, HashedJob, Job, JobId, JobStatus, MerkleTree, QrPayloadV2,
    QrPlacement, SignedJob, SigningStatus, Template, TemplateId, Tenant, TenantId,
    VerificationBundle,
};
pub use error::{IssuerError, Result};
pub use infra::{StateStore, StorageGateway};
pub use scheduler::{IssuanceScheduler, IssuerConfig, IssuerContext, SchedulerConfig};
