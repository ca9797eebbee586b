//! Domain models for certificate issuance
//!
//! Entities (tenant, template, batch, job), the sorted-pair Merkle engine,
//! and the wire objects embedded in issued documents.

pub mod batch;
pub mod bundle;
pub mod job;
pub mod merkle;
pub mod qr_payload;
pub mod template;
pub mod types;

pub use batch::*;
pub use bundle::*;
pub use job::*;
pub use merkle::*;
pub use qr_payload::*;
pub use template::*;
pub use types::*;
