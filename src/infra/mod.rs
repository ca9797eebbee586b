//! Infrastructure layer
//!
//! Gateway traits and their implementations:
//! - State store (PostgreSQL)
//! - Object storage (local filesystem, S3-compatible)
//! - HTML-to-PDF renderer seam
//! - Graceful shutdown plumbing

pub mod postgres;
pub mod render;
pub mod shutdown;
pub mod storage;
pub mod traits;

pub use postgres::PgStateStore;
pub use render::{substitute_params, BasicPdfRenderer, CertificateRenderer};
pub use shutdown::{shutdown_signal, ShutdownController, ShutdownSignal};
pub use storage::{LocalStorage, S3Storage, StorageGateway, StoreOptions};
pub use traits::StateStore;
