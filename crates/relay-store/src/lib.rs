//! # relay-store
//!
//! Durable state for relay agents, all of it under the workspace root.
//!
//! ## Overview
//!
//! - [`AtomicArtifactWriter`] writes produced files: size-capped, confined
//!   to the workspace even through symlinks, and atomically renamed into
//!   place before their digest is computed from disk.
//! - [`FsReceiptStore`] records completed Commands as append-only receipts
//!   with a best-effort [`IkIndex`] in front of an authoritative scan.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_store::{AtomicArtifactWriter, FsReceiptStore};
//!
//! let writer = AtomicArtifactWriter::new(workspace)?;
//! let artifact = writer.write("docs/plan.md", b"# plan")?;
//! let receipts = FsReceiptStore::from_writer(writer);
//! ```

pub mod artifact;
pub mod digest;
pub mod index;
pub mod receipts;

pub use artifact::{write_artifact_atomic, AtomicArtifactWriter, DEFAULT_MAX_ARTIFACT_BYTES};
pub use digest::{ik_hash, sha256_prefixed};
pub use index::{IkIndex, IndexEntry};
pub use receipts::FsReceiptStore;
