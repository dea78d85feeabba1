//! Authoritative in-memory stores for jobs and nodes.
//!
//! [`JobStore`] owns every job record and persists the full set through a
//! [`JobPersistence`] backend. Routine updates go through a
//! write-coalescing queue; creation, deletion and explicit flushes write
//! immediately. [`NodeStore`] keeps node descriptors together with their
//! credentials and is never persisted.

pub mod error;
pub mod job_store;
pub mod node_store;
pub mod persistence;

pub use error::StoreError;
pub use job_store::JobStore;
pub use node_store::{NodeStore, RegisteredNode};
pub use persistence::{JobPersistence, JsonFilePersistence, MemoryPersistence};
