//! Remote document store access for Lexis.
//!
//! This crate defines the entry data model shared by every layer, the
//! [`RemoteStore`] boundary, the HTTP implementation of it, and an
//! in-process double for tests.
//!
//! ## Features
//!
//! - **HTTP Client**: [`DocumentClient`] for a REST document store, with
//!   paginated collection reads and bounded atomic batches
//! - **Memory Store**: [`MemoryStore`], an in-process test double with
//!   fault injection and call counters
//! - **Entry Model**: [`Entry`] with the verb-only [`Inflection`] variant

mod client;
mod error;
pub mod memory;
mod records;
mod store;
mod types;

pub use client::DocumentClient;
pub use error::RemoteError;
pub use memory::{CallCounts, MemoryStore};
pub use records::*;
pub use store::RemoteStore;
pub use types::*;
