#![warn(missing_docs)]

//! SNFS metadata subsystem: namespace engine, quota tracking, union view resolution

pub mod directory;
pub mod kvstore;
pub mod namespace;
pub mod node;
pub mod pathres;
pub mod quota;
pub mod types;
pub mod union;

pub use kvstore::{KvStore, MemoryKvStore};
pub use namespace::NamespaceEngine;
pub use pathres::NsPath;
pub use quota::{QuotaTracker, Reservation};
pub use types::*;
pub use union::UnionView;
