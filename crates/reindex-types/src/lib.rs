//! # reindex-types
//!
//! Shared domain types for the search reindexing pipeline.
//!
//! This crate defines the data structures used throughout the system:
//! - Items: source-of-truth content units ([`LogicalItem`]) and their field maps
//! - Documents: physical index documents, split keys and identifiers
//! - Settings: layered configuration
//! - Errors: the [`ReindexError`] taxonomy shared by all crates
//!
//! ## Usage
//!
//! ```rust
//! use reindex_types::{ItemId, LogicalItem};
//!
//! let item = LogicalItem::new(ItemId::parse("42").unwrap(), "widget");
//! assert_eq!(item.bundle, "widget");
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod item;

pub use config::Settings;
pub use document::{DocumentId, IdFormat, IndexDocument, Slot, SplitKey};
pub use error::ReindexError;
pub use item::{FieldMap, FieldValue, ItemId, LogicalItem};
