//! # panelui-core
//!
//! Core panelui state and matching logic.
//!
//! This crate provides:
//! - The capacity-bounded document store backing persisted variables
//! - Section name patterns and wildcard/prefix matching
//! - The persistence abstraction used at startup and by autosave
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and embedded targets.

pub mod pattern;
pub mod persist;
pub mod store;

pub use pattern::{PatternError, SectionPattern};
pub use persist::{ConfigPersist, PersistError};
pub use store::{BoundedStore, StoreError, ENTRY_OVERHEAD};
