//! Velk Hive
//!
//! Slab storage for Velk objects: many instances of one class live in
//! cache-friendly pages with placement construction, an intrusive
//! per-page free list, and zombie-state slot reclamation that respects
//! outstanding external references.

pub mod hive;

pub use hive::{create_hive, register_hive_type, Hive, IHive};
