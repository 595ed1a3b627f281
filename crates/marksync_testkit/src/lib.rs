//! # marksync Testkit
//!
//! Test utilities for marksync.
//!
//! This crate provides:
//! - Fixtures for bookmarks, principals and raw change payloads
//! - Property-based test generators using proptest
//! - A reference model of the collection store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use marksync_testkit::prelude::*;
//!
//! #[test]
//! fn newest_first() {
//!     let older = bookmark("1", "2024-01-01");
//!     let newer = bookmark("2", "2024-01-02");
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
}

pub use fixtures::*;
pub use generators::*;
pub use model::*;
