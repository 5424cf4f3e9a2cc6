//! # weft-core
//!
//! Shared infrastructure for the weft data-integration service:
//!
//! - **Identifiers**: Strongly-typed flow and DAG identifiers
//! - **Errors**: The core error type shared across weft crates
//! - **Observability**: Structured-logging bootstrap for service hosts
//!
//! Domain logic lives in the sibling crates; this crate holds only the
//! vocabulary they share.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{DagId, FlowId};
