//! The pure core of the docmem document engine.
//!
//! This crate holds everything that does not own state:
//!
//! - **Value model** ([`value`]) - Type-aware equality, ordering, and numeric
//!   promotion rules over BSON values
//! - **Path resolution** ([`path`]) - Dot-path walking with array fan-out
//! - **Filter engine** ([`filter`]) - Query compilation into reusable
//!   predicate trees and their evaluation
//! - **Update engine** ([`update`]) - Atomic `$`-operator application and
//!   replacement updates
//! - **Aggregation pipeline** ([`pipeline`]) - `$match`/`$project`/`$group`
//!   and friends over materialized document lists
//! - **Geo math** ([`geo`]) - Coordinate decoding, geohashing, and distance
//!   functions
//! - **Store backend abstraction** ([`backend`]) - The async trait stateful
//!   stores implement
//! - **Error handling** ([`error`]) - The engine's error and result types
//!
//! # Example
//!
//! ```ignore
//! use docmem_core::filter::Filter;
//! use bson::doc;
//!
//! let filter = Filter::compile(&doc! { "age": { "$gte": 18 } })?;
//! assert!(filter.matches(&doc! { "age": 30 }));
//! # Ok::<(), docmem_core::error::EngineError>(())
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmem_core;

pub mod backend;
pub mod error;
pub mod filter;
pub mod geo;
pub mod path;
pub mod pipeline;
pub mod update;
pub mod value;
