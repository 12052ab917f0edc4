//! Convenient re-exports of commonly used types from docmem.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmem::prelude::*;
//! ```

pub use docmem_core::{
    backend::{IndexDirection, IndexField, StoreBackend},
    error::{EngineError, EngineResult},
    filter::Filter,
    geo::GeoPoint,
    pipeline,
    update::apply_update,
};
pub use docmem_engine::{GeoIndex, Index, MapReduceHost, MemoryStore, run_map_reduce};
