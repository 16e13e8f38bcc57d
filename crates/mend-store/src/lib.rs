//! Persistence contracts for the mend pipeline core
//!
//! The core talks to three abstract stores: a document store (source of
//! truth for all metadata), an analytical store (derived, batch-exported
//! tables) and an object store (staged data artifacts). A fourth contract
//! covers remote model inference. In-memory implementations back the tests
//! and local mode.

pub mod analytical;
pub mod criteria;
pub mod document;
pub mod health;
pub mod inference;
pub mod memory;
pub mod object;

pub use analytical::{AnalyticalStore, ColumnSpec, MemoryAnalyticalStore, TableSpec};
pub use criteria::{Condition, Criteria};
pub use document::{DocumentStore, Mutator};
pub use health::await_ready;
pub use inference::{ModelServer, Prediction, StaticModelServer};
pub use memory::MemoryDocumentStore;
pub use object::{MemoryObjectStore, ObjectMetadata, ObjectStore, StoredObject};
