// Adapters layer: format codecs, byte storage and the registry that maps type tags to them.

pub mod csv;
pub mod excel;
pub mod json;
pub mod model;
pub mod object;
pub mod registry;
pub mod sql;
pub mod storage;
pub mod xml;

pub use model::MemoryStore;
pub use object::ObjectSink;
pub use registry::{AdapterPair, FormatRegistry};
pub use storage::{LocalStorage, MemoryStorage, StorageRouter};
