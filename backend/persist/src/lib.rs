//! Persistence contract for command partition state, plus the stock backends.
//!
//! Every backend follows the same lifecycle: construct, `start()` exactly once,
//! then `save`/`recover` by partition name. Recovering a partition that was
//! never saved yields an empty JSON object.

pub mod error;
pub mod file_store;
pub mod sqlite_store;
pub mod store;

pub use error::PersistError;
pub use file_store::FilePersister;
pub use sqlite_store::SqlitePersister;
pub use store::{
    empty_state, recover_typed, save_typed, validate_partition, MemoryPersister, Persister,
};
