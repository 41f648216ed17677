//! Pharmyx storage layer.
//!
//! Processed omics tables and patient records live behind the [`OmicsStore`]
//! trait. Two implementations ship with the crate:
//!
//! - [`MemoryStore`] keeps everything in process, for tests and embedding.
//! - [`FsStore`] writes CSV tables and a JSON patient index under a data directory.
//!
//! # Example
//!
//! ```rust,no_run
//! use pharmyx_db::{FsStore, OmicsStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FsStore::open("./data/pharmyx").await?;
//!     let stats = store.get_database_stats().await?;
//!     println!("{} patients", stats.total_patients);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod store;
pub mod memory;
pub mod fs;

pub use error::{DbError, Result};
pub use store::{Attributes, OmicsStore};
pub use memory::MemoryStore;
pub use fs::FsStore;
