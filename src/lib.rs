pub mod baseline;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod local;
pub mod merge;
pub mod output;
pub mod remote;
pub mod render;
pub mod state;
pub mod sync;
pub mod writer;

pub use baseline::BaselineStore;
pub use error::{Result, SyncError};
pub use merge::{MergeEngine, MergeResult};
pub use sync::{Conflict, SyncOrchestrator, SyncPassResult};
