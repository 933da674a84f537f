//! Model lifecycle and inference execution
//!
//! - [`ModelManager`]: download/load/unload state machine for the one resident model
//! - [`Executor`]: serializes inference against the resident engine
//! - [`InferenceEngine`] / [`ModelLoader`]: seams for generation backends
//! - [`EchoLoader`]: built-in development backend

mod echo;
mod executor;
mod manager;

pub use echo::{EchoEngine, EchoLoader};
pub use executor::{Executor, InferenceEngine, ModelLoader};
pub use manager::{DownloadOutcome, ModelDescriptor, ModelManager, ModelState, ModelStatus};
