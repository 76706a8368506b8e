pub mod error;
mod pool;
mod worker;

pub use error::{Error, ErrorKind, Result};
pub use pool::WorkerPool;
