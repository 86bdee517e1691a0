pub mod context;
pub mod error;

pub use context::{AppContext, DataPaths, FetcherOverrides};
pub use error::{QuireError, Result};
