pub mod config;
pub mod error;
pub mod path;

pub use config::*;
pub use error::{Error, Result};
pub use path::Path;
