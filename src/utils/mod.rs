pub mod error;
pub mod logger;
pub mod time;

pub use error::{ErrorKind, PlatformError, PlatformResult};
