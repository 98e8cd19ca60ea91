pub mod error;

pub use error::{AppError, BackendError};
