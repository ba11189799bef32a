pub(crate) use crate::errors::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
