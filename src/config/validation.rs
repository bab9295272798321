//! Validation contract shared by every configuration section.

use crate::utils::error::Result;

/// Implemented by configuration types that can be checked for internal
/// consistency after deserialization. Validation accumulates every problem
/// it finds rather than stopping at the first one, so operators see the
/// full list of fixes needed in one pass.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}
