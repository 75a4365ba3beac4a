//! Module containing the error types raised by the core components.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Errors produced by the record store, the exporters and the location
/// authority.
///
/// Provider failures never cross the add/export call boundary as a
/// `Result`, they are captured as observable state on the location
/// authority and only use these variants for their display text.
pub enum Error {
    /// Location permission was denied or restricted. Terminal from the
    /// core's viewpoint, recovery requires the user to change the
    /// permission outside the application.
    #[error("Location permission denied: {0}")]
    PermissionDenied(String),
    /// The provider reported a failure while delivering fixes. A previously
    /// delivered sample stays valid.
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),
    /// The caller passed input that must be rejected before it reaches the
    /// store, e.g. a missing location sample.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A record holds a numeric field the target format cannot represent.
    #[error("Cannot encode record: {0}")]
    Encoding(String),
}
