//! Error taxonomy for the reconstruction core and the transform repository.
//!
//! Nothing in this crate panics across the public API boundary except on
//! programmer error (asserted in debug builds); every fallible operation
//! returns one of these.

use thiserror::Error;

/// Errors raised by the slice-paste orchestrator and the geometry/clip/
/// interpolation layers it drives.
#[derive(Debug, Error)]
pub enum ReconError {
    /// Invalid output extent, mismatched scalar kinds, missing required
    /// field, importance-mask-extent-mismatch, or an unknown preset name.
    #[error("config error: {0}")]
    Config(String),

    /// Volume or accumulation buffer allocation failed.
    #[error("resource error: {0}")]
    Resource(String),
}

impl ReconError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }
}

/// Errors raised by the transform repository (C7).
#[derive(Debug, Error)]
pub enum GraphError {
    /// Attempt to mutate a computed transform edge, a cycle would be
    /// created, or a duplicate original edge was requested.
    #[error("invariant violated for {from} -> {to}: {reason}")]
    Invariant { from: String, to: String, reason: String },

    /// No path could be found between the two named frames.
    #[error("no path found from {from} to {to}")]
    PathNotFound { from: String, to: String },

    /// A frame name was empty or contained `To<Uppercase>`.
    #[error("invalid frame name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The configuration XML was malformed or missing a required attribute.
    #[error("config error: {0}")]
    Config(String),
}
