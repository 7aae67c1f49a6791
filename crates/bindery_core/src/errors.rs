//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`BinderyError`] covers all failure modes including:
//! - Malformed signature descriptions (validation)
//! - Binding errors detected at bind or draw/dispatch time
//! - Shader resource remapping failures
//! - Serialized blob and archive format errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for `std::result::Result<T, BinderyError>`.
//!
//! ```rust,ignore
//! use bindery_core::errors::{BinderyError, Result};
//!
//! fn build_signature() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::types::{BackendKind, ShaderStages};

/// The main error type for the Bindery engine.
///
/// Each variant provides specific context about what went wrong. No error in
/// the engine is silently swallowed: every one of them propagates to the caller.
#[derive(Error, Debug)]
pub enum BinderyError {
    // ========================================================================
    // Description Validation Errors
    // ========================================================================
    /// Two resources of one signature share a name.
    #[error("Signature '{signature}': resource name '{name}' is not unique")]
    DuplicateResourceName { signature: String, name: String },

    /// A resource was declared with a zero array size, or the signature's
    /// array sizes add up past the per-signature element limit.
    #[error("Signature '{signature}': array size of resource '{name}' is zero or exceeds the signature element limit")]
    InvalidArraySize { signature: String, name: String },

    /// A resource or immutable sampler is not visible in any shader stage.
    #[error("Signature '{signature}': '{name}' has no shader stages")]
    EmptyShaderStages { signature: String, name: String },

    /// The binding index does not fit into a pipeline layout.
    #[error("Signature '{signature}': binding index {index} exceeds the maximum ({max})")]
    BindingIndexOutOfRange {
        signature: String,
        index: u32,
        max: u32,
    },

    /// Two signatures of one pipeline use the same binding index.
    #[error("Pipeline '{pipeline}': signatures '{first}' and '{second}' share binding index {index}")]
    BindingIndexCollision {
        pipeline: String,
        first: String,
        second: String,
        index: u32,
    },

    /// A backend cannot place a resource in the requested stage.
    #[error("{backend}: resource '{name}' uses unsupported shader stages {stages:?}")]
    UnsupportedShaderStage {
        backend: BackendKind,
        name: String,
        stages: ShaderStages,
    },

    /// A backend ran out of binding slots of some kind.
    #[error("{backend}: resource '{name}' exceeds the {range} limit ({limit})")]
    RegisterLimitExceeded {
        backend: BackendKind,
        name: String,
        range: &'static str,
        limit: u32,
    },

    /// An immutable sampler is malformed.
    #[error("Signature '{signature}': immutable sampler '{name}' is invalid: {reason}")]
    InvalidImmutableSampler {
        signature: String,
        name: String,
        reason: String,
    },

    /// Any other malformed description.
    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    /// The requested device flags are empty or not supported by the device.
    #[error("Invalid device flags: {0}")]
    InvalidDeviceFlags(String),

    /// An object with this name already exists in the archive.
    #[error("{kind} with name '{name}' is already present. All names must be unique")]
    DuplicateObjectName { kind: &'static str, name: String },

    // ========================================================================
    // Binding Errors
    // ========================================================================
    /// `SetArray` arguments fall outside the variable's array.
    #[error("Variable '{name}': elements [{first}, {first}+{count}) exceed the array size {array_size}")]
    ArrayRangeOutOfBounds {
        name: String,
        first: u32,
        count: u32,
        array_size: u32,
    },

    /// The object cannot be bound to a variable of this kind.
    #[error("Variable '{name}'[{array_index}]: {reason}")]
    IncompatibleResource {
        name: String,
        array_index: u32,
        reason: String,
    },

    /// A resource required by an active shader stage is not bound.
    #[error("No resource is bound to variable '{name}'[{array_index}] (stages {stages:?})")]
    UnboundResource {
        name: String,
        array_index: u32,
        stages: ShaderStages,
    },

    /// The resource mapping did not provide an object for a variable.
    #[error("Failed to resolve resource '{name}'[{array_index}] in the resource mapping")]
    UnresolvedResource { name: String, array_index: u32 },

    // ========================================================================
    // Remapping Errors
    // ========================================================================
    /// Shader byte code references a resource that no signature provides.
    #[error("Failed to remap shader '{shader}': {reason}")]
    Remap { shader: String, reason: String },

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// A serialized blob does not have the expected size or shape.
    #[error("Serialization format error: {0}")]
    SerializationFormat(String),

    /// An archive header or chunk table is corrupted.
    #[error("Archive format error: {0}")]
    ArchiveFormat(String),

    /// Two objects of different backends were mixed.
    #[error("Backend mismatch: expected {expected}, found {found}")]
    BackendMismatch {
        expected: BackendKind,
        found: BackendKind,
    },

    /// The backend is not registered with the device.
    #[error("Backend {0} is not available")]
    BackendNotAvailable(BackendKind),

    /// The named object does not exist.
    #[error("{kind} '{name}' was not found")]
    ObjectNotFound { kind: &'static str, name: String },

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// Stream I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BinderyError {
    /// Shorthand for [`BinderyError::SerializationFormat`].
    pub fn format(msg: impl Into<String>) -> Self {
        Self::SerializationFormat(msg.into())
    }

    /// Whether this error was raised while validating a description.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateResourceName { .. }
                | Self::InvalidArraySize { .. }
                | Self::EmptyShaderStages { .. }
                | Self::BindingIndexOutOfRange { .. }
                | Self::BindingIndexCollision { .. }
                | Self::UnsupportedShaderStage { .. }
                | Self::RegisterLimitExceeded { .. }
                | Self::InvalidImmutableSampler { .. }
                | Self::InvalidDescription(_)
                | Self::InvalidDeviceFlags(_)
                | Self::DuplicateObjectName { .. }
                | Self::ArrayRangeOutOfBounds { .. }
        )
    }
}

/// Alias for `Result<T, BinderyError>`.
pub type Result<T> = std::result::Result<T, BinderyError>;
