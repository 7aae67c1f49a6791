//! # Bindery Core
//!
//! Foundation types shared by every Bindery crate:
//!
//! - [`errors`]: the [`BinderyError`] enum and [`Result`] alias
//! - [`types`]: shader stages, resource types, variable types, backend kinds
//!   and device flags
//! - [`object`]: opaque device object handles and the [`ResourceMapping`] table
//! - [`hash`]: Fx/xxh3 helpers and the lock-free [`LazyHash`] slot

pub mod errors;
pub mod hash;
pub mod object;
pub mod types;

pub use errors::{BinderyError, Result};
pub use hash::{LazyHash, blob_hash, fx_hash};
pub use object::{BufferBindFlags, DeviceObject, DeviceObjectKind, DeviceObjectRef, ResourceMapping, ViewType};
pub use types::{
    BackendKind, BindingRange, DeviceFlags, INVALID_INDEX, MAX_RESOURCE_SIGNATURES, NUM_SHADER_STAGES,
    PipelineResourceFlags, ShaderResourceType, ShaderResourceVariableType, ShaderStages,
};
