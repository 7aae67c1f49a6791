//! # Bindery Archiver
//!
//! Offline serialization of pipeline resource signatures and pipelines into
//! backend-agnostic device object archives:
//!
//! - [`device`]: [`SerializationDevice`], which builds signatures and shaders
//!   for any configured backend without a GPU
//! - [`registry`]: the [`BackendRegistry`] of per-backend signature factories
//! - [`serializable_signature`]: one description with per-backend blobs
//! - [`remap`]: signature placement and shader resource remapping
//! - [`spirv`]: the SPIR-V decoration patcher
//! - [`archiver`]: the [`Archiver`] that collects objects and writes archives
//! - [`archive`]: the archive format and the [`DeviceObjectArchive`] reader
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bindery::archiver::*;
//!
//! let device = Arc::new(SerializationDevice::new(SerializationDeviceSettings::default())?);
//! let archiver = Archiver::new(device.clone());
//! let vs = device.create_shader(ShaderCreateInfo::new("vs", ShaderStages::VERTEX).with_spirv(words), DeviceFlags::VULKAN)?;
//! archiver.add_graphics_pipeline(
//!     &PipelineStateCreateInfo::graphics("pso").with_shader(vs),
//!     PipelineStateArchiveInfo::new(DeviceFlags::VULKAN),
//! )?;
//! let archive = DeviceObjectArchive::load(archiver.serialize_to_blob()?)?;
//! ```

pub mod archive;
pub mod archiver;
pub mod device;
pub mod pipeline;
pub mod registry;
pub mod remap;
pub mod serializable_signature;
pub mod settings;
pub mod shader;
pub mod spirv;

pub use archive::{DeviceObjectArchive, UnpackedPipeline};
pub use archiver::Archiver;
pub use device::{PipelineResourceBindingAttribs, SerializationDevice};
pub use pipeline::{PipelineResourceLayout, PipelineStateCreateInfo, PipelineType, ShaderResourceVariableDesc};
pub use registry::{BackendFactory, BackendRegistry, DeviceSignature, SignatureFactory, downcast_signature};
pub use remap::{PipelineLayout, PipelineResourceBinding, ResolvedResource};
pub use serializable_signature::SerializableResourceSignature;
pub use settings::{
    ApiVersion, ArchiveFlags, PipelineStateArchiveInfo, ResourceSignatureArchiveInfo, SerializationDeviceSettings,
};
pub use shader::{SerializableShader, ShaderByteCode, ShaderCreateInfo, ShaderResourceDesc};
