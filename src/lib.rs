//! # Bindery
//!
//! Pipeline resource signatures, shader variable binding and device object
//! archiving for Direct3D11, Direct3D12, OpenGL/GLES, Vulkan and Metal.
//!
//! This umbrella crate re-exports the workspace members:
//!
//! - [`core`]: errors, shared enums and flags, device object handles
//! - [`signature`]: signatures, backend layouts, resource caches and SRBs
//! - [`archiver`]: serialization device, shader remapping and archives
//!
//! Most programs only need the [`prelude`].

pub use bindery_archiver as archiver;
pub use bindery_core as core;
pub use bindery_signature as signature;

pub use bindery_core::{BinderyError, Result};

pub mod prelude {
    pub use bindery_core::{
        BackendKind, BinderyError, DeviceFlags, DeviceObject, DeviceObjectRef, PipelineResourceFlags, ResourceMapping,
        Result, ShaderResourceType, ShaderResourceVariableType, ShaderStages,
    };
    pub use bindery_signature::{
        BindShaderResourcesFlags, D3D11Backend, D3D12Backend, GlBackend, ImmutableSamplerDesc, MetalBackend,
        PipelineResourceDesc, PipelineResourceSignature, PipelineResourceSignatureDesc, ResourceLookup, SamplerDesc,
        ShaderResourceBinding, ShaderVariable, SignatureBackend, VulkanBackend,
    };
    pub use bindery_archiver::{
        Archiver, DeviceObjectArchive, PipelineStateArchiveInfo, PipelineStateCreateInfo, PipelineType,
        ResourceSignatureArchiveInfo, SerializableResourceSignature, SerializationDevice,
        SerializationDeviceSettings, ShaderCreateInfo, ShaderResourceDesc,
    };
}
