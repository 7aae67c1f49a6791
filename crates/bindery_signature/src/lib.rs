//! # Bindery Signature
//!
//! Pipeline resource signatures and everything needed to bind resources
//! through them:
//!
//! - [`desc`]: signature, resource and immutable sampler descriptions
//! - [`layout`]: backend-agnostic cache layout
//! - [`backend`]: per-backend layouts behind [`SignatureBackend`]
//! - [`signature`]: [`PipelineResourceSignature`] with hashing, compatibility
//!   and static resources
//! - [`resource_cache`], [`variable`], [`srb`]: the binding state machine
//! - [`serializer`]: the Measure / Write / Read codec

pub mod backend;
pub mod desc;
pub mod layout;
pub mod resource_cache;
pub mod serializer;
pub mod signature;
pub mod srb;
pub mod variable;

pub use backend::{D3D11Backend, D3D12Backend, GlBackend, MetalBackend, NativeBinding, SignatureBackend, VulkanBackend};
pub use desc::{
    AddressMode, FilterType, ImmutableSamplerDesc, PipelineResourceDesc, PipelineResourceSignatureDesc, SamplerDesc,
};
pub use layout::{CacheAttribs, CacheKind, CacheLayout};
pub use resource_cache::ShaderResourceCache;
pub use signature::{PipelineResourceSignature, ResourceLookup};
pub use srb::ShaderResourceBinding;
pub use variable::{BindShaderResourcesFlags, ShaderVariable, ShaderVariableKind, ShaderVariableManager, ShaderVariables};

pub type PipelineResourceSignatureD3D11 = PipelineResourceSignature<D3D11Backend>;
pub type PipelineResourceSignatureD3D12 = PipelineResourceSignature<D3D12Backend>;
pub type PipelineResourceSignatureGl = PipelineResourceSignature<GlBackend>;
pub type PipelineResourceSignatureVk = PipelineResourceSignature<VulkanBackend>;
pub type PipelineResourceSignatureMtl = PipelineResourceSignature<MetalBackend>;
