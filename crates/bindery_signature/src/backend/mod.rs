//! Per-backend layout algorithms.
//!
//! Each backend is a zero-sized marker type implementing [`SignatureBackend`].
//! The trait fixes the backend's raw resource attribs and internal data
//! (both `Pod`, serialized verbatim) and the layout function that derives them
//! from a description.
//!
//! | Backend  | Binding model                                                   |
//! |----------|-----------------------------------------------------------------|
//! | Vulkan   | ascending bindings per descriptor set (static/mutable, dynamic) |
//! | D3D12    | ascending registers per range in space 0, root table per class  |
//! | D3D11    | ascending registers per shader stage and range                  |
//! | OpenGL   | ascending bindings per range across the program                 |
//! | Metal    | ascending indices per shader stage and range                    |

pub mod d3d11;
pub mod d3d12;
pub mod gl;
pub mod metal;
pub mod vulkan;

use std::fmt::Debug;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{BackendKind, ShaderStages};
use bytemuck::Pod;

use crate::desc::PipelineResourceSignatureDesc;
use crate::layout::CacheLayout;

pub use d3d11::D3D11Backend;
pub use d3d12::D3D12Backend;
pub use gl::GlBackend;
pub use metal::MetalBackend;
pub use vulkan::VulkanBackend;

/// Final location of a resource as seen by a shader.
///
/// `register` is the binding / register / bind point. `space` is the
/// signature-relative descriptor set (Vulkan) or register space (D3D12) and
/// `0` elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeBinding {
    pub register: u32,
    pub space: u32,
}

/// A graphics backend's signature layout.
pub trait SignatureBackend: Send + Sync + Sized + 'static {
    const KIND: BackendKind;

    /// Stages the backend can place resources in.
    const SUPPORTED_STAGES: ShaderStages;

    /// Whether a resource gets a separate binding in every stage.
    const PER_STAGE_BINDINGS: bool;

    /// Per-resource layout data, parallel to the description's resources.
    type Attribs: Pod + Debug + PartialEq + Send + Sync;

    /// Signature-wide layout data.
    type InternalData: Pod + Debug + PartialEq + Send + Sync;

    /// Derives the layout. The description is valid and its stages are supported.
    fn compute_layout(
        desc: &PipelineResourceSignatureDesc,
        cache: &CacheLayout,
    ) -> Result<(Vec<Self::Attribs>, Self::InternalData)>;

    /// Compares the parts of two attribs that affect shader bindings.
    fn attribs_compatible(a: &Self::Attribs, b: &Self::Attribs) -> bool {
        a == b
    }

    /// Binding of a resource in a single shader stage.
    fn native_binding(attribs: &Self::Attribs, stage: ShaderStages) -> Option<NativeBinding>;

    /// Number of descriptor sets / register spaces the signature occupies.
    fn binding_group_count(_internal: &Self::InternalData) -> u32 {
        0
    }
}

/// Rejects resources and immutable samplers in stages the backend lacks.
pub(crate) fn check_supported_stages<B: SignatureBackend>(desc: &PipelineResourceSignatureDesc) -> Result<()> {
    let resources = desc.resources.iter().map(|r| (&r.name, r.shader_stages));
    let samplers = desc
        .immutable_samplers
        .iter()
        .map(|s| (&s.sampler_or_texture_name, s.shader_stages));

    for (name, stages) in resources.chain(samplers) {
        let unsupported = stages - B::SUPPORTED_STAGES;
        if !unsupported.is_empty() {
            return Err(BinderyError::UnsupportedShaderStage {
                backend: B::KIND,
                name: name.clone(),
                stages: unsupported,
            });
        }
    }
    Ok(())
}

/// Register allocator for backends that bind per stage (D3D11, Metal).
///
/// `S` is the number of stage slots and `R` the number of register ranges.
#[derive(Debug)]
pub(crate) struct StageRegisterAllocator<'a, const S: usize, const R: usize> {
    pub counts: &'a mut [[u32; R]; S],
    pub limits: [u32; R],
    pub range_names: [&'static str; R],
    pub backend: BackendKind,
}

impl<const S: usize, const R: usize> StageRegisterAllocator<'_, S, R> {
    /// Reserves `array_size` registers of `range` in `stage_slot` and
    /// returns the first one.
    pub fn allocate(&mut self, name: &str, stage_slot: usize, range: usize, array_size: u32) -> Result<u8> {
        let first = self.counts[stage_slot][range];
        let Some(end) = first.checked_add(array_size).filter(|&end| end <= self.limits[range]) else {
            return Err(BinderyError::RegisterLimitExceeded {
                backend: self.backend,
                name: name.to_owned(),
                range: self.range_names[range],
                limit: self.limits[range],
            });
        };
        self.counts[stage_slot][range] = end;
        u8::try_from(first).map_err(|_| BinderyError::RegisterLimitExceeded {
            backend: self.backend,
            name: name.to_owned(),
            range: self.range_names[range],
            limit: u32::from(u8::MAX),
        })
    }
}

/// Marker stored in per-stage bind point arrays for stages without a binding.
pub const INVALID_BIND_POINT: u8 = u8::MAX;
