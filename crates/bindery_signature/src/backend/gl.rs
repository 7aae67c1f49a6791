//! OpenGL / GLES layout.
//!
//! GL has no descriptor sets: uniform buffer, texture, image and storage
//! buffer bindings are program-wide and ascend per range. The binding of a
//! resource therefore equals its SRB cache offset, which keeps the cache and
//! the GL binding tables in lockstep.

use bindery_core::errors::Result;
use bindery_core::types::{BackendKind, BindingRange, INVALID_INDEX, ShaderStages};
use bytemuck::{Pod, Zeroable};

use super::{NativeBinding, SignatureBackend};
use crate::desc::PipelineResourceSignatureDesc;
use crate::layout::CacheLayout;
use crate::signature::PipelineResourceSignature;

pub struct GlBackend;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceAttribsGl {
    /// First binding, [`INVALID_INDEX`] for samplers.
    pub binding: u32,
    /// [`BindingRange`] discriminant or [`BindingRange::NONE`].
    pub range: u8,
    pub _padding: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InternalDataGl {
    pub binding_counts: [u32; BindingRange::COUNT],
}

const _: () = assert!(std::mem::size_of::<ResourceAttribsGl>() == 8);
const _: () = assert!(std::mem::size_of::<InternalDataGl>() == 16);

impl SignatureBackend for GlBackend {
    const KIND: BackendKind = BackendKind::OpenGl;
    const SUPPORTED_STAGES: ShaderStages = ShaderStages::ALL_GRAPHICS.union(ShaderStages::COMPUTE);
    const PER_STAGE_BINDINGS: bool = false;

    type Attribs = ResourceAttribsGl;
    type InternalData = InternalDataGl;

    fn compute_layout(
        _desc: &PipelineResourceSignatureDesc,
        cache: &CacheLayout,
    ) -> Result<(Vec<ResourceAttribsGl>, InternalDataGl)> {
        let attribs = cache
            .attribs
            .iter()
            .map(|attr| ResourceAttribsGl {
                binding: if attr.binding_range().is_some() { attr.srb_cache_offset } else { INVALID_INDEX },
                range: attr.range,
                _padding: [0; 3],
            })
            .collect();
        Ok((
            attribs,
            InternalDataGl {
                binding_counts: cache.srb_counters,
            },
        ))
    }

    fn native_binding(attribs: &ResourceAttribsGl, _stage: ShaderStages) -> Option<NativeBinding> {
        (attribs.binding != INVALID_INDEX).then_some(NativeBinding {
            register: attribs.binding,
            space: 0,
        })
    }
}

impl PipelineResourceSignature<GlBackend> {
    /// Number of bindings of `range` used by this signature.
    #[must_use]
    pub fn binding_count(&self, range: BindingRange) -> u32 {
        self.internal_data().binding_counts[range as usize]
    }
}
