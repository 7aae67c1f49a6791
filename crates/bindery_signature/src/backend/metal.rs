//! Metal layout.
//!
//! Metal argument tables are per stage (vertex, fragment, kernel, tile) with
//! three index spaces: buffers, textures and samplers. Formatted buffers are bound
//! as texture buffers and therefore take texture slots.

use bindery_core::errors::Result;
use bindery_core::types::{BackendKind, PipelineResourceFlags, ShaderResourceType, ShaderStages};
use bytemuck::{Pod, Zeroable};

use super::{INVALID_BIND_POINT, NativeBinding, SignatureBackend, StageRegisterAllocator};
use crate::desc::{PipelineResourceDesc, PipelineResourceSignatureDesc};
use crate::layout::CacheLayout;

pub struct MetalBackend;

pub const METAL_STAGE_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetalResourceRange {
    Buffer = 0,
    Texture = 1,
    Sampler = 2,
}

impl MetalResourceRange {
    pub const COUNT: usize = 3;
    pub const LIMITS: [u32; Self::COUNT] = [31, 128, 16];
    pub const NAMES: [&'static str; Self::COUNT] = ["buffer", "texture", "sampler"];

    #[must_use]
    pub fn for_resource(res: &PipelineResourceDesc) -> Self {
        let formatted = res.flags.contains(PipelineResourceFlags::FORMATTED_BUFFER);
        match res.resource_type {
            ShaderResourceType::ConstantBuffer => Self::Buffer,
            ShaderResourceType::BufferSrv | ShaderResourceType::BufferUav if !formatted => Self::Buffer,
            ShaderResourceType::Sampler => Self::Sampler,
            _ => Self::Texture,
        }
    }
}

/// Vertex → 0, fragment → 1, kernel → 2, tile → 3.
#[must_use]
pub fn metal_stage_slot(stage: ShaderStages) -> Option<usize> {
    [ShaderStages::VERTEX, ShaderStages::PIXEL, ShaderStages::COMPUTE, ShaderStages::TILE]
        .iter()
        .position(|s| *s == stage)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceAttribsMtl {
    pub bind_points: [u8; METAL_STAGE_COUNT],
    /// [`MetalResourceRange`] discriminant.
    pub range: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InternalDataMtl {
    pub bind_point_counts: [[u32; MetalResourceRange::COUNT]; METAL_STAGE_COUNT],
}

const _: () = assert!(std::mem::size_of::<ResourceAttribsMtl>() == 5);
const _: () = assert!(std::mem::size_of::<InternalDataMtl>() == 48);

impl SignatureBackend for MetalBackend {
    const KIND: BackendKind = BackendKind::Metal;
    const SUPPORTED_STAGES: ShaderStages = ShaderStages::VERTEX
        .union(ShaderStages::PIXEL)
        .union(ShaderStages::COMPUTE)
        .union(ShaderStages::TILE);
    const PER_STAGE_BINDINGS: bool = true;

    type Attribs = ResourceAttribsMtl;
    type InternalData = InternalDataMtl;

    fn compute_layout(
        desc: &PipelineResourceSignatureDesc,
        _cache: &CacheLayout,
    ) -> Result<(Vec<ResourceAttribsMtl>, InternalDataMtl)> {
        let mut internal = InternalDataMtl::zeroed();
        let mut allocator = StageRegisterAllocator {
            counts: &mut internal.bind_point_counts,
            limits: MetalResourceRange::LIMITS,
            range_names: MetalResourceRange::NAMES,
            backend: BackendKind::Metal,
        };

        let mut attribs = Vec::with_capacity(desc.resources.len());
        for res in &desc.resources {
            let range = MetalResourceRange::for_resource(res);
            let mut attr = ResourceAttribsMtl {
                bind_points: [INVALID_BIND_POINT; METAL_STAGE_COUNT],
                range: range as u8,
            };
            for stage in res.shader_stages.stages() {
                if let Some(slot) = metal_stage_slot(stage) {
                    attr.bind_points[slot] = allocator.allocate(&res.name, slot, range as usize, res.array_size)?;
                }
            }
            attribs.push(attr);
        }
        Ok((attribs, internal))
    }

    fn native_binding(attribs: &ResourceAttribsMtl, stage: ShaderStages) -> Option<NativeBinding> {
        let bind_point = attribs.bind_points[metal_stage_slot(stage)?];
        (bind_point != INVALID_BIND_POINT).then_some(NativeBinding {
            register: u32::from(bind_point),
            space: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::types::ShaderResourceVariableType as V;

    use super::*;

    #[test]
    fn formatted_buffers_take_texture_slots() {
        let desc = PipelineResourceSignatureDesc::new("sig")
            .with_resource(PipelineResourceDesc::new(
                "cb",
                ShaderStages::COMPUTE,
                1,
                ShaderResourceType::ConstantBuffer,
                V::Mutable,
            ))
            .with_resource(
                PipelineResourceDesc::new("tb", ShaderStages::COMPUTE, 1, ShaderResourceType::BufferSrv, V::Mutable)
                    .with_flags(PipelineResourceFlags::FORMATTED_BUFFER),
            )
            .with_resource(PipelineResourceDesc::new(
                "sb",
                ShaderStages::COMPUTE,
                1,
                ShaderResourceType::BufferUav,
                V::Mutable,
            ));
        let (attribs, internal) = MetalBackend::compute_layout(&desc, &CacheLayout::compute(&desc)).unwrap();
        assert_eq!(attribs[1].range, MetalResourceRange::Texture as u8);
        assert_eq!(attribs[2].bind_points[2], 1);
        assert_eq!(internal.bind_point_counts[2], [2, 1, 0]);
    }

    #[test]
    fn tile_functions_get_their_own_table() {
        let desc = PipelineResourceSignatureDesc::new("sig")
            .with_resource(PipelineResourceDesc::new(
                "g_Frame",
                ShaderStages::PIXEL | ShaderStages::TILE,
                1,
                ShaderResourceType::ConstantBuffer,
                V::Mutable,
            ))
            .with_resource(PipelineResourceDesc::new(
                "g_Lights",
                ShaderStages::TILE,
                1,
                ShaderResourceType::BufferSrv,
                V::Mutable,
            ));
        let (attribs, internal) = MetalBackend::compute_layout(&desc, &CacheLayout::compute(&desc)).unwrap();
        assert_eq!(attribs[0].bind_points, [INVALID_BIND_POINT, 0, INVALID_BIND_POINT, 0]);
        assert_eq!(attribs[1].bind_points[3], 1);
        assert_eq!(internal.bind_point_counts[3], [2, 0, 0]);
        assert_eq!(
            MetalBackend::native_binding(&attribs[1], ShaderStages::TILE),
            Some(NativeBinding { register: 1, space: 0 })
        );
    }
}
