//! Direct3D11 layout.
//!
//! D3D11 binds resources per shader stage. Each stage has its own register
//! counters for constant buffers, SRVs, samplers and UAVs, and registers
//! ascend in declaration order. Only the six classic stages exist.

use bindery_core::errors::Result;
use bindery_core::types::{BackendKind, ShaderResourceType, ShaderStages};
use bytemuck::{Pod, Zeroable};

use super::{INVALID_BIND_POINT, NativeBinding, SignatureBackend, StageRegisterAllocator};
use crate::desc::PipelineResourceSignatureDesc;
use crate::layout::CacheLayout;
use crate::signature::PipelineResourceSignature;

pub struct D3D11Backend;

/// VS, PS, GS, HS, DS, CS. Matches [`ShaderStages::stage_index`].
pub const D3D11_STAGE_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum D3D11ResourceRange {
    ConstantBuffer = 0,
    Srv = 1,
    Sampler = 2,
    Uav = 3,
}

impl D3D11ResourceRange {
    pub const COUNT: usize = 4;
    pub const LIMITS: [u32; Self::COUNT] = [14, 128, 16, 8];
    pub const NAMES: [&'static str; Self::COUNT] = ["constant buffer", "shader resource view", "sampler", "unordered access view"];

    #[must_use]
    pub fn for_resource(ty: ShaderResourceType) -> Self {
        match ty {
            ShaderResourceType::ConstantBuffer => Self::ConstantBuffer,
            ShaderResourceType::TextureSrv | ShaderResourceType::BufferSrv | ShaderResourceType::InputAttachment => {
                Self::Srv
            }
            ShaderResourceType::Sampler => Self::Sampler,
            ShaderResourceType::TextureUav | ShaderResourceType::BufferUav => Self::Uav,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceAttribsD3D11 {
    /// First register per stage, [`INVALID_BIND_POINT`] where not visible.
    pub bind_points: [u8; D3D11_STAGE_COUNT],
    /// [`D3D11ResourceRange`] discriminant.
    pub range: u8,
    pub _padding: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InternalDataD3D11 {
    pub bind_point_counts: [[u32; D3D11ResourceRange::COUNT]; D3D11_STAGE_COUNT],
}

const _: () = assert!(std::mem::size_of::<ResourceAttribsD3D11>() == 8);
const _: () = assert!(std::mem::size_of::<InternalDataD3D11>() == 96);

impl SignatureBackend for D3D11Backend {
    const KIND: BackendKind = BackendKind::Direct3D11;
    const SUPPORTED_STAGES: ShaderStages = ShaderStages::ALL_GRAPHICS.union(ShaderStages::COMPUTE);
    const PER_STAGE_BINDINGS: bool = true;

    type Attribs = ResourceAttribsD3D11;
    type InternalData = InternalDataD3D11;

    fn compute_layout(
        desc: &PipelineResourceSignatureDesc,
        _cache: &CacheLayout,
    ) -> Result<(Vec<ResourceAttribsD3D11>, InternalDataD3D11)> {
        let mut internal = InternalDataD3D11::zeroed();
        let mut allocator = StageRegisterAllocator {
            counts: &mut internal.bind_point_counts,
            limits: D3D11ResourceRange::LIMITS,
            range_names: D3D11ResourceRange::NAMES,
            backend: BackendKind::Direct3D11,
        };

        let mut attribs = Vec::with_capacity(desc.resources.len());
        for res in &desc.resources {
            let range = D3D11ResourceRange::for_resource(res.resource_type);
            let mut attr = ResourceAttribsD3D11 {
                bind_points: [INVALID_BIND_POINT; D3D11_STAGE_COUNT],
                range: range as u8,
                _padding: 0,
            };
            for stage in res.shader_stages.stages() {
                let slot = stage.stage_index();
                attr.bind_points[slot] = allocator.allocate(&res.name, slot, range as usize, res.array_size)?;
            }
            attribs.push(attr);
        }
        Ok((attribs, internal))
    }

    fn native_binding(attribs: &ResourceAttribsD3D11, stage: ShaderStages) -> Option<NativeBinding> {
        let bind_point = *attribs.bind_points.get(stage.stage_index())?;
        (bind_point != INVALID_BIND_POINT).then_some(NativeBinding {
            register: u32::from(bind_point),
            space: 0,
        })
    }
}

impl PipelineResourceSignature<D3D11Backend> {
    /// Registers of `range` used in `stage`.
    #[must_use]
    pub fn bind_point_count(&self, stage: ShaderStages, range: D3D11ResourceRange) -> u32 {
        self.internal_data()
            .bind_point_counts
            .get(stage.stage_index())
            .map_or(0, |counts| counts[range as usize])
    }
}
