//! Direct3D12 layout.
//!
//! Registers ascend per range (CBV, SRV, UAV, sampler) in declaration order.
//! Every signature lives in a single register space; the archiver offsets it
//! by the spaces of lower binding indices. Resources are grouped into root
//! descriptor tables by (sampler, dynamic) class. Samplers with an immutable
//! sampler assigned become static samplers and stay out of the tables.

use bindery_core::errors::Result;
use bindery_core::types::{BackendKind, INVALID_INDEX, ShaderResourceType, ShaderResourceVariableType, ShaderStages};
use bytemuck::{Pod, Zeroable};

use super::{NativeBinding, SignatureBackend};
use crate::desc::PipelineResourceSignatureDesc;
use crate::layout::CacheLayout;
use crate::signature::PipelineResourceSignature;

pub struct D3D12Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescriptorRangeType {
    Cbv = 0,
    Srv = 1,
    Uav = 2,
    Sampler = 3,
}

impl DescriptorRangeType {
    pub const COUNT: usize = 4;

    #[must_use]
    pub fn for_resource(ty: ShaderResourceType) -> Self {
        match ty {
            ShaderResourceType::ConstantBuffer => Self::Cbv,
            ShaderResourceType::TextureSrv | ShaderResourceType::BufferSrv | ShaderResourceType::InputAttachment => {
                Self::Srv
            }
            ShaderResourceType::TextureUav | ShaderResourceType::BufferUav => Self::Uav,
            ShaderResourceType::Sampler => Self::Sampler,
        }
    }
}

/// Root index of resources that are not placed in a descriptor table.
pub const NO_ROOT_INDEX: u8 = u8::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceAttribsD3D12 {
    pub register: u32,
    pub offset_from_table_start: u32,
    pub space: u16,
    pub root_index: u8,
    /// [`DescriptorRangeType`] discriminant.
    pub range_type: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InternalDataD3D12 {
    pub num_spaces: u32,
    pub num_root_tables: u32,
    pub register_counts: [u32; DescriptorRangeType::COUNT],
}

const _: () = assert!(std::mem::size_of::<ResourceAttribsD3D12>() == 12);
const _: () = assert!(std::mem::size_of::<InternalDataD3D12>() == 24);

impl SignatureBackend for D3D12Backend {
    const KIND: BackendKind = BackendKind::Direct3D12;
    const SUPPORTED_STAGES: ShaderStages = ShaderStages::all().difference(ShaderStages::TILE);
    const PER_STAGE_BINDINGS: bool = false;

    type Attribs = ResourceAttribsD3D12;
    type InternalData = InternalDataD3D12;

    fn compute_layout(
        desc: &PipelineResourceSignatureDesc,
        cache: &CacheLayout,
    ) -> Result<(Vec<ResourceAttribsD3D12>, InternalDataD3D12)> {
        // (is_sampler, is_dynamic) → root index, in order of first use
        let mut table_index = [None::<u8>; 4];
        let mut table_sizes = [0u32; 4];
        let mut internal = InternalDataD3D12::zeroed();
        let mut attribs = Vec::with_capacity(desc.resources.len());

        for (res, cache_attr) in desc.resources.iter().zip(&cache.attribs) {
            let range_type = DescriptorRangeType::for_resource(res.resource_type);
            let register = internal.register_counts[range_type as usize];
            internal.register_counts[range_type as usize] += res.array_size;

            let is_sampler = range_type == DescriptorRangeType::Sampler;
            let (root_index, offset_from_table_start) = if is_sampler && cache_attr.is_imtbl_sampler_assigned() {
                (NO_ROOT_INDEX, INVALID_INDEX)
            } else {
                let key = usize::from(is_sampler) * 2 + usize::from(res.var_type == ShaderResourceVariableType::Dynamic);
                let root_index = *table_index[key].get_or_insert_with(|| {
                    let next = internal.num_root_tables as u8;
                    internal.num_root_tables += 1;
                    next
                });
                let offset = table_sizes[key];
                table_sizes[key] += res.array_size;
                (root_index, offset)
            };

            attribs.push(ResourceAttribsD3D12 {
                register,
                offset_from_table_start,
                space: 0,
                root_index,
                range_type: range_type as u8,
            });
        }

        internal.num_spaces = u32::from(!desc.resources.is_empty() || !desc.immutable_samplers.is_empty());
        Ok((attribs, internal))
    }

    fn native_binding(attribs: &ResourceAttribsD3D12, _stage: ShaderStages) -> Option<NativeBinding> {
        Some(NativeBinding {
            register: attribs.register,
            space: u32::from(attribs.space),
        })
    }

    fn binding_group_count(internal: &InternalDataD3D12) -> u32 {
        internal.num_spaces
    }
}

impl PipelineResourceSignature<D3D12Backend> {
    /// Number of register spaces used by this signature.
    #[must_use]
    pub fn num_spaces(&self) -> u32 {
        self.internal_data().num_spaces
    }

    #[must_use]
    pub fn num_root_tables(&self) -> u32 {
        self.internal_data().num_root_tables
    }
}
