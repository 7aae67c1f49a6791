//! Vulkan layout.
//!
//! Resources are split into two logical descriptor sets by variable class:
//! static and mutable resources share [`DescriptorSetId::StaticMutable`],
//! dynamic resources go to [`DescriptorSetId::Dynamic`]. A logical set is only
//! allocated if it has at least one resource, so the physical set index of the
//! dynamic set is `1` when both are used and `0` otherwise. Bindings ascend in
//! declaration order within each set.

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{
    BackendKind, PipelineResourceFlags, ShaderResourceType, ShaderResourceVariableType, ShaderStages,
};
use bytemuck::{Pod, Zeroable};

use super::{NativeBinding, SignatureBackend};
use crate::desc::{PipelineResourceDesc, PipelineResourceSignatureDesc};
use crate::layout::CacheLayout;
use crate::signature::PipelineResourceSignature;

pub struct VulkanBackend;

/// Logical descriptor set of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescriptorSetId {
    StaticMutable = 0,
    Dynamic = 1,
}

impl DescriptorSetId {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::StaticMutable, Self::Dynamic];

    #[must_use]
    pub fn for_var_type(var_type: ShaderResourceVariableType) -> Self {
        match var_type {
            ShaderResourceVariableType::Dynamic => Self::Dynamic,
            ShaderResourceVariableType::Static | ShaderResourceVariableType::Mutable => Self::StaticMutable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescriptorType {
    Sampler = 0,
    CombinedImageSampler = 1,
    SeparateImage = 2,
    StorageImage = 3,
    UniformTexelBuffer = 4,
    StorageTexelBuffer = 5,
    UniformBuffer = 6,
    UniformBufferDynamic = 7,
    StorageBuffer = 8,
    StorageBufferDynamic = 9,
    InputAttachment = 10,
}

impl DescriptorType {
    #[must_use]
    pub fn for_resource(res: &PipelineResourceDesc) -> Self {
        let dynamic_offsets = !res.flags.contains(PipelineResourceFlags::NO_DYNAMIC_BUFFERS);
        let formatted = res.flags.contains(PipelineResourceFlags::FORMATTED_BUFFER);
        match res.resource_type {
            ShaderResourceType::ConstantBuffer if dynamic_offsets => Self::UniformBufferDynamic,
            ShaderResourceType::ConstantBuffer => Self::UniformBuffer,
            ShaderResourceType::TextureSrv if res.flags.contains(PipelineResourceFlags::COMBINED_SAMPLER) => {
                Self::CombinedImageSampler
            }
            ShaderResourceType::TextureSrv => Self::SeparateImage,
            ShaderResourceType::BufferSrv if formatted => Self::UniformTexelBuffer,
            ShaderResourceType::BufferUav if formatted => Self::StorageTexelBuffer,
            ShaderResourceType::BufferSrv | ShaderResourceType::BufferUav if dynamic_offsets => {
                Self::StorageBufferDynamic
            }
            ShaderResourceType::BufferSrv | ShaderResourceType::BufferUav => Self::StorageBuffer,
            ShaderResourceType::TextureUav => Self::StorageImage,
            ShaderResourceType::Sampler => Self::Sampler,
            ShaderResourceType::InputAttachment => Self::InputAttachment,
        }
    }
}

impl TryFrom<u8> for DescriptorType {
    type Error = BinderyError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Sampler,
            1 => Self::CombinedImageSampler,
            2 => Self::SeparateImage,
            3 => Self::StorageImage,
            4 => Self::UniformTexelBuffer,
            5 => Self::StorageTexelBuffer,
            6 => Self::UniformBuffer,
            7 => Self::UniformBufferDynamic,
            8 => Self::StorageBuffer,
            9 => Self::StorageBufferDynamic,
            10 => Self::InputAttachment,
            _ => return Err(BinderyError::format(format!("invalid Vulkan descriptor type {value}"))),
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceAttribsVk {
    pub binding_index: u32,
    /// Physical descriptor set index within the signature (0 or 1).
    pub descr_set: u8,
    /// [`DescriptorType`] discriminant.
    pub descr_type: u8,
    pub _padding: [u8; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InternalDataVk {
    /// Descriptor count per [`DescriptorSetId`], `u32::MAX` if the set is unused.
    pub descriptor_set_sizes: [u32; DescriptorSetId::COUNT],
    pub dynamic_uniform_buffer_count: u16,
    pub dynamic_storage_buffer_count: u16,
}

const _: () = assert!(std::mem::size_of::<ResourceAttribsVk>() == 8);
const _: () = assert!(std::mem::size_of::<InternalDataVk>() == 12);

const UNUSED_SET: u32 = u32::MAX;

impl SignatureBackend for VulkanBackend {
    const KIND: BackendKind = BackendKind::Vulkan;
    const SUPPORTED_STAGES: ShaderStages = ShaderStages::all().difference(ShaderStages::TILE);
    const PER_STAGE_BINDINGS: bool = false;

    type Attribs = ResourceAttribsVk;
    type InternalData = InternalDataVk;

    fn compute_layout(
        desc: &PipelineResourceSignatureDesc,
        _cache: &CacheLayout,
    ) -> Result<(Vec<ResourceAttribsVk>, InternalDataVk)> {
        let mut used = [false; DescriptorSetId::COUNT];
        for res in &desc.resources {
            used[DescriptorSetId::for_var_type(res.var_type) as usize] = true;
        }
        let physical_set = |id: DescriptorSetId| -> u8 {
            match id {
                DescriptorSetId::StaticMutable => 0,
                DescriptorSetId::Dynamic => u8::from(used[DescriptorSetId::StaticMutable as usize]),
            }
        };

        let mut bindings = [0u32; DescriptorSetId::COUNT];
        let mut sizes = [0u32; DescriptorSetId::COUNT];
        let mut internal = InternalDataVk::zeroed();
        let mut attribs = Vec::with_capacity(desc.resources.len());

        for res in &desc.resources {
            let set_id = DescriptorSetId::for_var_type(res.var_type);
            let descr_type = DescriptorType::for_resource(res);
            let array_size = u16::try_from(res.array_size).unwrap_or(u16::MAX);
            match descr_type {
                DescriptorType::UniformBufferDynamic => {
                    internal.dynamic_uniform_buffer_count =
                        internal.dynamic_uniform_buffer_count.saturating_add(array_size);
                }
                DescriptorType::StorageBufferDynamic => {
                    internal.dynamic_storage_buffer_count =
                        internal.dynamic_storage_buffer_count.saturating_add(array_size);
                }
                _ => {}
            }

            attribs.push(ResourceAttribsVk {
                binding_index: bindings[set_id as usize],
                descr_set: physical_set(set_id),
                descr_type: descr_type as u8,
                _padding: [0; 2],
            });
            bindings[set_id as usize] += 1;
            sizes[set_id as usize] += res.array_size;
        }

        for id in DescriptorSetId::ALL {
            internal.descriptor_set_sizes[id as usize] = if used[id as usize] { sizes[id as usize] } else { UNUSED_SET };
        }
        log::debug!(
            "Vulkan layout of '{}': set sizes {:?}",
            desc.name,
            internal.descriptor_set_sizes
        );
        Ok((attribs, internal))
    }

    fn native_binding(attribs: &ResourceAttribsVk, _stage: ShaderStages) -> Option<NativeBinding> {
        Some(NativeBinding {
            register: attribs.binding_index,
            space: u32::from(attribs.descr_set),
        })
    }

    fn binding_group_count(internal: &InternalDataVk) -> u32 {
        internal
            .descriptor_set_sizes
            .iter()
            .filter(|&&size| size != UNUSED_SET)
            .count() as u32
    }
}

impl PipelineResourceSignature<VulkanBackend> {
    /// Number of descriptors in a logical set, or `None` if the set is unused.
    #[must_use]
    pub fn descriptor_set_size(&self, id: DescriptorSetId) -> Option<u32> {
        let size = self.internal_data().descriptor_set_sizes[id as usize];
        (size != UNUSED_SET).then_some(size)
    }

    /// Number of descriptor sets the signature contributes to a pipeline layout.
    #[must_use]
    pub fn num_descriptor_sets(&self) -> u32 {
        VulkanBackend::binding_group_count(self.internal_data())
    }

    #[must_use]
    pub fn dynamic_offset_count(&self) -> u32 {
        let internal = self.internal_data();
        u32::from(internal.dynamic_uniform_buffer_count) + u32::from(internal.dynamic_storage_buffer_count)
    }

    /// Descriptor type of resource `index`.
    pub fn descriptor_type(&self, index: usize) -> Result<DescriptorType> {
        let attribs = self
            .resource_attribs(index)
            .ok_or_else(|| BinderyError::InvalidDescription(format!("resource index {index} is out of range")))?;
        DescriptorType::try_from(attribs.descr_type)
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::types::ShaderResourceVariableType as V;

    use super::*;

    fn res(name: &str, ty: ShaderResourceType, var: V) -> PipelineResourceDesc {
        PipelineResourceDesc::new(name, ShaderStages::VERTEX | ShaderStages::PIXEL, 1, ty, var)
    }

    fn layout(desc: &PipelineResourceSignatureDesc) -> (Vec<ResourceAttribsVk>, InternalDataVk) {
        VulkanBackend::compute_layout(desc, &CacheLayout::compute(desc)).unwrap()
    }

    #[test]
    fn two_sets_when_both_classes_are_used() {
        let desc = PipelineResourceSignatureDesc::new("sig")
            .with_resource(res("a", ShaderResourceType::ConstantBuffer, V::Dynamic))
            .with_resource(res("b", ShaderResourceType::TextureSrv, V::Static))
            .with_resource(res("c", ShaderResourceType::TextureSrv, V::Mutable))
            .with_resource(res("d", ShaderResourceType::BufferUav, V::Dynamic));
        let (attribs, internal) = layout(&desc);

        let placed: Vec<(u8, u32)> = attribs.iter().map(|a| (a.descr_set, a.binding_index)).collect();
        assert_eq!(placed, vec![(1, 0), (0, 0), (0, 1), (1, 1)]);
        assert_eq!(internal.descriptor_set_sizes, [2, 2]);
        assert_eq!(VulkanBackend::binding_group_count(&internal), 2);
    }

    #[test]
    fn dynamic_only_signature_uses_set_zero() {
        let desc =
            PipelineResourceSignatureDesc::new("sig").with_resource(res("a", ShaderResourceType::ConstantBuffer, V::Dynamic));
        let (attribs, internal) = layout(&desc);
        assert_eq!(attribs[0].descr_set, 0);
        assert_eq!(internal.descriptor_set_sizes, [UNUSED_SET, 1]);
        assert_eq!(VulkanBackend::binding_group_count(&internal), 1);
        assert_eq!(internal.dynamic_uniform_buffer_count, 1);
    }

    #[test]
    fn descriptor_types_follow_flags() {
        let ub = res("ub", ShaderResourceType::ConstantBuffer, V::Mutable)
            .with_flags(PipelineResourceFlags::NO_DYNAMIC_BUFFERS);
        assert_eq!(DescriptorType::for_resource(&ub), DescriptorType::UniformBuffer);
        let tb = res("tb", ShaderResourceType::BufferSrv, V::Mutable).with_flags(PipelineResourceFlags::FORMATTED_BUFFER);
        assert_eq!(DescriptorType::for_resource(&tb), DescriptorType::UniformTexelBuffer);
        let tex = res("t", ShaderResourceType::TextureSrv, V::Mutable).with_flags(PipelineResourceFlags::COMBINED_SAMPLER);
        assert_eq!(DescriptorType::for_resource(&tex), DescriptorType::CombinedImageSampler);
    }
}
