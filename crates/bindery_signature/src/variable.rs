//! Shader variable managers.
//!
//! A [`ShaderVariableManager`] lists the variables one shader stage sees in
//! one cache. Variables are stored in a single boxed slice, partitioned into
//! four sections by [`BindingRange`]:
//!
//! ```text
//! 0            texture_offset   image_offset   storage_buffer_offset   len
//! | uniform bufs | textures      | images       | storage buffers      |
//! ```
//!
//! The count of each kind is the distance between adjacent offsets. Within a
//! section variables keep declaration order.
//!
//! The manager itself holds no references; [`ShaderVariables`] pairs it with
//! the signature data and a cache to expose the binding API.

use std::ops::DerefMut;
use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::object::{DeviceObjectKind, DeviceObjectRef, ResourceMapping};
use bindery_core::types::{BindingRange, PipelineResourceFlags, ShaderResourceType, ShaderResourceVariableType, ShaderStages};
use bitflags::bitflags;

use crate::desc::PipelineResourceDesc;
use crate::layout::{CacheAttribs, CacheKind};
use crate::resource_cache::ShaderResourceCache;

bitflags! {
    /// Controls [`ShaderVariables::bind_resources`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BindShaderResourcesFlags: u32 {
        const UPDATE_STATIC       = 1 << 0;
        const UPDATE_MUTABLE      = 1 << 1;
        const UPDATE_DYNAMIC      = 1 << 2;
        const UPDATE_ALL          = Self::UPDATE_STATIC.bits() | Self::UPDATE_MUTABLE.bits() | Self::UPDATE_DYNAMIC.bits();
        /// Leave already bound elements untouched.
        const KEEP_EXISTING       = 1 << 3;
        /// Fail if an element is neither bound nor found in the mapping.
        const VERIFY_ALL_RESOLVED = 1 << 4;
    }
}

impl BindShaderResourcesFlags {
    /// Whether variables of `var_type` are updated. No update bits means all.
    #[must_use]
    pub fn updates(self, var_type: ShaderResourceVariableType) -> bool {
        let update = self & Self::UPDATE_ALL;
        if update.is_empty() {
            return true;
        }
        update.contains(match var_type {
            ShaderResourceVariableType::Static => Self::UPDATE_STATIC,
            ShaderResourceVariableType::Mutable => Self::UPDATE_MUTABLE,
            ShaderResourceVariableType::Dynamic => Self::UPDATE_DYNAMIC,
        })
    }
}

// ============================================================================
// Variable Kinds
// ============================================================================

/// The four flavors of shader variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariableKind {
    UniformBuffer,
    /// Sampled texture, or a formatted buffer read through a texture unit.
    Texture { is_texture_view: bool },
    /// Storage image, or a formatted buffer written through an image unit.
    Image { is_texture_view: bool },
    StorageBuffer,
}

impl ShaderVariableKind {
    #[must_use]
    pub fn for_resource(res: &PipelineResourceDesc) -> Option<Self> {
        let is_texture_view = !matches!(
            res.resource_type,
            ShaderResourceType::BufferSrv | ShaderResourceType::BufferUav
        );
        Some(match BindingRange::from_resource(res.resource_type, res.flags)? {
            BindingRange::UniformBuffer => Self::UniformBuffer,
            BindingRange::Texture => Self::Texture { is_texture_view },
            BindingRange::Image => Self::Image { is_texture_view },
            BindingRange::StorageBuffer => Self::StorageBuffer,
        })
    }

    #[must_use]
    pub fn range(self) -> BindingRange {
        match self {
            Self::UniformBuffer => BindingRange::UniformBuffer,
            Self::Texture { .. } => BindingRange::Texture,
            Self::Image { .. } => BindingRange::Image,
            Self::StorageBuffer => BindingRange::StorageBuffer,
        }
    }
}

// ============================================================================
// Variable Manager
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VariableSlot {
    resource_index: u32,
    kind: ShaderVariableKind,
}

/// Variables of one shader stage over one cache.
#[derive(Debug, Clone)]
pub struct ShaderVariableManager {
    stage: ShaderStages,
    cache_kind: CacheKind,
    variables: Box<[VariableSlot]>,
    texture_offset: u32,
    image_offset: u32,
    storage_buffer_offset: u32,
}

impl ShaderVariableManager {
    /// Collects the resources visible in `stage` whose variable type is in
    /// `allowed_var_types`. Samplers never become variables.
    #[must_use]
    pub fn new(
        stage: ShaderStages,
        cache_kind: CacheKind,
        resources: &[PipelineResourceDesc],
        allowed_var_types: &[ShaderResourceVariableType],
    ) -> Self {
        let mut sections: [Vec<VariableSlot>; BindingRange::COUNT] = Default::default();
        for (index, res) in resources.iter().enumerate() {
            if !res.shader_stages.intersects(stage) || !allowed_var_types.contains(&res.var_type) {
                continue;
            }
            if let Some(kind) = ShaderVariableKind::for_resource(res) {
                sections[kind.range() as usize].push(VariableSlot {
                    resource_index: index as u32,
                    kind,
                });
            }
        }

        let texture_offset = sections[0].len() as u32;
        let image_offset = texture_offset + sections[1].len() as u32;
        let storage_buffer_offset = image_offset + sections[2].len() as u32;
        let variables: Box<[VariableSlot]> = sections.into_iter().flatten().collect();

        log::debug!(
            "Variable manager for {} stage: {} variable(s)",
            stage.stage_name(),
            variables.len()
        );
        Self {
            stage,
            cache_kind,
            variables,
            texture_offset,
            image_offset,
            storage_buffer_offset,
        }
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> ShaderStages {
        self.stage
    }

    #[inline]
    #[must_use]
    pub fn cache_kind(&self) -> CacheKind {
        self.cache_kind
    }

    #[inline]
    #[must_use]
    pub fn variable_count(&self) -> u32 {
        self.variables.len() as u32
    }

    #[must_use]
    pub fn num_ubs(&self) -> u32 {
        self.texture_offset
    }

    #[must_use]
    pub fn num_textures(&self) -> u32 {
        self.image_offset - self.texture_offset
    }

    #[must_use]
    pub fn num_images(&self) -> u32 {
        self.storage_buffer_offset - self.image_offset
    }

    #[must_use]
    pub fn num_storage_buffers(&self) -> u32 {
        self.variable_count() - self.storage_buffer_offset
    }

    /// Section boundaries `[ub, texture, image, storage_buffer, end]`.
    #[must_use]
    pub fn offsets(&self) -> [u32; 5] {
        [
            0,
            self.texture_offset,
            self.image_offset,
            self.storage_buffer_offset,
            self.variable_count(),
        ]
    }

    /// Resource index of variable `index`.
    #[inline]
    #[must_use]
    pub fn resource_index(&self, index: u32) -> Option<usize> {
        self.variables.get(index as usize).map(|v| v.resource_index as usize)
    }

    /// Variable index of `name`, scanning from the back.
    #[must_use]
    pub fn variable_index(&self, resources: &[PipelineResourceDesc], name: &str) -> Option<u32> {
        self.variables
            .iter()
            .rposition(|v| resources[v.resource_index as usize].name == name)
            .map(|i| i as u32)
    }
}

// ============================================================================
// Variable Access
// ============================================================================

/// A manager bound to its signature data and a cache.
///
/// `C` is `&mut ShaderResourceCache` for SRBs and a mutex guard for the
/// signature's static cache.
pub struct ShaderVariables<'a, C: DerefMut<Target = ShaderResourceCache>> {
    manager: &'a ShaderVariableManager,
    resources: &'a [PipelineResourceDesc],
    cache_attribs: &'a [CacheAttribs],
    cache: C,
}

impl<'a, C: DerefMut<Target = ShaderResourceCache>> ShaderVariables<'a, C> {
    pub(crate) fn new(
        manager: &'a ShaderVariableManager,
        resources: &'a [PipelineResourceDesc],
        cache_attribs: &'a [CacheAttribs],
        cache: C,
    ) -> Self {
        Self {
            manager,
            resources,
            cache_attribs,
            cache,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &ShaderVariableManager {
        self.manager
    }

    #[must_use]
    pub fn cache(&self) -> &ShaderResourceCache {
        &*self.cache
    }

    #[must_use]
    pub fn variable_count(&self) -> u32 {
        self.manager.variable_count()
    }

    pub fn variable_by_index(&mut self, index: u32) -> Option<ShaderVariable<'_>> {
        let slot = *self.manager.variables.get(index as usize)?;
        let res_index = slot.resource_index as usize;
        Some(ShaderVariable {
            desc: &self.resources[res_index],
            attribs: &self.cache_attribs[res_index],
            kind: slot.kind,
            index,
            cache_kind: self.manager.cache_kind,
            cache: &mut *self.cache,
        })
    }

    pub fn variable_by_name(&mut self, name: &str) -> Option<ShaderVariable<'_>> {
        let index = self.manager.variable_index(self.resources, name)?;
        self.variable_by_index(index)
    }

    /// Binds every variable allowed by `flags` from `mapping`.
    ///
    /// All variables are processed; the first error is returned.
    pub fn bind_resources(&mut self, mapping: &ResourceMapping, flags: BindShaderResourcesFlags) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.variable_count() {
            let Some(mut var) = self.variable_by_index(index) else {
                continue;
            };
            if !flags.updates(var.desc.var_type) {
                continue;
            }
            if let Err(err) = var.bind_from_mapping(mapping, flags) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<'a> ShaderVariables<'a, &'a mut ShaderResourceCache> {
    /// Like [`Self::variable_by_index`], keeping the full cache borrow.
    pub fn into_variable_by_index(self, index: u32) -> Option<ShaderVariable<'a>> {
        let slot = *self.manager.variables.get(index as usize)?;
        let res_index = slot.resource_index as usize;
        Some(ShaderVariable {
            desc: &self.resources[res_index],
            attribs: &self.cache_attribs[res_index],
            kind: slot.kind,
            index,
            cache_kind: self.manager.cache_kind,
            cache: self.cache,
        })
    }

    pub fn into_variable_by_name(self, name: &str) -> Option<ShaderVariable<'a>> {
        let index = self.manager.variable_index(self.resources, name)?;
        self.into_variable_by_index(index)
    }
}

/// Handle to one variable, borrowed from [`ShaderVariables`].
pub struct ShaderVariable<'a> {
    desc: &'a PipelineResourceDesc,
    attribs: &'a CacheAttribs,
    kind: ShaderVariableKind,
    index: u32,
    cache_kind: CacheKind,
    cache: &'a mut ShaderResourceCache,
}

impl ShaderVariable<'_> {
    #[inline]
    #[must_use]
    pub fn desc(&self) -> &PipelineResourceDesc {
        self.desc
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ShaderVariableKind {
        self.kind
    }

    /// Index of the variable in its manager.
    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub fn var_type(&self) -> ShaderResourceVariableType {
        self.desc.var_type
    }

    /// Binds element 0.
    pub fn set(&mut self, object: &DeviceObjectRef) -> Result<()> {
        self.set_array(std::slice::from_ref(object), 0)
    }

    /// Binds `objects` to elements `first_element..first_element + objects.len()`.
    ///
    /// The range is validated up front and nothing is bound if it exceeds the
    /// array. Elements are then bound independently: an incompatible object
    /// does not prevent the others from being bound, and the first error is
    /// returned.
    pub fn set_array(&mut self, objects: &[DeviceObjectRef], first_element: u32) -> Result<()> {
        let count = u32::try_from(objects.len()).unwrap_or(u32::MAX);
        if first_element.checked_add(count).is_none_or(|end| end > self.desc.array_size) {
            return Err(BinderyError::ArrayRangeOutOfBounds {
                name: self.desc.name.clone(),
                first: first_element,
                count,
                array_size: self.desc.array_size,
            });
        }

        let mut first_error = None;
        for (object, array_index) in objects.iter().zip(first_element..) {
            if let Err(err) = self.bind_resource(object, array_index) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether element `array_index` holds an object of the expected flavor.
    #[must_use]
    pub fn is_bound(&self, array_index: u32) -> bool {
        if array_index >= self.desc.array_size {
            return false;
        }
        let offset = self.cache_offset() + array_index;
        match self.kind {
            ShaderVariableKind::Texture { is_texture_view } => self.cache.is_texture_bound(offset, is_texture_view),
            ShaderVariableKind::Image { is_texture_view } => self.cache.is_image_bound(offset, is_texture_view),
            ShaderVariableKind::UniformBuffer | ShaderVariableKind::StorageBuffer => {
                self.cache.is_bound(self.kind.range(), offset)
            }
        }
    }

    /// Object bound to element `array_index`.
    #[must_use]
    pub fn get(&self, array_index: u32) -> Option<&DeviceObjectRef> {
        if array_index >= self.desc.array_size {
            return None;
        }
        self.cache.get(self.kind.range(), self.cache_offset() + array_index)
    }

    #[inline]
    fn cache_offset(&self) -> u32 {
        self.attribs.cache_offset(self.cache_kind)
    }

    fn bind_resource(&mut self, object: &DeviceObjectRef, array_index: u32) -> Result<()> {
        object
            .check_bindable(self.desc.resource_type, self.desc.flags)
            .map_err(|reason| BinderyError::IncompatibleResource {
                name: self.desc.name.clone(),
                array_index,
                reason,
            })?;

        if self.desc.flags.contains(PipelineResourceFlags::COMBINED_SAMPLER)
            && !self.attribs.is_imtbl_sampler_assigned()
            && matches!(object.kind(), DeviceObjectKind::TextureView { has_sampler: false, .. })
        {
            log::warn!(
                "Texture view '{}' bound to combined sampler variable '{}' has no sampler",
                object.name(),
                self.desc.name
            );
        }

        let offset = self.cache_offset() + array_index;
        let previous = self.cache.set(self.kind.range(), offset, Arc::clone(object));
        if let Some(previous) = previous
            && self.desc.var_type != ShaderResourceVariableType::Dynamic
            && previous.id() != object.id()
        {
            log::warn!(
                "Non-dynamic variable '{}'[{array_index}] rebound from {previous} to {object}",
                self.desc.name
            );
        }
        Ok(())
    }

    fn bind_from_mapping(&mut self, mapping: &ResourceMapping, flags: BindShaderResourcesFlags) -> Result<()> {
        let mut first_error = None;
        for array_index in 0..self.desc.array_size {
            if flags.contains(BindShaderResourcesFlags::KEEP_EXISTING) && self.is_bound(array_index) {
                continue;
            }
            let result = match mapping.get(&self.desc.name, array_index) {
                Some(object) => self.bind_resource(object, array_index),
                None if flags.contains(BindShaderResourcesFlags::VERIFY_ALL_RESOLVED) && !self.is_bound(array_index) => {
                    Err(BinderyError::UnresolvedResource {
                        name: self.desc.name.clone(),
                        array_index,
                    })
                }
                None => Ok(()),
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::object::DeviceObject;
    use bindery_core::types::ShaderResourceVariableType as V;

    use super::*;
    use crate::layout::CacheLayout;
    use crate::desc::PipelineResourceSignatureDesc;

    fn signature_desc() -> PipelineResourceSignatureDesc {
        let vp = ShaderStages::VERTEX | ShaderStages::PIXEL;
        PipelineResourceSignatureDesc::new("sig")
            .with_resource(PipelineResourceDesc::new("g_Tex", vp, 4, ShaderResourceType::TextureSrv, V::Mutable))
            .with_resource(PipelineResourceDesc::new("g_CB", vp, 1, ShaderResourceType::ConstantBuffer, V::Mutable))
            .with_resource(PipelineResourceDesc::new(
                "g_Out",
                ShaderStages::PIXEL,
                1,
                ShaderResourceType::BufferUav,
                V::Dynamic,
            ))
            .with_resource(PipelineResourceDesc::new("g_Smp", vp, 1, ShaderResourceType::Sampler, V::Mutable))
    }

    #[test]
    fn sections_are_ordered_by_kind() {
        let desc = signature_desc();
        let mgr = ShaderVariableManager::new(
            ShaderStages::PIXEL,
            CacheKind::Srb,
            &desc.resources,
            &[V::Mutable, V::Dynamic],
        );
        assert_eq!(mgr.offsets(), [0, 1, 2, 2, 3]);
        assert_eq!(mgr.num_ubs(), 1);
        assert_eq!(mgr.num_textures(), 1);
        assert_eq!(mgr.num_images(), 0);
        assert_eq!(mgr.num_storage_buffers(), 1);
        // uniform buffer section comes first even though g_Tex is declared first
        assert_eq!(mgr.resource_index(0), Some(1));
        assert_eq!(mgr.variable_index(&desc.resources, "g_Out"), Some(2));
        assert_eq!(mgr.variable_index(&desc.resources, "g_Smp"), None);
    }

    #[test]
    fn sections_past_u16_keep_their_boundaries() {
        const BUFFERS: usize = u16::MAX as usize + 2;
        let mut resources: Vec<_> = (0..BUFFERS)
            .map(|i| {
                PipelineResourceDesc::new(
                    format!("g_CB{i}"),
                    ShaderStages::PIXEL,
                    1,
                    ShaderResourceType::ConstantBuffer,
                    V::Mutable,
                )
            })
            .collect();
        resources.push(PipelineResourceDesc::new(
            "g_Tex",
            ShaderStages::PIXEL,
            1,
            ShaderResourceType::TextureSrv,
            V::Mutable,
        ));

        let mgr = ShaderVariableManager::new(ShaderStages::PIXEL, CacheKind::Srb, &resources, &[V::Mutable]);
        let ubs = BUFFERS as u32;
        assert_eq!(mgr.offsets(), [0, ubs, ubs + 1, ubs + 1, ubs + 1]);
        assert_eq!(mgr.num_ubs(), ubs);
        assert_eq!(mgr.num_textures(), 1);
        assert_eq!(mgr.variable_index(&resources, "g_Tex"), Some(ubs));
        assert_eq!(mgr.resource_index(ubs), Some(BUFFERS));
    }

    #[test]
    fn stage_and_var_type_filter_variables() {
        let desc = signature_desc();
        let vs = ShaderVariableManager::new(ShaderStages::VERTEX, CacheKind::Srb, &desc.resources, &[V::Mutable, V::Dynamic]);
        assert_eq!(vs.variable_count(), 2);
        let dynamic_only = ShaderVariableManager::new(ShaderStages::PIXEL, CacheKind::Srb, &desc.resources, &[V::Dynamic]);
        assert_eq!(dynamic_only.variable_count(), 1);
    }

    #[test]
    fn set_array_out_of_range_binds_nothing() {
        let desc = signature_desc();
        let layout = CacheLayout::compute(&desc);
        let mgr = ShaderVariableManager::new(ShaderStages::PIXEL, CacheKind::Srb, &desc.resources, &[V::Mutable]);
        let mut cache = ShaderResourceCache::new(CacheKind::Srb, &layout.srb_counters);
        let mut vars = ShaderVariables::new(&mgr, &desc.resources, &layout.attribs, &mut cache);

        let textures: Vec<_> = (0..3).map(|i| DeviceObject::texture_srv(format!("t{i}"))).collect();
        let mut var = vars.variable_by_name("g_Tex").unwrap();
        let err = var.set_array(&textures, 2).unwrap_err();
        assert!(matches!(err, BinderyError::ArrayRangeOutOfBounds { first: 2, count: 3, array_size: 4, .. }));
        assert!((0..4).all(|i| !var.is_bound(i)));
        drop(vars);
        assert_eq!(cache.bound_count(), 0);
    }

    #[test]
    fn incompatible_element_does_not_block_the_rest() {
        let desc = signature_desc();
        let layout = CacheLayout::compute(&desc);
        let mgr = ShaderVariableManager::new(ShaderStages::PIXEL, CacheKind::Srb, &desc.resources, &[V::Mutable]);
        let mut cache = ShaderResourceCache::new(CacheKind::Srb, &layout.srb_counters);
        let mut vars = ShaderVariables::new(&mgr, &desc.resources, &layout.attribs, &mut cache);

        let objects = vec![
            DeviceObject::texture_srv("t0"),
            DeviceObject::uniform_buffer("wrong"),
            DeviceObject::texture_srv("t2"),
        ];
        let mut var = vars.variable_by_name("g_Tex").unwrap();
        let err = var.set_array(&objects, 0).unwrap_err();
        assert!(matches!(err, BinderyError::IncompatibleResource { array_index: 1, .. }));
        assert!(var.is_bound(0));
        assert!(!var.is_bound(1));
        assert!(var.is_bound(2));
    }

    #[test]
    fn bind_resources_honors_flags() {
        let desc = signature_desc();
        let layout = CacheLayout::compute(&desc);
        let mgr = ShaderVariableManager::new(ShaderStages::PIXEL, CacheKind::Srb, &desc.resources, &[V::Mutable, V::Dynamic]);
        let mut cache = ShaderResourceCache::new(CacheKind::Srb, &layout.srb_counters);
        let mut vars = ShaderVariables::new(&mgr, &desc.resources, &layout.attribs, &mut cache);

        let mut mapping = ResourceMapping::new();
        mapping.add_resource("g_CB", DeviceObject::uniform_buffer("cb"));
        mapping.add_resource(
            "g_Out",
            DeviceObject::buffer_view("out", bindery_core::object::ViewType::UnorderedAccess, false),
        );

        vars.bind_resources(&mapping, BindShaderResourcesFlags::UPDATE_MUTABLE).unwrap();
        assert!(vars.variable_by_name("g_CB").unwrap().is_bound(0));
        assert!(!vars.variable_by_name("g_Out").unwrap().is_bound(0));

        let err = vars
            .bind_resources(
                &mapping,
                BindShaderResourcesFlags::UPDATE_ALL | BindShaderResourcesFlags::VERIFY_ALL_RESOLVED,
            )
            .unwrap_err();
        assert!(matches!(err, BinderyError::UnresolvedResource { ref name, array_index: 0 } if name == "g_Tex"));
        assert!(vars.variable_by_name("g_Out").unwrap().is_bound(0));
    }

    #[test]
    fn keep_existing_preserves_bindings() {
        let desc = signature_desc();
        let layout = CacheLayout::compute(&desc);
        let mgr = ShaderVariableManager::new(ShaderStages::PIXEL, CacheKind::Srb, &desc.resources, &[V::Mutable]);
        let mut cache = ShaderResourceCache::new(CacheKind::Srb, &layout.srb_counters);
        let mut vars = ShaderVariables::new(&mgr, &desc.resources, &layout.attribs, &mut cache);

        let original = DeviceObject::uniform_buffer("original");
        vars.variable_by_name("g_CB").unwrap().set(&original).unwrap();

        let mut mapping = ResourceMapping::new();
        mapping.add_resource("g_CB", DeviceObject::uniform_buffer("replacement"));
        vars.bind_resources(&mapping, BindShaderResourcesFlags::KEEP_EXISTING).unwrap();

        let var = vars.variable_by_name("g_CB").unwrap();
        assert_eq!(var.get(0).map(|o| o.id()), Some(original.id()));
    }
}
