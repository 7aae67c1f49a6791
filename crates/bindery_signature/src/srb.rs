//! Shader resource bindings.
//!
//! An SRB owns the resource cache for one set of mutable and dynamic
//! bindings of a signature, plus a copy of the static bindings made by
//! [`PipelineResourceSignature::initialize_static_srb_resources`]. SRBs are
//! not synchronized; every mutating method takes `&mut self`.

use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::object::ResourceMapping;
use bindery_core::types::{PipelineResourceFlags, ShaderResourceVariableType, ShaderStages};
use smallvec::SmallVec;

use crate::backend::SignatureBackend;
use crate::layout::CacheKind;
use crate::resource_cache::ShaderResourceCache;
use crate::signature::PipelineResourceSignature;
use crate::variable::{BindShaderResourcesFlags, ShaderVariable, ShaderVariableManager, ShaderVariables};

const SRB_VAR_TYPES: [ShaderResourceVariableType; 2] =
    [ShaderResourceVariableType::Mutable, ShaderResourceVariableType::Dynamic];

pub struct ShaderResourceBinding<B: SignatureBackend> {
    signature: Arc<PipelineResourceSignature<B>>,
    cache: ShaderResourceCache,
    managers: SmallVec<[ShaderVariableManager; 2]>,
    static_resources_initialized: bool,
}

impl<B: SignatureBackend> ShaderResourceBinding<B> {
    pub(crate) fn new(signature: Arc<PipelineResourceSignature<B>>) -> Self {
        let cache = ShaderResourceCache::new(CacheKind::Srb, &signature.cache_layout().srb_counters);
        let managers = signature
            .shader_stages()
            .stages()
            .map(|stage| ShaderVariableManager::new(stage, CacheKind::Srb, &signature.desc().resources, &SRB_VAR_TYPES))
            .collect();
        Self {
            signature,
            cache,
            managers,
            static_resources_initialized: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn signature(&self) -> &Arc<PipelineResourceSignature<B>> {
        &self.signature
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ShaderResourceCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut ShaderResourceCache {
        &mut self.cache
    }

    #[inline]
    #[must_use]
    pub fn static_resources_initialized(&self) -> bool {
        self.static_resources_initialized
    }

    pub(crate) fn mark_static_resources_initialized(&mut self) {
        self.static_resources_initialized = true;
    }

    /// Variable manager of a single `stage`.
    #[must_use]
    pub fn manager(&self, stage: ShaderStages) -> Option<&ShaderVariableManager> {
        self.managers.iter().find(|m| m.stage() == stage)
    }

    /// Mutable and dynamic variables of a single `stage`.
    pub fn variables(&mut self, stage: ShaderStages) -> Option<ShaderVariables<'_, &mut ShaderResourceCache>> {
        let manager = self.managers.iter().find(|m| m.stage() == stage)?;
        Some(ShaderVariables::new(
            manager,
            &self.signature.desc().resources,
            &self.signature.cache_layout().attribs,
            &mut self.cache,
        ))
    }

    #[must_use]
    pub fn variable_count(&self, stage: ShaderStages) -> u32 {
        self.manager(stage).map_or(0, ShaderVariableManager::variable_count)
    }

    pub fn variable_by_name(&mut self, stage: ShaderStages, name: &str) -> Option<ShaderVariable<'_>> {
        self.variables(stage)?.into_variable_by_name(name)
    }

    pub fn variable_by_index(&mut self, stage: ShaderStages, index: u32) -> Option<ShaderVariable<'_>> {
        self.variables(stage)?.into_variable_by_index(index)
    }

    /// Binds the variables of every stage in `stages` from `mapping`.
    pub fn bind_resources(
        &mut self,
        stages: ShaderStages,
        mapping: &ResourceMapping,
        flags: BindShaderResourcesFlags,
    ) -> Result<()> {
        let mut first_error = None;
        for manager in self.managers.iter().filter(|m| stages.intersects(m.stage())) {
            let mut vars = ShaderVariables::new(
                manager,
                &self.signature.desc().resources,
                &self.signature.cache_layout().attribs,
                &mut self.cache,
            );
            if let Err(err) = vars.bind_resources(mapping, flags) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Checks that every element of every resource visible in `active_stages`
    /// is bound. Run before a draw or dispatch.
    ///
    /// Reports the first unbound element in declaration order. Runtime-sized
    /// arrays are skipped because only a prefix of them may be in use.
    pub fn validate(&self, active_stages: ShaderStages) -> Result<()> {
        let desc = self.signature.desc();
        for (res, attr) in desc.resources.iter().zip(&self.signature.cache_layout().attribs) {
            if !res.shader_stages.intersects(active_stages) || res.flags.contains(PipelineResourceFlags::RUNTIME_ARRAY) {
                continue;
            }
            let Some(range) = attr.binding_range() else {
                continue;
            };
            if let Some(array_index) =
                (0..res.array_size).find(|&i| !self.cache.is_bound(range, attr.srb_cache_offset + i))
            {
                return Err(BinderyError::UnboundResource {
                    name: res.name.clone(),
                    array_index,
                    stages: res.shader_stages & active_stages,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::object::DeviceObject;
    use bindery_core::types::{ShaderResourceType, ShaderResourceVariableType as V};

    use super::*;
    use crate::backend::VulkanBackend;
    use crate::desc::{PipelineResourceDesc, PipelineResourceSignatureDesc};

    fn signature() -> Arc<PipelineResourceSignature<VulkanBackend>> {
        let desc = PipelineResourceSignatureDesc::new("sig")
            .with_resource(PipelineResourceDesc::new(
                "g_Static",
                ShaderStages::VERTEX,
                1,
                ShaderResourceType::ConstantBuffer,
                V::Static,
            ))
            .with_resource(PipelineResourceDesc::new(
                "g_Tex",
                ShaderStages::PIXEL,
                2,
                ShaderResourceType::TextureSrv,
                V::Mutable,
            ))
            .with_resource(PipelineResourceDesc::new(
                "g_Dyn",
                ShaderStages::PIXEL,
                1,
                ShaderResourceType::ConstantBuffer,
                V::Dynamic,
            ));
        Arc::new(PipelineResourceSignature::new(desc, ShaderStages::empty()).unwrap())
    }

    #[test]
    fn srb_exposes_mutable_and_dynamic_variables_only() {
        let sig = signature();
        let mut srb = sig.create_shader_resource_binding(false).unwrap();
        assert_eq!(srb.variable_count(ShaderStages::VERTEX), 0);
        assert_eq!(srb.variable_count(ShaderStages::PIXEL), 2);
        assert!(srb.variable_by_name(ShaderStages::VERTEX, "g_Static").is_none());
        assert!(srb.variable_by_name(ShaderStages::PIXEL, "g_Dyn").is_some());
        assert!(srb.variable_by_index(ShaderStages::PIXEL, 2).is_none());
    }

    #[test]
    fn validate_reports_first_unbound_element() {
        let sig = signature();
        let mut srb = sig.create_shader_resource_binding(false).unwrap();
        srb.variable_by_name(ShaderStages::PIXEL, "g_Tex")
            .unwrap()
            .set(&DeviceObject::texture_srv("t0"))
            .unwrap();
        srb.variable_by_name(ShaderStages::PIXEL, "g_Dyn")
            .unwrap()
            .set(&DeviceObject::uniform_buffer("dyn"))
            .unwrap();

        let err = srb.validate(ShaderStages::PIXEL).unwrap_err();
        assert!(matches!(err, BinderyError::UnboundResource { ref name, array_index: 1, .. } if name == "g_Tex"));

        srb.variable_by_name(ShaderStages::PIXEL, "g_Tex")
            .unwrap()
            .set_array(&[DeviceObject::texture_srv("t1")], 1)
            .unwrap();
        assert!(srb.validate(ShaderStages::PIXEL).is_ok());

        // the static buffer was never initialized
        let err = srb.validate(ShaderStages::VERTEX | ShaderStages::PIXEL).unwrap_err();
        assert!(matches!(err, BinderyError::UnboundResource { ref name, stages, .. }
            if name == "g_Static" && stages == ShaderStages::VERTEX));
    }

    #[test]
    fn bind_resources_touches_requested_stages_only() {
        let sig = signature();
        let mut srb = sig.create_shader_resource_binding(false).unwrap();
        let mut mapping = ResourceMapping::new();
        mapping.add_resource("g_Dyn", DeviceObject::uniform_buffer("dyn"));

        srb.bind_resources(ShaderStages::VERTEX, &mapping, BindShaderResourcesFlags::UPDATE_ALL).unwrap();
        assert!(!srb.variable_by_name(ShaderStages::PIXEL, "g_Dyn").unwrap().is_bound(0));

        srb.bind_resources(ShaderStages::PIXEL, &mapping, BindShaderResourcesFlags::UPDATE_DYNAMIC).unwrap();
        assert!(srb.variable_by_name(ShaderStages::PIXEL, "g_Dyn").unwrap().is_bound(0));
    }
}
