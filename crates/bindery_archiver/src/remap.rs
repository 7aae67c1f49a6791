//! Shader resource remapping.
//!
//! Before a pipeline is archived for a backend, its signatures are placed at
//! their binding indices and every shader's resources are resolved against
//! them. Vulkan SPIR-V gets its `Binding` / `DescriptorSet` decorations
//! rewritten to the final pipeline layout. Other backends keep their byte
//! code and only have the shader reflection verified.
//!
//! Each signature's descriptor sets (Vulkan) or register spaces (D3D12)
//! follow those of all signatures with a lower binding index.

use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{MAX_RESOURCE_SIGNATURES, PipelineResourceFlags, ShaderResourceType, ShaderStages};
use bindery_signature::backend::SignatureBackend;
use bindery_signature::signature::{PipelineResourceSignature, ResourceLookup};

use crate::serializable_signature::SerializableResourceSignature;
use crate::shader::{SerializableShader, ShaderByteCode, ShaderResourceDesc};
use crate::spirv;

/// Signatures of one backend indexed by binding index.
pub type SignatureArray<B> = [Option<Arc<PipelineResourceSignature<B>>>; MAX_RESOURCE_SIGNATURES];

/// Runs `$body` with `$backend` aliased to the marker type of `$kind`.
macro_rules! with_backend {
    ($kind:expr, $backend:ident => $body:expr) => {
        match $kind {
            ::bindery_core::types::BackendKind::Direct3D11 => {
                type $backend = ::bindery_signature::backend::D3D11Backend;
                $body
            }
            ::bindery_core::types::BackendKind::Direct3D12 => {
                type $backend = ::bindery_signature::backend::D3D12Backend;
                $body
            }
            ::bindery_core::types::BackendKind::OpenGl => {
                type $backend = ::bindery_signature::backend::GlBackend;
                $body
            }
            ::bindery_core::types::BackendKind::Vulkan => {
                type $backend = ::bindery_signature::backend::VulkanBackend;
                $body
            }
            ::bindery_core::types::BackendKind::Metal => {
                type $backend = ::bindery_signature::backend::MetalBackend;
                $body
            }
        }
    };
}
pub(crate) use with_backend;

// ============================================================================
// Signature placement
// ============================================================================

/// Places the backend `B` signatures of `signatures` at their binding
/// indices. Returns the array and the number of used slots (highest binding
/// index + 1).
pub fn sort_resource_signatures<B: SignatureBackend>(
    pipeline: &str,
    signatures: &[Arc<SerializableResourceSignature>],
) -> Result<(SignatureArray<B>, usize)> {
    let mut sorted: SignatureArray<B> = Default::default();
    let mut count = 0;
    for signature in signatures {
        let index = usize::from(signature.binding_index());
        let slot = sorted.get_mut(index).ok_or_else(|| BinderyError::BindingIndexOutOfRange {
            signature: signature.name().to_owned(),
            index: u32::from(signature.binding_index()),
            max: MAX_RESOURCE_SIGNATURES as u32 - 1,
        })?;
        if let Some(existing) = slot {
            return Err(BinderyError::BindingIndexCollision {
                pipeline: pipeline.to_owned(),
                first: existing.name().to_owned(),
                second: signature.name().to_owned(),
                index: index as u32,
            });
        }
        let device_signature = signature.device_signature::<B>().ok_or_else(|| {
            BinderyError::InvalidDescription(format!(
                "Signature '{}' used by pipeline '{pipeline}' has no {} data",
                signature.name(),
                B::KIND
            ))
        })?;
        *slot = Some(device_signature);
        count = count.max(index + 1);
    }
    Ok((sorted, count))
}

/// First descriptor set / register space of every signature and the total
/// number used by the pipeline.
#[must_use]
pub fn binding_group_bases<B: SignatureBackend>(signatures: &SignatureArray<B>) -> ([u32; MAX_RESOURCE_SIGNATURES], u32) {
    let mut bases = [0u32; MAX_RESOURCE_SIGNATURES];
    let mut total = 0;
    for (base, signature) in bases.iter_mut().zip(signatures) {
        if let Some(signature) = signature {
            *base = total;
            total += signature.binding_group_count();
        }
    }
    (bases, total)
}

// ============================================================================
// Resolution
// ============================================================================

/// What a shader resource name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedResource {
    /// Resource `resource_index` of the signature at `binding_index`.
    Resource { binding_index: usize, resource_index: usize },
    /// A sampler covered by an immutable sampler of the signature at
    /// `binding_index`, with no resource of its own.
    ImmutableSampler { binding_index: usize },
}

/// Signatures of one backend prepared for remapping a pipeline.
#[derive(Debug)]
pub struct PipelineLayout<B: SignatureBackend> {
    pipeline: String,
    signatures: SignatureArray<B>,
    bases: [u32; MAX_RESOURCE_SIGNATURES],
    binding_group_count: u32,
}

impl<B: SignatureBackend> PipelineLayout<B> {
    pub fn new(pipeline: &str, signatures: &[Arc<SerializableResourceSignature>]) -> Result<Self> {
        let (signatures, _) = sort_resource_signatures::<B>(pipeline, signatures)?;
        let (bases, binding_group_count) = binding_group_bases(&signatures);
        Ok(Self {
            pipeline: pipeline.to_owned(),
            signatures,
            bases,
            binding_group_count,
        })
    }

    #[must_use]
    pub fn signatures(&self) -> &SignatureArray<B> {
        &self.signatures
    }

    /// Base descriptor set / register space of the signature at `binding_index`.
    #[must_use]
    pub fn base(&self, binding_index: usize) -> u32 {
        self.bases[binding_index]
    }

    #[must_use]
    pub fn binding_group_count(&self) -> u32 {
        self.binding_group_count
    }

    fn remap_error(&self, shader: &str, reason: String) -> BinderyError {
        BinderyError::Remap {
            shader: shader.to_owned(),
            reason: format!("{reason} (pipeline '{}', {})", self.pipeline, B::KIND),
        }
    }

    fn signatures_in_order(&self) -> impl Iterator<Item = (usize, &Arc<PipelineResourceSignature<B>>)> {
        self.signatures
            .iter()
            .enumerate()
            .filter_map(|(index, signature)| signature.as_ref().map(|s| (index, s)))
    }

    /// Resolves `name` as seen from `stage` of `shader`.
    pub fn resolve(&self, shader: &str, name: &str, stage: ShaderStages) -> Result<ResolvedResource> {
        let mut hidden_in = None;
        for (binding_index, signature) in self.signatures_in_order() {
            match signature.find_resource(name, stage) {
                ResourceLookup::Visible(resource_index) => {
                    return Ok(ResolvedResource::Resource {
                        binding_index,
                        resource_index,
                    });
                }
                ResourceLookup::NotVisible(_) => {
                    hidden_in.get_or_insert(signature.name());
                }
                ResourceLookup::NotDeclared => {}
            }
        }

        if let Some((binding_index, _)) = self
            .signatures_in_order()
            .find(|(_, signature)| has_immutable_sampler(signature, name, stage))
        {
            return Ok(ResolvedResource::ImmutableSampler { binding_index });
        }

        let reason = match hidden_in {
            Some(signature) => format!(
                "resource '{name}' is declared in signature '{signature}' but is not visible in the {} stage",
                stage.stage_name()
            ),
            None => format!("resource '{name}' is not declared in any signature"),
        };
        Err(self.remap_error(shader, reason))
    }

    /// Checks every reflected resource of `shader` against the signatures.
    pub fn verify_reflection(&self, shader: &SerializableShader) -> Result<()> {
        for reflected in shader.resources() {
            match self.resolve(shader.name(), &reflected.name, shader.stage())? {
                ResolvedResource::Resource {
                    binding_index,
                    resource_index,
                } => {
                    let declared = self.signatures[binding_index]
                        .as_ref()
                        .and_then(|s| s.resource_desc(resource_index));
                    if let Some(declared) = declared
                        && let Err(reason) = check_declaration(reflected, declared.resource_type, declared.array_size, declared.flags)
                    {
                        return Err(self.remap_error(shader.name(), reason));
                    }
                }
                ResolvedResource::ImmutableSampler { .. } => {
                    if reflected.resource_type != ShaderResourceType::Sampler {
                        return Err(self.remap_error(
                            shader.name(),
                            format!("resource '{}' only matches an immutable sampler", reflected.name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrites (or, with `verify_only`, checks) the bindings of a SPIR-V
    /// module.
    pub fn remap_spirv(&self, shader: &str, stage: ShaderStages, words: &[u32], verify_only: bool) -> Result<Vec<u32>> {
        let mut patched = words.to_vec();
        for binding in spirv::resource_bindings(words)? {
            let Some(name) = binding.name.as_deref() else {
                return Err(self.remap_error(
                    shader,
                    format!("resource at binding {} has no name", binding.binding),
                ));
            };
            let (binding_index, resource_index) = match self.resolve(shader, name, stage)? {
                ResolvedResource::Resource {
                    binding_index,
                    resource_index,
                } => (binding_index, resource_index),
                ResolvedResource::ImmutableSampler { .. } => {
                    log::debug!("Sampler '{name}' of shader '{shader}' is immutable; binding left unchanged");
                    continue;
                }
            };
            let native = self.signatures[binding_index]
                .as_ref()
                .and_then(|s| s.native_binding(resource_index, stage))
                .ok_or_else(|| self.remap_error(shader, format!("resource '{name}' has no binding")))?;
            let set = self.bases[binding_index] + native.space;

            if verify_only {
                if binding.binding != native.register || binding.descriptor_set.unwrap_or(0) != set {
                    return Err(self.remap_error(
                        shader,
                        format!(
                            "resource '{name}' is at set {} binding {}, expected set {set} binding {}",
                            binding.descriptor_set.unwrap_or(0),
                            binding.binding,
                            native.register
                        ),
                    ));
                }
                continue;
            }

            let Some(set_word) = binding.set_word else {
                return Err(self.remap_error(shader, format!("resource '{name}' has no DescriptorSet decoration")));
            };
            patched[binding.binding_word] = native.register;
            patched[set_word] = set;
        }
        Ok(patched)
    }

    /// Produces the archived byte code of `shader` for this backend.
    pub fn remap_shader(&self, shader: &SerializableShader, strip_reflection: bool) -> Result<ShaderByteCode> {
        self.verify_reflection(shader)?;
        let byte_code = shader
            .byte_code(B::KIND)
            .ok_or_else(|| self.remap_error(shader.name(), "shader has no byte code for this backend".into()))?;

        match byte_code {
            ShaderByteCode::Spirv(words) => {
                let patched = self.remap_spirv(shader.name(), shader.stage(), words, false)?;
                let patched = if strip_reflection { spirv::strip_names(&patched)? } else { patched };
                Ok(ShaderByteCode::Spirv(patched))
            }
            other => Ok(other.clone()),
        }
    }

    /// Final binding of every resource visible in `stages`, in binding-index
    /// and declaration order. Backends that bind per stage report one entry
    /// per stage.
    #[must_use]
    pub fn resource_bindings(&self, stages: ShaderStages) -> Vec<PipelineResourceBinding> {
        let stages = if stages.is_empty() { ShaderStages::all() } else { stages };
        let mut bindings = Vec::new();
        for (binding_index, signature) in self.signatures_in_order() {
            let base = self.bases[binding_index];
            for (index, res) in signature.desc().resources.iter().enumerate() {
                let visible = res.shader_stages & stages;
                if visible.is_empty() {
                    continue;
                }
                let mut push = |entry_stages: ShaderStages, query_stage: ShaderStages| {
                    if let Some(native) = signature.native_binding(index, query_stage) {
                        bindings.push(PipelineResourceBinding {
                            name: res.name.clone(),
                            resource_type: res.resource_type,
                            shader_stages: entry_stages,
                            array_size: res.array_size,
                            register: native.register,
                            space: base + native.space,
                        });
                    }
                };
                if B::PER_STAGE_BINDINGS {
                    for stage in visible.stages() {
                        push(stage, stage);
                    }
                } else if let Some(first) = res.shader_stages.stages().next() {
                    push(res.shader_stages, first);
                }
            }
        }
        bindings
    }
}

/// A resource's final location in a pipeline of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResourceBinding {
    pub name: String,
    pub resource_type: ShaderResourceType,
    pub shader_stages: ShaderStages,
    pub array_size: u32,
    pub register: u32,
    pub space: u32,
}

fn has_immutable_sampler<B: SignatureBackend>(signature: &PipelineResourceSignature<B>, name: &str, stage: ShaderStages) -> bool {
    let desc = signature.desc();
    let texture_name = if desc.use_combined_texture_samplers {
        name.strip_suffix(desc.combined_sampler_suffix.as_str())
    } else {
        None
    };
    desc.immutable_samplers.iter().any(|sam| {
        sam.shader_stages.intersects(stage)
            && (sam.sampler_or_texture_name == name || texture_name.is_some_and(|t| sam.sampler_or_texture_name == t))
    })
}

fn check_declaration(
    reflected: &ShaderResourceDesc,
    declared_type: ShaderResourceType,
    declared_size: u32,
    flags: PipelineResourceFlags,
) -> std::result::Result<(), String> {
    let type_matches = declared_type == reflected.resource_type
        || (declared_type == ShaderResourceType::InputAttachment && reflected.resource_type == ShaderResourceType::TextureSrv);
    if !type_matches {
        return Err(format!(
            "resource '{}' is a {} in the shader but a {} in the signature",
            reflected.name,
            reflected.resource_type.name(),
            declared_type.name()
        ));
    }
    if reflected.array_size > declared_size && !flags.contains(PipelineResourceFlags::RUNTIME_ARRAY) {
        return Err(format!(
            "resource '{}' has {} elements in the shader but only {declared_size} in the signature",
            reflected.name, reflected.array_size
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bindery_core::types::{BackendKind, ShaderResourceVariableType as V};
    use bindery_signature::backend::{D3D11Backend, D3D12Backend, VulkanBackend};
    use bindery_signature::desc::{PipelineResourceDesc, PipelineResourceSignatureDesc};

    use super::*;
    use crate::shader::ShaderCreateInfo;

    fn signature(name: &str, binding_index: u8, resources: &[(&str, V)]) -> Arc<SerializableResourceSignature> {
        let mut desc = PipelineResourceSignatureDesc::new(name).with_binding_index(binding_index);
        for (res, var) in resources {
            desc = desc.with_resource(PipelineResourceDesc::new(
                *res,
                ShaderStages::VERTEX | ShaderStages::PIXEL,
                1,
                ShaderResourceType::ConstantBuffer,
                *var,
            ));
        }
        let mut sig = SerializableResourceSignature::new(desc).unwrap();
        sig.create_device_signature::<VulkanBackend>(ShaderStages::empty()).unwrap();
        sig.create_device_signature::<D3D12Backend>(ShaderStages::empty()).unwrap();
        sig.create_device_signature::<D3D11Backend>(ShaderStages::empty()).unwrap();
        Arc::new(sig)
    }

    fn two_set_signatures() -> Vec<Arc<SerializableResourceSignature>> {
        vec![
            signature("B", 1, &[("cb_b0", V::Mutable), ("cb_b1", V::Dynamic)]),
            signature("A", 0, &[("cb_a0", V::Static), ("cb_a1", V::Dynamic)]),
        ]
    }

    #[test]
    fn signatures_are_sorted_by_binding_index() {
        let (sorted, count) = sort_resource_signatures::<VulkanBackend>("pso", &two_set_signatures()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(sorted[0].as_ref().unwrap().name(), "A");
        assert_eq!(sorted[1].as_ref().unwrap().name(), "B");
        assert!(sorted[2..].iter().all(Option::is_none));
    }

    #[test]
    fn duplicate_binding_index_is_a_collision() {
        let sigs = vec![signature("A", 2, &[("a", V::Mutable)]), signature("B", 2, &[("b", V::Mutable)])];
        let err = sort_resource_signatures::<VulkanBackend>("pso", &sigs).unwrap_err();
        assert!(matches!(err, BinderyError::BindingIndexCollision { index: 2, .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn vulkan_sets_follow_lower_binding_indices() {
        let layout = PipelineLayout::<VulkanBackend>::new("pso", &two_set_signatures()).unwrap();
        assert_eq!(layout.base(0), 0);
        assert_eq!(layout.base(1), 2);
        assert_eq!(layout.binding_group_count(), 4);
    }

    #[test]
    fn d3d12_spaces_follow_lower_binding_indices() {
        let layout = PipelineLayout::<D3D12Backend>::new("pso", &two_set_signatures()).unwrap();
        assert_eq!(layout.base(1), 1);
        let bindings = layout.resource_bindings(ShaderStages::empty());
        let b0 = bindings.iter().find(|b| b.name == "cb_b0").unwrap();
        assert_eq!(b0.space, 1);
        assert_eq!(b0.register, 0);
    }

    #[test]
    fn spirv_bindings_are_patched() {
        let layout = PipelineLayout::<VulkanBackend>::new("pso", &two_set_signatures()).unwrap();
        let mut builder = spirv::ModuleBuilder::new();
        builder.resource("cb_b1", 0, 0);
        builder.resource("cb_a0", 7, 7);
        let words = builder.build();

        let patched = layout.remap_spirv("vs", ShaderStages::VERTEX, &words, false).unwrap();
        let bindings = spirv::resource_bindings(&patched).unwrap();
        // cb_b1 is dynamic in a signature with both set classes: physical set 1
        assert_eq!((bindings[0].descriptor_set, bindings[0].binding), (Some(3), 0));
        assert_eq!((bindings[1].descriptor_set, bindings[1].binding), (Some(0), 0));

        assert!(layout.remap_spirv("vs", ShaderStages::VERTEX, &patched, true).is_ok());
        assert!(layout.remap_spirv("vs", ShaderStages::VERTEX, &words, true).is_err());
    }

    #[test]
    fn unknown_resource_aborts_remap() {
        let layout = PipelineLayout::<VulkanBackend>::new("pso", &two_set_signatures()).unwrap();
        let mut builder = spirv::ModuleBuilder::new();
        builder.resource("g_Missing", 0, 0);
        let err = layout
            .remap_spirv("vs", ShaderStages::VERTEX, &builder.build(), false)
            .unwrap_err();
        assert!(matches!(err, BinderyError::Remap { ref shader, .. } if shader == "vs"));
        assert!(matches!(
            layout.resolve("cs", "cb_a0", ShaderStages::COMPUTE),
            Err(BinderyError::Remap { .. })
        ));
    }

    #[test]
    fn reflection_type_mismatch_is_reported() {
        let layout = PipelineLayout::<D3D12Backend>::new("pso", &two_set_signatures()).unwrap();
        let ci = ShaderCreateInfo::new("ps", ShaderStages::PIXEL)
            .with_resource(ShaderResourceDesc::new("cb_a0", ShaderResourceType::TextureSrv, 1));
        let shader = SerializableShader::new(ci, Default::default());
        assert!(matches!(layout.verify_reflection(&shader), Err(BinderyError::Remap { .. })));
        assert!(matches!(
            layout.remap_shader(&shader, false),
            Err(BinderyError::Remap { .. })
        ));
    }

    #[test]
    fn d3d11_reports_bindings_per_stage() {
        let layout = PipelineLayout::<D3D11Backend>::new("pso", &two_set_signatures()).unwrap();
        let bindings = layout.resource_bindings(ShaderStages::VERTEX | ShaderStages::PIXEL);
        assert_eq!(bindings.iter().filter(|b| b.name == "cb_a0").count(), 2);
        assert!(bindings.iter().all(|b| b.shader_stages.bits().count_ones() == 1));
        let vs_only = layout.resource_bindings(ShaderStages::VERTEX);
        assert_eq!(vs_only.len(), 4);
        assert_eq!(BackendKind::Direct3D11, D3D11Backend::KIND);
    }
}
