//! Pipeline descriptions accepted by the archiver.

use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{BackendKind, ShaderResourceVariableType, ShaderStages};
use bindery_signature::desc::{
    DEFAULT_COMBINED_SAMPLER_SUFFIX, ImmutableSamplerDesc, PipelineResourceDesc, PipelineResourceSignatureDesc,
};

use crate::serializable_signature::SerializableResourceSignature;
use crate::shader::SerializableShader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PipelineType {
    Graphics = 0,
    Compute = 1,
    RayTracing = 2,
    /// Metal tile pipeline.
    Tile = 3,
}

impl PipelineType {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [Self::Graphics, Self::Compute, Self::RayTracing, Self::Tile];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "Graphics pipeline",
            Self::Compute => "Compute pipeline",
            Self::RayTracing => "Ray tracing pipeline",
            Self::Tile => "Tile pipeline",
        }
    }

    /// Whether pipelines of this type exist on `kind`.
    #[must_use]
    pub fn supported_by(self, kind: BackendKind) -> bool {
        match self {
            Self::Graphics | Self::Compute => true,
            Self::RayTracing => matches!(kind, BackendKind::Vulkan | BackendKind::Direct3D12),
            Self::Tile => kind == BackendKind::Metal,
        }
    }
}

/// Variable type override for a resource of a default signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderResourceVariableDesc {
    pub name: String,
    pub shader_stages: ShaderStages,
    pub var_type: ShaderResourceVariableType,
}

impl ShaderResourceVariableDesc {
    pub fn new(name: impl Into<String>, shader_stages: ShaderStages, var_type: ShaderResourceVariableType) -> Self {
        Self {
            name: name.into(),
            shader_stages,
            var_type,
        }
    }
}

/// How a pipeline without explicit signatures lays out its resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResourceLayout {
    pub default_variable_type: ShaderResourceVariableType,
    pub variables: Vec<ShaderResourceVariableDesc>,
    pub immutable_samplers: Vec<ImmutableSamplerDesc>,
    pub use_combined_texture_samplers: bool,
    pub combined_sampler_suffix: String,
}

impl Default for PipelineResourceLayout {
    fn default() -> Self {
        Self {
            default_variable_type: ShaderResourceVariableType::Static,
            variables: Vec::new(),
            immutable_samplers: Vec::new(),
            use_combined_texture_samplers: false,
            combined_sampler_suffix: DEFAULT_COMBINED_SAMPLER_SUFFIX.to_owned(),
        }
    }
}

impl PipelineResourceLayout {
    fn variable_type(&self, name: &str, stage: ShaderStages) -> ShaderResourceVariableType {
        self.variables
            .iter()
            .find(|v| v.name == name && v.shader_stages.intersects(stage))
            .map_or(self.default_variable_type, |v| v.var_type)
    }
}

/// A pipeline to archive.
#[derive(Debug, Clone)]
pub struct PipelineStateCreateInfo {
    pub name: String,
    pub pipeline_type: PipelineType,
    pub shaders: Vec<Arc<SerializableShader>>,
    /// Explicit signatures. When empty, a default signature is generated
    /// from shader reflection and `resource_layout`.
    pub resource_signatures: Vec<Arc<SerializableResourceSignature>>,
    pub resource_layout: PipelineResourceLayout,
}

impl PipelineStateCreateInfo {
    fn new(name: impl Into<String>, pipeline_type: PipelineType) -> Self {
        Self {
            name: name.into(),
            pipeline_type,
            shaders: Vec::new(),
            resource_signatures: Vec::new(),
            resource_layout: PipelineResourceLayout::default(),
        }
    }

    pub fn graphics(name: impl Into<String>) -> Self {
        Self::new(name, PipelineType::Graphics)
    }

    pub fn compute(name: impl Into<String>) -> Self {
        Self::new(name, PipelineType::Compute)
    }

    pub fn ray_tracing(name: impl Into<String>) -> Self {
        Self::new(name, PipelineType::RayTracing)
    }

    pub fn tile(name: impl Into<String>) -> Self {
        Self::new(name, PipelineType::Tile)
    }

    #[must_use]
    pub fn with_shader(mut self, shader: Arc<SerializableShader>) -> Self {
        self.shaders.push(shader);
        self
    }

    #[must_use]
    pub fn with_signature(mut self, signature: Arc<SerializableResourceSignature>) -> Self {
        self.resource_signatures.push(signature);
        self
    }

    #[must_use]
    pub fn with_resource_layout(mut self, layout: PipelineResourceLayout) -> Self {
        self.resource_layout = layout;
        self
    }

    /// Union of all shader stages.
    #[must_use]
    pub fn active_stages(&self) -> ShaderStages {
        self.shaders.iter().fold(ShaderStages::empty(), |acc, s| acc | s.stage())
    }

    /// Checks the shader set against the pipeline type.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(BinderyError::InvalidDescription(format!("{} '{}': {reason}", self.pipeline_type.name(), self.name)));

        if self.name.is_empty() {
            return invalid("pipeline name must not be empty".into());
        }
        let mut seen = ShaderStages::empty();
        for shader in &self.shaders {
            if shader.stage().bits().count_ones() != 1 {
                return invalid(format!("shader '{}' must have exactly one stage", shader.name()));
            }
            // Ray tracing pipelines combine any number of shaders per stage.
            if self.pipeline_type != PipelineType::RayTracing && seen.intersects(shader.stage()) {
                return invalid(format!("more than one {} shader", shader.stage().stage_name()));
            }
            seen |= shader.stage();
        }

        match self.pipeline_type {
            PipelineType::Graphics => {
                if !seen.intersects(ShaderStages::VERTEX | ShaderStages::MESH) {
                    return invalid("a vertex or mesh shader is required".into());
                }
                if seen.intersects(ShaderStages::COMPUTE | ShaderStages::ALL_RAY_TRACING | ShaderStages::TILE) {
                    return invalid("only graphics shaders are allowed".into());
                }
            }
            PipelineType::Compute => {
                if seen != ShaderStages::COMPUTE {
                    return invalid("exactly one compute shader is required".into());
                }
            }
            PipelineType::RayTracing => {
                if !seen.contains(ShaderStages::RAY_GEN) {
                    return invalid("a ray generation shader is required".into());
                }
                if !ShaderStages::ALL_RAY_TRACING.contains(seen) {
                    return invalid("only ray tracing shaders are allowed".into());
                }
            }
            PipelineType::Tile => {
                if seen != ShaderStages::TILE {
                    return invalid("exactly one tile shader is required".into());
                }
            }
        }
        Ok(())
    }

    /// Description of the signature generated when no explicit signature is given.
    ///
    /// Resources of the same name in several shaders are merged into one
    /// resource visible in all of their stages.
    pub fn default_signature_desc(&self, name: impl Into<String>) -> Result<PipelineResourceSignatureDesc> {
        let layout = &self.resource_layout;
        let mut desc = PipelineResourceSignatureDesc::new(name);
        desc.immutable_samplers.clone_from(&layout.immutable_samplers);
        desc.use_combined_texture_samplers = layout.use_combined_texture_samplers;
        desc.combined_sampler_suffix.clone_from(&layout.combined_sampler_suffix);

        for shader in &self.shaders {
            let stage = shader.stage();
            for reflected in shader.resources() {
                let var_type = layout.variable_type(&reflected.name, stage);
                match desc.resources.iter_mut().find(|r| r.name == reflected.name) {
                    Some(existing) => {
                        if existing.resource_type != reflected.resource_type
                            || existing.array_size != reflected.array_size
                            || existing.var_type != var_type
                        {
                            return Err(BinderyError::InvalidDescription(format!(
                                "Pipeline '{}': shader '{}' declares resource '{}' differently from another stage",
                                self.name,
                                shader.name(),
                                reflected.name
                            )));
                        }
                        existing.shader_stages |= stage;
                    }
                    None => desc.resources.push(PipelineResourceDesc::new(
                        reflected.name.clone(),
                        stage,
                        reflected.array_size,
                        reflected.resource_type,
                        var_type,
                    )),
                }
            }
        }
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::types::{BackendKind, ShaderResourceType};

    use super::*;
    use crate::shader::{ShaderCreateInfo, ShaderResourceDesc};

    fn shader(name: &str, stage: ShaderStages, resources: &[ShaderResourceDesc]) -> Arc<SerializableShader> {
        let mut ci = ShaderCreateInfo::new(name, stage).with_source("void main() {}");
        ci.resources = resources.to_vec();
        Arc::new(SerializableShader::new(ci, Default::default()))
    }

    #[test]
    fn compute_pipeline_needs_a_single_compute_shader() {
        let ci = PipelineStateCreateInfo::compute("cs").with_shader(shader("vs", ShaderStages::VERTEX, &[]));
        assert!(ci.validate().is_err());
        let ci = PipelineStateCreateInfo::compute("cs").with_shader(shader("cs", ShaderStages::COMPUTE, &[]));
        assert!(ci.validate().is_ok());
    }

    #[test]
    fn ray_tracing_pipeline_needs_a_ray_generation_shader() {
        let ci = PipelineStateCreateInfo::ray_tracing("rt").with_shader(shader("miss", ShaderStages::RAY_MISS, &[]));
        assert!(ci.validate().is_err());

        let ci = PipelineStateCreateInfo::ray_tracing("rt")
            .with_shader(shader("gen", ShaderStages::RAY_GEN, &[]))
            .with_shader(shader("miss", ShaderStages::RAY_MISS, &[]))
            .with_shader(shader("shadow_miss", ShaderStages::RAY_MISS, &[]))
            .with_shader(shader("hit", ShaderStages::RAY_CLOSEST_HIT, &[]));
        assert!(ci.validate().is_ok());

        let ci = ci.with_shader(shader("cs", ShaderStages::COMPUTE, &[]));
        assert!(matches!(ci.validate(), Err(BinderyError::InvalidDescription(_))));
    }

    #[test]
    fn tile_pipeline_needs_a_single_tile_shader() {
        let ci = PipelineStateCreateInfo::tile("tile").with_shader(shader("ts", ShaderStages::TILE, &[]));
        assert!(ci.validate().is_ok());
        let ci = ci.with_shader(shader("ps", ShaderStages::PIXEL, &[]));
        assert!(ci.validate().is_err());
        assert!(PipelineType::Tile.supported_by(BackendKind::Metal));
        assert!(!PipelineType::Tile.supported_by(BackendKind::Vulkan));
        assert!(!PipelineType::RayTracing.supported_by(BackendKind::OpenGl));
    }

    #[test]
    fn graphics_pipeline_rejects_duplicate_stages() {
        let ci = PipelineStateCreateInfo::graphics("pso")
            .with_shader(shader("vs", ShaderStages::VERTEX, &[]))
            .with_shader(shader("vs2", ShaderStages::VERTEX, &[]));
        assert!(matches!(ci.validate(), Err(BinderyError::InvalidDescription(_))));
    }

    #[test]
    fn default_desc_merges_stages_and_applies_variable_types() {
        let cb = ShaderResourceDesc::new("g_Constants", ShaderResourceType::ConstantBuffer, 1);
        let tex = ShaderResourceDesc::new("g_Texture", ShaderResourceType::TextureSrv, 1);
        let ci = PipelineStateCreateInfo::graphics("pso")
            .with_shader(shader("vs", ShaderStages::VERTEX, std::slice::from_ref(&cb)))
            .with_shader(shader("ps", ShaderStages::PIXEL, &[cb.clone(), tex]))
            .with_resource_layout(PipelineResourceLayout {
                variables: vec![ShaderResourceVariableDesc::new(
                    "g_Texture",
                    ShaderStages::PIXEL,
                    ShaderResourceVariableType::Mutable,
                )],
                ..Default::default()
            });

        let desc = ci.default_signature_desc("default").unwrap();
        assert_eq!(desc.resources.len(), 2);
        assert_eq!(desc.resources[0].shader_stages, ShaderStages::VERTEX | ShaderStages::PIXEL);
        assert_eq!(desc.resources[0].var_type, ShaderResourceVariableType::Static);
        assert_eq!(desc.resources[1].var_type, ShaderResourceVariableType::Mutable);
        assert!(!shader("x", ShaderStages::PIXEL, &[]).has_backend(BackendKind::Vulkan));
    }

    #[test]
    fn conflicting_declarations_are_rejected() {
        let ci = PipelineStateCreateInfo::graphics("pso")
            .with_shader(shader(
                "vs",
                ShaderStages::VERTEX,
                &[ShaderResourceDesc::new("g_Data", ShaderResourceType::BufferSrv, 1)],
            ))
            .with_shader(shader(
                "ps",
                ShaderStages::PIXEL,
                &[ShaderResourceDesc::new("g_Data", ShaderResourceType::BufferSrv, 2)],
            ));
        assert!(ci.default_signature_desc("default").is_err());
    }
}
