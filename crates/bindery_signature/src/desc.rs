//! Signature descriptions.
//!
//! A [`PipelineResourceSignatureDesc`] is supplied by the application (or
//! generated from shader reflection) and is immutable once a signature has
//! been built from it. Resource order is significant: every backend assigns
//! bindings in declaration order.

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{
    MAX_RESOURCE_SIGNATURES, PipelineResourceFlags, ShaderResourceType, ShaderResourceVariableType, ShaderStages,
};
use rustc_hash::FxHashSet;

use crate::serializer::{Mode, Serializable, Serializer};

/// Default suffix that links a separate sampler to its texture
/// (`g_Texture` + `_sampler`).
pub const DEFAULT_COMBINED_SAMPLER_SUFFIX: &str = "_sampler";

/// Upper bound on the sum of all resource array sizes in one signature.
///
/// Every cache offset, descriptor count and register number is a partial sum
/// of array sizes, so keeping the total below this bound keeps them in `u32`.
pub const MAX_SIGNATURE_ARRAY_ELEMENTS: u32 = 1 << 24;

// ============================================================================
// Resource Description
// ============================================================================

/// One shader resource declared by a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineResourceDesc {
    pub name: String,
    pub shader_stages: ShaderStages,
    /// Number of array elements. Must be at least 1.
    pub array_size: u32,
    pub resource_type: ShaderResourceType,
    pub var_type: ShaderResourceVariableType,
    pub flags: PipelineResourceFlags,
}

impl PipelineResourceDesc {
    pub fn new(
        name: impl Into<String>,
        shader_stages: ShaderStages,
        array_size: u32,
        resource_type: ShaderResourceType,
        var_type: ShaderResourceVariableType,
    ) -> Self {
        Self {
            name: name.into(),
            shader_stages,
            array_size,
            resource_type,
            var_type,
            flags: PipelineResourceFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: PipelineResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl Default for PipelineResourceDesc {
    fn default() -> Self {
        Self::new(
            String::new(),
            ShaderStages::empty(),
            1,
            ShaderResourceType::ConstantBuffer,
            ShaderResourceVariableType::Static,
        )
    }
}

// ============================================================================
// Immutable Samplers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FilterType {
    Point = 0,
    #[default]
    Linear = 1,
    Anisotropic = 2,
    ComparisonPoint = 3,
    ComparisonLinear = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AddressMode {
    #[default]
    Wrap = 0,
    Mirror = 1,
    Clamp = 2,
    Border = 3,
}

impl From<FilterType> for u8 {
    fn from(value: FilterType) -> u8 {
        value as u8
    }
}

impl TryFrom<u8> for FilterType {
    type Error = BinderyError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Point,
            1 => Self::Linear,
            2 => Self::Anisotropic,
            3 => Self::ComparisonPoint,
            4 => Self::ComparisonLinear,
            _ => return Err(BinderyError::format(format!("invalid filter type {value}"))),
        })
    }
}

impl From<AddressMode> for u8 {
    fn from(value: AddressMode) -> u8 {
        value as u8
    }
}

impl TryFrom<u8> for AddressMode {
    type Error = BinderyError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Wrap,
            1 => Self::Mirror,
            2 => Self::Clamp,
            3 => Self::Border,
            _ => return Err(BinderyError::format(format!("invalid address mode {value}"))),
        })
    }
}

/// Sampler state baked into the pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub min_filter: FilterType,
    pub mag_filter: FilterType,
    pub mip_filter: FilterType,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub max_anisotropy: u32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: FilterType::Linear,
            mag_filter: FilterType::Linear,
            mip_filter: FilterType::Linear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            max_anisotropy: 0,
        }
    }
}

/// A sampler assigned to a texture (or separate sampler) by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ImmutableSamplerDesc {
    pub shader_stages: ShaderStages,
    /// Name of the texture (combined samplers) or of the sampler resource.
    pub sampler_or_texture_name: String,
    pub desc: SamplerDesc,
}

impl ImmutableSamplerDesc {
    pub fn new(shader_stages: ShaderStages, name: impl Into<String>, desc: SamplerDesc) -> Self {
        Self {
            shader_stages,
            sampler_or_texture_name: name.into(),
            desc,
        }
    }
}

// ============================================================================
// Signature Description
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineResourceSignatureDesc {
    pub name: String,
    pub resources: Vec<PipelineResourceDesc>,
    pub immutable_samplers: Vec<ImmutableSamplerDesc>,
    /// Position of the signature in the pipeline layout.
    pub binding_index: u8,
    /// Whether textures pick up a separate sampler named `<texture><suffix>`.
    pub use_combined_texture_samplers: bool,
    pub combined_sampler_suffix: String,
    /// Number of SRBs allocated together. Runtime hint only.
    pub srb_allocation_granularity: u32,
}

impl Default for PipelineResourceSignatureDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            resources: Vec::new(),
            immutable_samplers: Vec::new(),
            binding_index: 0,
            use_combined_texture_samplers: false,
            combined_sampler_suffix: DEFAULT_COMBINED_SAMPLER_SUFFIX.to_owned(),
            srb_allocation_granularity: 1,
        }
    }
}

impl PipelineResourceSignatureDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_binding_index(mut self, binding_index: u8) -> Self {
        self.binding_index = binding_index;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: PipelineResourceDesc) -> Self {
        self.resources.push(resource);
        self
    }

    #[must_use]
    pub fn with_immutable_sampler(mut self, sampler: ImmutableSamplerDesc) -> Self {
        self.immutable_samplers.push(sampler);
        self
    }

    #[must_use]
    pub fn with_combined_samplers(mut self, suffix: impl Into<String>) -> Self {
        self.use_combined_texture_samplers = true;
        self.combined_sampler_suffix = suffix.into();
        self
    }

    /// Union of all resource and immutable sampler stages.
    #[must_use]
    pub fn shader_stages(&self) -> ShaderStages {
        let resources = self
            .resources
            .iter()
            .fold(ShaderStages::empty(), |acc, r| acc | r.shader_stages);
        self.immutable_samplers
            .iter()
            .fold(resources, |acc, s| acc | s.shader_stages)
    }

    /// Checks everything that does not depend on the backend.
    pub fn validate(&self) -> Result<()> {
        if usize::from(self.binding_index) >= MAX_RESOURCE_SIGNATURES {
            return Err(BinderyError::BindingIndexOutOfRange {
                signature: self.name.clone(),
                index: u32::from(self.binding_index),
                max: MAX_RESOURCE_SIGNATURES as u32 - 1,
            });
        }
        if self.use_combined_texture_samplers && self.combined_sampler_suffix.is_empty() {
            return Err(BinderyError::InvalidDescription(format!(
                "signature '{}' uses combined texture samplers but the sampler suffix is empty",
                self.name
            )));
        }

        let mut names = FxHashSet::default();
        let mut total_elements = 0u32;
        for res in &self.resources {
            if res.name.is_empty() {
                return Err(BinderyError::InvalidDescription(format!(
                    "signature '{}' contains a resource with an empty name",
                    self.name
                )));
            }
            total_elements = match total_elements.checked_add(res.array_size) {
                Some(total) if res.array_size != 0 && total <= MAX_SIGNATURE_ARRAY_ELEMENTS => total,
                _ => {
                    return Err(BinderyError::InvalidArraySize {
                        signature: self.name.clone(),
                        name: res.name.clone(),
                    });
                }
            };
            if res.shader_stages.is_empty() {
                return Err(BinderyError::EmptyShaderStages {
                    signature: self.name.clone(),
                    name: res.name.clone(),
                });
            }
            if res.flags.contains(PipelineResourceFlags::FORMATTED_BUFFER)
                && !matches!(res.resource_type, ShaderResourceType::BufferSrv | ShaderResourceType::BufferUav)
            {
                return Err(BinderyError::InvalidDescription(format!(
                    "resource '{}': FORMATTED_BUFFER is only valid for buffer views",
                    res.name
                )));
            }
            if res.flags.contains(PipelineResourceFlags::COMBINED_SAMPLER)
                && res.resource_type != ShaderResourceType::TextureSrv
            {
                return Err(BinderyError::InvalidDescription(format!(
                    "resource '{}': COMBINED_SAMPLER is only valid for texture SRVs",
                    res.name
                )));
            }
            if !names.insert(res.name.as_str()) {
                return Err(BinderyError::DuplicateResourceName {
                    signature: self.name.clone(),
                    name: res.name.clone(),
                });
            }
        }

        for (i, sam) in self.immutable_samplers.iter().enumerate() {
            if sam.sampler_or_texture_name.is_empty() {
                return Err(BinderyError::InvalidImmutableSampler {
                    signature: self.name.clone(),
                    name: format!("#{i}"),
                    reason: "name is empty".into(),
                });
            }
            if sam.shader_stages.is_empty() {
                return Err(BinderyError::EmptyShaderStages {
                    signature: self.name.clone(),
                    name: sam.sampler_or_texture_name.clone(),
                });
            }
            let overlapping = self.immutable_samplers[..i].iter().any(|other| {
                other.sampler_or_texture_name == sam.sampler_or_texture_name
                    && other.shader_stages.intersects(sam.shader_stages)
            });
            if overlapping {
                return Err(BinderyError::InvalidImmutableSampler {
                    signature: self.name.clone(),
                    name: sam.sampler_or_texture_name.clone(),
                    reason: "another immutable sampler with the same name is defined in overlapping stages".into(),
                });
            }
        }
        Ok(())
    }

    /// Finds the immutable sampler that applies to resource `res`.
    ///
    /// A sampler applies if its stages intersect the resource's and its name
    /// equals the resource name or, with combined texture samplers, the
    /// resource name without the sampler suffix.
    #[must_use]
    pub fn find_immutable_sampler(&self, res: &PipelineResourceDesc) -> Option<usize> {
        let texture_name = if self.use_combined_texture_samplers {
            res.name.strip_suffix(self.combined_sampler_suffix.as_str())
        } else {
            None
        };
        self.immutable_samplers.iter().position(|sam| {
            sam.shader_stages.intersects(res.shader_stages)
                && (sam.sampler_or_texture_name == res.name
                    || texture_name.is_some_and(|t| sam.sampler_or_texture_name == t))
        })
    }

    /// Finds the separate sampler resource assigned to texture `res`.
    #[must_use]
    pub fn find_assigned_sampler(&self, res: &PipelineResourceDesc) -> Option<usize> {
        if !self.use_combined_texture_samplers || res.resource_type != ShaderResourceType::TextureSrv {
            return None;
        }
        self.resources.iter().position(|other| {
            other.resource_type == ShaderResourceType::Sampler
                && other.shader_stages.intersects(res.shader_stages)
                && other.name.len() == res.name.len() + self.combined_sampler_suffix.len()
                && other.name.starts_with(res.name.as_str())
                && other.name.ends_with(self.combined_sampler_suffix.as_str())
        })
    }
}

// ============================================================================
// Serialization
// ============================================================================

impl Serializable for PipelineResourceDesc {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.string(&mut self.name)?;
        ser.flags(&mut self.shader_stages)?;
        ser.u32(&mut self.array_size)?;
        ser.enum_u8(&mut self.resource_type)?;
        ser.enum_u8(&mut self.var_type)?;
        ser.flags(&mut self.flags)
    }
}

impl Serializable for SamplerDesc {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.enum_u8(&mut self.min_filter)?;
        ser.enum_u8(&mut self.mag_filter)?;
        ser.enum_u8(&mut self.mip_filter)?;
        ser.enum_u8(&mut self.address_u)?;
        ser.enum_u8(&mut self.address_v)?;
        ser.enum_u8(&mut self.address_w)?;
        ser.u32(&mut self.max_anisotropy)
    }
}

impl Serializable for ImmutableSamplerDesc {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.flags(&mut self.shader_stages)?;
        ser.string(&mut self.sampler_or_texture_name)?;
        self.desc.serialize(ser)
    }
}

impl Serializable for PipelineResourceSignatureDesc {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.string(&mut self.name)?;
        ser.u8(&mut self.binding_index)?;
        ser.bool(&mut self.use_combined_texture_samplers)?;
        ser.string(&mut self.combined_sampler_suffix)?;
        ser.u32(&mut self.srb_allocation_granularity)?;
        ser.vec_with(&mut self.resources, |ser, res| res.serialize(ser))?;
        ser.vec_with(&mut self.immutable_samplers, |ser, sam| sam.serialize(ser))
    }
}
