//! Serializable shaders.
//!
//! The serialization device does not compile shaders. A
//! [`SerializableShader`] keeps, per requested backend, the byte code the
//! caller supplied: SPIR-V words for Vulkan, pre-compiled binaries for D3D
//! and Metal when available, and source text otherwise. Resource reflection
//! travels with the shader and drives default signatures and remap checks.

use bindery_core::types::{BackendKind, ShaderResourceType, ShaderStages};

/// A resource a shader declares, as reported by reflection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderResourceDesc {
    pub name: String,
    pub resource_type: ShaderResourceType,
    pub array_size: u32,
}

impl ShaderResourceDesc {
    pub fn new(name: impl Into<String>, resource_type: ShaderResourceType, array_size: u32) -> Self {
        Self {
            name: name.into(),
            resource_type,
            array_size,
        }
    }
}

/// Everything needed to archive one shader.
#[derive(Debug, Clone, Default)]
pub struct ShaderCreateInfo {
    pub name: String,
    /// Exactly one stage.
    pub stage: ShaderStages,
    /// Source text, archived for OpenGL and as a fallback for D3D and Metal.
    pub source: String,
    /// SPIR-V module, required for Vulkan.
    pub spirv: Option<Vec<u32>>,
    /// Pre-compiled D3D / Metal binary.
    pub binary: Option<Vec<u8>>,
    pub resources: Vec<ShaderResourceDesc>,
}

impl ShaderCreateInfo {
    pub fn new(name: impl Into<String>, stage: ShaderStages) -> Self {
        Self {
            name: name.into(),
            stage,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn with_spirv(mut self, spirv: Vec<u32>) -> Self {
        self.spirv = Some(spirv);
        self
    }

    #[must_use]
    pub fn with_binary(mut self, binary: Vec<u8>) -> Self {
        self.binary = Some(binary);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: ShaderResourceDesc) -> Self {
        self.resources.push(resource);
        self
    }
}

/// Byte code stored for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderByteCode {
    Spirv(Vec<u32>),
    Binary(Vec<u8>),
    Source(String),
}

impl ShaderByteCode {
    /// Raw bytes as written to an archive.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Spirv(words) => bytemuck::cast_slice(words),
            Self::Binary(bytes) => bytes,
            Self::Source(source) => source.as_bytes(),
        }
    }
}

/// A shader prepared for archiving on a set of backends.
#[derive(Debug)]
pub struct SerializableShader {
    create_info: ShaderCreateInfo,
    byte_code: [Option<ShaderByteCode>; BackendKind::COUNT],
}

impl SerializableShader {
    pub(crate) fn new(create_info: ShaderCreateInfo, byte_code: [Option<ShaderByteCode>; BackendKind::COUNT]) -> Self {
        Self { create_info, byte_code }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.create_info.name
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> ShaderStages {
        self.create_info.stage
    }

    #[must_use]
    pub fn create_info(&self) -> &ShaderCreateInfo {
        &self.create_info
    }

    #[must_use]
    pub fn resources(&self) -> &[ShaderResourceDesc] {
        &self.create_info.resources
    }

    #[must_use]
    pub fn byte_code(&self, kind: BackendKind) -> Option<&ShaderByteCode> {
        self.byte_code[kind.index()].as_ref()
    }

    /// Whether byte code was prepared for `kind`.
    #[must_use]
    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.byte_code[kind.index()].is_some()
    }
}
