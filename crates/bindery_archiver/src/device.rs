//! Serialization device.
//!
//! Creates backend-agnostic signatures and shaders for the archiver without a
//! graphics device. Backends are reached through the [`BackendRegistry`],
//! populated from [`SerializationDeviceSettings::valid_device_flags`].

use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{BackendKind, DeviceFlags, ShaderStages};
use bindery_signature::desc::PipelineResourceSignatureDesc;

use crate::registry::BackendRegistry;
use crate::remap::{PipelineLayout, PipelineResourceBinding, with_backend};
use crate::serializable_signature::SerializableResourceSignature;
use crate::settings::SerializationDeviceSettings;
use crate::shader::{SerializableShader, ShaderByteCode, ShaderCreateInfo};
use crate::spirv;

/// Input of [`SerializationDevice::pipeline_resource_bindings`].
#[derive(Debug, Clone, Default)]
pub struct PipelineResourceBindingAttribs {
    pub signatures: Vec<Arc<SerializableResourceSignature>>,
    /// Stages to report. Empty means all.
    pub shader_stages: ShaderStages,
    /// Must select exactly one backend.
    pub device_flags: DeviceFlags,
}

#[derive(Debug)]
pub struct SerializationDevice {
    settings: SerializationDeviceSettings,
    registry: BackendRegistry,
}

impl SerializationDevice {
    pub fn new(settings: SerializationDeviceSettings) -> Result<Self> {
        if settings.valid_device_flags.is_empty() {
            return Err(BinderyError::InvalidDeviceFlags(
                "the serialization device needs at least one valid device flag".into(),
            ));
        }
        let registry = BackendRegistry::from_device_flags(settings.valid_device_flags);
        log::debug!(
            "Created serialization device for {:?}",
            registry.backends()
        );
        Ok(Self { settings, registry })
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &SerializationDeviceSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn valid_device_flags(&self) -> DeviceFlags {
        self.settings.valid_device_flags
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Rejects empty masks and backends the device was not configured for.
    pub fn check_device_flags(&self, flags: DeviceFlags) -> Result<()> {
        if flags.is_empty() {
            return Err(BinderyError::InvalidDeviceFlags("at least one device flag must be set".into()));
        }
        let unsupported = flags - self.settings.valid_device_flags;
        if !unsupported.is_empty() {
            return Err(BinderyError::InvalidDeviceFlags(format!(
                "{unsupported:?} are not supported by this serialization device"
            )));
        }
        Ok(())
    }

    /// Builds the signature for every backend selected by `flags`.
    ///
    /// `stages` adds shader stages beyond those the resources use.
    pub fn create_pipeline_resource_signature(
        &self,
        desc: PipelineResourceSignatureDesc,
        flags: DeviceFlags,
        stages: ShaderStages,
    ) -> Result<Arc<SerializableResourceSignature>> {
        self.check_device_flags(flags)?;
        let mut signature = SerializableResourceSignature::new(desc)?;
        for kind in flags.backends() {
            let device_signature = self.registry.factory(kind)?.create(signature.desc(), stages)?;
            signature.add_device_signature(device_signature)?;
        }
        Ok(Arc::new(signature))
    }

    /// Prepares byte code of `info` for every backend selected by `flags`.
    pub fn create_shader(&self, info: ShaderCreateInfo, flags: DeviceFlags) -> Result<Arc<SerializableShader>> {
        self.check_device_flags(flags)?;
        if info.stage.bits().count_ones() != 1 {
            return Err(BinderyError::InvalidDescription(format!(
                "Shader '{}' must have exactly one stage, got {:?}",
                info.name, info.stage
            )));
        }

        let mut byte_code: [Option<ShaderByteCode>; BackendKind::COUNT] = Default::default();
        for kind in flags.backends() {
            byte_code[kind.index()] = Some(self.shader_byte_code(&info, kind)?);
        }
        log::debug!("Created shader '{}' ({})", info.name, info.stage.stage_name());
        Ok(Arc::new(SerializableShader::new(info, byte_code)))
    }

    fn shader_byte_code(&self, info: &ShaderCreateInfo, kind: BackendKind) -> Result<ShaderByteCode> {
        let missing = |what: &str| {
            BinderyError::InvalidDescription(format!("Shader '{}' needs {what} for {kind}", info.name))
        };
        match kind {
            BackendKind::Vulkan => {
                let words = info.spirv.as_ref().ok_or_else(|| missing("SPIR-V byte code"))?;
                let header = spirv::parse_header(words)?;
                let max = self.settings.max_spirv_version();
                if header.version > max {
                    return Err(BinderyError::InvalidDescription(format!(
                        "Shader '{}' uses SPIR-V {}, but Vulkan {} supports at most {max}",
                        info.name, header.version, self.settings.vulkan_version
                    )));
                }
                Ok(ShaderByteCode::Spirv(words.clone()))
            }
            BackendKind::OpenGl => {
                if info.stage == ShaderStages::COMPUTE && !self.settings.gl_supports_compute() {
                    return Err(BinderyError::InvalidDescription(format!(
                        "Shader '{}': {}{} does not support compute shaders",
                        info.name,
                        if self.settings.gles { "OpenGLES " } else { "OpenGL " },
                        self.settings.gl_version
                    )));
                }
                if info.source.is_empty() {
                    return Err(missing("source code"));
                }
                Ok(ShaderByteCode::Source(info.source.clone()))
            }
            BackendKind::Direct3D11 | BackendKind::Direct3D12 | BackendKind::Metal => match &info.binary {
                Some(binary) => Ok(ShaderByteCode::Binary(binary.clone())),
                None if !info.source.is_empty() => Ok(ShaderByteCode::Source(info.source.clone())),
                None => Err(missing("a binary or source code")),
            },
        }
    }

    /// Rejects pipeline layouts the configured target of `kind` cannot express.
    pub fn check_pipeline_layout(&self, pipeline: &str, kind: BackendKind, binding_group_count: u32) -> Result<()> {
        if kind == BackendKind::Direct3D12 && binding_group_count > 1 && !self.settings.d3d12_supports_register_spaces() {
            return Err(BinderyError::InvalidDescription(format!(
                "Pipeline '{pipeline}' uses {binding_group_count} register spaces, but shader model {} only supports space 0",
                self.settings.d3d12_shader_model
            )));
        }
        Ok(())
    }

    /// Final binding of every resource of `attribs.signatures` in a pipeline
    /// of the single backend selected by `attribs.device_flags`.
    pub fn pipeline_resource_bindings(
        &self,
        attribs: &PipelineResourceBindingAttribs,
    ) -> Result<Vec<PipelineResourceBinding>> {
        self.check_device_flags(attribs.device_flags)?;
        let mut backends = attribs.device_flags.backends();
        let (Some(kind), None) = (backends.next(), backends.next()) else {
            return Err(BinderyError::InvalidDeviceFlags(format!(
                "{:?} must select exactly one backend",
                attribs.device_flags
            )));
        };

        with_backend!(kind, B => {
            let layout = PipelineLayout::<B>::new("", &attribs.signatures)?;
            Ok(layout.resource_bindings(attribs.shader_stages))
        })
    }
}

impl Default for SerializationDevice {
    fn default() -> Self {
        Self {
            settings: SerializationDeviceSettings::default(),
            registry: BackendRegistry::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::types::{ShaderResourceType, ShaderResourceVariableType as V};
    use bindery_signature::desc::PipelineResourceDesc;

    use super::*;
    use crate::settings::ApiVersion;

    fn desc() -> PipelineResourceSignatureDesc {
        PipelineResourceSignatureDesc::new("sig")
            .with_resource(PipelineResourceDesc::new(
                "g_CB",
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
    }

    #[test]
    fn device_flags_must_be_valid() {
        let device = SerializationDevice::new(SerializationDeviceSettings {
            valid_device_flags: DeviceFlags::VULKAN,
            ..Default::default()
        })
        .unwrap();
        assert!(device.check_device_flags(DeviceFlags::VULKAN).is_ok());
        assert!(matches!(
            device.check_device_flags(DeviceFlags::empty()),
            Err(BinderyError::InvalidDeviceFlags(_))
        ));
        assert!(matches!(
            device.create_pipeline_resource_signature(desc(), DeviceFlags::D3D11, ShaderStages::empty()),
            Err(BinderyError::InvalidDeviceFlags(_))
        ));
        assert!(SerializationDevice::new(SerializationDeviceSettings {
            valid_device_flags: DeviceFlags::empty(),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn signature_gets_data_for_requested_backends() {
        let device = SerializationDevice::default();
        let sig = device
            .create_pipeline_resource_signature(desc(), DeviceFlags::VULKAN | DeviceFlags::METAL_IOS, ShaderStages::empty())
            .unwrap();
        assert!(sig.device_data(BackendKind::Vulkan).is_some());
        assert!(sig.device_data(BackendKind::Metal).is_some());
        assert!(sig.device_data(BackendKind::OpenGl).is_none());
    }

    #[test]
    fn vulkan_shaders_need_supported_spirv() {
        let device = SerializationDevice::default();
        let ci = ShaderCreateInfo::new("vs", ShaderStages::VERTEX).with_source("void main() {}");
        assert!(device.create_shader(ci.clone(), DeviceFlags::GL).is_ok());
        assert!(device.create_shader(ci.clone(), DeviceFlags::VULKAN).is_err());

        let spirv_1_3 = spirv::ModuleBuilder::new().with_version(ApiVersion::new(1, 3)).build();
        let err = device
            .create_shader(ci.clone().with_spirv(spirv_1_3.clone()), DeviceFlags::VULKAN)
            .unwrap_err();
        assert!(matches!(err, BinderyError::InvalidDescription(_)));

        let device = SerializationDevice::new(SerializationDeviceSettings {
            vulkan_version: ApiVersion::new(1, 1),
            ..Default::default()
        })
        .unwrap();
        let shader = device.create_shader(ci.with_spirv(spirv_1_3), DeviceFlags::VULKAN).unwrap();
        assert!(matches!(shader.byte_code(BackendKind::Vulkan), Some(ShaderByteCode::Spirv(_))));
    }

    #[test]
    fn target_versions_limit_compute_and_register_spaces() {
        let device = SerializationDevice::new(SerializationDeviceSettings {
            gl_version: ApiVersion::new(3, 0),
            gles: true,
            d3d12_shader_model: ApiVersion::new(5, 0),
            ..Default::default()
        })
        .unwrap();
        let cs = ShaderCreateInfo::new("cs", ShaderStages::COMPUTE).with_source("void main() {}");
        assert!(device.create_shader(cs.clone(), DeviceFlags::GL).is_err());
        assert!(device.create_shader(cs, DeviceFlags::D3D12).is_ok());

        assert!(device.check_pipeline_layout("pso", BackendKind::Direct3D12, 1).is_ok());
        assert!(device.check_pipeline_layout("pso", BackendKind::Direct3D12, 2).is_err());
        assert!(device.check_pipeline_layout("pso", BackendKind::Vulkan, 2).is_ok());
    }

    #[test]
    fn bindings_require_a_single_backend() {
        let device = SerializationDevice::default();
        let sig = device
            .create_pipeline_resource_signature(desc(), DeviceFlags::all(), ShaderStages::empty())
            .unwrap();
        let mut attribs = PipelineResourceBindingAttribs {
            signatures: vec![sig],
            shader_stages: ShaderStages::empty(),
            device_flags: DeviceFlags::VULKAN | DeviceFlags::D3D12,
        };
        assert!(device.pipeline_resource_bindings(&attribs).is_err());

        attribs.device_flags = DeviceFlags::GL;
        let bindings = device.pipeline_resource_bindings(&attribs).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].name, "g_Tex");
        assert_eq!(bindings[1].register, 0);
    }
}
