//! Serialization Device Settings & Archive Requests
//!
//! [`SerializationDeviceSettings`] configures a [`SerializationDevice`] once,
//! at creation. [`PipelineStateArchiveInfo`] and
//! [`ResourceSignatureArchiveInfo`] accompany every individual archive request.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bindery::archiver::{SerializationDevice, SerializationDeviceSettings};
//! use bindery::core::DeviceFlags;
//!
//! let device = SerializationDevice::new(SerializationDeviceSettings {
//!     valid_device_flags: DeviceFlags::VULKAN | DeviceFlags::D3D12,
//!     ..Default::default()
//! })?;
//! ```
//!
//! [`SerializationDevice`]: crate::device::SerializationDevice

use bindery_core::types::DeviceFlags;
use bitflags::bitflags;

// ---------------------------------------------------------------------------
// API versions
// ---------------------------------------------------------------------------

/// `major.minor` version of a graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
}

impl ApiVersion {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ---------------------------------------------------------------------------
// SerializationDeviceSettings
// ---------------------------------------------------------------------------

/// Configuration of a serialization device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationDeviceSettings {
    /// Backends the device can produce data for.
    ///
    /// Every request's device flags must be a subset of this mask.
    pub valid_device_flags: DeviceFlags,

    // === Vulkan ===
    /// Target Vulkan API version.
    ///
    /// Limits the SPIR-V version accepted by [`create_shader`]: 1.0 for
    /// Vulkan 1.0, 1.3 for 1.1, 1.5 for 1.2 and 1.6 for 1.3 and later.
    ///
    /// [`create_shader`]: crate::device::SerializationDevice::create_shader
    pub vulkan_version: ApiVersion,

    /// Whether the target supports `VK_KHR_spirv_1_4`, which raises the
    /// SPIR-V limit of Vulkan 1.1 to 1.4.
    pub supports_spirv_1_4: bool,

    // === Direct3D12 ===
    /// Target shader model. Register spaces need 5.1 or later, so older
    /// targets only accept pipelines whose signatures fit into space 0.
    pub d3d12_shader_model: ApiVersion,

    // === OpenGL ===
    /// Target OpenGL or OpenGL ES version.
    pub gl_version: ApiVersion,

    /// Whether [`gl_version`](Self::gl_version) is an OpenGL ES version.
    pub gles: bool,

    // === Archiving Defaults ===
    /// Strip shader reflection when a request does not ask for it explicitly.
    pub strip_reflection: bool,

    /// SRB allocation granularity given to generated default signatures.
    pub srb_allocation_granularity: u32,
}

impl Default for SerializationDeviceSettings {
    fn default() -> Self {
        Self {
            valid_device_flags: DeviceFlags::all(),
            vulkan_version: ApiVersion::new(1, 0),
            supports_spirv_1_4: false,
            d3d12_shader_model: ApiVersion::new(6, 0),
            gl_version: ApiVersion::new(4, 6),
            gles: false,
            strip_reflection: false,
            srb_allocation_granularity: 1,
        }
    }
}

impl SerializationDeviceSettings {
    /// Highest SPIR-V version the configured Vulkan target consumes.
    #[must_use]
    pub fn max_spirv_version(&self) -> ApiVersion {
        match (self.vulkan_version.major, self.vulkan_version.minor) {
            (0, _) | (1, 0) => ApiVersion::new(1, 0),
            (1, 1) if self.supports_spirv_1_4 => ApiVersion::new(1, 4),
            (1, 1) => ApiVersion::new(1, 3),
            (1, 2) => ApiVersion::new(1, 5),
            _ => ApiVersion::new(1, 6),
        }
    }

    /// Whether the OpenGL target runs compute shaders (GL 4.3, GLES 3.1).
    #[must_use]
    pub fn gl_supports_compute(&self) -> bool {
        let required = if self.gles { ApiVersion::new(3, 1) } else { ApiVersion::new(4, 3) };
        self.gl_version >= required
    }

    /// Whether the Direct3D12 target addresses register spaces other than 0.
    #[must_use]
    pub fn d3d12_supports_register_spaces(&self) -> bool {
        self.d3d12_shader_model >= ApiVersion::new(5, 1)
    }
}

// ---------------------------------------------------------------------------
// Per-request archive info
// ---------------------------------------------------------------------------

bitflags! {
    /// Options of a pipeline archive request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ArchiveFlags: u32 {
        /// Remove shader reflection (SPIR-V debug names) from archived byte code.
        const STRIP_REFLECTION = 1 << 0;
    }
}

/// Device data requested for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStateArchiveInfo {
    pub device_flags: DeviceFlags,
    pub flags: ArchiveFlags,
}

impl PipelineStateArchiveInfo {
    #[must_use]
    pub fn new(device_flags: DeviceFlags) -> Self {
        Self {
            device_flags,
            flags: ArchiveFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Device data requested for a standalone resource signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSignatureArchiveInfo {
    pub device_flags: DeviceFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_limit_follows_vulkan_version() {
        let mut settings = SerializationDeviceSettings::default();
        assert_eq!(settings.max_spirv_version(), ApiVersion::new(1, 0));

        settings.vulkan_version = ApiVersion::new(1, 1);
        assert_eq!(settings.max_spirv_version(), ApiVersion::new(1, 3));
        settings.supports_spirv_1_4 = true;
        assert_eq!(settings.max_spirv_version(), ApiVersion::new(1, 4));

        settings.vulkan_version = ApiVersion::new(1, 3);
        assert_eq!(settings.max_spirv_version(), ApiVersion::new(1, 6));
    }

    #[test]
    fn gl_compute_and_d3d12_spaces_follow_target_versions() {
        let mut settings = SerializationDeviceSettings::default();
        assert!(settings.gl_supports_compute());
        assert!(settings.d3d12_supports_register_spaces());

        settings.gles = true;
        settings.gl_version = ApiVersion::new(3, 0);
        assert!(!settings.gl_supports_compute());
        settings.gl_version = ApiVersion::new(3, 1);
        assert!(settings.gl_supports_compute());

        settings.d3d12_shader_model = ApiVersion::new(5, 0);
        assert!(!settings.d3d12_supports_register_spaces());
    }
}
