//! Fundamental enums and bit masks shared by every layer of the engine.
//!
//! All enums that travel through serialized blobs are `#[repr(u8)]` and
//! implement `TryFrom<u8>` so that a corrupted blob is reported as a format
//! error instead of producing an out-of-range discriminant.

use std::fmt;

use bitflags::bitflags;

use crate::errors::BinderyError;

/// Maximum number of resource signatures one pipeline can combine.
pub const MAX_RESOURCE_SIGNATURES: usize = 8;

/// Number of distinct shader stages in [`ShaderStages`].
pub const NUM_SHADER_STAGES: usize = 15;

/// Sentinel for offsets and indices that were not assigned.
pub const INVALID_INDEX: u32 = u32::MAX;

bitflags! {
    /// Shader stage visibility mask.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX           = 1 << 0;
        const PIXEL            = 1 << 1;
        const GEOMETRY         = 1 << 2;
        const HULL             = 1 << 3;
        const DOMAIN           = 1 << 4;
        const COMPUTE          = 1 << 5;
        const AMPLIFICATION    = 1 << 6;
        const MESH             = 1 << 7;
        const RAY_GEN          = 1 << 8;
        const RAY_MISS         = 1 << 9;
        const RAY_CLOSEST_HIT  = 1 << 10;
        const RAY_ANY_HIT      = 1 << 11;
        const RAY_INTERSECTION = 1 << 12;
        const CALLABLE         = 1 << 13;
        /// Metal tile function.
        const TILE             = 1 << 14;

        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::PIXEL.bits()
            | Self::GEOMETRY.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits();

        const ALL_RAY_TRACING = Self::RAY_GEN.bits()
            | Self::RAY_MISS.bits()
            | Self::RAY_CLOSEST_HIT.bits()
            | Self::RAY_ANY_HIT.bits()
            | Self::RAY_INTERSECTION.bits()
            | Self::CALLABLE.bits();
    }
}

impl ShaderStages {
    /// Dense index of a single-stage mask (`VERTEX` → 0, `PIXEL` → 1, …).
    #[inline]
    #[must_use]
    pub fn stage_index(self) -> usize {
        debug_assert!(self.bits().is_power_of_two(), "{self:?} is not a single stage");
        self.bits().trailing_zeros() as usize
    }

    /// Single-stage mask for a dense index.
    #[inline]
    #[must_use]
    pub fn from_stage_index(index: usize) -> Self {
        Self::from_bits_truncate(1 << index)
    }

    /// Iterates the individual stages of the mask in ascending bit order.
    pub fn stages(self) -> impl Iterator<Item = ShaderStages> {
        (0..NUM_SHADER_STAGES)
            .map(Self::from_stage_index)
            .filter(move |s| self.contains(*s))
    }

    /// Human-readable stage name, used in log messages.
    #[must_use]
    pub fn stage_name(self) -> &'static str {
        const NAMES: [&str; NUM_SHADER_STAGES] = [
            "vertex",
            "pixel",
            "geometry",
            "hull",
            "domain",
            "compute",
            "amplification",
            "mesh",
            "ray generation",
            "ray miss",
            "ray closest hit",
            "ray any hit",
            "ray intersection",
            "callable",
            "tile",
        ];
        if self.bits().is_power_of_two() {
            NAMES[self.stage_index()]
        } else {
            "multiple"
        }
    }
}

/// Resource kind as declared by a pipeline resource description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShaderResourceType {
    ConstantBuffer = 0,
    TextureSrv = 1,
    BufferSrv = 2,
    TextureUav = 3,
    BufferUav = 4,
    Sampler = 5,
    InputAttachment = 6,
}

impl ShaderResourceType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ConstantBuffer => "constant buffer",
            Self::TextureSrv => "texture SRV",
            Self::BufferSrv => "buffer SRV",
            Self::TextureUav => "texture UAV",
            Self::BufferUav => "buffer UAV",
            Self::Sampler => "sampler",
            Self::InputAttachment => "input attachment",
        }
    }
}

impl TryFrom<u8> for ShaderResourceType {
    type Error = BinderyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::ConstantBuffer,
            1 => Self::TextureSrv,
            2 => Self::BufferSrv,
            3 => Self::TextureUav,
            4 => Self::BufferUav,
            5 => Self::Sampler,
            6 => Self::InputAttachment,
            _ => return Err(BinderyError::format(format!("invalid resource type {value}"))),
        })
    }
}

/// How often the resource bound to a variable is expected to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShaderResourceVariableType {
    /// Bound once through the signature, shared by every SRB.
    #[default]
    Static = 0,
    /// Bound once per SRB.
    Mutable = 1,
    /// May be rebound at any time.
    Dynamic = 2,
}

impl ShaderResourceVariableType {
    pub const ALL: [Self; 3] = [Self::Static, Self::Mutable, Self::Dynamic];
}

impl TryFrom<u8> for ShaderResourceVariableType {
    type Error = BinderyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Static,
            1 => Self::Mutable,
            2 => Self::Dynamic,
            _ => return Err(BinderyError::format(format!("invalid variable type {value}"))),
        })
    }
}

bitflags! {
    /// Additional properties of a pipeline resource.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PipelineResourceFlags: u8 {
        /// Never use dynamic buffer offsets for this buffer.
        const NO_DYNAMIC_BUFFERS = 1 << 0;
        /// The texture is combined with a sampler.
        const COMBINED_SAMPLER   = 1 << 1;
        /// Buffer SRV/UAV is accessed through a typed (formatted) view.
        const FORMATTED_BUFFER   = 1 << 2;
        /// The array size is only an upper bound.
        const RUNTIME_ARRAY      = 1 << 3;
    }
}

/// The four sections of the resource cache and variable manager.
///
/// Samplers have no range: they are either immutable or combined with the
/// texture they are assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BindingRange {
    UniformBuffer = 0,
    Texture = 1,
    Image = 2,
    StorageBuffer = 3,
}

impl BindingRange {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::UniformBuffer,
        Self::Texture,
        Self::Image,
        Self::StorageBuffer,
    ];

    /// Sentinel stored in raw attribs for resources without a range.
    pub const NONE: u8 = u8::MAX;

    /// Classifies a resource into its cache section.
    #[must_use]
    pub fn from_resource(ty: ShaderResourceType, flags: PipelineResourceFlags) -> Option<Self> {
        let formatted = flags.contains(PipelineResourceFlags::FORMATTED_BUFFER);
        match ty {
            ShaderResourceType::ConstantBuffer => Some(Self::UniformBuffer),
            ShaderResourceType::TextureSrv | ShaderResourceType::InputAttachment => Some(Self::Texture),
            ShaderResourceType::BufferSrv if formatted => Some(Self::Texture),
            ShaderResourceType::BufferSrv => Some(Self::StorageBuffer),
            ShaderResourceType::TextureUav => Some(Self::Image),
            ShaderResourceType::BufferUav if formatted => Some(Self::Image),
            ShaderResourceType::BufferUav => Some(Self::StorageBuffer),
            ShaderResourceType::Sampler => None,
        }
    }

    #[must_use]
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UniformBuffer => "uniform buffer",
            Self::Texture => "texture",
            Self::Image => "image",
            Self::StorageBuffer => "storage buffer",
        }
    }
}

/// Graphics API backends a signature can be laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BackendKind {
    Direct3D11 = 0,
    Direct3D12 = 1,
    OpenGl = 2,
    Vulkan = 3,
    Metal = 4,
}

impl BackendKind {
    pub const COUNT: usize = 5;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Direct3D11,
        Self::Direct3D12,
        Self::OpenGl,
        Self::Vulkan,
        Self::Metal,
    ];

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// All device flags that select this backend.
    #[must_use]
    pub fn device_flags(self) -> DeviceFlags {
        match self {
            Self::Direct3D11 => DeviceFlags::D3D11,
            Self::Direct3D12 => DeviceFlags::D3D12,
            Self::OpenGl => DeviceFlags::GL | DeviceFlags::GLES,
            Self::Vulkan => DeviceFlags::VULKAN,
            Self::Metal => DeviceFlags::METAL_MACOS | DeviceFlags::METAL_IOS,
        }
    }
}

impl TryFrom<u8> for BackendKind {
    type Error = BinderyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| BinderyError::format(format!("invalid backend kind {value}")))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct3D11 => "Direct3D11",
            Self::Direct3D12 => "Direct3D12",
            Self::OpenGl => "OpenGL",
            Self::Vulkan => "Vulkan",
            Self::Metal => "Metal",
        })
    }
}

bitflags! {
    /// Device data requested from the archiver / serialization device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFlags: u32 {
        const D3D11       = 1 << 0;
        const D3D12       = 1 << 1;
        const GL          = 1 << 2;
        const GLES        = 1 << 3;
        const VULKAN      = 1 << 4;
        const METAL_MACOS = 1 << 5;
        const METAL_IOS   = 1 << 6;
    }
}

impl DeviceFlags {
    /// Distinct backends selected by the mask, in [`BackendKind`] order.
    pub fn backends(self) -> impl Iterator<Item = BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(move |kind| self.intersects(kind.device_flags()))
    }

    /// Whether any of the flags selecting `kind` is set.
    #[inline]
    #[must_use]
    pub fn has_backend(self, kind: BackendKind) -> bool {
        self.intersects(kind.device_flags())
    }
}

macro_rules! impl_u8_conversion {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for u8 {
                #[inline]
                fn from(value: $ty) -> u8 {
                    value as u8
                }
            }
        )*
    };
}

impl_u8_conversion!(ShaderResourceType, ShaderResourceVariableType, BindingRange, BackendKind);
