//! Device object handles and resource mapping.
//!
//! The binding layer never allocates GPU memory. Buffers, views and samplers
//! are produced by an external device and reach the engine as opaque
//! reference-counted [`DeviceObjectRef`] handles. The only thing the engine
//! inspects is the object *kind*, which decides whether it may be bound to a
//! given variable.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::types::{PipelineResourceFlags, ShaderResourceType};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

bitflags! {
    /// How a buffer may be bound to the pipeline.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BufferBindFlags: u32 {
        const UNIFORM_BUFFER   = 1 << 0;
        const SHADER_RESOURCE  = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
    }
}

/// Shader access of a texture or buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    ShaderResource,
    UnorderedAccess,
}

/// What a device object is, as far as binding is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceObjectKind {
    Buffer { bind_flags: BufferBindFlags },
    BufferView { view_type: ViewType, formatted: bool },
    TextureView { view_type: ViewType, has_sampler: bool },
    Sampler,
}

impl DeviceObjectKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::BufferView { .. } => "buffer view",
            Self::TextureView { .. } => "texture view",
            Self::Sampler => "sampler",
        }
    }
}

/// An opaque device object.
#[derive(Debug)]
pub struct DeviceObject {
    id: u64,
    name: String,
    kind: DeviceObjectKind,
}

/// Shared handle to a device object. Lifetime is that of the longest holder.
pub type DeviceObjectRef = Arc<DeviceObject>;

impl DeviceObject {
    pub fn new(name: impl Into<String>, kind: DeviceObjectKind) -> DeviceObjectRef {
        Arc::new(Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            kind,
        })
    }

    pub fn uniform_buffer(name: impl Into<String>) -> DeviceObjectRef {
        Self::new(
            name,
            DeviceObjectKind::Buffer {
                bind_flags: BufferBindFlags::UNIFORM_BUFFER,
            },
        )
    }

    pub fn texture_srv(name: impl Into<String>) -> DeviceObjectRef {
        Self::new(
            name,
            DeviceObjectKind::TextureView {
                view_type: ViewType::ShaderResource,
                has_sampler: false,
            },
        )
    }

    pub fn texture_uav(name: impl Into<String>) -> DeviceObjectRef {
        Self::new(
            name,
            DeviceObjectKind::TextureView {
                view_type: ViewType::UnorderedAccess,
                has_sampler: false,
            },
        )
    }

    pub fn buffer_view(name: impl Into<String>, view_type: ViewType, formatted: bool) -> DeviceObjectRef {
        Self::new(name, DeviceObjectKind::BufferView { view_type, formatted })
    }

    pub fn sampler(name: impl Into<String>) -> DeviceObjectRef {
        Self::new(name, DeviceObjectKind::Sampler)
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> DeviceObjectKind {
        self.kind
    }

    /// Checks whether this object may be bound to a resource of type `ty`.
    ///
    /// Returns a human-readable reason on mismatch.
    pub fn check_bindable(&self, ty: ShaderResourceType, flags: PipelineResourceFlags) -> Result<(), String> {
        let ok = match (ty, self.kind) {
            (ShaderResourceType::ConstantBuffer, DeviceObjectKind::Buffer { bind_flags }) => {
                if !bind_flags.contains(BufferBindFlags::UNIFORM_BUFFER) {
                    return Err(format!(
                        "buffer '{}' was not created with the uniform buffer bind flag",
                        self.name
                    ));
                }
                true
            }
            (
                ShaderResourceType::TextureSrv | ShaderResourceType::InputAttachment,
                DeviceObjectKind::TextureView {
                    view_type: ViewType::ShaderResource,
                    ..
                },
            )
            | (
                ShaderResourceType::TextureUav,
                DeviceObjectKind::TextureView {
                    view_type: ViewType::UnorderedAccess,
                    ..
                },
            )
            | (ShaderResourceType::Sampler, DeviceObjectKind::Sampler) => true,
            (ShaderResourceType::BufferSrv, DeviceObjectKind::BufferView { view_type, formatted })
            | (ShaderResourceType::BufferUav, DeviceObjectKind::BufferView { view_type, formatted }) => {
                let expected = if ty == ShaderResourceType::BufferSrv {
                    ViewType::ShaderResource
                } else {
                    ViewType::UnorderedAccess
                };
                if view_type != expected {
                    false
                } else if formatted != flags.contains(PipelineResourceFlags::FORMATTED_BUFFER) {
                    return Err(format!(
                        "buffer view '{}' formatted mode does not match the resource declaration",
                        self.name
                    ));
                } else {
                    true
                }
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} '{}' cannot be bound as a {}",
                self.kind.name(),
                self.name,
                ty.name()
            ))
        }
    }
}

impl PartialEq for DeviceObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceObject {}

impl fmt::Display for DeviceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' (#{})", self.kind.name(), self.name, self.id)
    }
}

// ============================================================================
// Resource Mapping
// ============================================================================

/// Name (+ array index) → device object table used to bind many variables
/// in one call.
#[derive(Debug, Default, Clone)]
pub struct ResourceMapping {
    entries: FxHashMap<String, Vec<Option<DeviceObjectRef>>>,
}

impl ResourceMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) element 0 of `name`.
    pub fn add_resource(&mut self, name: impl Into<String>, object: DeviceObjectRef) -> &mut Self {
        self.add_resource_array(name, 0, std::slice::from_ref(&object))
    }

    /// Adds (or replaces) `objects.len()` elements of `name` starting at `first_element`.
    pub fn add_resource_array(
        &mut self,
        name: impl Into<String>,
        first_element: u32,
        objects: &[DeviceObjectRef],
    ) -> &mut Self {
        let name = name.into();
        let slots = self.entries.entry(name).or_default();
        let end = first_element as usize + objects.len();
        if slots.len() < end {
            slots.resize(end, None);
        }
        for (slot, object) in slots[first_element as usize..end].iter_mut().zip(objects) {
            *slot = Some(Arc::clone(object));
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str, array_index: u32) -> Option<&DeviceObjectRef> {
        self.entries
            .get(name)
            .and_then(|slots| slots.get(array_index as usize))
            .and_then(Option::as_ref)
    }

    /// Removes one element. Returns the removed object if it existed.
    pub fn remove(&mut self, name: &str, array_index: u32) -> Option<DeviceObjectRef> {
        let slots = self.entries.get_mut(name)?;
        let removed = slots.get_mut(array_index as usize).and_then(Option::take);
        if slots.iter().all(Option::is_none) {
            self.entries.remove(name);
        }
        removed
    }

    /// Number of distinct names in the mapping.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        let a = DeviceObject::sampler("a");
        let b = DeviceObject::sampler("a");
        assert_ne!(a.id(), b.id());
        assert_ne!(*a, *b);
    }

    #[test]
    fn uniform_buffer_requires_bind_flag() {
        let buf = DeviceObject::new(
            "vb",
            DeviceObjectKind::Buffer {
                bind_flags: BufferBindFlags::SHADER_RESOURCE,
            },
        );
        let flags = PipelineResourceFlags::empty();
        assert!(buf.check_bindable(ShaderResourceType::ConstantBuffer, flags).is_err());
        let cb = DeviceObject::uniform_buffer("cb");
        assert!(cb.check_bindable(ShaderResourceType::ConstantBuffer, flags).is_ok());
        assert!(cb.check_bindable(ShaderResourceType::TextureSrv, flags).is_err());
    }

    #[test]
    fn buffer_view_formatted_mode_must_match() {
        let view = DeviceObject::buffer_view("v", ViewType::ShaderResource, true);
        assert!(view.check_bindable(ShaderResourceType::BufferSrv, PipelineResourceFlags::FORMATTED_BUFFER).is_ok());
        assert!(view.check_bindable(ShaderResourceType::BufferSrv, PipelineResourceFlags::empty()).is_err());
        assert!(view.check_bindable(ShaderResourceType::BufferUav, PipelineResourceFlags::FORMATTED_BUFFER).is_err());
    }

    #[test]
    fn mapping_stores_array_elements() {
        let tex: Vec<_> = (0..3).map(|i| DeviceObject::texture_srv(format!("t{i}"))).collect();
        let mut mapping = ResourceMapping::new();
        mapping.add_resource_array("g_Tex", 1, &tex);

        assert!(mapping.get("g_Tex", 0).is_none());
        assert_eq!(mapping.get("g_Tex", 3).map(|o| o.name()), Some("t2"));
        assert_eq!(mapping.len(), 1);

        for i in 1..4 {
            assert!(mapping.remove("g_Tex", i).is_some());
        }
        assert!(mapping.is_empty());
    }
}
