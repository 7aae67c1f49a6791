//! Resource cache.
//!
//! Flat storage of bound device objects, split into the four
//! [`BindingRange`] sections. A slot is bound iff an object has been written
//! to it. Slots are never cleared: a binding can only be replaced.

use bindery_core::object::{DeviceObjectKind, DeviceObjectRef};
use bindery_core::types::BindingRange;

use crate::layout::{CacheKind, RangeCounters};

#[derive(Debug, Clone)]
pub struct ShaderResourceCache {
    kind: CacheKind,
    slots: [Vec<Option<DeviceObjectRef>>; BindingRange::COUNT],
}

impl ShaderResourceCache {
    #[must_use]
    pub fn new(kind: CacheKind, counters: &RangeCounters) -> Self {
        Self {
            kind,
            slots: counters.map(|count| vec![None; count as usize]),
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn num_slots(&self, range: BindingRange) -> u32 {
        self.slots[range as usize].len() as u32
    }

    #[must_use]
    pub fn num_ubs(&self) -> u32 {
        self.num_slots(BindingRange::UniformBuffer)
    }

    #[must_use]
    pub fn num_textures(&self) -> u32 {
        self.num_slots(BindingRange::Texture)
    }

    #[must_use]
    pub fn num_images(&self) -> u32 {
        self.num_slots(BindingRange::Image)
    }

    #[must_use]
    pub fn num_storage_buffers(&self) -> u32 {
        self.num_slots(BindingRange::StorageBuffer)
    }

    /// Writes `object` to a slot and returns the previous occupant.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the range. Offsets come from the
    /// signature layout, so this indicates a layout bug.
    pub fn set(&mut self, range: BindingRange, offset: u32, object: DeviceObjectRef) -> Option<DeviceObjectRef> {
        self.slots[range as usize][offset as usize].replace(object)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, range: BindingRange, offset: u32) -> Option<&DeviceObjectRef> {
        self.slots[range as usize].get(offset as usize).and_then(Option::as_ref)
    }

    #[inline]
    #[must_use]
    pub fn is_bound(&self, range: BindingRange, offset: u32) -> bool {
        self.get(range, offset).is_some()
    }

    /// Texture-section check that also verifies the bound object flavor:
    /// a texture view when `is_texture_view`, a buffer view otherwise.
    #[must_use]
    pub fn is_texture_bound(&self, offset: u32, is_texture_view: bool) -> bool {
        self.is_view_bound(BindingRange::Texture, offset, is_texture_view)
    }

    /// Same as [`Self::is_texture_bound`] for the image section.
    #[must_use]
    pub fn is_image_bound(&self, offset: u32, is_texture_view: bool) -> bool {
        self.is_view_bound(BindingRange::Image, offset, is_texture_view)
    }

    fn is_view_bound(&self, range: BindingRange, offset: u32, is_texture_view: bool) -> bool {
        self.get(range, offset).is_some_and(|object| match object.kind() {
            DeviceObjectKind::TextureView { .. } => is_texture_view,
            DeviceObjectKind::BufferView { .. } => !is_texture_view,
            DeviceObjectKind::Buffer { .. } | DeviceObjectKind::Sampler => false,
        })
    }

    /// Number of bound slots across all sections.
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.slots.iter().flatten().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use bindery_core::object::{DeviceObject, ViewType};

    use super::*;

    #[test]
    fn slots_start_unbound() {
        let cache = ShaderResourceCache::new(CacheKind::Srb, &[1, 4, 0, 2]);
        assert_eq!(cache.num_ubs(), 1);
        assert_eq!(cache.num_textures(), 4);
        assert_eq!(cache.num_images(), 0);
        assert_eq!(cache.num_storage_buffers(), 2);
        assert_eq!(cache.bound_count(), 0);
        assert!(!cache.is_bound(BindingRange::Texture, 3));
        assert!(!cache.is_bound(BindingRange::Texture, 100));
    }

    #[test]
    fn set_replaces_previous_object() {
        let mut cache = ShaderResourceCache::new(CacheKind::Static, &[0, 1, 0, 0]);
        let first = DeviceObject::texture_srv("a");
        let second = DeviceObject::texture_srv("b");
        assert!(cache.set(BindingRange::Texture, 0, first.clone()).is_none());
        let prev = cache.set(BindingRange::Texture, 0, second.clone());
        assert_eq!(prev.map(|o| o.id()), Some(first.id()));
        assert_eq!(cache.get(BindingRange::Texture, 0).map(|o| o.id()), Some(second.id()));
    }

    #[test]
    fn texture_slot_distinguishes_view_flavor() {
        let mut cache = ShaderResourceCache::new(CacheKind::Srb, &[0, 2, 0, 0]);
        cache.set(BindingRange::Texture, 0, DeviceObject::texture_srv("t"));
        cache.set(BindingRange::Texture, 1, DeviceObject::buffer_view("b", ViewType::ShaderResource, true));
        assert!(cache.is_texture_bound(0, true));
        assert!(!cache.is_texture_bound(0, false));
        assert!(cache.is_texture_bound(1, false));
        assert!(!cache.is_texture_bound(1, true));
    }
}
