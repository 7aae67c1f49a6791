//! Backend-agnostic resource cache layout.
//!
//! Every resource that owns cache slots belongs to exactly one
//! [`BindingRange`]. Within a range, slots are assigned in declaration order,
//! one per array element:
//!
//! - the SRB cache holds every resource of the signature;
//! - the static cache holds static resources only.
//!
//! Samplers own no slots: they are immutable or travel with the texture view
//! they are combined with.

use bindery_core::types::{BindingRange, INVALID_INDEX, ShaderResourceVariableType};
use bytemuck::{Pod, Zeroable};

use crate::desc::PipelineResourceSignatureDesc;

/// Slot counts per [`BindingRange`].
pub type RangeCounters = [u32; BindingRange::COUNT];

/// Which cache a variable manager addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Static cache owned by the signature.
    Static,
    /// Cache owned by a shader resource binding.
    Srb,
}

/// Cache placement of one resource.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct CacheAttribs {
    /// [`BindingRange`] discriminant, or [`BindingRange::NONE`].
    pub range: u8,
    /// `1` if an immutable sampler applies to this resource.
    pub imtbl_sampler_assigned: u8,
    pub _padding: [u8; 2],
    pub srb_cache_offset: u32,
    /// [`INVALID_INDEX`] unless the resource is static.
    pub static_cache_offset: u32,
    /// Index of the separate sampler resource assigned to a texture.
    pub sampler_ind: u32,
}

const _: () = assert!(std::mem::size_of::<CacheAttribs>() == 16);

impl CacheAttribs {
    #[inline]
    #[must_use]
    pub fn binding_range(&self) -> Option<BindingRange> {
        BindingRange::from_raw(self.range)
    }

    #[inline]
    #[must_use]
    pub fn cache_offset(&self, kind: CacheKind) -> u32 {
        match kind {
            CacheKind::Static => self.static_cache_offset,
            CacheKind::Srb => self.srb_cache_offset,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_imtbl_sampler_assigned(&self) -> bool {
        self.imtbl_sampler_assigned != 0
    }

    #[inline]
    #[must_use]
    pub fn assigned_sampler(&self) -> Option<u32> {
        (self.sampler_ind != INVALID_INDEX).then_some(self.sampler_ind)
    }
}

/// Cache layout of a whole signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheLayout {
    pub attribs: Vec<CacheAttribs>,
    pub srb_counters: RangeCounters,
    pub static_counters: RangeCounters,
}

impl CacheLayout {
    /// Lays out the caches of `desc`. The description must already be valid.
    #[must_use]
    pub fn compute(desc: &PipelineResourceSignatureDesc) -> Self {
        let mut layout = Self {
            attribs: Vec::with_capacity(desc.resources.len()),
            ..Default::default()
        };

        for res in &desc.resources {
            let range = BindingRange::from_resource(res.resource_type, res.flags);
            let mut attribs = CacheAttribs {
                range: range.map_or(BindingRange::NONE, u8::from),
                imtbl_sampler_assigned: u8::from(desc.find_immutable_sampler(res).is_some()),
                _padding: [0; 2],
                srb_cache_offset: INVALID_INDEX,
                static_cache_offset: INVALID_INDEX,
                sampler_ind: desc
                    .find_assigned_sampler(res)
                    .map_or(INVALID_INDEX, |i| i as u32),
            };

            if let Some(range) = range {
                let r = range as usize;
                attribs.srb_cache_offset = layout.srb_counters[r];
                layout.srb_counters[r] += res.array_size;
                if res.var_type == ShaderResourceVariableType::Static {
                    attribs.static_cache_offset = layout.static_counters[r];
                    layout.static_counters[r] += res.array_size;
                }
            }
            layout.attribs.push(attribs);
        }
        layout
    }

    #[must_use]
    pub fn counters(&self, kind: CacheKind) -> &RangeCounters {
        match kind {
            CacheKind::Static => &self.static_counters,
            CacheKind::Srb => &self.srb_counters,
        }
    }

    /// Checks that the stored layout is consistent with `desc`.
    #[must_use]
    pub fn matches(&self, desc: &PipelineResourceSignatureDesc) -> bool {
        self.attribs.len() == desc.resources.len()
            && desc.resources.iter().zip(&self.attribs).all(|(res, attr)| {
                let range = BindingRange::from_resource(res.resource_type, res.flags);
                attr.binding_range() == range
                    && range.is_none_or(|r| {
                        let fits =
                            |offset: u32, count: u32| offset.checked_add(res.array_size).is_some_and(|end| end <= count);
                        fits(attr.srb_cache_offset, self.srb_counters[r as usize])
                            && (res.var_type != ShaderResourceVariableType::Static
                                || fits(attr.static_cache_offset, self.static_counters[r as usize]))
                    })
            })
    }
}
