//! Pipeline resource signatures.
//!
//! A [`PipelineResourceSignature`] is the backend-specific, immutable layout
//! of every resource a pipeline uses. It is built once from a description,
//! shared through `Arc` by every compatible pipeline and every SRB created
//! from it, and can be serialized into a backend-tagged blob and read back.
//!
//! # Shared state
//!
//! The signature owns the *static* resource cache. Since the signature itself
//! is shared, that cache sits behind a mutex. Everything else is immutable
//! after construction except the lazily computed hash.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::hash::LazyHash;
use bindery_core::object::ResourceMapping;
use bindery_core::types::{BackendKind, ShaderResourceVariableType, ShaderStages};
use bytemuck::Zeroable;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::backend::{NativeBinding, SignatureBackend, check_supported_stages};
use crate::desc::{PipelineResourceDesc, PipelineResourceSignatureDesc};
use crate::layout::{CacheAttribs, CacheKind, CacheLayout};
use crate::resource_cache::ShaderResourceCache;
use crate::serializer::{Mode, Serializable, Serializer, from_bytes, to_bytes};
use crate::srb::ShaderResourceBinding;
use crate::variable::{BindShaderResourcesFlags, ShaderVariableManager, ShaderVariables};

/// Result of looking a resource up by name in a set of stages.
///
/// Binding and remapping treat "declared but not visible" differently from
/// "not declared", so the two are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLookup {
    /// Declared and visible in at least one of the queried stages.
    Visible(usize),
    /// Declared, but in none of the queried stages.
    NotVisible(usize),
    NotDeclared,
}

impl ResourceLookup {
    #[must_use]
    pub fn visible_index(self) -> Option<usize> {
        match self {
            Self::Visible(index) => Some(index),
            Self::NotVisible(_) | Self::NotDeclared => None,
        }
    }
}

pub struct PipelineResourceSignature<B: SignatureBackend> {
    desc: PipelineResourceSignatureDesc,
    shader_stages: ShaderStages,
    cache_layout: CacheLayout,
    attribs: Vec<B::Attribs>,
    internal: B::InternalData,
    static_cache: Mutex<ShaderResourceCache>,
    static_managers: SmallVec<[ShaderVariableManager; 2]>,
    hash: LazyHash,
}

impl<B: SignatureBackend> PipelineResourceSignature<B> {
    /// Validates `desc` and computes the backend layout.
    ///
    /// `stages` adds stages to those used by the resources; a pipeline whose
    /// shaders use no resources of some stage still gets a (possibly empty)
    /// variable manager for it.
    pub fn new(desc: PipelineResourceSignatureDesc, stages: ShaderStages) -> Result<Self> {
        desc.validate()?;
        check_supported_stages::<B>(&desc)?;
        let stages = stages & B::SUPPORTED_STAGES;

        let cache_layout = CacheLayout::compute(&desc);
        let (attribs, internal) = B::compute_layout(&desc, &cache_layout)?;
        let signature = Self::from_parts(desc, stages, cache_layout, attribs, internal);

        log::debug!(
            "Created {} signature '{}' (binding index {}, {} resource(s))",
            B::KIND,
            signature.desc.name,
            signature.desc.binding_index,
            signature.desc.resources.len()
        );
        Ok(signature)
    }

    fn from_parts(
        desc: PipelineResourceSignatureDesc,
        extra_stages: ShaderStages,
        cache_layout: CacheLayout,
        attribs: Vec<B::Attribs>,
        internal: B::InternalData,
    ) -> Self {
        let shader_stages = desc.shader_stages() | extra_stages;
        let static_cache = ShaderResourceCache::new(CacheKind::Static, &cache_layout.static_counters);
        let static_managers = shader_stages
            .stages()
            .map(|stage| {
                ShaderVariableManager::new(
                    stage,
                    CacheKind::Static,
                    &desc.resources,
                    &[ShaderResourceVariableType::Static],
                )
            })
            .collect();

        Self {
            desc,
            shader_stages,
            cache_layout,
            attribs,
            internal,
            static_cache: Mutex::new(static_cache),
            static_managers,
            hash: LazyHash::new(),
        }
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        B::KIND
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &PipelineResourceSignatureDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    #[must_use]
    pub fn binding_index(&self) -> u8 {
        self.desc.binding_index
    }

    #[inline]
    #[must_use]
    pub fn shader_stages(&self) -> ShaderStages {
        self.shader_stages
    }

    #[inline]
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.desc.resources.len()
    }

    #[must_use]
    pub fn resource_desc(&self, index: usize) -> Option<&PipelineResourceDesc> {
        self.desc.resources.get(index)
    }

    #[must_use]
    pub fn resource_attribs(&self, index: usize) -> Option<&B::Attribs> {
        self.attribs.get(index)
    }

    #[must_use]
    pub fn cache_attribs(&self, index: usize) -> Option<&CacheAttribs> {
        self.cache_layout.attribs.get(index)
    }

    #[inline]
    #[must_use]
    pub fn cache_layout(&self) -> &CacheLayout {
        &self.cache_layout
    }

    #[inline]
    #[must_use]
    pub fn internal_data(&self) -> &B::InternalData {
        &self.internal
    }

    /// Number of descriptor sets / register spaces of the signature.
    #[must_use]
    pub fn binding_group_count(&self) -> u32 {
        B::binding_group_count(&self.internal)
    }

    /// Native binding of resource `index` in a single `stage`.
    #[must_use]
    pub fn native_binding(&self, index: usize, stage: ShaderStages) -> Option<NativeBinding> {
        let res = self.desc.resources.get(index)?;
        if !res.shader_stages.contains(stage) {
            return None;
        }
        B::native_binding(self.attribs.get(index)?, stage)
    }

    /// Finds a resource by name among the resources visible in `stages`.
    #[must_use]
    pub fn find_resource(&self, name: &str, stages: ShaderStages) -> ResourceLookup {
        match self.desc.resources.iter().position(|r| r.name == name) {
            None => ResourceLookup::NotDeclared,
            Some(index) if self.desc.resources[index].shader_stages.intersects(stages) => {
                ResourceLookup::Visible(index)
            }
            Some(index) => ResourceLookup::NotVisible(index),
        }
    }

    // ─── Hash & Compatibility ──────────────────────────────────────────────

    /// Hash of everything [`Self::is_compatible_with`] compares. Computed on
    /// first use.
    pub fn hash(&self) -> u64 {
        self.hash.get_or_compute(|| {
            let mut hasher = FxHasher::default();
            self.desc.binding_index.hash(&mut hasher);
            self.desc.resources.hash(&mut hasher);
            self.desc.immutable_samplers.hash(&mut hasher);
            self.desc.use_combined_texture_samplers.hash(&mut hasher);
            if self.desc.use_combined_texture_samplers {
                self.desc.combined_sampler_suffix.hash(&mut hasher);
            }
            hasher.finish()
        })
    }

    /// Whether `other` describes the same bindings. Symmetric.
    ///
    /// Signature names are ignored; resource names are not.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (a, b) = (&self.desc, &other.desc);
        if a.binding_index != b.binding_index
            || a.resources.len() != b.resources.len()
            || a.use_combined_texture_samplers != b.use_combined_texture_samplers
            || (a.use_combined_texture_samplers && a.combined_sampler_suffix != b.combined_sampler_suffix)
        {
            return false;
        }
        if self.hash.is_computed() && other.hash.is_computed() && self.hash() != other.hash() {
            return false;
        }

        let resources_match = a.resources.iter().zip(&b.resources).all(|(ra, rb)| {
            ra.name == rb.name
                && ra.resource_type == rb.resource_type
                && ra.array_size == rb.array_size
                && ra.shader_stages == rb.shader_stages
                && ra.var_type == rb.var_type
                && ra.flags == rb.flags
        });
        resources_match
            && self.attribs.len() == other.attribs.len()
            && self
                .attribs
                .iter()
                .zip(&other.attribs)
                .all(|(x, y)| B::attribs_compatible(x, y))
            && a.immutable_samplers == b.immutable_samplers
    }

    // ─── Static Resources ──────────────────────────────────────────────────

    /// Static variables of a single `stage`, holding the static cache lock.
    #[must_use]
    pub fn static_variables(&self, stage: ShaderStages) -> Option<ShaderVariables<'_, MutexGuard<'_, ShaderResourceCache>>> {
        let manager = self.static_managers.iter().find(|m| m.stage() == stage)?;
        Some(ShaderVariables::new(
            manager,
            &self.desc.resources,
            &self.cache_layout.attribs,
            self.static_cache.lock(),
        ))
    }

    #[must_use]
    pub fn static_variable_count(&self, stage: ShaderStages) -> u32 {
        self.static_managers
            .iter()
            .find(|m| m.stage() == stage)
            .map_or(0, ShaderVariableManager::variable_count)
    }

    /// Binds static variables of every stage in `stages` from `mapping`.
    pub fn bind_static_resources(
        &self,
        stages: ShaderStages,
        mapping: &ResourceMapping,
        flags: BindShaderResourcesFlags,
    ) -> Result<()> {
        let mut cache = self.static_cache.lock();
        let mut first_error = None;
        for manager in self.static_managers.iter().filter(|m| stages.intersects(m.stage())) {
            let mut vars = ShaderVariables::new(manager, &self.desc.resources, &self.cache_layout.attribs, &mut *cache);
            if let Err(err) = vars.bind_resources(mapping, flags) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Snapshot of the static cache.
    #[must_use]
    pub fn static_cache(&self) -> ShaderResourceCache {
        self.static_cache.lock().clone()
    }

    // ─── Shader Resource Bindings ──────────────────────────────────────────

    /// Creates an SRB, optionally copying the current static bindings into it.
    pub fn create_shader_resource_binding(self: &Arc<Self>, init_static_resources: bool) -> Result<ShaderResourceBinding<B>> {
        let mut srb = ShaderResourceBinding::new(Arc::clone(self));
        if init_static_resources {
            self.initialize_static_srb_resources(&mut srb)?;
        }
        Ok(srb)
    }

    /// Copies static bindings into `srb`.
    ///
    /// Unbound static variables are reported with a warning and left unbound
    /// in the SRB, where [`ShaderResourceBinding::validate`] will catch them.
    pub fn initialize_static_srb_resources(&self, srb: &mut ShaderResourceBinding<B>) -> Result<()> {
        if !self.is_compatible_with(srb.signature()) {
            return Err(BinderyError::InvalidDescription(format!(
                "SRB of signature '{}' is not compatible with signature '{}'",
                srb.signature().name(),
                self.desc.name
            )));
        }
        if srb.static_resources_initialized() {
            log::warn!(
                "Static resources have already been initialized in this SRB of signature '{}'",
                self.desc.name
            );
        }

        let static_cache = self.static_cache.lock();
        for (res, attr) in self.desc.resources.iter().zip(&self.cache_layout.attribs) {
            if res.var_type != ShaderResourceVariableType::Static {
                continue;
            }
            let Some(range) = attr.binding_range() else {
                continue;
            };
            for element in 0..res.array_size {
                match static_cache.get(range, attr.static_cache_offset + element) {
                    Some(object) => {
                        srb.cache_mut()
                            .set(range, attr.srb_cache_offset + element, Arc::clone(object));
                    }
                    None => log::warn!(
                        "No resource is bound to static variable '{}'[{element}] of signature '{}'",
                        res.name,
                        self.desc.name
                    ),
                }
            }
        }
        srb.mark_static_resources_initialized();
        Ok(())
    }

    // ─── Serialization ─────────────────────────────────────────────────────

    /// Serializes the signature into a backend-tagged blob.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut data = SignatureData::<B> {
            desc: self.desc.clone(),
            shader_stages: self.shader_stages,
            cache_layout: self.cache_layout.clone(),
            attribs: self.attribs.clone(),
            internal: self.internal,
        };
        to_bytes(&mut data)
    }

    /// Reconstructs a signature from a blob produced by [`Self::serialize`]
    /// for the same backend.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let data: SignatureData<B> = from_bytes(bytes)?;
        data.desc.validate()?;
        check_supported_stages::<B>(&data.desc)?;
        if data.attribs.len() != data.desc.resources.len() || !data.cache_layout.matches(&data.desc) {
            return Err(BinderyError::format(format!(
                "{} signature '{}': layout does not match its {} resource(s)",
                B::KIND,
                data.desc.name,
                data.desc.resources.len()
            )));
        }
        // Backend attribs are stored verbatim; anything but the layout the
        // description produces would bind resources to foreign slots.
        let cache_layout = CacheLayout::compute(&data.desc);
        let (attribs, internal) = B::compute_layout(&data.desc, &cache_layout)?;
        if data.cache_layout != cache_layout || data.attribs != attribs || data.internal != internal {
            return Err(BinderyError::format(format!(
                "{} signature '{}': stored layout differs from the layout of its description",
                B::KIND,
                data.desc.name
            )));
        }
        Ok(Self::from_parts(
            data.desc,
            data.shader_stages,
            data.cache_layout,
            data.attribs,
            data.internal,
        ))
    }
}

impl<B: SignatureBackend> fmt::Debug for PipelineResourceSignature<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineResourceSignature")
            .field("backend", &B::KIND)
            .field("name", &self.desc.name)
            .field("binding_index", &self.desc.binding_index)
            .field("shader_stages", &self.shader_stages)
            .field("resources", &self.desc.resources.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Serialized Form
// ============================================================================

/// Everything a signature blob holds: backend tag, description, stages,
/// cache layout, backend attribs and backend internal data.
struct SignatureData<B: SignatureBackend> {
    desc: PipelineResourceSignatureDesc,
    shader_stages: ShaderStages,
    cache_layout: CacheLayout,
    attribs: Vec<B::Attribs>,
    internal: B::InternalData,
}

impl<B: SignatureBackend> Default for SignatureData<B> {
    fn default() -> Self {
        Self {
            desc: PipelineResourceSignatureDesc::default(),
            shader_stages: ShaderStages::empty(),
            cache_layout: CacheLayout::default(),
            attribs: Vec::new(),
            internal: B::InternalData::zeroed(),
        }
    }
}

impl<B: SignatureBackend> Serializable for SignatureData<B> {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        let mut backend = B::KIND;
        ser.enum_u8(&mut backend)?;
        if backend != B::KIND {
            return Err(BinderyError::BackendMismatch {
                expected: B::KIND,
                found: backend,
            });
        }

        self.desc.serialize(ser)?;
        ser.flags(&mut self.shader_stages)?;
        ser.pod(&mut self.cache_layout.srb_counters)?;
        ser.pod(&mut self.cache_layout.static_counters)?;
        ser.pod_vec(&mut self.cache_layout.attribs)?;
        ser.pod_vec(&mut self.attribs)?;
        ser.pod(&mut self.internal)
    }
}
