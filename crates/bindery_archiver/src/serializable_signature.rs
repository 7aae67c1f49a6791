//! Backend-agnostic signature wrapper.
//!
//! A [`SerializableResourceSignature`] holds one description and, for each of
//! the five backends, either nothing or the backend's serialized blob plus,
//! when it was built on this side, the live backend signature. Hashing,
//! comparison and persistence work without a graphics device.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::hash::LazyHash;
use bindery_core::types::{BackendKind, DeviceFlags, ShaderStages};
use bindery_signature::backend::SignatureBackend;
use bindery_signature::desc::PipelineResourceSignatureDesc;
use bindery_signature::signature::PipelineResourceSignature;
use rustc_hash::FxHasher;

use crate::registry::{DeviceSignature, downcast_signature};

/// Data of one backend.
#[derive(Debug, Clone)]
pub struct DeviceData {
    data: Vec<u8>,
    signature: Option<Arc<dyn DeviceSignature>>,
}

impl DeviceData {
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn signature(&self) -> Option<&Arc<dyn DeviceSignature>> {
        self.signature.as_ref()
    }

    fn is_compatible(&self, other: &Self) -> bool {
        match (&self.signature, &other.signature) {
            (Some(a), Some(b)) => a.is_compatible(b.as_ref()),
            _ => self.data == other.data,
        }
    }
}

pub struct SerializableResourceSignature {
    desc: PipelineResourceSignatureDesc,
    devices: [Option<DeviceData>; BackendKind::COUNT],
    hash: LazyHash,
}

impl SerializableResourceSignature {
    /// Wraps `desc` without any backend data yet.
    pub fn new(desc: PipelineResourceSignatureDesc) -> Result<Self> {
        desc.validate()?;
        Ok(Self {
            desc,
            devices: Default::default(),
            hash: LazyHash::new(),
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &PipelineResourceSignatureDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn binding_index(&self) -> u8 {
        self.desc.binding_index
    }

    /// Builds the backend `B` signature and stores it with its blob.
    pub fn create_device_signature<B: SignatureBackend>(&mut self, stages: ShaderStages) -> Result<()> {
        let signature = PipelineResourceSignature::<B>::new(self.desc.clone(), stages)?;
        self.add_device_signature(Arc::new(signature))
    }

    /// Stores a live signature built from this wrapper's description.
    pub fn add_device_signature(&mut self, signature: Arc<dyn DeviceSignature>) -> Result<()> {
        if *signature.desc() != self.desc {
            return Err(BinderyError::InvalidDescription(format!(
                "{} signature '{}' was not built from the description of '{}'",
                signature.backend(),
                signature.desc().name,
                self.desc.name
            )));
        }
        let data = signature.serialize()?;
        log::debug!(
            "Serialized {} data of signature '{}' ({} bytes)",
            signature.backend(),
            self.desc.name,
            data.len()
        );
        let index = signature.backend().index();
        self.devices[index] = Some(DeviceData {
            data,
            signature: Some(signature),
        });
        Ok(())
    }

    /// Stores a blob without a live signature, e.g. one read from an archive.
    pub fn add_device_data(&mut self, kind: BackendKind, data: Vec<u8>) {
        self.devices[kind.index()] = Some(DeviceData { data, signature: None });
    }

    #[must_use]
    pub fn device_data(&self, kind: BackendKind) -> Option<&[u8]> {
        self.devices[kind.index()].as_ref().map(DeviceData::data)
    }

    #[must_use]
    pub fn live_signature(&self, kind: BackendKind) -> Option<&Arc<dyn DeviceSignature>> {
        self.devices[kind.index()].as_ref()?.signature()
    }

    /// Live signature of backend `B`, if one was built.
    #[must_use]
    pub fn device_signature<B: SignatureBackend>(&self) -> Option<Arc<PipelineResourceSignature<B>>> {
        downcast_signature::<B>(self.live_signature(B::KIND)?)
    }

    /// Backends with data, in [`BackendKind`] order.
    pub fn backends(&self) -> impl Iterator<Item = BackendKind> + '_ {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.devices[kind.index()].is_some())
    }

    #[must_use]
    pub fn has_device_data(&self, flags: DeviceFlags) -> bool {
        flags.backends().all(|kind| self.devices[kind.index()].is_some())
    }

    /// Compares the backends selected by `flags` that both wrappers carry.
    /// A backend missing on either side does not make them incompatible.
    #[must_use]
    pub fn is_compatible(&self, other: &Self, flags: DeviceFlags) -> bool {
        flags.backends().all(|kind| {
            match (&self.devices[kind.index()], &other.devices[kind.index()]) {
                (Some(a), Some(b)) => a.is_compatible(b),
                _ => true,
            }
        })
    }

    /// Hash of the description without the signature name.
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

    fn same_layout(&self, other: &Self) -> bool {
        let (a, b) = (&self.desc, &other.desc);
        a.binding_index == b.binding_index
            && a.resources == b.resources
            && a.immutable_samplers == b.immutable_samplers
            && a.use_combined_texture_samplers == b.use_combined_texture_samplers
            && (!a.use_combined_texture_samplers || a.combined_sampler_suffix == b.combined_sampler_suffix)
    }
}

/// Equal layouts and compatible data on every backend present on both sides.
/// Signature names are ignored.
impl PartialEq for SerializableResourceSignature {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || (self.same_layout(other) && self.is_compatible(other, DeviceFlags::all()))
    }
}

impl fmt::Debug for SerializableResourceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializableResourceSignature")
            .field("name", &self.desc.name)
            .field("binding_index", &self.desc.binding_index)
            .field("backends", &self.backends().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
