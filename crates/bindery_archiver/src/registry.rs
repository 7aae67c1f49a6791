//! Backend capability registry.
//!
//! The archiver handles signatures of all five backends side by side without
//! knowing their concrete types. [`DeviceSignature`] is the object-safe view
//! of a [`PipelineResourceSignature<B>`], and a [`SignatureFactory`] builds or
//! reads signatures of one backend. The [`BackendRegistry`] maps each
//! [`BackendKind`] to its factory and is populated from the device flags the
//! serialization device is configured with.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::{BackendKind, DeviceFlags, ShaderStages};
use bindery_signature::backend::{D3D11Backend, D3D12Backend, GlBackend, MetalBackend, SignatureBackend, VulkanBackend};
use bindery_signature::desc::PipelineResourceSignatureDesc;
use bindery_signature::signature::PipelineResourceSignature;
use parking_lot::RwLock;

// ============================================================================
// DeviceSignature
// ============================================================================

/// Type-erased backend signature.
pub trait DeviceSignature: Send + Sync + fmt::Debug {
    fn backend(&self) -> BackendKind;

    fn desc(&self) -> &PipelineResourceSignatureDesc;

    fn hash(&self) -> u64;

    /// Backend-tagged blob, see [`PipelineResourceSignature::serialize`].
    fn serialize(&self) -> Result<Vec<u8>>;

    /// `false` when `other` belongs to another backend.
    fn is_compatible(&self, other: &dyn DeviceSignature) -> bool;

    /// Descriptor sets / register spaces the signature occupies.
    fn binding_group_count(&self) -> u32;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<B: SignatureBackend> DeviceSignature for PipelineResourceSignature<B> {
    fn backend(&self) -> BackendKind {
        B::KIND
    }

    fn desc(&self) -> &PipelineResourceSignatureDesc {
        PipelineResourceSignature::desc(self)
    }

    fn hash(&self) -> u64 {
        PipelineResourceSignature::hash(self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        PipelineResourceSignature::serialize(self)
    }

    fn is_compatible(&self, other: &dyn DeviceSignature) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.is_compatible_with(other))
    }

    fn binding_group_count(&self) -> u32 {
        PipelineResourceSignature::binding_group_count(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Recovers the concrete signature type from a type-erased one.
#[must_use]
pub fn downcast_signature<B: SignatureBackend>(
    signature: &Arc<dyn DeviceSignature>,
) -> Option<Arc<PipelineResourceSignature<B>>> {
    Arc::clone(signature).into_any().downcast().ok()
}

// ============================================================================
// SignatureFactory
// ============================================================================

/// Creates and reads back signatures of a single backend.
pub trait SignatureFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn create(&self, desc: &PipelineResourceSignatureDesc, stages: ShaderStages) -> Result<Arc<dyn DeviceSignature>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Arc<dyn DeviceSignature>>;
}

/// [`SignatureFactory`] of backend `B`.
pub struct BackendFactory<B>(PhantomData<fn() -> B>);

impl<B> BackendFactory<B> {
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<B> Default for BackendFactory<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SignatureBackend> SignatureFactory for BackendFactory<B> {
    fn kind(&self) -> BackendKind {
        B::KIND
    }

    fn create(&self, desc: &PipelineResourceSignatureDesc, stages: ShaderStages) -> Result<Arc<dyn DeviceSignature>> {
        let signature = PipelineResourceSignature::<B>::new(desc.clone(), stages)?;
        Ok(Arc::new(signature))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Arc<dyn DeviceSignature>> {
        let signature = PipelineResourceSignature::<B>::deserialize(bytes)?;
        Ok(Arc::new(signature))
    }
}

// ============================================================================
// BackendRegistry
// ============================================================================

/// Factories indexed by [`BackendKind`].
pub struct BackendRegistry {
    factories: RwLock<[Option<Arc<dyn SignatureFactory>>; BackendKind::COUNT]>,
}

impl BackendRegistry {
    /// A registry without any backend.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(Default::default()),
        }
    }

    /// Registers the built-in factory of every backend selected by `flags`.
    #[must_use]
    pub fn from_device_flags(flags: DeviceFlags) -> Self {
        let registry = Self::empty();
        for kind in flags.backends() {
            registry.register(builtin_factory(kind));
        }
        registry
    }

    /// Installs `factory`, replacing any previous factory of its backend.
    pub fn register(&self, factory: Arc<dyn SignatureFactory>) {
        let kind = factory.kind();
        log::debug!("Registered {kind} signature factory");
        self.factories.write()[kind.index()] = Some(factory);
    }

    pub fn factory(&self, kind: BackendKind) -> Result<Arc<dyn SignatureFactory>> {
        self.factories.read()[kind.index()]
            .clone()
            .ok_or(BinderyError::BackendNotAvailable(kind))
    }

    #[must_use]
    pub fn is_registered(&self, kind: BackendKind) -> bool {
        self.factories.read()[kind.index()].is_some()
    }

    /// Registered backends, in [`BackendKind`] order.
    #[must_use]
    pub fn backends(&self) -> Vec<BackendKind> {
        let factories = self.factories.read();
        BackendKind::ALL
            .into_iter()
            .filter(|kind| factories[kind.index()].is_some())
            .collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::from_device_flags(DeviceFlags::all())
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.backends())
            .finish()
    }
}

fn builtin_factory(kind: BackendKind) -> Arc<dyn SignatureFactory> {
    match kind {
        BackendKind::Direct3D11 => Arc::new(BackendFactory::<D3D11Backend>::new()),
        BackendKind::Direct3D12 => Arc::new(BackendFactory::<D3D12Backend>::new()),
        BackendKind::OpenGl => Arc::new(BackendFactory::<GlBackend>::new()),
        BackendKind::Vulkan => Arc::new(BackendFactory::<VulkanBackend>::new()),
        BackendKind::Metal => Arc::new(BackendFactory::<MetalBackend>::new()),
    }
}
