//! Archiver
//!
//! Collects resource signatures and pipelines for a set of backends and
//! writes them into a single device object archive (see [`crate::archive`]).
//!
//! # Pipeline archiving
//!
//! For every backend requested by a [`PipelineStateArchiveInfo`]:
//!
//! 1. Signatures are placed at their binding indices.
//! 2. Every shader is remapped against them (see [`crate::remap`]).
//! 3. The resulting byte code is deduplicated against shaders already in the
//!    archive.
//!
//! A pipeline is only committed when all backends succeed, so a failing
//! request leaves the archive unchanged.

use std::io::Write;
use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::hash::blob_hash;
use bindery_core::types::{BackendKind, DeviceFlags, ShaderStages};
use bindery_signature::backend::SignatureBackend;
use bindery_signature::desc::PipelineResourceSignatureDesc;
use bindery_signature::serializer::{Serializable, measure, write_into};
use bumpalo::Bump;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::archive::{
    ARCHIVE_MAGIC, ARCHIVE_VERSION, ArchiveHeader, ChunkHeader, ChunkType, DataRef, INVALID_OFFSET, PerDevice,
    PipelineRecord, RecordList, ShadersRecord, SignatureRecord,
};
use crate::device::SerializationDevice;
use crate::pipeline::{PipelineStateCreateInfo, PipelineType};
use crate::remap::{PipelineLayout, with_backend};
use crate::serializable_signature::SerializableResourceSignature;
use crate::settings::{ArchiveFlags, PipelineStateArchiveInfo, ResourceSignatureArchiveInfo};

const SIGNATURE_KIND: &str = "Resource signature";

// ============================================================================
// Archive contents
// ============================================================================

/// Deduplicated shader byte code of one backend.
#[derive(Debug, Default)]
struct ShaderTable {
    blobs: Vec<Vec<u8>>,
    by_hash: FxHashMap<u64, SmallVec<[u32; 1]>>,
}

impl ShaderTable {
    /// Index of an identical blob, adding `bytes` if there is none.
    fn intern(&mut self, bytes: Vec<u8>) -> u32 {
        let candidates = self.by_hash.entry(blob_hash(&bytes)).or_default();
        if let Some(&index) = candidates.iter().find(|&&i| self.blobs[i as usize] == bytes) {
            return index;
        }
        let index = self.blobs.len() as u32;
        candidates.push(index);
        self.blobs.push(bytes);
        index
    }
}

#[derive(Debug)]
struct ArchivedPipeline {
    name: String,
    signature_names: Vec<String>,
    /// Indices into the backend's [`ShaderTable`], in pipeline order.
    shaders: PerDevice<Option<Vec<u32>>>,
}

#[derive(Debug, Default)]
struct ArchiveContents {
    signatures: Vec<Arc<SerializableResourceSignature>>,
    signature_index: FxHashMap<String, usize>,
    signature_cache: FxHashMap<u64, SmallVec<[Arc<SerializableResourceSignature>; 1]>>,
    pipelines: [Vec<ArchivedPipeline>; PipelineType::COUNT],
    pipeline_index: [FxHashMap<String, usize>; PipelineType::COUNT],
    shaders: PerDevice<ShaderTable>,
}

impl ArchiveContents {
    /// Fails if another object already uses the name of `signature`.
    fn check_signature_name(&self, signature: &Arc<SerializableResourceSignature>) -> Result<()> {
        if let Some(&index) = self.signature_index.get(signature.name())
            && !Arc::ptr_eq(&self.signatures[index], signature)
        {
            log::error!(
                "{SIGNATURE_KIND} with name '{}' is already present in the archive",
                signature.name()
            );
            return Err(BinderyError::DuplicateObjectName {
                kind: SIGNATURE_KIND,
                name: signature.name().to_owned(),
            });
        }
        Ok(())
    }

    fn add_signature(&mut self, signature: Arc<SerializableResourceSignature>) -> Result<()> {
        self.check_signature_name(&signature)?;
        if !self.signature_index.contains_key(signature.name()) {
            log::debug!("Added {SIGNATURE_KIND} '{}' to the archive", signature.name());
            self.signature_index
                .insert(signature.name().to_owned(), self.signatures.len());
            self.signatures.push(signature);
        }
        Ok(())
    }

    /// A cached signature equal to `signature` with data for all of its backends.
    fn find_cached_signature(&self, signature: &SerializableResourceSignature) -> Option<Arc<SerializableResourceSignature>> {
        let flags = signature
            .backends()
            .fold(DeviceFlags::empty(), |acc, kind| acc | kind.device_flags());
        let cached = self
            .signature_cache
            .get(&signature.hash())?
            .iter()
            .find(|cached| cached.has_device_data(flags) && ***cached == *signature)?;
        log::debug!(
            "Reusing cached signature '{}' for '{}'",
            cached.name(),
            signature.name()
        );
        Some(Arc::clone(cached))
    }

    fn cache_signature(&mut self, signature: Arc<SerializableResourceSignature>) -> Arc<SerializableResourceSignature> {
        if let Some(cached) = self.find_cached_signature(&signature) {
            return cached;
        }
        self.signature_cache
            .entry(signature.hash())
            .or_default()
            .push(Arc::clone(&signature));
        signature
    }

    /// First free name of the form `base`, `base1`, `base2`, ...
    fn unique_signature_name(&self, base: String) -> String {
        if !self.signature_index.contains_key(&base) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let name = format!("{base}{n}");
            if !self.signature_index.contains_key(&name) {
                return name;
            }
            n += 1;
        }
    }
}

// ============================================================================
// Archiver
// ============================================================================

/// Builds device object archives from signatures and pipelines.
///
/// All methods take `&self`; the archiver can be shared between threads.
#[derive(Debug)]
pub struct Archiver {
    device: Arc<SerializationDevice>,
    contents: Mutex<ArchiveContents>,
}

impl Archiver {
    #[must_use]
    pub fn new(device: Arc<SerializationDevice>) -> Self {
        Self {
            device,
            contents: Mutex::new(ArchiveContents::default()),
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<SerializationDevice> {
        &self.device
    }

    // ------------------------------------------------------------------------
    // Signatures
    // ------------------------------------------------------------------------

    /// Adds `signature` under its own name.
    ///
    /// Adding the same object again is a no-op. A different object with the
    /// same name is rejected with [`BinderyError::DuplicateObjectName`].
    pub fn add_resource_signature(&self, signature: Arc<SerializableResourceSignature>) -> Result<()> {
        self.contents.lock().add_signature(signature)
    }

    /// Creates a signature for `info.device_flags` and adds it.
    pub fn add_pipeline_resource_signature(
        &self,
        desc: PipelineResourceSignatureDesc,
        info: ResourceSignatureArchiveInfo,
    ) -> Result<Arc<SerializableResourceSignature>> {
        let signature = self
            .device
            .create_pipeline_resource_signature(desc, info.device_flags, ShaderStages::empty())?;
        self.add_resource_signature(Arc::clone(&signature))?;
        Ok(signature)
    }

    /// Returns a previously cached signature equal to `signature` that carries
    /// data for all of its backends, or caches `signature` itself.
    pub fn cache_signature(&self, signature: Arc<SerializableResourceSignature>) -> Arc<SerializableResourceSignature> {
        self.contents.lock().cache_signature(signature)
    }

    #[must_use]
    pub fn signature(&self, name: &str) -> Option<Arc<SerializableResourceSignature>> {
        let contents = self.contents.lock();
        contents
            .signature_index
            .get(name)
            .map(|&index| Arc::clone(&contents.signatures[index]))
    }

    #[must_use]
    pub fn signature_count(&self) -> usize {
        self.contents.lock().signatures.len()
    }

    /// Signature names in the order they were added.
    #[must_use]
    pub fn signature_names(&self) -> Vec<String> {
        self.contents
            .lock()
            .signatures
            .iter()
            .map(|s| s.name().to_owned())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------------

    pub fn add_graphics_pipeline(&self, create_info: &PipelineStateCreateInfo, info: PipelineStateArchiveInfo) -> Result<()> {
        self.add_pipeline(PipelineType::Graphics, create_info, info)
    }

    pub fn add_compute_pipeline(&self, create_info: &PipelineStateCreateInfo, info: PipelineStateArchiveInfo) -> Result<()> {
        self.add_pipeline(PipelineType::Compute, create_info, info)
    }

    /// Vulkan and Direct3D12 only.
    pub fn add_ray_tracing_pipeline(&self, create_info: &PipelineStateCreateInfo, info: PipelineStateArchiveInfo) -> Result<()> {
        self.add_pipeline(PipelineType::RayTracing, create_info, info)
    }

    /// Metal only.
    pub fn add_tile_pipeline(&self, create_info: &PipelineStateCreateInfo, info: PipelineStateArchiveInfo) -> Result<()> {
        self.add_pipeline(PipelineType::Tile, create_info, info)
    }

    fn add_pipeline(
        &self,
        pipeline_type: PipelineType,
        create_info: &PipelineStateCreateInfo,
        info: PipelineStateArchiveInfo,
    ) -> Result<()> {
        if create_info.pipeline_type != pipeline_type {
            return Err(BinderyError::InvalidDescription(format!(
                "'{}' is a {}, not a {}",
                create_info.name,
                create_info.pipeline_type.name(),
                pipeline_type.name()
            )));
        }
        self.device.check_device_flags(info.device_flags)?;
        if let Some(kind) = info.device_flags.backends().find(|&kind| !pipeline_type.supported_by(kind)) {
            return Err(BinderyError::InvalidDeviceFlags(format!(
                "{} '{}' cannot be archived for {kind}",
                pipeline_type.name(),
                create_info.name
            )));
        }
        create_info.validate()?;

        let mut contents = self.contents.lock();
        let name = &create_info.name;
        if contents.pipeline_index[pipeline_type as usize].contains_key(name) {
            log::error!("{} with name '{name}' is already present in the archive", pipeline_type.name());
            return Err(BinderyError::DuplicateObjectName {
                kind: pipeline_type.name(),
                name: name.clone(),
            });
        }

        for shader in &create_info.shaders {
            if let Some(kind) = info.device_flags.backends().find(|&kind| !shader.has_backend(kind)) {
                return Err(BinderyError::InvalidDescription(format!(
                    "Shader '{}' of pipeline '{name}' was not created for {kind}",
                    shader.name()
                )));
            }
        }

        let generated = create_info.resource_signatures.is_empty();
        let signatures = if generated {
            vec![self.default_signature(&contents, create_info, info.device_flags)?]
        } else {
            for signature in &create_info.resource_signatures {
                if !signature.has_device_data(info.device_flags) {
                    return Err(BinderyError::InvalidDescription(format!(
                        "Signature '{}' of pipeline '{name}' lacks data for some of {:?}",
                        signature.name(),
                        info.device_flags
                    )));
                }
            }
            create_info.resource_signatures.clone()
        };
        for (i, signature) in signatures.iter().enumerate() {
            contents.check_signature_name(signature)?;
            if signatures[..i]
                .iter()
                .any(|other| other.name() == signature.name() && !Arc::ptr_eq(other, signature))
            {
                return Err(BinderyError::DuplicateObjectName {
                    kind: SIGNATURE_KIND,
                    name: signature.name().to_owned(),
                });
            }
        }

        let strip_reflection = info.flags.contains(ArchiveFlags::STRIP_REFLECTION) || self.device.settings().strip_reflection;
        let mut remapped: PerDevice<Option<Vec<Vec<u8>>>> = Default::default();
        for kind in info.device_flags.backends() {
            let shaders = with_backend!(kind, B => self.remap_pipeline::<B>(create_info, &signatures, strip_reflection))
                .inspect_err(|err| log::error!("Failed to archive {} '{name}' for {kind}: {err}", pipeline_type.name()))?;
            remapped[kind.index()] = Some(shaders);
        }

        // Commit.
        let signature_names = signatures.iter().map(|s| s.name().to_owned()).collect();
        if generated {
            for signature in &signatures {
                contents.cache_signature(Arc::clone(signature));
            }
        }
        for signature in signatures {
            contents.add_signature(signature)?;
        }
        let mut shaders: PerDevice<Option<Vec<u32>>> = Default::default();
        for (kind, device_shaders) in BackendKind::ALL.into_iter().zip(remapped) {
            let table = &mut contents.shaders[kind.index()];
            shaders[kind.index()] =
                device_shaders.map(|blobs| blobs.into_iter().map(|bytes| table.intern(bytes)).collect());
        }

        let index = contents.pipelines[pipeline_type as usize].len();
        contents.pipeline_index[pipeline_type as usize].insert(name.clone(), index);
        contents.pipelines[pipeline_type as usize].push(ArchivedPipeline {
            name: name.clone(),
            signature_names,
            shaders,
        });
        log::debug!("Added {} '{name}' for {:?}", pipeline_type.name(), info.device_flags);
        Ok(())
    }

    /// Generates the signature of a pipeline without explicit signatures, or
    /// reuses an equal one from the cache. The cache itself is only updated
    /// once the pipeline is committed.
    fn default_signature(
        &self,
        contents: &ArchiveContents,
        create_info: &PipelineStateCreateInfo,
        flags: DeviceFlags,
    ) -> Result<Arc<SerializableResourceSignature>> {
        let name = contents.unique_signature_name(format!("Default Signature of PSO '{}'", create_info.name));
        let mut desc = create_info.default_signature_desc(name)?;
        desc.srb_allocation_granularity = self.device.settings().srb_allocation_granularity;
        let signature = self
            .device
            .create_pipeline_resource_signature(desc, flags, create_info.active_stages())?;
        Ok(contents.find_cached_signature(&signature).unwrap_or(signature))
    }

    fn remap_pipeline<B: SignatureBackend>(
        &self,
        create_info: &PipelineStateCreateInfo,
        signatures: &[Arc<SerializableResourceSignature>],
        strip_reflection: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let layout = PipelineLayout::<B>::new(&create_info.name, signatures)?;
        self.device
            .check_pipeline_layout(&create_info.name, B::KIND, layout.binding_group_count())?;
        create_info
            .shaders
            .iter()
            .map(|shader| Ok(layout.remap_shader(shader, strip_reflection)?.as_bytes().to_vec()))
            .collect()
    }

    #[must_use]
    pub fn pipeline_count(&self, pipeline_type: PipelineType) -> usize {
        self.contents.lock().pipelines[pipeline_type as usize].len()
    }

    /// Pipeline names of one type in the order they were added.
    #[must_use]
    pub fn pipeline_names(&self, pipeline_type: PipelineType) -> Vec<String> {
        self.contents.lock().pipelines[pipeline_type as usize]
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Number of distinct shaders stored for `kind`.
    #[must_use]
    pub fn shader_count(&self, kind: BackendKind) -> usize {
        self.contents.lock().shaders[kind.index()].blobs.len()
    }

    /// Removes all signatures and pipelines.
    pub fn reset(&self) {
        *self.contents.lock() = ArchiveContents::default();
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    pub fn serialize_to_blob(&self) -> Result<Vec<u8>> {
        let arena = Bump::new();
        let image = self.contents.lock().build_image(&arena)?;
        let mut blob = Vec::with_capacity(image.size);
        image.write_to(&mut blob)?;
        Ok(blob)
    }

    pub fn serialize_to_stream<W: Write>(&self, mut stream: W) -> Result<()> {
        let arena = Bump::new();
        let image = self.contents.lock().build_image(&arena)?;
        image.write_to(&mut stream)?;
        stream.flush()?;
        Ok(())
    }
}

// ============================================================================
// Archive image
// ============================================================================

/// Backend data of one device block under construction.
#[derive(Debug, Default)]
struct DeviceBlock {
    data: Vec<u8>,
    used: bool,
}

impl DeviceBlock {
    fn push(&mut self, bytes: &[u8]) -> Result<DataRef> {
        let data_ref = DataRef {
            offset: archive_offset(self.data.len())?,
            size: archive_offset(bytes.len())?,
        };
        self.data.extend_from_slice(bytes);
        self.used = true;
        Ok(data_ref)
    }
}

fn archive_offset(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| BinderyError::ArchiveFormat(format!("offset {value} exceeds the 4 GiB archive limit")))
}

/// A fully laid out archive.
struct ArchiveImage<'a> {
    header: ArchiveHeader,
    chunks: Vec<ChunkHeader>,
    bodies: Vec<&'a [u8]>,
    blocks: Vec<Vec<u8>>,
    size: usize,
}

impl ArchiveImage<'_> {
    fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(bytemuck::bytes_of(&self.header))?;
        out.write_all(bytemuck::cast_slice(&self.chunks))?;
        for body in &self.bodies {
            out.write_all(body)?;
        }
        for block in &self.blocks {
            out.write_all(block)?;
        }
        Ok(())
    }
}

impl ArchiveContents {
    fn build_image<'a>(&self, arena: &'a Bump) -> Result<ArchiveImage<'a>> {
        let mut blocks: PerDevice<DeviceBlock> = Default::default();

        let mut signatures = RecordList(
            self.signatures
                .iter()
                .map(|signature| {
                    let mut record = SignatureRecord {
                        name: signature.name().to_owned(),
                        device_data: [DataRef::NONE; BackendKind::COUNT],
                    };
                    for kind in signature.backends() {
                        if let Some(data) = signature.device_data(kind) {
                            record.device_data[kind.index()] = blocks[kind.index()].push(data)?;
                        }
                    }
                    Ok(record)
                })
                .collect::<Result<Vec<_>>>()?,
        );

        let mut shaders = ShadersRecord::default();
        for (index, table) in self.shaders.iter().enumerate() {
            shaders.device_shaders[index] = table
                .blobs
                .iter()
                .map(|blob| blocks[index].push(blob))
                .collect::<Result<_>>()?;
        }

        let mut bodies = vec![
            (ChunkType::ResourceSignatures, alloc_body(arena, &mut signatures)?),
            (ChunkType::Shaders, alloc_body(arena, &mut shaders)?),
        ];
        for pipeline_type in PipelineType::ALL {
            let mut records = pipeline_records(&self.pipelines[pipeline_type as usize], &mut blocks)?;
            bodies.push((ChunkType::for_pipeline(pipeline_type), alloc_body(arena, &mut records)?));
        }

        let mut offset = std::mem::size_of::<ArchiveHeader>() + bodies.len() * std::mem::size_of::<ChunkHeader>();
        let mut chunks = Vec::with_capacity(bodies.len());
        for (chunk_type, body) in &bodies {
            chunks.push(ChunkHeader {
                chunk_type: *chunk_type as u32,
                size: archive_offset(body.len())?,
                offset: archive_offset(offset)?,
            });
            offset += body.len();
        }

        let mut block_base_offsets = [INVALID_OFFSET; BackendKind::COUNT];
        let mut device_blocks = Vec::new();
        for (base, block) in block_base_offsets.iter_mut().zip(blocks) {
            if block.used {
                *base = archive_offset(offset)?;
                offset += block.data.len();
                device_blocks.push(block.data);
            }
        }
        archive_offset(offset)?;

        Ok(ArchiveImage {
            header: ArchiveHeader {
                magic: ARCHIVE_MAGIC,
                version: ARCHIVE_VERSION,
                num_chunks: chunks.len() as u32,
                _padding: 0,
                block_base_offsets,
                _reserved: 0,
            },
            chunks,
            bodies: bodies.into_iter().map(|(_, body)| body).collect(),
            blocks: device_blocks,
            size: offset,
        })
    }
}

fn pipeline_records(pipelines: &[ArchivedPipeline], blocks: &mut PerDevice<DeviceBlock>) -> Result<RecordList<PipelineRecord>> {
    let mut records = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let mut record = PipelineRecord {
            name: pipeline.name.clone(),
            signature_names: pipeline.signature_names.clone(),
            device_data: [DataRef::NONE; BackendKind::COUNT],
        };
        for (index, indices) in pipeline.shaders.iter().enumerate() {
            if let Some(indices) = indices {
                record.device_data[index] = blocks[index].push(bytemuck::cast_slice(indices))?;
            }
        }
        records.push(record);
    }
    Ok(RecordList(records))
}

/// Measures `record` and writes it into an arena slice of exactly that size.
fn alloc_body<'a, T: Serializable>(arena: &'a Bump, record: &mut T) -> Result<&'a [u8]> {
    let body = arena.alloc_slice_fill_copy(measure(record)?, 0u8);
    write_into(record, body)?;
    Ok(body)
}
