//! Device object archive format and reader.
//!
//! # Layout
//!
//! ```text
//! ArchiveHeader
//! ChunkHeader[num_chunks]
//! chunk bodies                       (records, see below)
//! device block 0 .. device block 4   (one per backend, may be absent)
//! ```
//!
//! Chunk bodies are written with the signature serializer. Records refer to
//! backend data through [`DataRef`]s, offsets relative to the start of that
//! backend's device block (`block_base_offsets`). All integers use the host
//! byte order.

use std::io::Read;
use std::sync::Arc;

use bindery_core::errors::{BinderyError, Result};
use bindery_core::types::BackendKind;
use bindery_signature::backend::SignatureBackend;
use bindery_signature::serializer::{Mode, Serializable, Serializer, from_bytes};
use bindery_signature::signature::PipelineResourceSignature;
use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;

use crate::pipeline::PipelineType;
use crate::registry::{BackendRegistry, DeviceSignature};

pub const ARCHIVE_MAGIC: u32 = 0x4442_4E42;
pub const ARCHIVE_VERSION: u32 = 2;
pub const INVALID_OFFSET: u32 = u32::MAX;

// ============================================================================
// Raw structures
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ArchiveHeader {
    pub magic: u32,
    pub version: u32,
    pub num_chunks: u32,
    pub _padding: u32,
    /// File offset of each backend's device block, [`INVALID_OFFSET`] if absent.
    pub block_base_offsets: [u32; BackendKind::COUNT],
    pub _reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ChunkHeader {
    pub chunk_type: u32,
    pub size: u32,
    pub offset: u32,
}

const _: () = assert!(std::mem::size_of::<ArchiveHeader>() == 40);
const _: () = assert!(std::mem::size_of::<ChunkHeader>() == 12);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ChunkType {
    ResourceSignatures = 0,
    GraphicsPipelines = 1,
    ComputePipelines = 2,
    Shaders = 3,
    RayTracingPipelines = 4,
    TilePipelines = 5,
}

impl ChunkType {
    pub const COUNT: usize = 6;

    #[must_use]
    pub fn for_pipeline(pipeline_type: PipelineType) -> Self {
        match pipeline_type {
            PipelineType::Graphics => Self::GraphicsPipelines,
            PipelineType::Compute => Self::ComputePipelines,
            PipelineType::RayTracing => Self::RayTracingPipelines,
            PipelineType::Tile => Self::TilePipelines,
        }
    }

    /// Pipeline type whose records the chunk holds.
    #[must_use]
    pub fn pipeline_type(self) -> Option<PipelineType> {
        PipelineType::ALL.into_iter().find(|&ty| Self::for_pipeline(ty) == self)
    }
}

impl TryFrom<u32> for ChunkType {
    type Error = BinderyError;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => Self::ResourceSignatures,
            1 => Self::GraphicsPipelines,
            2 => Self::ComputePipelines,
            3 => Self::Shaders,
            4 => Self::RayTracingPipelines,
            5 => Self::TilePipelines,
            _ => return Err(BinderyError::ArchiveFormat(format!("unknown chunk type {value}"))),
        })
    }
}

/// Location of a piece of backend data inside its device block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DataRef {
    pub offset: u32,
    pub size: u32,
}

impl DataRef {
    pub const NONE: Self = Self {
        offset: INVALID_OFFSET,
        size: 0,
    };

    #[inline]
    #[must_use]
    pub fn is_none(self) -> bool {
        self.offset == INVALID_OFFSET
    }
}

impl Default for DataRef {
    fn default() -> Self {
        Self::NONE
    }
}

pub(crate) type PerDevice<T> = [T; BackendKind::COUNT];

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SignatureRecord {
    pub name: String,
    pub device_data: PerDevice<DataRef>,
}

impl Serializable for SignatureRecord {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.string(&mut self.name)?;
        ser.pod(&mut self.device_data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PipelineRecord {
    pub name: String,
    pub signature_names: Vec<String>,
    /// Shader index list of each backend.
    pub device_data: PerDevice<DataRef>,
}

impl Serializable for PipelineRecord {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.string(&mut self.name)?;
        ser.vec_with(&mut self.signature_names, |ser, name| ser.string(name))?;
        ser.pod(&mut self.device_data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ShadersRecord {
    pub device_shaders: PerDevice<Vec<DataRef>>,
}

impl Serializable for ShadersRecord {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        self.device_shaders.iter_mut().try_for_each(|shaders| ser.pod_vec(shaders))
    }
}

/// Chunk body: a length-prefixed list of records.
#[derive(Debug, Default)]
pub(crate) struct RecordList<T>(pub Vec<T>);

impl<T: Serializable + Default> Serializable for RecordList<T> {
    fn serialize<M: Mode>(&mut self, ser: &mut Serializer<M>) -> Result<()> {
        ser.vec_with(&mut self.0, |ser, record| record.serialize(ser))
    }
}

// ============================================================================
// Reader
// ============================================================================

/// A pipeline read back from an archive for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedPipeline {
    pub name: String,
    pub pipeline_type: PipelineType,
    pub signature_names: Vec<String>,
    /// Archived byte code of every shader, in pipeline order.
    pub shaders: Vec<Vec<u8>>,
}

/// Read-only view over a serialized archive.
#[derive(Debug)]
pub struct DeviceObjectArchive {
    data: Vec<u8>,
    header: ArchiveHeader,
    signatures: Vec<SignatureRecord>,
    signature_index: FxHashMap<String, usize>,
    pipelines: [Vec<PipelineRecord>; PipelineType::COUNT],
    pipeline_index: [FxHashMap<String, usize>; PipelineType::COUNT],
    shaders: ShadersRecord,
}

impl DeviceObjectArchive {
    /// Parses and validates the header, chunk table and records of `data`.
    pub fn load(data: Vec<u8>) -> Result<Self> {
        let header_size = std::mem::size_of::<ArchiveHeader>();
        let header: ArchiveHeader = data
            .get(..header_size)
            .map(bytemuck::pod_read_unaligned)
            .ok_or_else(|| BinderyError::ArchiveFormat(format!("{} bytes is too short for an archive", data.len())))?;
        if header.magic != ARCHIVE_MAGIC {
            return Err(BinderyError::ArchiveFormat(format!("invalid magic number {:#010x}", header.magic)));
        }
        if header.version != ARCHIVE_VERSION {
            return Err(BinderyError::ArchiveFormat(format!(
                "unsupported archive version {} (expected {ARCHIVE_VERSION})",
                header.version
            )));
        }

        let mut archive = Self {
            data: Vec::new(),
            header,
            signatures: Vec::new(),
            signature_index: FxHashMap::default(),
            pipelines: Default::default(),
            pipeline_index: Default::default(),
            shaders: ShadersRecord::default(),
        };

        let chunk_size = std::mem::size_of::<ChunkHeader>();
        let mut seen = [false; ChunkType::COUNT];
        for i in 0..header.num_chunks as usize {
            let start = header_size + i * chunk_size;
            let chunk: ChunkHeader = data
                .get(start..start + chunk_size)
                .map(bytemuck::pod_read_unaligned)
                .ok_or_else(|| BinderyError::ArchiveFormat(format!("chunk header {i} is out of bounds")))?;
            let chunk_type = ChunkType::try_from(chunk.chunk_type)?;
            if std::mem::replace(&mut seen[chunk_type as usize], true) {
                return Err(BinderyError::ArchiveFormat(format!("duplicate {chunk_type:?} chunk")));
            }
            let body = data
                .get(chunk.offset as usize..chunk.offset as usize + chunk.size as usize)
                .ok_or_else(|| BinderyError::ArchiveFormat(format!("{chunk_type:?} chunk is out of bounds")))?;
            archive
                .read_chunk(chunk_type, body)
                .map_err(|err| BinderyError::ArchiveFormat(format!("{chunk_type:?} chunk: {err}")))?;
        }

        archive.data = data;
        archive.validate_refs()?;
        log::debug!(
            "Loaded archive: {} signature(s), pipelines per type {:?}",
            archive.signatures.len(),
            archive.pipelines.each_ref().map(Vec::len)
        );
        Ok(archive)
    }

    /// Reads a whole archive from `reader`.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::load(data)
    }

    fn read_chunk(&mut self, chunk_type: ChunkType, body: &[u8]) -> Result<()> {
        match chunk_type {
            ChunkType::ResourceSignatures => {
                let RecordList(records) = from_bytes::<RecordList<SignatureRecord>>(body)?;
                self.signature_index = index_by_name(&records, |r| &r.name, "Resource signature")?;
                self.signatures = records;
            }
            ChunkType::Shaders => self.shaders = from_bytes(body)?,
            ChunkType::GraphicsPipelines
            | ChunkType::ComputePipelines
            | ChunkType::RayTracingPipelines
            | ChunkType::TilePipelines => {
                let Some(pipeline_type) = chunk_type.pipeline_type() else {
                    return Ok(());
                };
                let RecordList(records) = from_bytes::<RecordList<PipelineRecord>>(body)?;
                self.pipeline_index[pipeline_type as usize] = index_by_name(&records, |r| &r.name, pipeline_type.name())?;
                self.pipelines[pipeline_type as usize] = records;
            }
        }
        Ok(())
    }

    fn validate_refs(&self) -> Result<()> {
        let signature_refs = self.signatures.iter().flat_map(|r| r.device_data.iter().enumerate());
        let pipeline_refs = self.pipelines.iter().flatten().flat_map(|r| r.device_data.iter().enumerate());
        let shader_refs = self
            .shaders
            .device_shaders
            .iter()
            .enumerate()
            .flat_map(|(kind, refs)| refs.iter().map(move |r| (kind, r)));

        for (kind, data_ref) in signature_refs.chain(pipeline_refs).chain(shader_refs) {
            if !data_ref.is_none() {
                self.block_data(BackendKind::ALL[kind], *data_ref)?;
            }
        }
        Ok(())
    }

    fn block_data(&self, kind: BackendKind, data_ref: DataRef) -> Result<&[u8]> {
        let base = self.header.block_base_offsets[kind.index()];
        if base == INVALID_OFFSET {
            return Err(BinderyError::ArchiveFormat(format!("archive has no {kind} device block")));
        }
        let start = base as usize + data_ref.offset as usize;
        self.data
            .get(start..start + data_ref.size as usize)
            .ok_or_else(|| BinderyError::ArchiveFormat(format!("{kind} data at {start} is out of bounds")))
    }

    #[must_use]
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Signature names in archive order.
    pub fn signature_names(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(|r| r.name.as_str())
    }

    /// Pipeline names of one type in archive order.
    pub fn pipeline_names(&self, pipeline_type: PipelineType) -> impl Iterator<Item = &str> {
        self.pipelines[pipeline_type as usize].iter().map(|r| r.name.as_str())
    }

    /// Serialized `kind` blob of signature `name`.
    pub fn signature_data(&self, name: &str, kind: BackendKind) -> Result<&[u8]> {
        let record = self
            .signature_index
            .get(name)
            .map(|&i| &self.signatures[i])
            .ok_or_else(|| BinderyError::ObjectNotFound {
                kind: "Resource signature",
                name: name.to_owned(),
            })?;
        let data_ref = record.device_data[kind.index()];
        if data_ref.is_none() {
            return Err(BinderyError::ObjectNotFound {
                kind: "Resource signature device data",
                name: format!("{name} ({kind})"),
            });
        }
        self.block_data(kind, data_ref)
    }

    /// Reconstructs signature `name` for backend `B`.
    pub fn unpack_resource_signature<B: SignatureBackend>(&self, name: &str) -> Result<Arc<PipelineResourceSignature<B>>> {
        let signature = PipelineResourceSignature::<B>::deserialize(self.signature_data(name, B::KIND)?)?;
        log::debug!("Unpacked {} signature '{name}'", B::KIND);
        Ok(Arc::new(signature))
    }

    /// Reconstructs signature `name` through the factory registered for `kind`.
    pub fn unpack_device_signature(
        &self,
        registry: &BackendRegistry,
        name: &str,
        kind: BackendKind,
    ) -> Result<Arc<dyn DeviceSignature>> {
        registry.factory(kind)?.deserialize(self.signature_data(name, kind)?)
    }

    /// Signature names and archived shaders of pipeline `name` for `kind`.
    /// Pipeline types are searched in [`PipelineType::ALL`] order.
    pub fn unpack_pipeline(&self, name: &str, kind: BackendKind) -> Result<UnpackedPipeline> {
        let (pipeline_type, record) = PipelineType::ALL
            .into_iter()
            .find_map(|ty| {
                self.pipeline_index[ty as usize]
                    .get(name)
                    .map(|&i| (ty, &self.pipelines[ty as usize][i]))
            })
            .ok_or_else(|| BinderyError::ObjectNotFound {
                kind: "Pipeline",
                name: name.to_owned(),
            })?;

        let data_ref = record.device_data[kind.index()];
        if data_ref.is_none() {
            return Err(BinderyError::ObjectNotFound {
                kind: "Pipeline device data",
                name: format!("{name} ({kind})"),
            });
        }
        let index_bytes = self.block_data(kind, data_ref)?;
        let indices: Vec<u32> = index_bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let device_shaders = &self.shaders.device_shaders[kind.index()];
        let shaders = indices
            .iter()
            .map(|&index| {
                let data_ref = device_shaders.get(index as usize).copied().ok_or_else(|| {
                    BinderyError::ArchiveFormat(format!("pipeline '{name}' references missing {kind} shader {index}"))
                })?;
                self.block_data(kind, data_ref).map(<[u8]>::to_vec)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(UnpackedPipeline {
            name: record.name.clone(),
            pipeline_type,
            signature_names: record.signature_names.clone(),
            shaders,
        })
    }
}

fn index_by_name<T>(records: &[T], name: impl Fn(&T) -> &String, kind: &str) -> Result<FxHashMap<String, usize>> {
    let mut index = FxHashMap::default();
    for (i, record) in records.iter().enumerate() {
        if index.insert(name(record).clone(), i).is_some() {
            return Err(BinderyError::ArchiveFormat(format!("{kind} '{}' appears twice", name(record))));
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_or_foreign_data_is_rejected() {
        assert!(matches!(DeviceObjectArchive::load(vec![0; 8]), Err(BinderyError::ArchiveFormat(_))));

        let header = ArchiveHeader {
            magic: 0x1234_5678,
            version: ARCHIVE_VERSION,
            num_chunks: 0,
            _padding: 0,
            block_base_offsets: [INVALID_OFFSET; BackendKind::COUNT],
            _reserved: 0,
        };
        let err = DeviceObjectArchive::load(bytemuck::bytes_of(&header).to_vec()).unwrap_err();
        assert!(matches!(err, BinderyError::ArchiveFormat(_)));
    }

    #[test]
    fn empty_archive_loads() {
        let header = ArchiveHeader {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            num_chunks: 0,
            _padding: 0,
            block_base_offsets: [INVALID_OFFSET; BackendKind::COUNT],
            _reserved: 0,
        };
        let archive = DeviceObjectArchive::load(bytemuck::bytes_of(&header).to_vec()).unwrap();
        assert_eq!(archive.signature_names().count(), 0);
        assert!(matches!(
            archive.unpack_pipeline("pso", BackendKind::Vulkan),
            Err(BinderyError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn every_pipeline_type_has_its_own_chunk() {
        for ty in PipelineType::ALL {
            let chunk = ChunkType::for_pipeline(ty);
            assert_eq!(chunk.pipeline_type(), Some(ty));
            assert_eq!(ChunkType::try_from(chunk as u32).unwrap(), chunk);
        }
        assert_eq!(ChunkType::Shaders.pipeline_type(), None);
        assert!(ChunkType::try_from(ChunkType::COUNT as u32).is_err());
    }

    #[test]
    fn chunk_out_of_bounds_is_rejected() {
        let header = ArchiveHeader {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            num_chunks: 1,
            _padding: 0,
            block_base_offsets: [INVALID_OFFSET; BackendKind::COUNT],
            _reserved: 0,
        };
        let chunk = ChunkHeader {
            chunk_type: ChunkType::Shaders as u32,
            size: 100,
            offset: 52,
        };
        let mut data = bytemuck::bytes_of(&header).to_vec();
        data.extend_from_slice(bytemuck::bytes_of(&chunk));
        assert!(matches!(DeviceObjectArchive::load(data), Err(BinderyError::ArchiveFormat(_))));
    }
}
