//! Signature and archive benchmarks.
//!
//! - Layout building per backend
//! - Blob serialization and deserialization
//! - Compatibility hashing
//! - Archive image construction and loading

use std::hint::black_box;
use std::sync::Arc;

use bindery::archiver::spirv::ModuleBuilder;
use bindery::archiver::{
    Archiver, DeviceObjectArchive, PipelineStateArchiveInfo, PipelineStateCreateInfo, SerializationDevice,
    ShaderCreateInfo, ShaderResourceDesc,
};
use bindery::core::{DeviceFlags, ShaderResourceType, ShaderResourceVariableType, ShaderStages};
use bindery::signature::{
    D3D12Backend, GlBackend, PipelineResourceDesc, PipelineResourceSignature, PipelineResourceSignatureDesc,
    VulkanBackend,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

const RESOURCE_COUNTS: [usize; 3] = [8, 64, 256];

const VAR_TYPES: [ShaderResourceVariableType; 3] = [
    ShaderResourceVariableType::Static,
    ShaderResourceVariableType::Mutable,
    ShaderResourceVariableType::Dynamic,
];

const RESOURCE_TYPES: [ShaderResourceType; 4] = [
    ShaderResourceType::ConstantBuffer,
    ShaderResourceType::TextureSrv,
    ShaderResourceType::BufferSrv,
    ShaderResourceType::BufferUav,
];

fn desc(count: usize) -> PipelineResourceSignatureDesc {
    (0..count).fold(PipelineResourceSignatureDesc::new("Bench"), |desc, i| {
        desc.with_resource(PipelineResourceDesc::new(
            format!("g_Resource{i}"),
            ShaderStages::VERTEX | ShaderStages::PIXEL,
            1 + (i % 4) as u32,
            RESOURCE_TYPES[i % RESOURCE_TYPES.len()],
            VAR_TYPES[i % VAR_TYPES.len()],
        ))
    })
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_create");
    for count in RESOURCE_COUNTS {
        let desc = desc(count);
        group.bench_with_input(BenchmarkId::new("vulkan", count), &desc, |b, desc| {
            b.iter(|| PipelineResourceSignature::<VulkanBackend>::new(black_box(desc.clone()), ShaderStages::empty()));
        });
        group.bench_with_input(BenchmarkId::new("d3d12", count), &desc, |b, desc| {
            b.iter(|| PipelineResourceSignature::<D3D12Backend>::new(black_box(desc.clone()), ShaderStages::empty()));
        });
        group.bench_with_input(BenchmarkId::new("gl", count), &desc, |b, desc| {
            b.iter(|| PipelineResourceSignature::<GlBackend>::new(black_box(desc.clone()), ShaderStages::empty()));
        });
    }
    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_blob");
    for count in RESOURCE_COUNTS {
        let Ok(signature) = PipelineResourceSignature::<VulkanBackend>::new(desc(count), ShaderStages::empty()) else {
            continue;
        };
        let Ok(blob) = signature.serialize() else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("serialize", count), &signature, |b, signature| {
            b.iter(|| black_box(signature).serialize());
        });
        group.bench_with_input(BenchmarkId::new("deserialize", count), &blob, |b, blob| {
            b.iter(|| PipelineResourceSignature::<VulkanBackend>::deserialize(black_box(blob)));
        });
    }
    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_hash");
    for count in RESOURCE_COUNTS {
        let desc = desc(count);
        // A fresh signature per iteration, the hash is cached after first use.
        group.bench_with_input(BenchmarkId::new("compatibility", count), &desc, |b, desc| {
            b.iter_batched(
                || PipelineResourceSignature::<D3D12Backend>::new(desc.clone(), ShaderStages::empty()),
                |signature| signature.map(|s| s.hash()),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_archive(c: &mut Criterion) {
    let device = Arc::new(SerializationDevice::default());
    let flags = DeviceFlags::VULKAN | DeviceFlags::D3D12 | DeviceFlags::GL;

    let mut builder = ModuleBuilder::new();
    let mut info = ShaderCreateInfo::new("vs", ShaderStages::VERTEX).with_source("// vs");
    for i in 0..16 {
        let name = format!("g_Buffer{i}");
        builder.resource(&name, 0, 0);
        info = info.with_resource(ShaderResourceDesc::new(name, ShaderResourceType::ConstantBuffer, 1));
    }
    let Ok(vs) = device.create_shader(info.with_spirv(builder.build()), flags) else {
        return;
    };

    let archiver = Archiver::new(Arc::clone(&device));
    for i in 0..32 {
        let create_info = PipelineStateCreateInfo::graphics(format!("Pipeline{i}")).with_shader(Arc::clone(&vs));
        if archiver
            .add_graphics_pipeline(&create_info, PipelineStateArchiveInfo::new(flags))
            .is_err()
        {
            return;
        }
    }
    let Ok(blob) = archiver.serialize_to_blob() else {
        return;
    };

    let mut group = c.benchmark_group("archive");
    group.bench_function("serialize_32_pipelines", |b| b.iter(|| black_box(&archiver).serialize_to_blob()));
    group.bench_function("load_32_pipelines", |b| {
        b.iter(|| DeviceObjectArchive::load(black_box(blob.clone())));
    });
    group.finish();
}

criterion_group!(benches, bench_create, bench_serialize, bench_hash, bench_archive);
criterion_main!(benches);
