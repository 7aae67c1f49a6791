//! Bakes a small device object archive and prints what it contains.
//!
//! Usage: `cargo run --example bake_archive [output path]`

use std::sync::Arc;

use bindery::archiver::spirv::ModuleBuilder;
use bindery::prelude::*;

fn shader(
    device: &SerializationDevice,
    name: &str,
    stage: ShaderStages,
    resources: &[(&str, ShaderResourceType)],
    flags: DeviceFlags,
) -> anyhow::Result<Arc<bindery::archiver::SerializableShader>> {
    let mut module = ModuleBuilder::new();
    let mut info = ShaderCreateInfo::new(name, stage).with_source(format!("// {name}"));
    for &(resource, resource_type) in resources {
        module.resource(resource, 0, 0);
        info = info.with_resource(ShaderResourceDesc::new(resource, resource_type, 1));
    }
    Ok(device.create_shader(info.with_spirv(module.build()), flags)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let output = std::env::args().nth(1);
    let flags = DeviceFlags::VULKAN | DeviceFlags::D3D12 | DeviceFlags::GL;
    let device = Arc::new(SerializationDevice::new(SerializationDeviceSettings::default())?);
    let archiver = Archiver::new(Arc::clone(&device));

    // === Signatures ===
    let frame = device.create_pipeline_resource_signature(
        PipelineResourceSignatureDesc::new("Frame").with_resource(PipelineResourceDesc::new(
            "g_Frame",
            ShaderStages::VERTEX | ShaderStages::PIXEL,
            1,
            ShaderResourceType::ConstantBuffer,
            ShaderResourceVariableType::Static,
        )),
        flags,
        ShaderStages::empty(),
    )?;
    let material = device.create_pipeline_resource_signature(
        PipelineResourceSignatureDesc::new("Material")
            .with_binding_index(1)
            .with_resource(PipelineResourceDesc::new(
                "g_Albedo",
                ShaderStages::PIXEL,
                1,
                ShaderResourceType::TextureSrv,
                ShaderResourceVariableType::Mutable,
            )),
        flags,
        ShaderStages::empty(),
    )?;

    // === Pipelines ===
    let vs = shader(
        &device,
        "forward_vs",
        ShaderStages::VERTEX,
        &[("g_Frame", ShaderResourceType::ConstantBuffer)],
        flags,
    )?;
    let ps = shader(
        &device,
        "forward_ps",
        ShaderStages::PIXEL,
        &[
            ("g_Frame", ShaderResourceType::ConstantBuffer),
            ("g_Albedo", ShaderResourceType::TextureSrv),
        ],
        flags,
    )?;
    archiver.add_graphics_pipeline(
        &PipelineStateCreateInfo::graphics("Forward")
            .with_shader(Arc::clone(&vs))
            .with_shader(ps)
            .with_signature(frame)
            .with_signature(material),
        PipelineStateArchiveInfo::new(flags),
    )?;
    // No signatures: one is generated from the shader reflection.
    archiver.add_graphics_pipeline(
        &PipelineStateCreateInfo::graphics("DepthOnly").with_shader(vs),
        PipelineStateArchiveInfo::new(flags),
    )?;

    // === Write and read back ===
    let blob = archiver.serialize_to_blob()?;
    if let Some(path) = output {
        std::fs::write(&path, &blob)?;
        println!("Wrote {} bytes to {path}", blob.len());
    }

    let archive = DeviceObjectArchive::load(blob)?;
    for name in archive.signature_names() {
        println!("signature {name}");
    }
    for name in archive.pipeline_names(PipelineType::Graphics) {
        for kind in flags.backends() {
            let pipeline = archive.unpack_pipeline(name, kind)?;
            let bytes: usize = pipeline.shaders.iter().map(Vec::len).sum();
            println!(
                "pipeline {name} [{kind}]: {} shader(s), {bytes} bytes, signatures {:?}",
                pipeline.shaders.len(),
                pipeline.signature_names
            );
        }
    }
    Ok(())
}
