//! Shader Variable Binding Tests
//!
//! Tests for:
//! - Variable manager counts per stage and variable type
//! - Resource cache slots (one per array element)
//! - `set` / `set_array` semantics: last write wins, range validation
//! - Static resources and their copy into new SRBs
//! - Binding from a `ResourceMapping` and pre-draw validation

use std::sync::Arc;

use bindery::core::{
    BinderyError, DeviceObject, ResourceMapping, ShaderResourceType, ShaderResourceVariableType as V, ShaderStages,
};
use bindery::signature::{
    BindShaderResourcesFlags, CacheKind, D3D12Backend, GlBackend, PipelineResourceDesc, PipelineResourceSignature,
    PipelineResourceSignatureDesc, ShaderVariableKind, ShaderVariableManager, VulkanBackend,
};

const VS_PS: ShaderStages = ShaderStages::VERTEX.union(ShaderStages::PIXEL);

/// One uniform buffer and one 4-element texture array, both in VS and PS.
fn scenario_desc() -> PipelineResourceSignatureDesc {
    PipelineResourceSignatureDesc::new("Scenario")
        .with_resource(PipelineResourceDesc::new(
            "g_Constants",
            VS_PS,
            1,
            ShaderResourceType::ConstantBuffer,
            V::Mutable,
        ))
        .with_resource(PipelineResourceDesc::new(
            "g_Textures",
            VS_PS,
            4,
            ShaderResourceType::TextureSrv,
            V::Mutable,
        ))
}

fn mixed_desc() -> PipelineResourceSignatureDesc {
    PipelineResourceSignatureDesc::new("Mixed")
        .with_resource(PipelineResourceDesc::new(
            "g_Frame",
            VS_PS,
            1,
            ShaderResourceType::ConstantBuffer,
            V::Static,
        ))
        .with_resource(PipelineResourceDesc::new(
            "g_Albedo",
            ShaderStages::PIXEL,
            1,
            ShaderResourceType::TextureSrv,
            V::Mutable,
        ))
        .with_resource(PipelineResourceDesc::new(
            "g_Instances",
            ShaderStages::VERTEX,
            1,
            ShaderResourceType::BufferSrv,
            V::Dynamic,
        ))
        .with_resource(PipelineResourceDesc::new(
            "g_Sampler",
            ShaderStages::PIXEL,
            1,
            ShaderResourceType::Sampler,
            V::Mutable,
        ))
        .with_resource(PipelineResourceDesc::new(
            "g_Target",
            ShaderStages::PIXEL,
            2,
            ShaderResourceType::TextureUav,
            V::Dynamic,
        ))
}

// ============================================================================
// Variable counts
// ============================================================================

#[test]
fn scenario_counts_and_is_bound() {
    let signature = Arc::new(PipelineResourceSignature::<GlBackend>::new(scenario_desc(), ShaderStages::empty()).unwrap());
    let mut srb = signature.create_shader_resource_binding(false).unwrap();

    let manager = srb.manager(ShaderStages::VERTEX).unwrap();
    assert_eq!(manager.num_ubs(), 1);
    assert_eq!(manager.num_textures(), 1);
    assert_eq!(srb.cache().num_ubs(), 1);
    assert_eq!(srb.cache().num_textures(), 4);

    let texture = DeviceObject::texture_srv("tex");
    let mut var = srb.variable_by_name(ShaderStages::VERTEX, "g_Textures").unwrap();
    var.set_array(std::slice::from_ref(&texture), 2).unwrap();
    assert!(var.is_bound(2));
    assert!(!var.is_bound(1));

    // The cache is shared by the stages of the SRB.
    let var = srb.variable_by_name(ShaderStages::PIXEL, "g_Textures").unwrap();
    assert!(var.is_bound(2));
}

#[test]
fn manager_counts_match_stage_and_type_filters() {
    let desc = mixed_desc();
    let allowed_sets: [&[V]; 4] = [&[V::Static], &[V::Mutable], &[V::Mutable, V::Dynamic], &V::ALL];
    for allowed in allowed_sets {
        for stage in [ShaderStages::VERTEX, ShaderStages::PIXEL] {
            let manager = ShaderVariableManager::new(stage, CacheKind::Srb, &desc.resources, allowed);
            let expected = desc
                .resources
                .iter()
                .filter(|r| {
                    r.shader_stages.intersects(stage)
                        && allowed.contains(&r.var_type)
                        && r.resource_type != ShaderResourceType::Sampler
                })
                .count();
            assert_eq!(manager.variable_count() as usize, expected, "{stage:?} {allowed:?}");
        }
    }
}

#[test]
fn srb_managers_hold_mutable_and_dynamic_variables() {
    let signature = Arc::new(PipelineResourceSignature::<VulkanBackend>::new(mixed_desc(), ShaderStages::empty()).unwrap());
    let srb = signature.create_shader_resource_binding(false).unwrap();
    assert_eq!(srb.variable_count(ShaderStages::VERTEX), 1);
    assert_eq!(srb.variable_count(ShaderStages::PIXEL), 2);
    assert_eq!(signature.static_variable_count(ShaderStages::VERTEX), 1);
    assert_eq!(signature.static_variable_count(ShaderStages::PIXEL), 1);
    assert_eq!(srb.variable_count(ShaderStages::COMPUTE), 0);
}

#[test]
fn variable_kinds_follow_resource_types() {
    let signature = Arc::new(PipelineResourceSignature::<D3D12Backend>::new(mixed_desc(), ShaderStages::empty()).unwrap());
    let mut srb = signature.create_shader_resource_binding(false).unwrap();
    let kind = |srb: &mut bindery::signature::ShaderResourceBinding<D3D12Backend>, name| {
        srb.variable_by_name(ShaderStages::PIXEL, name).map(|v| v.kind())
    };
    assert!(matches!(kind(&mut srb, "g_Albedo"), Some(ShaderVariableKind::Texture { .. })));
    assert!(matches!(kind(&mut srb, "g_Target"), Some(ShaderVariableKind::Image { .. })));
    assert!(kind(&mut srb, "g_Sampler").is_none());
    assert!(kind(&mut srb, "g_Frame").is_none());
}

// ============================================================================
// set / set_array
// ============================================================================

#[test]
fn last_write_wins() {
    let signature = Arc::new(PipelineResourceSignature::<GlBackend>::new(scenario_desc(), ShaderStages::empty()).unwrap());
    let mut srb = signature.create_shader_resource_binding(false).unwrap();
    let first = DeviceObject::texture_srv("first");
    let second = DeviceObject::texture_srv("second");

    let mut var = srb.variable_by_name(ShaderStages::PIXEL, "g_Textures").unwrap();
    var.set_array(std::slice::from_ref(&first), 3).unwrap();
    var.set_array(std::slice::from_ref(&second), 3).unwrap();
    assert!(var.is_bound(3));
    assert!(Arc::ptr_eq(var.get(3).unwrap(), &second));
}

#[test]
fn out_of_range_set_array_binds_nothing() {
    let signature = Arc::new(PipelineResourceSignature::<GlBackend>::new(scenario_desc(), ShaderStages::empty()).unwrap());
    let mut srb = signature.create_shader_resource_binding(false).unwrap();
    let textures: Vec<_> = (0..3).map(|i| DeviceObject::texture_srv(format!("tex{i}"))).collect();

    let mut var = srb.variable_by_name(ShaderStages::PIXEL, "g_Textures").unwrap();
    let err = var.set_array(&textures, 2).unwrap_err();
    assert!(matches!(
        err,
        BinderyError::ArrayRangeOutOfBounds {
            first: 2,
            count: 3,
            array_size: 4,
            ..
        }
    ));
    assert!((0..4).all(|i| !var.is_bound(i)));

    var.set_array(&textures, 1).unwrap();
    assert!(!var.is_bound(0));
    assert!((1..4).all(|i| var.is_bound(i)));
}

#[test]
fn incompatible_object_is_rejected() {
    let signature = Arc::new(PipelineResourceSignature::<GlBackend>::new(scenario_desc(), ShaderStages::empty()).unwrap());
    let mut srb = signature.create_shader_resource_binding(false).unwrap();
    let mut var = srb.variable_by_name(ShaderStages::VERTEX, "g_Constants").unwrap();
    let err = var.set(&DeviceObject::sampler("sampler")).unwrap_err();
    assert!(matches!(err, BinderyError::IncompatibleResource { .. }));
    assert!(!var.is_bound(0));
}

// ============================================================================
// Static resources
// ============================================================================

#[test]
fn static_bindings_reach_new_srbs() {
    let signature = Arc::new(PipelineResourceSignature::<VulkanBackend>::new(mixed_desc(), ShaderStages::empty()).unwrap());
    let frame = DeviceObject::uniform_buffer("frame");
    let mut mapping = ResourceMapping::new();
    mapping.add_resource("g_Frame", Arc::clone(&frame));
    signature
        .bind_static_resources(VS_PS, &mapping, BindShaderResourcesFlags::UPDATE_STATIC)
        .unwrap();
    {
        let mut statics = signature.static_variables(ShaderStages::PIXEL).unwrap();
        assert!(statics.variable_by_name("g_Frame").unwrap().is_bound(0));
    }

    let srb = signature.create_shader_resource_binding(true).unwrap();
    assert!(srb.static_resources_initialized());
    let copied = signature.create_shader_resource_binding(false).unwrap();
    assert!(!copied.static_resources_initialized());

    // Static data is present, mutable and dynamic resources are still missing.
    let err = srb.validate(VS_PS).unwrap_err();
    assert!(matches!(err, BinderyError::UnboundResource { ref name, .. } if name != "g_Frame"));
}

// ============================================================================
// Resource mapping and validation
// ============================================================================

#[test]
fn bind_resources_and_validate() {
    let signature = Arc::new(PipelineResourceSignature::<GlBackend>::new(scenario_desc(), ShaderStages::empty()).unwrap());
    let mut srb = signature.create_shader_resource_binding(false).unwrap();

    let textures: Vec<_> = (0..4).map(|i| DeviceObject::texture_srv(format!("tex{i}"))).collect();
    let mut mapping = ResourceMapping::new();
    mapping
        .add_resource("g_Constants", DeviceObject::uniform_buffer("cb"))
        .add_resource_array("g_Textures", 0, &textures[..3]);

    srb.bind_resources(VS_PS, &mapping, BindShaderResourcesFlags::UPDATE_MUTABLE)
        .unwrap();
    let err = srb.validate(ShaderStages::PIXEL).unwrap_err();
    assert!(matches!(
        err,
        BinderyError::UnboundResource { ref name, array_index: 3, .. } if name == "g_Textures"
    ));

    let err = srb
        .bind_resources(
            VS_PS,
            &mapping,
            BindShaderResourcesFlags::UPDATE_MUTABLE | BindShaderResourcesFlags::VERIFY_ALL_RESOLVED,
        )
        .unwrap_err();
    assert!(matches!(err, BinderyError::UnresolvedResource { array_index: 3, .. }));

    mapping.add_resource_array("g_Textures", 3, &textures[3..]);
    srb.bind_resources(VS_PS, &mapping, BindShaderResourcesFlags::UPDATE_MUTABLE)
        .unwrap();
    srb.validate(VS_PS).unwrap();
}
