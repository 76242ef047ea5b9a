use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use pretty_assertions::assert_eq;
use xclipse_layer::test_utils::{
    device_chain, local_entry_points, ForwardedCall, RecordingDriver, SAMSUNG_VENDOR_ID,
};
use xclipse_layer::{
    BindPoint, ComputePipelineDesc, DeviceDispatch, GraphicsPipelineDesc, Layer, LayerConfig,
    LayerError, MultisampleState, RasterizationState, ShaderStageDesc,
};

const PHYSICAL_DEVICE: u64 = 0x9d;

struct Fixture {
    layer: Layer,
    driver: Arc<RecordingDriver>,
    device: vk::Device,
}

/// Layer with one device registered; the context is only published when `initialize` is set.
fn fixture(config: LayerConfig, initialize: bool) -> Fixture {
    let layer = Layer::new(config, local_entry_points()).unwrap();
    let driver = Arc::new(RecordingDriver::new());
    let device = vk::Device::from_raw(0xd0);
    layer.register_device(device, device_chain(&driver)).unwrap();
    if initialize {
        layer
            .initialize_device_context(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE), device)
            .unwrap();
    }
    Fixture {
        layer,
        driver,
        device,
    }
}

fn graphics_desc(subpass: u32) -> GraphicsPipelineDesc {
    GraphicsPipelineDesc {
        stages: vec![
            ShaderStageDesc::new(
                vk::ShaderStageFlags::VERTEX,
                vk::ShaderModule::from_raw(0x51),
                "main",
            ),
            ShaderStageDesc::new(
                vk::ShaderStageFlags::FRAGMENT,
                vk::ShaderModule::from_raw(0x52),
                "main",
            ),
        ],
        rasterization: Some(RasterizationState::default()),
        multisample: Some(MultisampleState {
            rasterization_samples: vk::SampleCountFlags::TYPE_8,
            ..MultisampleState::default()
        }),
        layout: vk::PipelineLayout::from_raw(0x61),
        render_pass: vk::RenderPass::from_raw(0x71),
        subpass,
        ..GraphicsPipelineDesc::default()
    }
}

fn compute_desc() -> ComputePipelineDesc {
    ComputePipelineDesc::new(
        ShaderStageDesc::new(
            vk::ShaderStageFlags::COMPUTE,
            vk::ShaderModule::from_raw(0x53),
            "main",
        ),
        vk::PipelineLayout::from_raw(0x62),
    )
}

fn forwarded_graphics(driver: &RecordingDriver) -> Vec<GraphicsPipelineDesc> {
    match driver.last_call() {
        Some(ForwardedCall::CreateGraphicsPipelines { create_infos, .. }) => create_infos,
        other => panic!("expected a graphics pipeline call, got {other:?}"),
    }
}

#[test]
fn uninitialized_device_forwards_graphics_pipelines_verbatim() {
    let f = fixture(LayerConfig::default(), false);
    let descs = vec![graphics_desc(0), graphics_desc(1)];
    let cache = vk::PipelineCache::from_raw(0xcc);

    let through_layer = f
        .layer
        .create_graphics_pipelines(f.device, cache, &descs)
        .unwrap();

    let direct = RecordingDriver::new();
    let expected = direct
        .create_graphics_pipelines(f.device, cache, &descs)
        .unwrap();

    assert_eq!(through_layer, expected);
    assert_eq!(f.driver.calls(), direct.calls());
    assert!(f.layer.device(f.device).unwrap().pipelines().is_empty());

    let stats = f.layer.stats().snapshot();
    assert_eq!(stats.intercepted_calls, 1);
    assert_eq!(stats.fail_open_calls, 1);
    assert_eq!(stats.rewritten_structures, 0);
}

#[test]
fn uninitialized_device_forwards_failures_verbatim() {
    let f = fixture(LayerConfig::default(), false);
    f.driver.fail_next(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

    let result = f
        .layer
        .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &[graphics_desc(0)]);
    assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
}

#[test]
fn every_creation_after_initialization_gets_back_face_culling() {
    let f = fixture(LayerConfig::default(), true);
    let descs = vec![graphics_desc(0)];
    let before = descs.clone();

    for _ in 0..3 {
        f.layer
            .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &descs)
            .unwrap();

        let forwarded = forwarded_graphics(&f.driver);
        assert_eq!(forwarded.len(), 1);
        let rasterization = forwarded[0].rasterization.unwrap();
        assert_eq!(rasterization.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(
            forwarded[0].multisample.unwrap().rasterization_samples,
            vk::SampleCountFlags::TYPE_4
        );
    }

    // The application's structures are never mutated.
    assert_eq!(descs, before);
    assert_eq!(f.layer.stats().snapshot().rewritten_structures, 3);
}

#[test]
fn rewrite_preserves_count_order_and_untouched_state() {
    let f = fixture(LayerConfig::default(), true);
    let mut front_culled = graphics_desc(2);
    front_culled.rasterization = Some(RasterizationState {
        cull_mode: vk::CullModeFlags::FRONT,
        ..RasterizationState::default()
    });
    front_culled.multisample = None;
    let no_state = GraphicsPipelineDesc {
        rasterization: None,
        multisample: None,
        ..graphics_desc(3)
    };
    let descs = vec![graphics_desc(0), graphics_desc(1), front_culled.clone(), no_state.clone()];

    let handles = f
        .layer
        .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &descs)
        .unwrap();
    assert_eq!(handles.len(), descs.len());

    let forwarded = forwarded_graphics(&f.driver);
    let subpasses: Vec<u32> = forwarded.iter().map(|d| d.subpass).collect();
    assert_eq!(subpasses, vec![0, 1, 2, 3]);
    assert_eq!(forwarded[2], front_culled);
    assert_eq!(forwarded[3], no_state);
    for desc in &forwarded[..2] {
        assert_eq!(desc.stages, descs[0].stages);
        assert_eq!(desc.layout, descs[0].layout);
    }
}

#[test]
fn created_pipelines_are_tracked_with_a_usage_count_of_one() {
    let f = fixture(LayerConfig::default(), true);
    let descs: Vec<_> = (0..5).map(graphics_desc).collect();
    let handles = f
        .layer
        .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &descs)
        .unwrap();

    let wrapper = f.layer.device(f.device).unwrap();
    assert_eq!(wrapper.pipelines().len(), 5);
    for handle in &handles {
        let entry = f.layer.pipeline(f.device, *handle).unwrap();
        assert_eq!(entry.usage_count, 1);
        assert_eq!(entry.bind_point, BindPoint::Graphics);
        assert_eq!(
            entry.shader_stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }
}

#[test]
fn optimize_pass_touches_exactly_the_requested_subset() {
    let f = fixture(LayerConfig::default(), true);
    let descs: Vec<_> = (0..6).map(graphics_desc).collect();
    let handles = f
        .layer
        .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &descs)
        .unwrap();

    let subset = [handles[1], handles[4], vk::Pipeline::from_raw(0xdead)];
    assert_eq!(f.layer.optimize_pipelines(f.device, &subset), 2);

    let counts: Vec<u64> = handles
        .iter()
        .map(|h| f.layer.pipeline(f.device, *h).unwrap().usage_count)
        .collect();
    assert_eq!(counts, vec![1, 2, 1, 1, 2, 1]);
    assert_eq!(f.layer.device(f.device).unwrap().pipelines().len(), 6);
    assert!(f.layer.pipeline(f.device, subset[2]).is_none());
    assert_eq!(f.layer.stats().snapshot().pipelines_touched, 2);
}

#[test]
fn optimize_pass_is_a_no_op_before_initialization() {
    let f = fixture(LayerConfig::default(), false);
    let handles = f
        .layer
        .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &[graphics_desc(0)])
        .unwrap();
    assert_eq!(f.layer.optimize_pipelines(f.device, &handles), 0);
    assert_eq!(f.layer.optimize_pipelines(vk::Device::from_raw(0xbad), &handles), 0);
}

#[test]
fn failed_creation_leaves_the_table_unchanged() {
    let f = fixture(LayerConfig::default(), true);
    f.layer
        .create_graphics_pipelines(f.device, vk::PipelineCache::null(), &[graphics_desc(0)])
        .unwrap();
    let before = f.layer.device(f.device).unwrap().pipelines().snapshot();

    f.driver.fail_next(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    let result = f.layer.create_graphics_pipelines(
        f.device,
        vk::PipelineCache::null(),
        &[graphics_desc(1), graphics_desc(2)],
    );
    assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));

    f.driver.fail_next(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    let result =
        f.layer
            .create_compute_pipelines(f.device, vk::PipelineCache::null(), &[compute_desc()]);
    assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));

    assert_eq!(f.layer.device(f.device).unwrap().pipelines().snapshot(), before);
    assert_eq!(f.layer.stats().snapshot().forwarding_failures, 2);
}

#[test]
fn compute_pipelines_are_forwarded_unchanged_and_tracked() {
    let f = fixture(LayerConfig::default(), true);
    let descs = vec![compute_desc(), compute_desc()];

    let handles = f
        .layer
        .create_compute_pipelines(f.device, vk::PipelineCache::null(), &descs)
        .unwrap();

    assert_eq!(
        f.driver.last_call(),
        Some(ForwardedCall::CreateComputePipelines {
            device: f.device,
            pipeline_cache: vk::PipelineCache::null(),
            create_infos: descs,
        })
    );
    for handle in handles {
        let entry = f.layer.pipeline(f.device, handle).unwrap();
        assert_eq!(entry.bind_point, BindPoint::Compute);
        assert_eq!(entry.shader_stages, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(entry.usage_count, 1);
    }
}

#[test]
fn destroyed_pipelines_are_evicted() {
    let f = fixture(LayerConfig::default(), true);
    let handles = f
        .layer
        .create_compute_pipelines(f.device, vk::PipelineCache::null(), &[compute_desc()])
        .unwrap();

    assert!(f.layer.notify_pipeline_destroyed(f.device, handles[0]));
    assert!(!f.layer.notify_pipeline_destroyed(f.device, handles[0]));
    assert!(f.layer.pipeline(f.device, handles[0]).is_none());
    assert_eq!(f.layer.optimize_pipelines(f.device, &handles), 0);
    assert_eq!(f.layer.stats().snapshot().pipelines_evicted, 1);
}

#[test]
fn device_creation_publishes_the_physical_device_snapshot() {
    let layer = Layer::new(LayerConfig::default(), local_entry_points()).unwrap();
    let driver = Arc::new(RecordingDriver::new());
    let device = vk::Device::from_raw(0xd7);
    let physical_device = vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE);

    let created = layer
        .create_device(physical_device, device_chain(&driver), || Ok(device))
        .unwrap();
    assert_eq!(created, device);

    let wrapper = layer.device(device).unwrap();
    let context = wrapper.context().unwrap();
    assert_eq!(context.physical_device, physical_device);
    assert_eq!(context.properties.vendor_id, SAMSUNG_VENDOR_ID);
    assert_eq!(context.memory_properties.memory_type_count, 2);

    assert_eq!(
        layer.initialize_device_context(physical_device, device),
        Err(LayerError::DeviceContextAlreadyInitialized(device))
    );
}

#[test]
fn context_initialization_rejects_bad_handles() {
    let f = fixture(LayerConfig::default(), false);
    let physical_device = vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE);

    assert_eq!(
        f.layer
            .initialize_device_context(vk::PhysicalDevice::null(), f.device),
        Err(LayerError::NullPhysicalDevice)
    );
    assert_eq!(
        f.layer
            .initialize_device_context(physical_device, vk::Device::null()),
        Err(LayerError::NullDevice)
    );
    let stranger = vk::Device::from_raw(0x5757);
    assert_eq!(
        f.layer.initialize_device_context(physical_device, stranger),
        Err(LayerError::UnknownDevice(stranger))
    );
    assert!(f.layer.device(f.device).unwrap().context().is_none());
}

#[test]
fn failed_device_creation_registers_nothing() {
    let layer = Layer::new(LayerConfig::default(), local_entry_points()).unwrap();
    let driver = Arc::new(RecordingDriver::new());

    let result = layer.create_device(
        vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE),
        device_chain(&driver),
        || Err(vk::Result::ERROR_DEVICE_LOST),
    );
    assert_eq!(result, Err(vk::Result::ERROR_DEVICE_LOST));
    assert!(layer.dispatch().is_empty());
}

#[test]
fn disabled_layer_never_rewrites() {
    let config = LayerConfig {
        enabled: false,
        ..LayerConfig::default()
    };
    let layer = Layer::new(config, local_entry_points()).unwrap();
    let driver = Arc::new(RecordingDriver::new());
    let device = vk::Device::from_raw(0xd8);
    layer
        .create_device(
            vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE),
            device_chain(&driver),
            || Ok(device),
        )
        .unwrap();
    assert!(layer.device(device).unwrap().context().is_none());

    let descs = vec![graphics_desc(0)];
    layer
        .create_graphics_pipelines(device, vk::PipelineCache::null(), &descs)
        .unwrap();
    assert_eq!(forwarded_graphics(&driver), descs);
}

#[test]
fn calls_on_unknown_devices_fail_cleanly() {
    let layer = Layer::new(LayerConfig::default(), local_entry_points()).unwrap();
    let result = layer.create_graphics_pipelines(
        vk::Device::from_raw(0x404),
        vk::PipelineCache::null(),
        &[graphics_desc(0)],
    );
    assert_eq!(result, Err(vk::Result::ERROR_INITIALIZATION_FAILED));
}

#[test]
fn concurrent_creation_on_one_device_loses_no_entries() {
    let f = fixture(LayerConfig::default(), true);

    std::thread::scope(|scope| {
        for thread in 0..8u32 {
            let f = &f;
            scope.spawn(move || {
                for round in 0..10u32 {
                    let handles = f
                        .layer
                        .create_graphics_pipelines(
                            f.device,
                            vk::PipelineCache::null(),
                            &[graphics_desc(thread * 100 + round)],
                        )
                        .unwrap();
                    f.layer.optimize_pipelines(f.device, &handles);
                }
            });
        }
    });

    let entries = f.layer.device(f.device).unwrap().pipelines().snapshot();
    assert_eq!(entries.len(), 80);
    assert!(entries.iter().all(|entry| entry.usage_count == 2));
}
