//! Fake next-layer implementations for tests.
//!
//! [`RecordingDriver`] stands in for everything below the layer: it hands out sequential handles,
//! remembers exactly what was forwarded to it, and can be told to fail the next call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;

use crate::device::DeviceDispatch;
use crate::dispatch::{DispatchOwner, LocalEntryPoints, ProcResolver, RawProc};
use crate::layer::DeviceChain;
use crate::request::{ComputePipelineDesc, GraphicsPipelineDesc, MemoryAllocation, SubmitBatch};

/// Samsung's PCI vendor ID, reported by the fake physical device.
pub const SAMSUNG_VENDOR_ID: u32 = 0x144D;
pub const XCLIPSE_940_DEVICE_ID: u32 = 0x0940;

/// First handle value [`RecordingDriver`] hands out.
pub const FIRST_HANDLE: u64 = 0x1000;

/// A call as it reached the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardedCall {
    CreateGraphicsPipelines {
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: Vec<GraphicsPipelineDesc>,
    },
    CreateComputePipelines {
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: Vec<ComputePipelineDesc>,
    },
    AllocateMemory {
        device: vk::Device,
        allocate_info: MemoryAllocation,
    },
    QueueSubmit {
        queue: vk::Queue,
        submits: Vec<SubmitBatch>,
        fence: vk::Fence,
    },
}

#[derive(Debug)]
pub struct RecordingDriver {
    next_handle: AtomicU64,
    fail_next: Mutex<Option<vk::Result>>,
    calls: Mutex<Vec<ForwardedCall>>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(FIRST_HANDLE),
            fail_next: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            memory_properties: xclipse_memory_properties(),
        }
    }

    /// Make the next forwarded call return `result` instead of succeeding.
    pub fn fail_next(&self, result: vk::Result) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    pub fn calls(&self) -> Vec<ForwardedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_call(&self) -> Option<ForwardedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    fn record(&self, call: ForwardedCall) -> VkResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        match self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_raw(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn pipelines(&self, count: usize) -> Vec<vk::Pipeline> {
        (0..count)
            .map(|_| vk::Pipeline::from_raw(self.next_raw()))
            .collect()
    }
}

impl DeviceDispatch for RecordingDriver {
    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[GraphicsPipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>> {
        self.record(ForwardedCall::CreateGraphicsPipelines {
            device,
            pipeline_cache,
            create_infos: create_infos.to_vec(),
        })?;
        Ok(self.pipelines(create_infos.len()))
    }

    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[ComputePipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>> {
        self.record(ForwardedCall::CreateComputePipelines {
            device,
            pipeline_cache,
            create_infos: create_infos.to_vec(),
        })?;
        Ok(self.pipelines(create_infos.len()))
    }

    fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &MemoryAllocation,
    ) -> VkResult<vk::DeviceMemory> {
        self.record(ForwardedCall::AllocateMemory {
            device,
            allocate_info: *allocate_info,
        })?;
        if allocate_info.memory_type_index >= self.memory_properties.memory_type_count {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        Ok(vk::DeviceMemory::from_raw(self.next_raw()))
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitBatch],
        fence: vk::Fence,
    ) -> VkResult<()> {
        self.record(ForwardedCall::QueueSubmit {
            queue,
            submits: submits.to_vec(),
            fence,
        })
    }

    fn get_physical_device_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, 3, 0),
            vendor_id: SAMSUNG_VENDOR_ID,
            device_id: XCLIPSE_940_DEVICE_ID,
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..Default::default()
        }
    }

    fn get_physical_device_memory_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }
}

/// Two memory types on one heap: device-local, and host-visible coherent.
pub fn xclipse_memory_properties() -> vk::PhysicalDeviceMemoryProperties {
    let mut props = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 2,
        memory_heap_count: 1,
        ..Default::default()
    };
    props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    props.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
        | vk::MemoryPropertyFlags::HOST_VISIBLE
        | vk::MemoryPropertyFlags::HOST_COHERENT;
    props.memory_heaps[0].size = 8 << 30;
    props.memory_heaps[0].flags = vk::MemoryHeapFlags::DEVICE_LOCAL;
    props
}

/// Name resolution of a fake next layer.
#[derive(Debug, Default)]
pub struct StaticResolver {
    names: HashSet<String>,
    resolve_everything: bool,
    queries: Mutex<Vec<(DispatchOwner, String)>>,
}

impl StaticResolver {
    /// Resolves only the given names.
    pub fn with_names(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Resolves every name, including the ones the layer intercepts, to [`next_layer_proc`].
    pub fn greedy() -> Self {
        Self {
            resolve_everything: true,
            ..Self::default()
        }
    }

    /// Every `(owner, name)` this resolver was asked about.
    pub fn queries(&self) -> Vec<(DispatchOwner, String)> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProcResolver for StaticResolver {
    fn get_proc_addr(&self, owner: DispatchOwner, name: &str) -> Option<RawProc> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((owner, name.to_string()));
        if self.resolve_everything || self.names.contains(name) {
            Some(next_layer_proc)
        } else {
            None
        }
    }
}

// Distinct bodies so the linker cannot fold them into one address.

pub unsafe extern "system" fn local_create_graphics_pipelines() {
    std::hint::black_box(1u32);
}

pub unsafe extern "system" fn local_create_compute_pipelines() {
    std::hint::black_box(2u32);
}

pub unsafe extern "system" fn local_allocate_memory() {
    std::hint::black_box(3u32);
}

pub unsafe extern "system" fn local_queue_submit() {
    std::hint::black_box(4u32);
}

/// The address every [`StaticResolver`] hands out.
pub unsafe extern "system" fn next_layer_proc() {
    std::hint::black_box(5u32);
}

pub fn local_entry_points() -> LocalEntryPoints {
    LocalEntryPoints {
        create_graphics_pipelines: local_create_graphics_pipelines,
        create_compute_pipelines: local_create_compute_pipelines,
        allocate_memory: local_allocate_memory,
        queue_submit: local_queue_submit,
    }
}

/// Chain whose device dispatch is `driver` and whose resolver resolves every name.
pub fn device_chain(driver: &Arc<RecordingDriver>) -> DeviceChain {
    DeviceChain {
        resolver: Arc::new(StaticResolver::greedy()),
        dispatch: Arc::clone(driver) as Arc<dyn DeviceDispatch>,
    }
}
