//! The process-wide layer registry.
//!
//! A [`Layer`] is built once when the layer library is loaded and handed to every exported entry
//! point. It owns the dispatch tables, one [`DeviceWrapper`] per live device, and the queue to
//! device bindings needed to route `vkQueueSubmit`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, warn};

use crate::classify::{PreserveOrder, SubmitReorder};
use crate::config::LayerConfig;
use crate::device::{DeviceDispatch, DeviceWrapper};
use crate::dispatch::{
    DispatchOwner, DispatchRegistry, LocalEntryPoints, ProcResolver, ProcTarget, RawProc,
};
use crate::error::{LayerError, Result};
use crate::pipeline_state::PipelineEntry;
use crate::request::{ComputePipelineDesc, GraphicsPipelineDesc, MemoryAllocation, SubmitBatch};
use crate::rewrite::RewritePolicy;
use crate::stats::LayerStats;

/// What the next layer hands over when a device is created beneath this one.
#[derive(Clone)]
pub struct DeviceChain {
    pub resolver: Arc<dyn ProcResolver>,
    pub dispatch: Arc<dyn DeviceDispatch>,
}

pub struct Layer {
    config: LayerConfig,
    policy: RewritePolicy,
    stats: Arc<LayerStats>,
    dispatch: DispatchRegistry,
    reorder: Arc<dyn SubmitReorder>,
    devices: RwLock<HashMap<vk::Device, Arc<DeviceWrapper>>>,
    queues: RwLock<HashMap<vk::Queue, vk::Device>>,
}

impl Layer {
    pub fn new(config: LayerConfig, entry_points: LocalEntryPoints) -> Result<Self> {
        let policy = RewritePolicy::from_config(&config)?;
        debug!(?config, "layer constructed");
        Ok(Self {
            policy,
            config,
            stats: Arc::new(LayerStats::new()),
            dispatch: DispatchRegistry::new(entry_points),
            reorder: Arc::new(PreserveOrder),
            devices: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
        })
    }

    /// Replace the default [`PreserveOrder`] submission policy.
    pub fn with_submit_reorder(mut self, reorder: Arc<dyn SubmitReorder>) -> Self {
        self.reorder = reorder;
        self
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn stats(&self) -> &LayerStats {
        &self.stats
    }

    pub fn dispatch(&self) -> &DispatchRegistry {
        &self.dispatch
    }

    // ---------------------------------------------------------------------
    // Name resolution
    // ---------------------------------------------------------------------

    pub fn resolve(&self, owner: DispatchOwner, name: &str) -> Option<ProcTarget> {
        let target = self.dispatch.resolve(owner, name);
        match target {
            Some(ProcTarget::Local(_)) => self.stats.inc_resolved_local(),
            Some(ProcTarget::Delegate(_)) => self.stats.inc_resolved_delegate(),
            None => self.stats.inc_resolved_not_found(),
        }
        target
    }

    fn proc_addr(&self, owner: DispatchOwner, name: &str) -> Option<RawProc> {
        self.resolve(owner, name).map(|target| match target {
            ProcTarget::Local(op) => self.dispatch.entry_points().get(op),
            ProcTarget::Delegate(proc) => proc,
        })
    }

    /// `vkGetInstanceProcAddr`. A null instance resolves against the global table.
    pub fn get_instance_proc_addr(&self, instance: vk::Instance, name: &str) -> Option<RawProc> {
        let owner = if instance == vk::Instance::null() {
            DispatchOwner::Global
        } else {
            DispatchOwner::Instance(instance)
        };
        self.proc_addr(owner, name)
    }

    /// `vkGetDeviceProcAddr`.
    pub fn get_device_proc_addr(&self, device: vk::Device, name: &str) -> Option<RawProc> {
        self.proc_addr(DispatchOwner::Device(device), name)
    }

    /// Capture the next layer's resolver for queries made without an instance.
    pub fn set_global_resolver(&self, next: Arc<dyn ProcResolver>) -> Result<()> {
        self.dispatch.register(DispatchOwner::Global, next)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Instance / device lifecycle
    // ---------------------------------------------------------------------

    /// `vkCreateInstance`: forward through `create`, then capture the instance's resolver.
    ///
    /// The driver's result is returned as-is; a table left over from a reused handle is replaced.
    pub fn create_instance(
        &self,
        next: Arc<dyn ProcResolver>,
        create: impl FnOnce() -> VkResult<vk::Instance>,
    ) -> VkResult<vk::Instance> {
        let instance = create()?;
        let owner = DispatchOwner::Instance(instance);
        if self.dispatch.table(owner).is_some() {
            warn!(
                ?instance,
                "instance handle reused without vkDestroyInstance, dropping stale table"
            );
            self.dispatch.unregister(owner);
        }
        if let Err(err) = self.dispatch.register(owner, next) {
            warn!(?instance, %err, "instance dispatch not captured, only interceptors resolve");
        }
        Ok(instance)
    }

    pub fn destroy_instance(&self, instance: vk::Instance) {
        self.dispatch.unregister(DispatchOwner::Instance(instance));
    }

    /// Register a device created beneath the layer without initializing its context.
    pub fn register_device(
        &self,
        device: vk::Device,
        chain: DeviceChain,
    ) -> Result<Arc<DeviceWrapper>> {
        if device == vk::Device::null() {
            return Err(LayerError::NullDevice);
        }

        let wrapper = Arc::new(DeviceWrapper::new(
            device,
            chain.dispatch,
            self.policy,
            self.config.classify_submissions,
            Arc::clone(&self.reorder),
            Arc::clone(&self.stats),
        ));

        self.dispatch
            .register(DispatchOwner::Device(device), chain.resolver)?;
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device, Arc::clone(&wrapper));
        Ok(wrapper)
    }

    /// `vkCreateDevice`: forward through `create`; on success register the device and initialize
    /// its context.
    ///
    /// A device whose context cannot be initialized still works, in pass-through mode.
    pub fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        chain: DeviceChain,
        create: impl FnOnce() -> VkResult<vk::Device>,
    ) -> VkResult<vk::Device> {
        let device = create()?;
        if self.device(device).is_some()
            || self.dispatch.table(DispatchOwner::Device(device)).is_some()
        {
            warn!(?device, "device handle reused without vkDestroyDevice, dropping stale state");
            self.destroy_device(device);
        }
        self.register_device(device, chain)?;
        if let Err(err) = self.initialize_device_context(physical_device, device) {
            warn!(?device, %err, "device context unavailable, device runs in pass-through mode");
        }
        Ok(device)
    }

    /// Snapshot the physical device and publish the context for `device`.
    ///
    /// With the layer disabled this succeeds without publishing anything, leaving the device in
    /// pass-through mode.
    pub fn initialize_device_context(
        &self,
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
    ) -> Result<()> {
        if physical_device == vk::PhysicalDevice::null() {
            return Err(LayerError::NullPhysicalDevice);
        }
        if device == vk::Device::null() {
            return Err(LayerError::NullDevice);
        }
        let wrapper = self
            .device(device)
            .ok_or(LayerError::UnknownDevice(device))?;

        if !self.config.enabled {
            debug!(?device, "layer disabled, device stays in pass-through mode");
            return Ok(());
        }
        wrapper.initialize_context(physical_device)?;
        Ok(())
    }

    /// `vkDestroyDevice`: drop all state kept for `device` and its queues.
    pub fn destroy_device(&self, device: vk::Device) {
        let removed = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device);
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| *owner != device);
        self.dispatch.unregister(DispatchOwner::Device(device));

        if let Some(wrapper) = removed {
            info!(
                ?device,
                tracked_pipelines = wrapper.pipelines().len(),
                "device state released"
            );
        }
    }

    /// `vkGetDeviceQueue`: remember which device owns `queue`.
    pub fn bind_queue(&self, device: vk::Device, queue: vk::Queue) -> Result<()> {
        if self.device(device).is_none() {
            return Err(LayerError::UnknownDevice(device));
        }
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue, device);
        Ok(())
    }

    pub fn device(&self, device: vk::Device) -> Option<Arc<DeviceWrapper>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device)
            .cloned()
    }

    fn device_for(&self, device: vk::Device) -> Result<Arc<DeviceWrapper>> {
        self.device(device).ok_or(LayerError::UnknownDevice(device))
    }

    fn device_for_queue(&self, queue: vk::Queue) -> Result<Arc<DeviceWrapper>> {
        let device = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&queue)
            .copied()
            .ok_or(LayerError::UnknownQueue(queue))?;
        self.device_for(device)
    }

    // ---------------------------------------------------------------------
    // Intercepted operations
    // ---------------------------------------------------------------------

    pub fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[GraphicsPipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>> {
        self.device_for(device)?
            .create_graphics_pipelines(pipeline_cache, create_infos)
    }

    pub fn create_compute_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[ComputePipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>> {
        self.device_for(device)?
            .create_compute_pipelines(pipeline_cache, create_infos)
    }

    pub fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &MemoryAllocation,
    ) -> VkResult<vk::DeviceMemory> {
        self.device_for(device)?.allocate_memory(allocate_info)
    }

    pub fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitBatch],
        fence: vk::Fence,
    ) -> VkResult<()> {
        self.device_for_queue(queue)?
            .queue_submit(queue, submits, fence)
    }

    // ---------------------------------------------------------------------
    // Pipeline bookkeeping
    // ---------------------------------------------------------------------

    /// Run the optimization pass over `handles`. Unknown devices and handles are ignored.
    pub fn optimize_pipelines(&self, device: vk::Device, handles: &[vk::Pipeline]) -> usize {
        self.device(device)
            .map_or(0, |wrapper| wrapper.optimize_pipelines(handles))
    }

    /// `vkDestroyPipeline` notification: forget the pipeline.
    pub fn notify_pipeline_destroyed(&self, device: vk::Device, pipeline: vk::Pipeline) -> bool {
        self.device(device)
            .and_then(|wrapper| wrapper.notify_pipeline_destroyed(pipeline))
            .is_some()
    }

    pub fn pipeline(&self, device: vk::Device, pipeline: vk::Pipeline) -> Option<PipelineEntry> {
        self.device(device)?.pipeline(pipeline)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("config", &self.config)
            .field("dispatch", &self.dispatch)
            .field(
                "devices",
                &self
                    .devices
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len(),
            )
            .finish_non_exhaustive()
    }
}
