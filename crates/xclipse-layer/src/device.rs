//! Per-device interception state.
//!
//! A [`DeviceWrapper`] exists for every device the layer has seen created. It owns the device's
//! pipeline table and, once initialized, an immutable [`DeviceContext`] snapshot. Until the
//! context is published every intercepted call is forwarded verbatim (fail-open).

use std::fmt;
use std::sync::{Arc, OnceLock};

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, trace, warn};

use crate::classify::{is_permutation, partition_submits, SubmitReorder, WorkloadKind};
use crate::dispatch::InterceptedOp;
use crate::error::{LayerError, Result};
use crate::pipeline_state::{BindPoint, PipelineEntry, PipelineStateCache};
use crate::request::{ComputePipelineDesc, GraphicsPipelineDesc, MemoryAllocation, SubmitBatch};
use crate::rewrite::RewritePolicy;
use crate::stats::LayerStats;

/// The next layer's implementation of the device-level operations the layer touches.
///
/// Implementations must not call back into the same [`DeviceWrapper`] while holding any lock of
/// their own that the wrapper's caller might also need; the wrapper itself holds no lock while
/// inside these calls.
pub trait DeviceDispatch: Send + Sync {
    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[GraphicsPipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>>;

    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[ComputePipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>>;

    fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &MemoryAllocation,
    ) -> VkResult<vk::DeviceMemory>;

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitBatch],
        fence: vk::Fence,
    ) -> VkResult<()>;

    fn get_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties;

    fn get_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;
}

/// Snapshot of the device taken once at initialization.
#[derive(Clone, Copy)]
pub struct DeviceContext {
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    pub fn capture(
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
        next: &dyn DeviceDispatch,
    ) -> Result<Self> {
        if physical_device == vk::PhysicalDevice::null() {
            return Err(LayerError::NullPhysicalDevice);
        }
        if device == vk::Device::null() {
            return Err(LayerError::NullDevice);
        }

        Ok(Self {
            physical_device,
            device,
            properties: next.get_physical_device_properties(physical_device),
            memory_properties: next.get_physical_device_memory_properties(physical_device),
        })
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("physical_device", &self.physical_device)
            .field("device", &self.device)
            .field("vendor_id", &self.properties.vendor_id)
            .field("device_id", &self.properties.device_id)
            .field("memory_types", &self.memory_properties.memory_type_count)
            .finish_non_exhaustive()
    }
}

pub struct DeviceWrapper {
    device: vk::Device,
    next: Arc<dyn DeviceDispatch>,
    context: OnceLock<DeviceContext>,
    pipelines: PipelineStateCache,
    policy: RewritePolicy,
    classify_submissions: bool,
    reorder: Arc<dyn SubmitReorder>,
    stats: Arc<LayerStats>,
}

impl DeviceWrapper {
    pub fn new(
        device: vk::Device,
        next: Arc<dyn DeviceDispatch>,
        policy: RewritePolicy,
        classify_submissions: bool,
        reorder: Arc<dyn SubmitReorder>,
        stats: Arc<LayerStats>,
    ) -> Self {
        Self {
            device,
            next,
            context: OnceLock::new(),
            pipelines: PipelineStateCache::new(),
            policy,
            classify_submissions,
            reorder,
            stats,
        }
    }

    pub fn device(&self) -> vk::Device {
        self.device
    }

    /// Capture and publish the device context. Succeeds at most once per wrapper.
    pub fn initialize_context(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<&DeviceContext> {
        if self.context.get().is_some() {
            return Err(LayerError::DeviceContextAlreadyInitialized(self.device));
        }

        let context = DeviceContext::capture(physical_device, self.device, self.next.as_ref())?;
        self.context
            .set(context)
            .map_err(|_| LayerError::DeviceContextAlreadyInitialized(self.device))?;
        let context = self
            .context
            .get()
            .ok_or(LayerError::DeviceContextAlreadyInitialized(self.device))?;

        info!(
            device = ?self.device,
            physical_device = ?physical_device,
            vendor_id = context.properties.vendor_id,
            device_id = context.properties.device_id,
            memory_types = context.memory_properties.memory_type_count,
            "device context initialized"
        );
        Ok(context)
    }

    pub fn context(&self) -> Option<&DeviceContext> {
        self.context.get()
    }

    pub fn pipelines(&self) -> &PipelineStateCache {
        &self.pipelines
    }

    pub fn pipeline(&self, handle: vk::Pipeline) -> Option<PipelineEntry> {
        self.pipelines.get(handle)
    }

    fn forward<T>(&self, op: InterceptedOp, result: VkResult<T>) -> VkResult<T> {
        if let Err(err) = &result {
            self.stats.inc_forwarding_failures();
            warn!(device = ?self.device, %op, result = ?err, "next layer reported failure");
        }
        result
    }

    /// Context if the layer may act on this call; `None` means forward verbatim.
    fn ready(&self, op: InterceptedOp) -> Option<&DeviceContext> {
        self.stats.inc_intercepted_calls();
        let context = self.context.get();
        if context.is_none() {
            self.stats.inc_fail_open_calls();
            trace!(device = ?self.device, %op, "device context not ready, passing through");
        }
        context
    }

    pub fn create_graphics_pipelines(
        &self,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[GraphicsPipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>> {
        let op = InterceptedOp::CreateGraphicsPipelines;
        if self.ready(op).is_none() {
            return self.forward(
                op,
                self.next
                    .create_graphics_pipelines(self.device, pipeline_cache, create_infos),
            );
        }

        let (rewritten, changed) = self.policy.rewrite_graphics_pipelines(create_infos);
        self.stats.add_rewritten_structures(changed as u64);
        if changed > 0 {
            debug!(
                device = ?self.device,
                count = create_infos.len(),
                changed,
                "rewrote graphics pipeline create infos"
            );
        }
        let stage_masks: Vec<vk::ShaderStageFlags> =
            rewritten.iter().map(GraphicsPipelineDesc::stage_mask).collect();

        let pipelines = self.forward(
            op,
            self.next
                .create_graphics_pipelines(self.device, pipeline_cache, &rewritten),
        )?;

        let recorded = self
            .pipelines
            .record_created(&pipelines, BindPoint::Graphics, &stage_masks);
        self.stats.add_pipelines_recorded(recorded as u64);
        Ok(pipelines)
    }

    pub fn create_compute_pipelines(
        &self,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[ComputePipelineDesc],
    ) -> VkResult<Vec<vk::Pipeline>> {
        let op = InterceptedOp::CreateComputePipelines;
        let ready = self.ready(op).is_some();

        // Compute create infos are forwarded as-is; the layer only records the results.
        let pipelines = self.forward(
            op,
            self.next
                .create_compute_pipelines(self.device, pipeline_cache, create_infos),
        )?;

        if ready {
            let stage_masks: Vec<vk::ShaderStageFlags> = create_infos
                .iter()
                .map(ComputePipelineDesc::stage_mask)
                .collect();
            let recorded = self
                .pipelines
                .record_created(&pipelines, BindPoint::Compute, &stage_masks);
            self.stats.add_pipelines_recorded(recorded as u64);
        }
        Ok(pipelines)
    }

    pub fn allocate_memory(&self, allocate_info: &MemoryAllocation) -> VkResult<vk::DeviceMemory> {
        let op = InterceptedOp::AllocateMemory;
        let Some(context) = self.ready(op) else {
            return self.forward(op, self.next.allocate_memory(self.device, allocate_info));
        };

        let rewritten = self
            .policy
            .rewrite_allocation(allocate_info, &context.memory_properties);
        if rewritten != *allocate_info {
            self.stats.add_rewritten_structures(1);
        }
        self.forward(op, self.next.allocate_memory(self.device, &rewritten))
    }

    pub fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitBatch],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let op = InterceptedOp::QueueSubmit;
        if self.ready(op).is_none() || !self.classify_submissions || submits.is_empty() {
            return self.forward(op, self.next.queue_submit(queue, submits, fence));
        }

        let partition = partition_submits(submits);
        for kind in [
            WorkloadKind::Compute,
            WorkloadKind::Transfer,
            WorkloadKind::Graphics,
        ] {
            self.stats
                .add_submits(kind, partition.group(kind).len() as u64);
        }
        debug!(
            ?queue,
            compute = partition.compute.len(),
            transfer = partition.transfer.len(),
            graphics = partition.graphics.len(),
            "classified submission batch"
        );

        match self.reorder.reorder(submits, &partition) {
            Some(order) if is_permutation(&order, submits.len()) => {
                let reordered: Vec<SubmitBatch> =
                    order.iter().map(|&index| submits[index].clone()).collect();
                self.forward(op, self.next.queue_submit(queue, &reordered, fence))
            }
            Some(order) => {
                warn!(?queue, ?order, len = submits.len(), "ignoring invalid submit order");
                self.forward(op, self.next.queue_submit(queue, submits, fence))
            }
            None => self.forward(op, self.next.queue_submit(queue, submits, fence)),
        }
    }

    /// Optimization pass over existing pipelines: bumps the usage count of every tracked handle.
    /// Untracked handles are skipped. Returns how many entries were touched.
    pub fn optimize_pipelines(&self, handles: &[vk::Pipeline]) -> usize {
        if self.context.get().is_none() {
            return 0;
        }
        let touched = handles
            .iter()
            .filter(|&&handle| self.pipelines.touch(handle))
            .count();
        self.stats.add_pipelines_touched(touched as u64);
        touched
    }

    pub fn notify_pipeline_destroyed(&self, handle: vk::Pipeline) -> Option<PipelineEntry> {
        let evicted = self.pipelines.evict(handle);
        if evicted.is_some() {
            self.stats.inc_pipelines_evicted();
            trace!(device = ?self.device, pipeline = ?handle, "pipeline evicted");
        }
        evicted
    }
}

impl fmt::Debug for DeviceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceWrapper")
            .field("device", &self.device)
            .field("context", &self.context.get())
            .field("pipelines", &self.pipelines.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PreserveOrder;
    use crate::test_utils::{ForwardedCall, RecordingDriver, SAMSUNG_VENDOR_ID};
    use ash::vk::Handle;
    use pretty_assertions::assert_eq;

    fn wrapper(driver: &Arc<RecordingDriver>) -> DeviceWrapper {
        DeviceWrapper::new(
            vk::Device::from_raw(0xd0),
            Arc::clone(driver) as Arc<dyn DeviceDispatch>,
            RewritePolicy::default(),
            true,
            Arc::new(PreserveOrder),
            Arc::new(LayerStats::new()),
        )
    }

    #[test]
    fn context_is_published_once() {
        let driver = Arc::new(RecordingDriver::new());
        let wrapper = wrapper(&driver);
        assert!(wrapper.context().is_none());

        let context = *wrapper
            .initialize_context(vk::PhysicalDevice::from_raw(0x9d))
            .unwrap();
        assert_eq!(context.properties.vendor_id, SAMSUNG_VENDOR_ID);
        assert_eq!(context.device, wrapper.device());

        assert_eq!(
            wrapper
                .initialize_context(vk::PhysicalDevice::from_raw(0x9e))
                .unwrap_err(),
            LayerError::DeviceContextAlreadyInitialized(wrapper.device())
        );
        assert_eq!(
            wrapper.context().map(|c| c.physical_device),
            Some(vk::PhysicalDevice::from_raw(0x9d))
        );
    }

    #[test]
    fn null_physical_device_leaves_wrapper_in_pass_through() {
        let driver = Arc::new(RecordingDriver::new());
        let wrapper = wrapper(&driver);
        assert_eq!(
            wrapper
                .initialize_context(vk::PhysicalDevice::null())
                .unwrap_err(),
            LayerError::NullPhysicalDevice
        );
        assert!(wrapper.context().is_none());

        let info = MemoryAllocation {
            allocation_size: 3,
            memory_type_index: 0,
        };
        wrapper.allocate_memory(&info).unwrap();
        assert_eq!(
            driver.last_call(),
            Some(ForwardedCall::AllocateMemory {
                device: wrapper.device(),
                allocate_info: info,
            })
        );
    }

    #[test]
    fn compute_results_are_not_tracked_before_initialization() {
        let driver = Arc::new(RecordingDriver::new());
        let wrapper = wrapper(&driver);
        let desc = ComputePipelineDesc::new(
            crate::request::ShaderStageDesc::new(
                vk::ShaderStageFlags::COMPUTE,
                vk::ShaderModule::from_raw(1),
                "main",
            ),
            vk::PipelineLayout::null(),
        );

        let handles = wrapper
            .create_compute_pipelines(vk::PipelineCache::null(), &[desc])
            .unwrap();
        assert_eq!(handles.len(), 1);
        assert!(wrapper.pipelines().is_empty());
    }
}
