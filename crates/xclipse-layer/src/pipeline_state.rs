//! Metadata the layer keeps about driver-created pipelines.
//!
//! The table is keyed by the driver's `VkPipeline` handle, which the layer never owns or
//! dereferences. All mutations go through one mutex that is only held for the map operation
//! itself; callers must not hold it across a call into the next layer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;

/// Bind point a pipeline was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

impl BindPoint {
    pub fn to_vk(self) -> vk::PipelineBindPoint {
        match self {
            BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineEntry {
    pub handle: vk::Pipeline,
    pub usage_count: u64,
    pub bind_point: BindPoint,
    pub shader_stages: vk::ShaderStageFlags,
}

#[derive(Debug, Default)]
pub struct PipelineStateCache {
    entries: Mutex<HashMap<vk::Pipeline, PipelineEntry>>,
}

impl PipelineStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Entries are plain data; a panic on another thread cannot leave one half-written.
    fn lock(&self) -> MutexGuard<'_, HashMap<vk::Pipeline, PipelineEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record freshly created pipelines. `handles[i]` was created with `shader_stages[i]`; extra
    /// elements on either side are ignored.
    ///
    /// A handle that is already tracked was recycled by the driver, so its entry starts over with a
    /// usage count of 1. Null handles are skipped. Returns the number of entries written.
    pub fn record_created(
        &self,
        handles: &[vk::Pipeline],
        bind_point: BindPoint,
        shader_stages: &[vk::ShaderStageFlags],
    ) -> usize {
        let mut entries = self.lock();
        let mut recorded = 0;
        for (&handle, &stages) in handles.iter().zip(shader_stages) {
            if handle == vk::Pipeline::null() {
                continue;
            }
            entries.insert(
                handle,
                PipelineEntry {
                    handle,
                    usage_count: 1,
                    bind_point,
                    shader_stages: stages,
                },
            );
            recorded += 1;
        }
        recorded
    }

    /// Increment the usage count of `handle`. Unknown handles are left alone; this never inserts.
    pub fn touch(&self, handle: vk::Pipeline) -> bool {
        match self.lock().get_mut(&handle) {
            Some(entry) => {
                entry.usage_count = entry.usage_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for a destroyed pipeline.
    pub fn evict(&self, handle: vk::Pipeline) -> Option<PipelineEntry> {
        self.lock().remove(&handle)
    }

    pub fn get(&self, handle: vk::Pipeline) -> Option<PipelineEntry> {
        self.lock().get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copy of every entry, ordered by raw handle value.
    pub fn snapshot(&self) -> Vec<PipelineEntry> {
        use ash::vk::Handle;

        let mut entries: Vec<PipelineEntry> = self.lock().values().copied().collect();
        entries.sort_by_key(|entry| entry.handle.as_raw());
        entries
    }
}
