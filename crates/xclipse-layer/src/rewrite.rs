//! Parameter rewrite rules.
//!
//! Each rule works on one sub-structure, only ever tightens a performance default inside what the
//! application's request already allows, and is idempotent: a request that went through the rules
//! once comes out of a second pass unchanged. Rules receive owned copies; the batch entry points
//! clone the caller's structures first and return exactly one rewritten structure per input, in
//! input order.

use ash::vk;
use tracing::debug;

use crate::config::{LayerConfig, RewriteRules};
use crate::error::Result;
use crate::request::{GraphicsPipelineDesc, MemoryAllocation, MultisampleState, RasterizationState};

/// Round `value` up to the next multiple of `alignment` (a power of two).
///
/// Never rounds down: if padding would overflow, `value` is returned as-is.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());

    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(v) => v & !mask,
        None => value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewritePolicy {
    rules: RewriteRules,
    max_sample_count: vk::SampleCountFlags,
    allocation_alignment: u64,
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self::from_validated(&LayerConfig::default())
    }
}

impl RewritePolicy {
    /// Policy for `config`, which is rejected unless it passes [`LayerConfig::validate`].
    pub fn from_config(config: &LayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: &LayerConfig) -> Self {
        Self {
            rules: config.rules,
            max_sample_count: vk::SampleCountFlags::from_raw(config.max_sample_count),
            allocation_alignment: config.allocation_alignment,
        }
    }

    pub fn rules(&self) -> RewriteRules {
        self.rules
    }

    /// Back-face culling when the application asked for none. Returns whether `state` changed.
    pub fn rewrite_rasterization(&self, state: &mut RasterizationState) -> bool {
        if !self.rules.contains(RewriteRules::CULL_MODE) {
            return false;
        }
        if state.cull_mode == vk::CullModeFlags::NONE {
            state.cull_mode = vk::CullModeFlags::BACK;
            return true;
        }
        false
    }

    /// Clamp the sample count to the configured maximum. Returns whether `state` changed.
    ///
    /// Only a single valid sample-count bit is clamped; anything else is left for the driver to
    /// reject.
    pub fn rewrite_multisample(&self, state: &mut MultisampleState) -> bool {
        if !self.rules.contains(RewriteRules::SAMPLE_COUNT) {
            return false;
        }
        let requested = state.rasterization_samples.as_raw();
        if !requested.is_power_of_two() {
            return false;
        }
        if requested > self.max_sample_count.as_raw() {
            state.rasterization_samples = self.max_sample_count;
            return true;
        }
        false
    }

    /// Rewritten copy of one graphics pipeline request.
    pub fn rewrite_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> (GraphicsPipelineDesc, bool) {
        let mut out = desc.clone();
        let mut changed = false;
        if let Some(rasterization) = out.rasterization.as_mut() {
            changed |= self.rewrite_rasterization(rasterization);
        }
        if let Some(multisample) = out.multisample.as_mut() {
            changed |= self.rewrite_multisample(multisample);
        }
        (out, changed)
    }

    /// Rewritten copies of a batch, one per input, same order. The second value counts how many
    /// structures actually changed.
    pub fn rewrite_graphics_pipelines(
        &self,
        descs: &[GraphicsPipelineDesc],
    ) -> (Vec<GraphicsPipelineDesc>, usize) {
        let mut changed = 0;
        let out = descs
            .iter()
            .map(|desc| {
                let (rewritten, did_change) = self.rewrite_graphics_pipeline(desc);
                changed += usize::from(did_change);
                rewritten
            })
            .collect();
        (out, changed)
    }

    /// Rewritten copy of an allocation: the size is padded up to the alignment granule.
    ///
    /// Requests naming a memory type that does not exist in `memory` are returned unchanged so the
    /// driver reports its own error for them.
    pub fn rewrite_allocation(
        &self,
        info: &MemoryAllocation,
        memory: &vk::PhysicalDeviceMemoryProperties,
    ) -> MemoryAllocation {
        let mut out = *info;
        if !self.rules.contains(RewriteRules::ALLOCATION_PADDING) {
            return out;
        }

        let type_count = (memory.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
        let Some(memory_type) = memory.memory_types[..type_count]
            .get(out.memory_type_index as usize)
        else {
            return out;
        };

        out.allocation_size = align_up(out.allocation_size, self.allocation_alignment);
        if out.allocation_size != info.allocation_size {
            debug!(
                requested = info.allocation_size,
                padded = out.allocation_size,
                memory_type = out.memory_type_index,
                device_local = memory_type
                    .property_flags
                    .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL),
                "padded allocation"
            );
        }
        out
    }
}
