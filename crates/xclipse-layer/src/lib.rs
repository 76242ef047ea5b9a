//! `xclipse-layer` is the interception core of a Vulkan layer that tunes applications for the
//! Samsung Xclipse 940 GPU.
//!
//! The layer sits between the application and the driver and exposes the same entry points. Four
//! operations are intercepted; everything else resolves straight to the next layer:
//!
//! - `vkCreateGraphicsPipelines`: rasterization and multisample defaults are rewritten on a copy
//!   of the request (see [`rewrite`]) and the resulting pipelines are tracked (see
//!   [`pipeline_state`]).
//! - `vkCreateComputePipelines`: forwarded unchanged, results tracked.
//! - `vkAllocateMemory`: allocation sizes padded to the cache-line granule.
//! - `vkQueueSubmit`: batches classified by likely workload (see [`classify`]).
//!
//! Nothing is rewritten for a device until its [`DeviceContext`] has been published; before that,
//! and whenever the layer is disabled, every call passes through verbatim.
//!
//! The loader manifest, interface negotiation and the exported `extern "system"` symbols live in
//! the embedding library; it constructs one [`Layer`] at load time and routes every export through
//! it.

pub mod classify;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod logging;
pub mod pipeline_state;
pub mod request;
pub mod rewrite;
pub mod stats;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod layer;

pub use classify::{PreserveOrder, SubmissionPartition, SubmitReorder, WorkloadKind};
pub use config::{LayerConfig, RewriteRules};
pub use device::{DeviceContext, DeviceDispatch, DeviceWrapper};
pub use dispatch::{
    DispatchOwner, DispatchRegistry, DispatchTable, InterceptedOp, LocalEntryPoints, ProcResolver,
    ProcTarget, RawProc,
};
pub use error::{LayerError, Result};
pub use layer::{DeviceChain, Layer};
pub use pipeline_state::{BindPoint, PipelineEntry, PipelineStateCache};
pub use request::{
    ComputePipelineDesc, GraphicsPipelineDesc, MemoryAllocation, MultisampleState,
    RasterizationState, ShaderStageDesc, SubmitBatch,
};
pub use rewrite::RewritePolicy;
pub use stats::{LayerStats, LayerStatsSnapshot};
