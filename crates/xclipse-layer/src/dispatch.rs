//! Function-name resolution for the layer.
//!
//! Every owning handle (instance, device, or the null handle used for global queries) gets one
//! immutable [`DispatchTable`]. Resolution checks the fixed allow-list of intercepted operations
//! first and only then asks the next layer, so the layer's own interceptors always win over
//! anything further down the chain.
//!
//! String names only exist here, at the loader-facing boundary. Past this module every operation
//! is identified by [`InterceptedOp`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ash::vk;
use tracing::{debug, trace};

use crate::error::{LayerError, Result};

/// Address of an entry point as handed to the loader (`PFN_vkVoidFunction`).
pub type RawProc = unsafe extern "system" fn();

/// Handle that owns a dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchOwner {
    /// Queries made with a null instance (enumeration and pre-instance entry points).
    Global,
    Instance(vk::Instance),
    Device(vk::Device),
}

/// The operations the layer intercepts. Everything else is passed through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterceptedOp {
    CreateGraphicsPipelines,
    CreateComputePipelines,
    AllocateMemory,
    QueueSubmit,
}

impl InterceptedOp {
    pub const ALL: [InterceptedOp; 4] = [
        InterceptedOp::CreateGraphicsPipelines,
        InterceptedOp::CreateComputePipelines,
        InterceptedOp::AllocateMemory,
        InterceptedOp::QueueSubmit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InterceptedOp::CreateGraphicsPipelines => "vkCreateGraphicsPipelines",
            InterceptedOp::CreateComputePipelines => "vkCreateComputePipelines",
            InterceptedOp::AllocateMemory => "vkAllocateMemory",
            InterceptedOp::QueueSubmit => "vkQueueSubmit",
        }
    }

    /// Exact, case-sensitive match against the allow-list.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for InterceptedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The boundary's own exported addresses for the intercepted operations.
#[derive(Clone, Copy)]
pub struct LocalEntryPoints {
    pub create_graphics_pipelines: RawProc,
    pub create_compute_pipelines: RawProc,
    pub allocate_memory: RawProc,
    pub queue_submit: RawProc,
}

impl LocalEntryPoints {
    pub fn get(&self, op: InterceptedOp) -> RawProc {
        match op {
            InterceptedOp::CreateGraphicsPipelines => self.create_graphics_pipelines,
            InterceptedOp::CreateComputePipelines => self.create_compute_pipelines,
            InterceptedOp::AllocateMemory => self.allocate_memory,
            InterceptedOp::QueueSubmit => self.queue_submit,
        }
    }
}

impl fmt::Debug for LocalEntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEntryPoints")
            .field(
                "create_graphics_pipelines",
                &(self.create_graphics_pipelines as usize as *const ()),
            )
            .field(
                "create_compute_pipelines",
                &(self.create_compute_pipelines as usize as *const ()),
            )
            .field("allocate_memory", &(self.allocate_memory as usize as *const ()))
            .field("queue_submit", &(self.queue_submit as usize as *const ()))
            .finish()
    }
}

/// Name resolution of the next layer down the chain (`vkGet*ProcAddr` of the next layer).
pub trait ProcResolver: Send + Sync {
    fn get_proc_addr(&self, owner: DispatchOwner, name: &str) -> Option<RawProc>;
}

/// Result of resolving a name.
#[derive(Clone, Copy)]
pub enum ProcTarget {
    /// Handled by the layer's interceptor for this operation.
    Local(InterceptedOp),
    /// Forwarded verbatim from the next layer.
    Delegate(RawProc),
}

impl fmt::Debug for ProcTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcTarget::Local(op) => f.debug_tuple("Local").field(op).finish(),
            ProcTarget::Delegate(proc) => f
                .debug_tuple("Delegate")
                .field(&(*proc as usize as *const ()))
                .finish(),
        }
    }
}

/// Per-owner resolution table. Immutable once built.
pub struct DispatchTable {
    owner: DispatchOwner,
    entry_points: LocalEntryPoints,
    next: Option<Arc<dyn ProcResolver>>,
}

impl DispatchTable {
    pub fn new(
        owner: DispatchOwner,
        entry_points: LocalEntryPoints,
        next: Option<Arc<dyn ProcResolver>>,
    ) -> Self {
        Self {
            owner,
            entry_points,
            next,
        }
    }

    pub fn owner(&self) -> DispatchOwner {
        self.owner
    }

    pub fn has_delegate(&self) -> bool {
        self.next.is_some()
    }

    /// Allow-list first, then the next layer. `None` means "let the next consumer decide".
    pub fn resolve(&self, name: &str) -> Option<ProcTarget> {
        if let Some(op) = InterceptedOp::from_name(name) {
            return Some(ProcTarget::Local(op));
        }
        let next = self.next.as_ref()?;
        next.get_proc_addr(self.owner, name).map(ProcTarget::Delegate)
    }

    /// [`Self::resolve`] flattened to the address the loader receives.
    pub fn get_proc_addr(&self, name: &str) -> Option<RawProc> {
        self.resolve(name).map(|target| match target {
            ProcTarget::Local(op) => self.entry_points.get(op),
            ProcTarget::Delegate(proc) => proc,
        })
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("owner", &self.owner)
            .field("has_delegate", &self.has_delegate())
            .finish_non_exhaustive()
    }
}

/// All dispatch tables of the process, keyed by owning handle.
///
/// Tables are built completely before they are inserted, so a reader that finds one never sees it
/// half-initialized.
pub struct DispatchRegistry {
    entry_points: LocalEntryPoints,
    tables: RwLock<HashMap<DispatchOwner, Arc<DispatchTable>>>,
}

impl DispatchRegistry {
    pub fn new(entry_points: LocalEntryPoints) -> Self {
        Self {
            entry_points,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn entry_points(&self) -> &LocalEntryPoints {
        &self.entry_points
    }

    /// Capture the next layer's resolver for `owner`.
    pub fn register(
        &self,
        owner: DispatchOwner,
        next: Arc<dyn ProcResolver>,
    ) -> Result<Arc<DispatchTable>> {
        let table = Arc::new(DispatchTable::new(owner, self.entry_points, Some(next)));

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(&owner) {
            return Err(LayerError::DispatchAlreadyRegistered(owner));
        }
        tables.insert(owner, Arc::clone(&table));
        debug!(?owner, "dispatch table registered");
        Ok(table)
    }

    pub fn unregister(&self, owner: DispatchOwner) -> Option<Arc<DispatchTable>> {
        let removed = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&owner);
        if removed.is_some() {
            debug!(?owner, "dispatch table dropped");
        }
        removed
    }

    pub fn table(&self, owner: DispatchOwner) -> Option<Arc<DispatchTable>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&owner)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `name` for `owner`.
    ///
    /// Owners that never had a resolver captured still resolve the intercepted names; every other
    /// name is "not found".
    pub fn resolve(&self, owner: DispatchOwner, name: &str) -> Option<ProcTarget> {
        let target = match self.table(owner) {
            Some(table) => table.resolve(name),
            None => InterceptedOp::from_name(name).map(ProcTarget::Local),
        };
        match target {
            Some(ProcTarget::Local(op)) => debug!(?owner, %op, "resolved to interceptor"),
            Some(ProcTarget::Delegate(_)) => trace!(?owner, name, "resolved through next layer"),
            None => trace!(?owner, name, "unresolved"),
        }
        target
    }

    pub fn get_proc_addr(&self, owner: DispatchOwner, name: &str) -> Option<RawProc> {
        self.resolve(owner, name).map(|target| match target {
            ProcTarget::Local(op) => self.entry_points.get(op),
            ProcTarget::Delegate(proc) => proc,
        })
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("tables", &self.len())
            .finish_non_exhaustive()
    }
}
