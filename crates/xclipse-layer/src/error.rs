use ash::vk;
use thiserror::Error;

use crate::dispatch::DispatchOwner;

pub type Result<T> = std::result::Result<T, LayerError>;

/// Failures raised by the layer itself (never by the driver).
///
/// Driver failures are not wrapped: intercepted operations return the driver's `vk::Result`
/// unchanged. Layer-side failures that have to surface through the API are converted with
/// `From<LayerError> for vk::Result`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("device context requires a non-null physical device handle")]
    NullPhysicalDevice,

    #[error("device context requires a non-null device handle")]
    NullDevice,

    #[error("device context for {0:?} is already initialized")]
    DeviceContextAlreadyInitialized(vk::Device),

    #[error("dispatch table for {0:?} is already registered")]
    DispatchAlreadyRegistered(DispatchOwner),

    #[error("no dispatch captured for device {0:?}")]
    UnknownDevice(vk::Device),

    #[error("queue {0:?} is not bound to any device")]
    UnknownQueue(vk::Queue),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl From<LayerError> for vk::Result {
    fn from(_err: LayerError) -> Self {
        // Every layer-side failure means the layer could not set itself up for the handle.
        vk::Result::ERROR_INITIALIZATION_FAILED
    }
}
