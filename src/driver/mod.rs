//! Seam between the sensor manager and the hardware layer.
//!
//! A driver enumerates ports, answers direct link-health queries and
//! acquires/releases per-stream resources. Asynchronous notifications and
//! frames travel the other way through a [`HardwareSink`](crate::sensor::HardwareSink).

mod simulated;

pub use simulated::{SimulatedDriver, SimulatedProducer, DEFAULT_SIMULATED_PORT};

use crate::error::Result;
use crate::frame::FrameFormatDescriptor;
use crate::sensor::DeviceIdentity;
use crate::stream::{SkeletalConfig, StreamKind};
use serde::Serialize;

/// Result codes reported by the native sensor runtime
pub mod native {
    pub const S_OK: i32 = 0;
    pub const S_NUI_INITIALIZING: i32 = 0x0301_0001;
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    pub const E_HANDLE: i32 = 0x8007_0006_u32 as i32;
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
    pub const E_NUI_DEVICE_NOT_READY: i32 = 0x8007_0015_u32 as i32;
    pub const E_NUI_DEVICE_NOT_CONNECTED: i32 = 0x8007_048F_u32 as i32;
    pub const E_NUI_FRAME_NO_DATA: i32 = 0x8301_0001_u32 as i32;
    pub const E_NUI_STREAM_NOT_ENABLED: i32 = 0x8301_0002_u32 as i32;
    pub const E_NUI_NOTGENUINE: i32 = 0x8301_0006_u32 as i32;
    pub const E_NUI_INSUFFICIENTBANDWIDTH: i32 = 0x8301_0007_u32 as i32;
    pub const E_NUI_NOTSUPPORTED: i32 = 0x8301_0008_u32 as i32;
    pub const E_NUI_DEVICE_IN_USE: i32 = 0x8301_0009_u32 as i32;
    pub const E_NUI_NOTPOWERED: i32 = 0x8301_027F_u32 as i32;
}

/// Physical condition of a sensor port as the hardware sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    /// Nothing plugged into the port
    Absent,
    Initializing,
    Ready,
    NotPowered,
    InsufficientBandwidth,
    /// Claimed by another process
    InUse,
    NotGenuine,
    NotSupported,
    Fault,
}

impl LinkState {
    pub fn native_code(&self) -> i32 {
        match self {
            LinkState::Absent => native::E_NUI_DEVICE_NOT_CONNECTED,
            LinkState::Initializing => native::S_NUI_INITIALIZING,
            LinkState::Ready => native::S_OK,
            LinkState::NotPowered => native::E_NUI_NOTPOWERED,
            LinkState::InsufficientBandwidth => native::E_NUI_INSUFFICIENTBANDWIDTH,
            LinkState::InUse => native::E_NUI_DEVICE_IN_USE,
            LinkState::NotGenuine => native::E_NUI_NOTGENUINE,
            LinkState::NotSupported => native::E_NUI_NOTSUPPORTED,
            LinkState::Fault => native::E_FAIL,
        }
    }
}

/// Answer to a direct link-health query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    pub state: LinkState,
    pub native_code: i32,
}

impl From<LinkState> for LinkReport {
    fn from(state: LinkState) -> Self {
        Self {
            state,
            native_code: state.native_code(),
        }
    }
}

/// Parameters handed to the driver when a stream's resources are acquired
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamRequest {
    Image {
        format: FrameFormatDescriptor,
        near_mode: bool,
    },
    Skeleton(SkeletalConfig),
}

/// Hardware layer consumed by the sensor registry
pub trait SensorDriver: Send + Sync {
    /// Number of distinguishable sensor ports
    fn port_count(&self) -> usize;

    /// Identity of the port at `index`, in discovery order
    fn port_id(&self, index: usize) -> Option<DeviceIdentity>;

    /// Query the current link health of a port without waiting for a notification
    fn query_link(&self, port: &DeviceIdentity) -> LinkReport;

    /// Acquire frame-delivery resources for one stream
    fn open_stream(
        &self,
        port: &DeviceIdentity,
        kind: StreamKind,
        request: &StreamRequest,
    ) -> Result<()>;

    /// Release the resources acquired by `open_stream`. Must tolerate
    /// streams that are not open.
    fn close_stream(&self, port: &DeviceIdentity, kind: StreamKind);
}
