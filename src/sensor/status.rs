use crate::driver::{native, LinkReport, LinkState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Coherent status of an open sensor. Values match the flags the native
/// wrapper exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SensorStatus {
    None = 0x00,
    Started = 0x01,
    NotPowered = 0x02,
    InsufficientBandwidth = 0x04,
    Conflict = 0x08,
    Initializing = 0x10,
    NotGenuine = 0x20,
    NotSupported = 0x40,
    Error = 0x80,
}

impl SensorStatus {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0x00 => Some(SensorStatus::None),
            0x01 => Some(SensorStatus::Started),
            0x02 => Some(SensorStatus::NotPowered),
            0x04 => Some(SensorStatus::InsufficientBandwidth),
            0x08 => Some(SensorStatus::Conflict),
            0x10 => Some(SensorStatus::Initializing),
            0x20 => Some(SensorStatus::NotGenuine),
            0x40 => Some(SensorStatus::NotSupported),
            0x80 => Some(SensorStatus::Error),
            _ => None,
        }
    }

    pub fn bits(&self) -> u32 {
        *self as u32
    }

    /// Sink states: no automatic recovery, the handle has to be closed and
    /// re-opened
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SensorStatus::NotGenuine | SensorStatus::NotSupported | SensorStatus::Error
        )
    }

    /// Degraded states expected to clear through a later hardware event
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SensorStatus::NotPowered
                | SensorStatus::InsufficientBandwidth
                | SensorStatus::Conflict
                | SensorStatus::Initializing
        )
    }

    pub fn from_link(state: LinkState) -> Self {
        match state {
            LinkState::Absent | LinkState::Initializing => SensorStatus::Initializing,
            LinkState::Ready => SensorStatus::Started,
            LinkState::NotPowered => SensorStatus::NotPowered,
            LinkState::InsufficientBandwidth => SensorStatus::InsufficientBandwidth,
            LinkState::InUse => SensorStatus::Conflict,
            LinkState::NotGenuine => SensorStatus::NotGenuine,
            LinkState::NotSupported => SensorStatus::NotSupported,
            LinkState::Fault => SensorStatus::Error,
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    NotGenuine,
    NotSupported,
    Error,
}

/// Asynchronous notification from the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareEvent {
    Plugged,
    Unplugged,
    PowerLost,
    PowerRestored,
    BandwidthInsufficient,
    BandwidthRestored,
    /// Another process took the device
    Claimed,
    Released,
    /// Device is powered, unclaimed and streaming-capable
    Ready,
    Fault(FaultKind),
}

impl HardwareEvent {
    /// Link state the event leaves the port in
    pub fn link_state(&self) -> LinkState {
        match self {
            HardwareEvent::Plugged => LinkState::Initializing,
            HardwareEvent::Unplugged => LinkState::Absent,
            HardwareEvent::PowerLost => LinkState::NotPowered,
            HardwareEvent::BandwidthInsufficient => LinkState::InsufficientBandwidth,
            HardwareEvent::Claimed => LinkState::InUse,
            HardwareEvent::PowerRestored
            | HardwareEvent::BandwidthRestored
            | HardwareEvent::Released
            | HardwareEvent::Ready => LinkState::Ready,
            HardwareEvent::Fault(FaultKind::NotGenuine) => LinkState::NotGenuine,
            HardwareEvent::Fault(FaultKind::NotSupported) => LinkState::NotSupported,
            HardwareEvent::Fault(FaultKind::Error) => LinkState::Fault,
        }
    }

    pub fn native_code(&self) -> i32 {
        self.link_state().native_code()
    }
}

/// Compute the status an event moves a sensor to, or `None` if the event
/// does not change it.
pub fn next_status(current: SensorStatus, event: HardwareEvent) -> Option<SensorStatus> {
    if current.is_terminal() || current == SensorStatus::None {
        return None;
    }

    let next = match event {
        HardwareEvent::Fault(FaultKind::NotGenuine) => SensorStatus::NotGenuine,
        HardwareEvent::Fault(FaultKind::NotSupported) => SensorStatus::NotSupported,
        HardwareEvent::Fault(FaultKind::Error) => SensorStatus::Error,
        HardwareEvent::Plugged => match current {
            SensorStatus::NotPowered => SensorStatus::Initializing,
            _ => current,
        },
        HardwareEvent::Unplugged | HardwareEvent::PowerLost => SensorStatus::NotPowered,
        HardwareEvent::BandwidthInsufficient => SensorStatus::InsufficientBandwidth,
        HardwareEvent::Claimed => SensorStatus::Conflict,
        HardwareEvent::PowerRestored => match current {
            SensorStatus::NotPowered => SensorStatus::Started,
            _ => current,
        },
        HardwareEvent::BandwidthRestored => match current {
            SensorStatus::InsufficientBandwidth => SensorStatus::Started,
            _ => current,
        },
        HardwareEvent::Released => match current {
            SensorStatus::Conflict => SensorStatus::Started,
            _ => current,
        },
        HardwareEvent::Ready => SensorStatus::Started,
    };

    (next != current).then_some(next)
}

/// A status change applied by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: SensorStatus,
    pub current: SensorStatus,
}

impl Transition {
    /// The device was lost mid-session
    pub fn left_started(&self) -> bool {
        self.previous == SensorStatus::Started && self.current != SensorStatus::Started
    }
}

/// Single source of truth for one sensor's status.
///
/// Writers are serialized by the registry table lock; readers take a
/// non-blocking snapshot.
#[derive(Debug)]
pub struct StatusMonitor {
    status: AtomicU32,
    native_code: AtomicI32,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self {
            status: AtomicU32::new(SensorStatus::None.bits()),
            native_code: AtomicI32::new(native::E_NUI_DEVICE_NOT_CONNECTED),
        }
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus::from_bits(self.status.load(Ordering::Acquire)).unwrap_or(SensorStatus::Error)
    }

    /// Last code reported by the hardware layer
    pub fn native_code(&self) -> i32 {
        self.native_code.load(Ordering::Acquire)
    }

    fn store(&self, status: SensorStatus) -> Transition {
        let previous = SensorStatus::from_bits(self.status.swap(status.bits(), Ordering::AcqRel))
            .unwrap_or(SensorStatus::Error);
        Transition {
            previous,
            current: status,
        }
    }

    /// Subscribe to a port: start at `Initializing`, then reconcile with a
    /// direct link query.
    pub(crate) fn begin(&self, report: LinkReport) -> Transition {
        self.store(SensorStatus::Initializing);
        self.native_code.store(report.native_code, Ordering::Release);
        let status = SensorStatus::from_link(report.state);
        debug!("Link query reported {:?}, status {}", report.state, status);
        Transition {
            previous: SensorStatus::None,
            current: self.store(status).current,
        }
    }

    /// Apply a hardware notification
    ///
    /// Terminal and closed sensors keep the code that put them there.
    pub(crate) fn apply(&self, event: HardwareEvent) -> Option<Transition> {
        let current = self.status();
        if current.is_terminal() || current == SensorStatus::None {
            return None;
        }
        self.native_code.store(event.native_code(), Ordering::Release);

        let next = next_status(current, event)?;
        let transition = self.store(next);

        if next.is_terminal() {
            warn!("Sensor status {} -> {} after {:?}", current, next, event);
        } else {
            info!("Sensor status {} -> {} after {:?}", current, next, event);
        }
        Some(transition)
    }

    /// Unsubscribe: the sensor reports `None` until re-opened
    pub(crate) fn reset(&self) -> Transition {
        self.native_code
            .store(native::E_NUI_DEVICE_NOT_CONNECTED, Ordering::Release);
        self.store(SensorStatus::None)
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}
