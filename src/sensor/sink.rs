use super::registry::RegistryInner;
use super::{DeviceIdentity, HardwareEvent};
use crate::events::DisableReason;
use crate::frame::Timestamp;
use crate::stream::{SkeletonFrame, StreamKind};
use std::sync::Weak;
use tracing::{debug, trace, warn};

/// Entry point for the hardware layer's background context.
///
/// Notifications are applied under the registry's lifecycle lock so they
/// serialize with open and close. Frames go straight to the owning stream.
/// Once the registry is dropped every call is a no-op.
#[derive(Clone)]
pub struct HardwareSink {
    inner: Weak<RegistryInner>,
}

impl HardwareSink {
    pub(crate) fn new(inner: Weak<RegistryInner>) -> Self {
        Self { inner }
    }

    /// Feed a hot-plug, power, bandwidth or claim notification into the
    /// sensor's status monitor. Ports that are not open are ignored; their
    /// status is re-queried when they are opened.
    pub fn notify(&self, port: &DeviceIdentity, event: HardwareEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        let _lifecycle = inner.lifecycle.lock();
        let Some(entry) = inner.entry_for_port(port).filter(|entry| entry.is_open()) else {
            trace!("Ignoring {:?} for port {} with no open handle", event, port);
            return;
        };

        let Some(transition) = entry.monitor.apply(event) else {
            debug!("{:?} on {} left status {}", event, port, entry.monitor.status());
            return;
        };

        if transition.left_started() {
            warn!(
                "Sensor {} lost while started ({}), disabling streams",
                port, transition.current
            );
            inner.shut_streams(&entry, DisableReason::DeviceLost);
        }

        inner.publish_status(&entry, transition.previous, transition.current);
    }

    fn deliver_image(
        &self,
        port: &DeviceIdentity,
        kind: StreamKind,
        data: &[u8],
        timestamp: Timestamp,
    ) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let Some(entry) = inner.entry_for_port(port) else {
            trace!("Dropping {} frame for unknown port {}", kind, port);
            return false;
        };

        match kind {
            StreamKind::Color => entry.color.deliver(data, timestamp),
            StreamKind::Depth => entry.depth.deliver(data, timestamp),
            StreamKind::Infrared => entry.infrared.deliver(data, timestamp),
            StreamKind::Skeleton => false,
        }
    }

    /// Hand over a color frame; returns whether it was accepted
    pub fn deliver_color(&self, port: &DeviceIdentity, data: &[u8], timestamp: Timestamp) -> bool {
        self.deliver_image(port, StreamKind::Color, data, timestamp)
    }

    pub fn deliver_depth(&self, port: &DeviceIdentity, data: &[u8], timestamp: Timestamp) -> bool {
        self.deliver_image(port, StreamKind::Depth, data, timestamp)
    }

    pub fn deliver_infrared(
        &self,
        port: &DeviceIdentity,
        data: &[u8],
        timestamp: Timestamp,
    ) -> bool {
        self.deliver_image(port, StreamKind::Infrared, data, timestamp)
    }

    pub fn deliver_skeleton(&self, port: &DeviceIdentity, frame: SkeletonFrame) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        inner
            .entry_for_port(port)
            .map(|entry| entry.skeleton.deliver(frame))
            .unwrap_or(false)
    }
}
