use super::entry::SensorEntry;
use super::{DeviceIdentity, HardwareSink, SensorHandle, SensorStatus};
use crate::driver::SensorDriver;
use crate::error::{Result, SensorError};
use crate::events::{DisableReason, EventBus, EventFilter, EventReceiver, SensorEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub(crate) struct RegistryInner {
    pub driver: Arc<dyn SensorDriver>,
    /// Serializes open, close and hot-plug notifications
    pub lifecycle: Mutex<HashMap<DeviceIdentity, SensorHandle>>,
    /// Append-only; a handle is an index into this table
    pub entries: RwLock<Vec<Arc<SensorEntry>>>,
    pub events: EventBus,
}

impl RegistryInner {
    pub fn entry(&self, handle: SensorHandle) -> Result<Arc<SensorEntry>> {
        self.entries
            .read()
            .get(handle.index())
            .cloned()
            .ok_or(SensorError::InvalidHandle {
                handle: handle.as_raw(),
            })
    }

    pub fn entry_for_port(&self, port: &DeviceIdentity) -> Option<Arc<SensorEntry>> {
        self.entries
            .read()
            .iter()
            .find(|entry| &entry.port == port)
            .cloned()
    }

    /// Disable every stream of `entry` and publish why
    pub fn shut_streams(&self, entry: &SensorEntry, reason: DisableReason) {
        for stream in entry.disable_all(self.driver.as_ref()) {
            self.events.publish(SensorEvent::StreamDisabled {
                handle: entry.handle,
                stream,
                reason,
            });
        }
    }

    pub fn publish_status(&self, entry: &SensorEntry, previous: SensorStatus, current: SensorStatus) {
        if previous == current {
            return;
        }
        self.events.publish(SensorEvent::StatusChanged {
            handle: entry.handle,
            port_id: entry.port.clone(),
            previous,
            current,
            timestamp: SystemTime::now(),
        });
    }
}

/// Process-wide table of sensor handles.
///
/// Cloning yields another view of the same table.
#[derive(Clone)]
pub struct SensorRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl SensorRegistry {
    pub fn new<D: SensorDriver + 'static>(driver: Arc<D>, event_bus_capacity: usize) -> Self {
        Self::with_driver(driver, event_bus_capacity)
    }

    pub fn with_driver(driver: Arc<dyn SensorDriver>, event_bus_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                driver,
                lifecycle: Mutex::new(HashMap::new()),
                entries: RwLock::new(Vec::new()),
                events: EventBus::new(event_bus_capacity),
            }),
        }
    }

    /// Sink the hardware layer pushes notifications and frames into
    pub fn hardware_sink(&self) -> HardwareSink {
        HardwareSink::new(Arc::downgrade(&self.inner))
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.inner.events.subscribe(), EventFilter::All)
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventReceiver {
        EventReceiver::new(self.inner.events.subscribe(), filter)
    }

    /// Snapshot of the currently known ports, in discovery order
    pub fn enumerate(&self) -> Vec<DeviceIdentity> {
        let driver = &self.inner.driver;
        (0..driver.port_count())
            .filter_map(|index| driver.port_id(index))
            .collect()
    }

    /// Open the first enumerated port
    pub fn open_default(&self) -> Result<SensorHandle> {
        self.open_by_index(0)
    }

    pub fn open_by_index(&self, index: usize) -> Result<SensorHandle> {
        let port = self
            .inner
            .driver
            .port_id(index)
            .ok_or_else(|| SensorError::not_found(format!("port index {}", index)))?;
        self.open(&port)
    }

    /// Open a port by identity.
    ///
    /// Opening an already-open port returns the same handle and adds a
    /// reference. The sensor need not be `Started` yet.
    pub fn open(&self, port: &DeviceIdentity) -> Result<SensorHandle> {
        if !self.enumerate().contains(port) {
            return Err(SensorError::not_found(format!("port {}", port)));
        }

        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock();

        let entry = match lifecycle.get(port).copied() {
            Some(handle) => inner.entry(handle)?,
            None => {
                let mut entries = inner.entries.write();
                let handle = SensorHandle::from_index(entries.len());
                let entry = Arc::new(SensorEntry::new(handle, port.clone()));
                entries.push(Arc::clone(&entry));
                lifecycle.insert(port.clone(), handle);
                debug!("Allocated {} for port {}", handle, port);
                entry
            }
        };

        let open_count = entry.open_count.fetch_add(1, Ordering::AcqRel) + 1;
        if open_count == 1 {
            let report = inner.driver.query_link(port);
            let transition = entry.monitor.begin(report);
            info!(
                "Opened {} on port {} (status {})",
                entry.handle, port, transition.current
            );
            inner.publish_status(&entry, transition.previous, transition.current);
        } else {
            debug!(
                "Port {} already open as {}, {} references",
                port, entry.handle, open_count
            );
        }

        inner.events.publish(SensorEvent::Opened {
            handle: entry.handle,
            port_id: port.clone(),
            open_count,
        });

        Ok(entry.handle)
    }

    /// Drop one reference. The last close disables every stream, releases
    /// their resources and stops tracking hardware notifications; the handle
    /// value stays valid for a later open.
    pub fn close(&self, handle: SensorHandle) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock();
        let entry = inner.entry(handle)?;

        let open_count = entry.open_count();
        if open_count == 0 {
            warn!("Close requested for {} which is not open", handle);
            return Ok(());
        }

        let remaining = open_count - 1;
        entry.open_count.store(remaining, Ordering::Release);

        if remaining == 0 {
            // Reset first so a racing enable fails its Started check
            let transition = entry.monitor.reset();
            inner.publish_status(&entry, transition.previous, transition.current);
            inner.shut_streams(&entry, DisableReason::Closed);
            info!("Closed {} on port {}", handle, entry.port);
        } else {
            debug!("Released {} ({} references left)", handle, remaining);
        }

        inner.events.publish(SensorEvent::Closed {
            handle,
            port_id: entry.port.clone(),
            open_count: remaining,
        });

        Ok(())
    }

    pub fn port_id(&self, handle: SensorHandle) -> Result<DeviceIdentity> {
        Ok(self.inner.entry(handle)?.port.clone())
    }

    /// Last diagnostic code reported by the hardware layer
    pub fn native_status_code(&self, handle: SensorHandle) -> Result<i32> {
        Ok(self.inner.entry(handle)?.monitor.native_code())
    }

    /// Latest processed status; never waits on the hardware
    pub fn status(&self, handle: SensorHandle) -> Result<SensorStatus> {
        Ok(self.inner.entry(handle)?.monitor.status())
    }

    pub fn open_count(&self, handle: SensorHandle) -> Result<usize> {
        Ok(self.inner.entry(handle)?.open_count())
    }
}
