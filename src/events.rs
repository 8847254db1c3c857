use crate::error::EventBusError;
use crate::frame::FrameFormatDescriptor;
use crate::sensor::{DeviceIdentity, SensorHandle, SensorStatus};
use crate::stream::StreamKind;
use serde::Serialize;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Why a stream stopped delivering frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisableReason {
    /// The caller disabled it
    Requested,
    /// The last reference to the sensor was closed
    Closed,
    /// The sensor left `Started`
    DeviceLost,
    /// The driver refused both the new parameters and the previous ones
    RenegotiationFailed,
}

/// Lifecycle events published by the sensor registry
#[derive(Debug, Clone, Serialize)]
pub enum SensorEvent {
    Opened {
        handle: SensorHandle,
        port_id: DeviceIdentity,
        open_count: usize,
    },
    Closed {
        handle: SensorHandle,
        port_id: DeviceIdentity,
        open_count: usize,
    },
    StatusChanged {
        handle: SensorHandle,
        port_id: DeviceIdentity,
        previous: SensorStatus,
        current: SensorStatus,
        timestamp: SystemTime,
    },
    StreamEnabled {
        handle: SensorHandle,
        stream: StreamKind,
        format: Option<FrameFormatDescriptor>,
    },
    StreamDisabled {
        handle: SensorHandle,
        stream: StreamKind,
        reason: DisableReason,
    },
}

impl SensorEvent {
    pub fn handle(&self) -> SensorHandle {
        match self {
            SensorEvent::Opened { handle, .. }
            | SensorEvent::Closed { handle, .. }
            | SensorEvent::StatusChanged { handle, .. }
            | SensorEvent::StreamEnabled { handle, .. }
            | SensorEvent::StreamDisabled { handle, .. } => *handle,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SensorEvent::Opened {
                port_id,
                open_count,
                ..
            } => format!("Sensor {} opened ({} references)", port_id, open_count),
            SensorEvent::Closed {
                port_id,
                open_count,
                ..
            } => format!("Sensor {} closed ({} references)", port_id, open_count),
            SensorEvent::StatusChanged {
                port_id,
                previous,
                current,
                ..
            } => format!("Sensor {} status {} -> {}", port_id, previous, current),
            SensorEvent::StreamEnabled {
                handle,
                stream,
                format: Some(format),
            } => format!("{} {} stream enabled: {}", handle, stream, format),
            SensorEvent::StreamEnabled { handle, stream, .. } => {
                format!("{} {} stream enabled", handle, stream)
            }
            SensorEvent::StreamDisabled {
                handle,
                stream,
                reason,
            } => format!("{} {} stream disabled ({:?})", handle, stream, reason),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SensorEvent::Opened { .. } => "opened",
            SensorEvent::Closed { .. } => "closed",
            SensorEvent::StatusChanged { .. } => "status_changed",
            SensorEvent::StreamEnabled { .. } => "stream_enabled",
            SensorEvent::StreamDisabled { .. } => "stream_disabled",
        }
    }
}

/// Event bus for sensor lifecycle observers using broadcast channels.
///
/// Publishing never blocks, so it is safe from the driver's delivery context.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SensorEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: SensorEvent) -> usize {
        match &event {
            SensorEvent::StatusChanged {
                current: SensorStatus::Started,
                ..
            } => info!("{}", event.description()),
            SensorEvent::StatusChanged { .. } => warn!("{}", event.description()),
            SensorEvent::StreamDisabled {
                reason: DisableReason::DeviceLost,
                ..
            } => warn!("{}", event.description()),
            _ => debug!("{}", event.description()),
        }

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                trace!("No event subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    Handle(SensorHandle),
}

impl EventFilter {
    pub fn matches(&self, event: &SensorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Handle(handle) => event.handle() == *handle,
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SensorEvent>,
    filter: EventFilter,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<SensorEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SensorEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Event receiver lagged behind by {} events", count);
                    return Err(EventBusError::Lagged { count });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SensorEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Ok(Some(event)),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!("Event receiver lagged behind by {} events", count);
                    return Err(EventBusError::Lagged { count });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain every pending event that passes the filter
    pub fn drain(&mut self) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
