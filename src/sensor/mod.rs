mod entry;
mod identity;
mod registry;
mod sink;
mod status;
mod streams;
#[cfg(test)]
mod tests;

pub use identity::{DeviceIdentity, SensorHandle, MAX_PORT_ID_LENGTH};
pub use registry::SensorRegistry;
pub use sink::HardwareSink;
pub use status::{next_status, FaultKind, HardwareEvent, SensorStatus, StatusMonitor, Transition};
