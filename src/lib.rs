pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod frame;
pub mod sensor;
pub mod stream;

pub use config::DepthcamConfig;
pub use driver::{
    LinkReport, LinkState, SensorDriver, SimulatedDriver, SimulatedProducer, StreamRequest,
};
pub use error::{EventBusError, Result, SensorError};
pub use events::{DisableReason, EventBus, EventFilter, EventReceiver, SensorEvent};
pub use frame::{FrameFormatDescriptor, ImageResolution, PixelLayout, Timestamp};
pub use sensor::{
    DeviceIdentity, FaultKind, HardwareEvent, HardwareSink, SensorHandle, SensorRegistry,
    SensorStatus,
};
pub use stream::{SkeletalConfig, SkeletonFrame, StreamKind};
