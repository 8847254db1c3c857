mod image;
mod profile;
mod skeleton;

pub use image::ImageStream;
pub use profile::{ColorProfile, DepthParams, DepthProfile, InfraredProfile, StreamProfile};
pub use skeleton::{
    Body, BodyTrackingState, Joint, JointId, JointTrackingState, Point3, SelectionMode,
    SkeletalConfig, SkeletonFrame, SkeletonStream, SmoothingParams, JOINT_COUNT, MAX_BODIES,
};

use crate::driver::SensorDriver;
use crate::error::{Result, SensorError};
use crate::sensor::{DeviceIdentity, SensorStatus, StatusMonitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The independent data channels a sensor produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Color,
    Depth,
    Infrared,
    Skeleton,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Color,
        StreamKind::Depth,
        StreamKind::Infrared,
        StreamKind::Skeleton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Color => "color",
            StreamKind::Depth => "depth",
            StreamKind::Infrared => "infrared",
            StreamKind::Skeleton => "skeleton",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stream controller needs from its owning sensor while enabling or
/// disabling
pub(crate) struct StreamContext<'a> {
    pub driver: &'a dyn SensorDriver,
    pub port: &'a DeviceIdentity,
    pub monitor: &'a StatusMonitor,
}

impl StreamContext<'_> {
    pub fn require_started(&self) -> Result<()> {
        match self.monitor.status() {
            SensorStatus::Started => Ok(()),
            status => Err(SensorError::InvalidState { status }),
        }
    }
}
