use super::{StreamContext, StreamKind};
use crate::driver::StreamRequest;
use crate::error::{Result, SensorError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// Bodies reported per skeleton frame
pub const MAX_BODIES: usize = 6;
/// Joints reported per body
pub const JOINT_COUNT: usize = 20;

/// How the tracker picks which bodies get full joint tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    #[default]
    Default,
    Closest1,
    Closest2,
    Sticky1,
    Sticky2,
    Active1,
    Active2,
}

impl SelectionMode {
    /// Raw value understood by the native tracker
    pub fn as_raw(&self) -> u32 {
        match self {
            SelectionMode::Default => 0,
            SelectionMode::Closest1 => 1,
            SelectionMode::Closest2 => 2,
            SelectionMode::Sticky1 => 3,
            SelectionMode::Sticky2 => 4,
            SelectionMode::Active1 => 5,
            SelectionMode::Active2 => 6,
        }
    }

    /// Number of bodies the mode selects for full tracking
    pub fn tracked_bodies(&self) -> usize {
        match self {
            SelectionMode::Closest1 | SelectionMode::Sticky1 | SelectionMode::Active1 => 1,
            _ => 2,
        }
    }
}

/// Joint filtering parameters forwarded to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParams {
    pub smoothing: f32,
    pub correction: f32,
    pub prediction: f32,
    pub jitter_radius: f32,
    pub max_deviation_radius: f32,
}

impl SmoothingParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(format!("smoothing {} must be in [0, 1)", self.smoothing));
        }
        if !(0.0..=1.0).contains(&self.correction) {
            return Err(format!("correction {} must be in [0, 1]", self.correction));
        }
        if !(self.prediction >= 0.0) {
            return Err(format!("prediction {} must not be negative", self.prediction));
        }
        if !(self.jitter_radius >= 0.0) {
            return Err(format!(
                "jitter_radius {} must not be negative",
                self.jitter_radius
            ));
        }
        if !(self.max_deviation_radius >= 0.0) {
            return Err(format!(
                "max_deviation_radius {} must not be negative",
                self.max_deviation_radius
            ));
        }
        Ok(())
    }
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            smoothing: 0.5,
            correction: 0.5,
            prediction: 0.5,
            jitter_radius: 0.05,
            max_deviation_radius: 0.04,
        }
    }
}

/// Skeletal tracking configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkeletalConfig {
    /// Track the upper body only
    pub seated: bool,
    pub selection_mode: SelectionMode,
    pub smoothing: Option<SmoothingParams>,
}

impl SkeletalConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(smoothing) = &self.smoothing {
            smoothing
                .validate()
                .map_err(|details| SensorError::unsupported_config(StreamKind::Skeleton, details))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointId {
    HipCenter,
    Spine,
    ShoulderCenter,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
}

impl JointId {
    pub const ALL: [JointId; JOINT_COUNT] = [
        JointId::HipCenter,
        JointId::Spine,
        JointId::ShoulderCenter,
        JointId::Head,
        JointId::ShoulderLeft,
        JointId::ElbowLeft,
        JointId::WristLeft,
        JointId::HandLeft,
        JointId::ShoulderRight,
        JointId::ElbowRight,
        JointId::WristRight,
        JointId::HandRight,
        JointId::HipLeft,
        JointId::KneeLeft,
        JointId::AnkleLeft,
        JointId::FootLeft,
        JointId::HipRight,
        JointId::KneeRight,
        JointId::AnkleRight,
        JointId::FootRight,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Joints still reported in seated mode
    pub fn is_upper_body(&self) -> bool {
        matches!(
            self,
            JointId::ShoulderCenter
                | JointId::Head
                | JointId::ShoulderLeft
                | JointId::ElbowLeft
                | JointId::WristLeft
                | JointId::HandLeft
                | JointId::ShoulderRight
                | JointId::ElbowRight
                | JointId::WristRight
                | JointId::HandRight
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JointTrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyTrackingState {
    #[default]
    NotTracked,
    PositionOnly,
    Tracked,
}

/// Camera-space position in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Joint {
    pub position: Point3,
    pub tracking: JointTrackingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Body {
    pub tracking: BodyTrackingState,
    pub tracking_id: u32,
    pub position: Point3,
    pub joints: [Joint; JOINT_COUNT],
}

impl Body {
    pub fn joint(&self, id: JointId) -> &Joint {
        &self.joints[id.index()]
    }

    pub fn is_tracked(&self) -> bool {
        self.tracking == BodyTrackingState::Tracked
    }
}

/// Fixed-shape body-pose snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkeletonFrame {
    pub frame_number: u32,
    pub bodies: [Body; MAX_BODIES],
}

impl SkeletonFrame {
    pub fn tracked_bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter().filter(|body| body.is_tracked())
    }
}

/// Enable/disable state and frame handoff for skeletal tracking.
///
/// Unlike image streams there is no buffer negotiation: every frame has the
/// same shape.
pub struct SkeletonStream {
    config: Mutex<Option<SkeletalConfig>>,
    ready: AtomicBool,
    frame: Mutex<Option<SkeletonFrame>>,
}

impl SkeletonStream {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(None),
            ready: AtomicBool::new(false),
            frame: Mutex::new(None),
        }
    }

    pub(crate) fn enable(&self, ctx: &StreamContext<'_>, config: SkeletalConfig) -> Result<()> {
        let mut active = self.config.lock();
        ctx.require_started()?;
        config.validate()?;

        if *active == Some(config) {
            debug!("Skeleton stream on {} already enabled", ctx.port);
            return Ok(());
        }

        let previous = active.take();
        if previous.is_some() {
            ctx.driver.close_stream(ctx.port, StreamKind::Skeleton);
            self.clear();
        }

        if let Err(e) = ctx.driver.open_stream(
            ctx.port,
            StreamKind::Skeleton,
            &StreamRequest::Skeleton(config),
        ) {
            if let Some(previous) = previous {
                match ctx.driver.open_stream(
                    ctx.port,
                    StreamKind::Skeleton,
                    &StreamRequest::Skeleton(previous),
                ) {
                    Ok(()) => {
                        *active = Some(previous);
                        warn!("Kept previous skeleton configuration on {}", ctx.port);
                    }
                    Err(restore) => warn!(
                        "Skeleton stream on {} lost after failed reconfigure: {}",
                        ctx.port, restore
                    ),
                }
            }
            return Err(e);
        }
        *active = Some(config);

        info!(
            "Enabled skeleton stream on {} (seated: {}, selection: {:?})",
            ctx.port, config.seated, config.selection_mode
        );
        Ok(())
    }

    pub(crate) fn disable(&self, ctx: &StreamContext<'_>) -> bool {
        let mut active = self.config.lock();
        if active.take().is_none() {
            return false;
        }

        ctx.driver.close_stream(ctx.port, StreamKind::Skeleton);
        self.clear();
        info!("Disabled skeleton stream on {}", ctx.port);
        true
    }

    fn clear(&self) {
        let mut frame = self.frame.lock();
        self.ready.store(false, Ordering::Release);
        *frame = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.lock().is_some()
    }

    pub fn config(&self) -> Option<SkeletalConfig> {
        *self.config.lock()
    }

    pub fn is_frame_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn read_frame(&self) -> Result<SkeletonFrame> {
        let active = self.config.lock();
        if active.is_none() {
            return Err(SensorError::StreamNotEnabled {
                stream: StreamKind::Skeleton,
            });
        }

        let mut frame = self.frame.lock();
        if !self.ready.swap(false, Ordering::AcqRel) {
            return Err(SensorError::NoFrameAvailable {
                stream: StreamKind::Skeleton,
            });
        }

        frame.take().ok_or(SensorError::NoFrameAvailable {
            stream: StreamKind::Skeleton,
        })
    }

    pub(crate) fn deliver(&self, skeletons: SkeletonFrame) -> bool {
        let active = self.config.lock();
        if active.is_none() {
            trace!("Dropping skeleton frame for disabled stream");
            return false;
        }

        let mut frame = self.frame.lock();
        *frame = Some(skeletons);
        self.ready.store(true, Ordering::Release);
        true
    }
}

impl Default for SkeletonStream {
    fn default() -> Self {
        Self::new()
    }
}
