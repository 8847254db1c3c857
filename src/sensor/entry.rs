use super::{DeviceIdentity, SensorHandle, StatusMonitor};
use crate::driver::SensorDriver;
use crate::stream::{
    ColorProfile, DepthProfile, ImageStream, InfraredProfile, SkeletonStream, StreamContext,
    StreamKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// State owned by one sensor slot: identity, status and its streams
pub(crate) struct SensorEntry {
    pub handle: SensorHandle,
    pub port: DeviceIdentity,
    pub monitor: StatusMonitor,
    /// Outstanding opens; only changed under the registry lifecycle lock
    pub open_count: AtomicUsize,
    pub color: ImageStream<ColorProfile>,
    pub depth: ImageStream<DepthProfile>,
    pub infrared: ImageStream<InfraredProfile>,
    pub skeleton: SkeletonStream,
}

impl SensorEntry {
    pub fn new(handle: SensorHandle, port: DeviceIdentity) -> Self {
        Self {
            handle,
            port,
            monitor: StatusMonitor::new(),
            open_count: AtomicUsize::new(0),
            color: ImageStream::new(),
            depth: ImageStream::new(),
            infrared: ImageStream::new(),
            skeleton: SkeletonStream::new(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.open_count() > 0
    }

    pub fn context<'a>(&'a self, driver: &'a dyn SensorDriver) -> StreamContext<'a> {
        StreamContext {
            driver,
            port: &self.port,
            monitor: &self.monitor,
        }
    }

    pub fn disable(&self, driver: &dyn SensorDriver, kind: StreamKind) -> bool {
        let ctx = self.context(driver);
        match kind {
            StreamKind::Color => self.color.disable(&ctx),
            StreamKind::Depth => self.depth.disable(&ctx),
            StreamKind::Infrared => self.infrared.disable(&ctx),
            StreamKind::Skeleton => self.skeleton.disable(&ctx),
        }
    }

    /// Disable every stream, returning the ones that were enabled
    pub fn disable_all(&self, driver: &dyn SensorDriver) -> Vec<StreamKind> {
        StreamKind::ALL
            .into_iter()
            .filter(|kind| self.disable(driver, *kind))
            .collect()
    }

    pub fn is_enabled(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Color => self.color.is_enabled(),
            StreamKind::Depth => self.depth.is_enabled(),
            StreamKind::Infrared => self.infrared.is_enabled(),
            StreamKind::Skeleton => self.skeleton.is_enabled(),
        }
    }

    pub fn is_frame_ready(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Color => self.color.is_frame_ready(),
            StreamKind::Depth => self.depth.is_frame_ready(),
            StreamKind::Infrared => self.infrared.is_frame_ready(),
            StreamKind::Skeleton => self.skeleton.is_frame_ready(),
        }
    }

    pub fn enabled_streams(&self) -> Vec<StreamKind> {
        StreamKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// AND of per-stream readiness over the enabled streams; vacuously true
    pub fn all_frames_ready(&self) -> bool {
        StreamKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .all(|kind| self.is_frame_ready(kind))
    }
}
