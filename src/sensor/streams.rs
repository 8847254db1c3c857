use super::entry::SensorEntry;
use super::{SensorHandle, SensorRegistry};
use crate::error::Result;
use crate::events::{DisableReason, SensorEvent};
use crate::frame::{FrameFormatDescriptor, ImageResolution, Timestamp};
use crate::stream::{DepthParams, SkeletalConfig, SkeletonFrame, StreamKind};
use std::sync::Arc;

impl SensorRegistry {
    fn stream_enabled(
        &self,
        entry: &SensorEntry,
        stream: StreamKind,
        format: Option<FrameFormatDescriptor>,
    ) {
        self.inner.events.publish(SensorEvent::StreamEnabled {
            handle: entry.handle,
            stream,
            format,
        });
    }

    /// Run an enable, reporting a stream that a failed re-negotiation left
    /// without resources
    fn track_enable<T>(
        &self,
        entry: &SensorEntry,
        stream: StreamKind,
        enable: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let was_enabled = entry.is_enabled(stream);
        let result = enable();
        if result.is_err() && was_enabled && !entry.is_enabled(stream) {
            self.inner.events.publish(SensorEvent::StreamDisabled {
                handle: entry.handle,
                stream,
                reason: DisableReason::RenegotiationFailed,
            });
        }
        result
    }

    fn disable_stream(&self, handle: SensorHandle, stream: StreamKind) -> Result<()> {
        let entry = self.inner.entry(handle)?;
        if entry.disable(self.inner.driver.as_ref(), stream) {
            self.inner.events.publish(SensorEvent::StreamDisabled {
                handle,
                stream,
                reason: DisableReason::Requested,
            });
        }
        Ok(())
    }

    fn with_entry<T>(&self, handle: SensorHandle, f: impl FnOnce(&Arc<SensorEntry>) -> T) -> Result<T> {
        Ok(f(&self.inner.entry(handle)?))
    }

    pub fn enable_color_stream(
        &self,
        handle: SensorHandle,
        resolution: ImageResolution,
    ) -> Result<FrameFormatDescriptor> {
        let entry = self.inner.entry(handle)?;
        let format = self.track_enable(&entry, StreamKind::Color, || {
            entry
                .color
                .enable(&entry.context(self.inner.driver.as_ref()), resolution)
        })?;
        self.stream_enabled(&entry, StreamKind::Color, Some(format));
        Ok(format)
    }

    pub fn enable_depth_stream(
        &self,
        handle: SensorHandle,
        near_mode: bool,
        resolution: ImageResolution,
    ) -> Result<FrameFormatDescriptor> {
        let entry = self.inner.entry(handle)?;
        let params = DepthParams {
            resolution,
            near_mode,
        };
        let format = self.track_enable(&entry, StreamKind::Depth, || {
            entry
                .depth
                .enable(&entry.context(self.inner.driver.as_ref()), params)
        })?;
        self.stream_enabled(&entry, StreamKind::Depth, Some(format));
        Ok(format)
    }

    pub fn enable_ir_stream(
        &self,
        handle: SensorHandle,
        resolution: ImageResolution,
    ) -> Result<FrameFormatDescriptor> {
        let entry = self.inner.entry(handle)?;
        let format = self.track_enable(&entry, StreamKind::Infrared, || {
            entry
                .infrared
                .enable(&entry.context(self.inner.driver.as_ref()), resolution)
        })?;
        self.stream_enabled(&entry, StreamKind::Infrared, Some(format));
        Ok(format)
    }

    pub fn enable_skeletal_stream(&self, handle: SensorHandle, config: SkeletalConfig) -> Result<()> {
        let entry = self.inner.entry(handle)?;
        self.track_enable(&entry, StreamKind::Skeleton, || {
            entry
                .skeleton
                .enable(&entry.context(self.inner.driver.as_ref()), config)
        })?;
        self.stream_enabled(&entry, StreamKind::Skeleton, None);
        Ok(())
    }

    pub fn disable_color_stream(&self, handle: SensorHandle) -> Result<()> {
        self.disable_stream(handle, StreamKind::Color)
    }

    pub fn disable_depth_stream(&self, handle: SensorHandle) -> Result<()> {
        self.disable_stream(handle, StreamKind::Depth)
    }

    pub fn disable_ir_stream(&self, handle: SensorHandle) -> Result<()> {
        self.disable_stream(handle, StreamKind::Infrared)
    }

    pub fn disable_skeletal_stream(&self, handle: SensorHandle) -> Result<()> {
        self.disable_stream(handle, StreamKind::Skeleton)
    }

    pub fn is_color_frame_ready(&self, handle: SensorHandle) -> Result<bool> {
        self.with_entry(handle, |entry| entry.color.is_frame_ready())
    }

    pub fn is_depth_frame_ready(&self, handle: SensorHandle) -> Result<bool> {
        self.with_entry(handle, |entry| entry.depth.is_frame_ready())
    }

    pub fn is_ir_frame_ready(&self, handle: SensorHandle) -> Result<bool> {
        self.with_entry(handle, |entry| entry.infrared.is_frame_ready())
    }

    pub fn is_skeleton_frame_ready(&self, handle: SensorHandle) -> Result<bool> {
        self.with_entry(handle, |entry| entry.skeleton.is_frame_ready())
    }

    /// True when every enabled stream has a frame waiting. With no stream
    /// enabled this is trivially true.
    pub fn are_all_frames_ready(&self, handle: SensorHandle) -> Result<bool> {
        self.with_entry(handle, |entry| entry.all_frames_ready())
    }

    pub fn enabled_streams(&self, handle: SensorHandle) -> Result<Vec<StreamKind>> {
        self.with_entry(handle, |entry| entry.enabled_streams())
    }

    pub fn color_frame_format(&self, handle: SensorHandle) -> Result<FrameFormatDescriptor> {
        self.inner.entry(handle)?.color.frame_format()
    }

    pub fn depth_frame_format(&self, handle: SensorHandle) -> Result<FrameFormatDescriptor> {
        self.inner.entry(handle)?.depth.frame_format()
    }

    pub fn ir_frame_format(&self, handle: SensorHandle) -> Result<FrameFormatDescriptor> {
        self.inner.entry(handle)?.infrared.frame_format()
    }

    /// Copy the pending color frame into `buffer`, returning its timestamp
    pub fn get_color_frame(&self, handle: SensorHandle, buffer: &mut [u8]) -> Result<Timestamp> {
        self.inner.entry(handle)?.color.read_frame(buffer)
    }

    pub fn get_depth_frame(&self, handle: SensorHandle, buffer: &mut [u8]) -> Result<Timestamp> {
        self.inner.entry(handle)?.depth.read_frame(buffer)
    }

    pub fn get_ir_frame(&self, handle: SensorHandle, buffer: &mut [u8]) -> Result<Timestamp> {
        self.inner.entry(handle)?.infrared.read_frame(buffer)
    }

    pub fn get_skeleton_frame(&self, handle: SensorHandle) -> Result<SkeletonFrame> {
        self.inner.entry(handle)?.skeleton.read_frame()
    }
}
