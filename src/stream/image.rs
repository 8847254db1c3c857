use super::{StreamContext, StreamProfile};
use crate::error::{Result, SensorError};
use crate::frame::{FrameFormatDescriptor, Timestamp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

struct StreamState<T> {
    /// Parameters of the active negotiation, `None` while disabled
    active: Option<T>,
    /// Last negotiated format, kept after disable
    format: Option<FrameFormatDescriptor>,
}

struct SlotFrame {
    data: Vec<u8>,
    timestamp: Timestamp,
}

/// Single-frame handoff between the driver's delivery context and the caller.
///
/// The ready flag is set with release ordering only after the bytes are in
/// place, so a reader that observes it with acquire ordering never sees a
/// partial frame.
struct FrameSlot {
    ready: AtomicBool,
    frame: Mutex<SlotFrame>,
}

impl FrameSlot {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            frame: Mutex::new(SlotFrame {
                data: Vec::new(),
                timestamp: 0,
            }),
        }
    }

    fn allocate(&self, capacity: usize) {
        let mut frame = self.frame.lock();
        self.ready.store(false, Ordering::Release);
        frame.data = Vec::with_capacity(capacity);
        frame.timestamp = 0;
    }

    fn release(&self) {
        let mut frame = self.frame.lock();
        self.ready.store(false, Ordering::Release);
        frame.data = Vec::new();
    }

    fn publish(&self, data: &[u8], timestamp: Timestamp) {
        let mut frame = self.frame.lock();
        frame.data.clear();
        frame.data.extend_from_slice(data);
        frame.timestamp = timestamp;
        self.ready.store(true, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn take_into(&self, out: &mut [u8]) -> Option<Timestamp> {
        let frame = self.frame.lock();
        if !self.ready.swap(false, Ordering::AcqRel) {
            return None;
        }
        out.copy_from_slice(&frame.data[..out.len()]);
        Some(frame.timestamp)
    }
}

/// Enable/disable state and frame handoff for one image stream
pub struct ImageStream<P: StreamProfile> {
    state: Mutex<StreamState<P::Params>>,
    slot: FrameSlot,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

impl<P: StreamProfile> ImageStream<P> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StreamState {
                active: None,
                format: None,
            }),
            slot: FrameSlot::new(),
            frames_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Negotiate a format and acquire delivery resources.
    ///
    /// Enabling again with identical parameters returns the same descriptor
    /// without touching the driver; different parameters re-negotiate.
    pub(crate) fn enable(
        &self,
        ctx: &StreamContext<'_>,
        params: P::Params,
    ) -> Result<FrameFormatDescriptor> {
        let mut state = self.state.lock();
        ctx.require_started()?;

        let format = P::negotiate(&params)?;

        if state.active == Some(params) {
            debug!(
                "{} stream on {} already enabled with {:?}",
                P::KIND,
                ctx.port,
                params
            );
            return Ok(format);
        }

        let previous = state.active.take();
        if let Some(previous) = previous {
            debug!(
                "Re-negotiating {} stream on {} from {:?} to {:?}",
                P::KIND,
                ctx.port,
                previous,
                params
            );
            ctx.driver.close_stream(ctx.port, P::KIND);
            self.slot.release();
        }

        if let Err(e) = ctx
            .driver
            .open_stream(ctx.port, P::KIND, &P::request(&params, format))
        {
            if let (Some(previous), Some(previous_format)) = (previous, state.format) {
                self.restore(ctx, &mut state, previous, previous_format);
            }
            return Err(e);
        }

        self.slot.allocate(format.required_buffer_size());
        state.active = Some(params);
        state.format = Some(format);

        info!("Enabled {} stream on {}: {}", P::KIND, ctx.port, format);
        Ok(format)
    }

    /// Re-acquire the parameters a failed re-negotiation gave up. The stream
    /// stays disabled when the driver refuses those as well.
    fn restore(
        &self,
        ctx: &StreamContext<'_>,
        state: &mut StreamState<P::Params>,
        previous: P::Params,
        previous_format: FrameFormatDescriptor,
    ) {
        match ctx
            .driver
            .open_stream(ctx.port, P::KIND, &P::request(&previous, previous_format))
        {
            Ok(()) => {
                self.slot.allocate(previous_format.required_buffer_size());
                state.active = Some(previous);
                warn!(
                    "Kept {} stream on {} at {}",
                    P::KIND,
                    ctx.port,
                    previous_format
                );
            }
            Err(e) => {
                warn!(
                    "{} stream on {} lost after failed re-negotiation: {}",
                    P::KIND,
                    ctx.port,
                    e
                );
            }
        }
    }

    /// Release delivery resources. Returns whether the stream was enabled.
    pub(crate) fn disable(&self, ctx: &StreamContext<'_>) -> bool {
        let mut state = self.state.lock();
        if state.active.take().is_none() {
            return false;
        }

        ctx.driver.close_stream(ctx.port, P::KIND);
        self.slot.release();
        info!("Disabled {} stream on {}", P::KIND, ctx.port);
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// True when a frame has been delivered since the last successful read
    pub fn is_frame_ready(&self) -> bool {
        self.slot.is_ready()
    }

    pub fn frame_format(&self) -> Result<FrameFormatDescriptor> {
        self.state
            .lock()
            .format
            .ok_or(SensorError::StreamNotEnabled { stream: P::KIND })
    }

    /// Copy the pending frame into `buffer` and return its capture timestamp.
    ///
    /// Exactly `required_buffer_size` bytes are written. The buffer is left
    /// untouched on every error path.
    pub fn read_frame(&self, buffer: &mut [u8]) -> Result<Timestamp> {
        let state = self.state.lock();
        let format = match (state.active, state.format) {
            (Some(_), Some(format)) => format,
            _ => return Err(SensorError::StreamNotEnabled { stream: P::KIND }),
        };

        let required = format.required_buffer_size();
        if buffer.len() < required {
            return Err(SensorError::BufferTooSmall {
                required,
                provided: buffer.len(),
            });
        }

        let timestamp = self
            .slot
            .take_into(&mut buffer[..required])
            .ok_or(SensorError::NoFrameAvailable { stream: P::KIND })?;

        trace!("Read {} frame ({} bytes, ts {})", P::KIND, required, timestamp);
        Ok(timestamp)
    }

    /// Accept a frame from the driver. Frames for a disabled stream or with
    /// a size that does not match the negotiated format are dropped.
    pub(crate) fn deliver(&self, data: &[u8], timestamp: Timestamp) -> bool {
        let state = self.state.lock();
        let format = match (state.active, state.format) {
            (Some(_), Some(format)) => format,
            _ => {
                trace!("Dropping {} frame for disabled stream", P::KIND);
                return false;
            }
        };

        if !format.matches(data) {
            warn!(
                "Dropping {} frame of {} bytes, negotiated format needs {}",
                P::KIND,
                data.len(),
                format.required_buffer_size()
            );
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.slot.publish(data, timestamp);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl<P: StreamProfile> Default for ImageStream<P> {
    fn default() -> Self {
        Self::new()
    }
}
