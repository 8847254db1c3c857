use super::{LinkReport, LinkState, SensorDriver, StreamRequest};
use crate::error::{Result, SensorError};
use crate::frame::{FrameFormatDescriptor, Timestamp};
use crate::sensor::{DeviceIdentity, HardwareEvent, HardwareSink};
use crate::stream::{
    Body, BodyTrackingState, JointId, JointTrackingState, Point3, SkeletalConfig, SkeletonFrame,
    StreamKind,
};
use crossbeam::channel::{bounded, tick, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Port id the simulated driver uses when none is configured
pub const DEFAULT_SIMULATED_PORT: &str = "USB\\VID_045E&PID_02AE\\SIM00000000000001";

struct SimPort {
    id: DeviceIdentity,
    link: LinkState,
    open: HashMap<StreamKind, StreamRequest>,
    acquisitions: HashMap<StreamKind, usize>,
    refused: HashSet<StreamKind>,
    refuse_once: HashSet<StreamKind>,
}

/// In-process stand-in for the hardware layer.
///
/// Ports start out empty (`Absent`). Tests and the demo binary drive the
/// device through [`emit`](Self::emit) and the `push_*` methods, which use
/// the same [`HardwareSink`] a real driver would.
#[derive(Default)]
pub struct SimulatedDriver {
    ports: Mutex<Vec<SimPort>>,
    sink: Mutex<Option<HardwareSink>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&self, id: &str) -> Result<DeviceIdentity> {
        let id = DeviceIdentity::new(id)?;
        let mut ports = self.ports.lock();
        if !ports.iter().any(|port| port.id == id) {
            ports.push(SimPort {
                id: id.clone(),
                link: LinkState::Absent,
                open: HashMap::new(),
                acquisitions: HashMap::new(),
                refused: HashSet::new(),
                refuse_once: HashSet::new(),
            });
            debug!("Simulated port {} added", id);
        }
        Ok(id)
    }

    /// Route notifications and frames to a registry
    pub fn attach(&self, sink: HardwareSink) {
        *self.sink.lock() = Some(sink);
    }

    fn sink(&self) -> Option<HardwareSink> {
        self.sink.lock().clone()
    }

    fn with_port<T>(&self, port: &DeviceIdentity, f: impl FnOnce(&mut SimPort) -> T) -> Option<T> {
        self.ports
            .lock()
            .iter_mut()
            .find(|candidate| &candidate.id == port)
            .map(f)
    }

    /// Change what a direct link query reports, without a notification
    pub fn set_link(&self, port: &DeviceIdentity, state: LinkState) {
        self.with_port(port, |sim| sim.link = state);
    }

    pub fn link(&self, port: &DeviceIdentity) -> Option<LinkState> {
        self.with_port(port, |sim| sim.link)
    }

    /// Raise a hardware notification as the device would
    pub fn emit(&self, port: &DeviceIdentity, event: HardwareEvent) {
        let known = self
            .with_port(port, |sim| sim.link = event.link_state())
            .is_some();

        if !known {
            debug!("Ignoring {:?} for unknown simulated port {}", event, port);
            return;
        }

        if let Some(sink) = self.sink() {
            sink.notify(port, event);
        }
    }

    /// Plug the device in and bring it up
    pub fn connect(&self, port: &DeviceIdentity) {
        self.emit(port, HardwareEvent::Plugged);
        self.emit(port, HardwareEvent::Ready);
    }

    /// Make later `open_stream` calls for `kind` fail
    pub fn refuse_stream(&self, port: &DeviceIdentity, kind: StreamKind) {
        self.with_port(port, |sim| sim.refused.insert(kind));
    }

    /// Make only the next `open_stream` call for `kind` fail
    pub fn refuse_next_open(&self, port: &DeviceIdentity, kind: StreamKind) {
        self.with_port(port, |sim| sim.refuse_once.insert(kind));
    }

    /// How many times resources for `kind` were acquired
    pub fn acquisitions(&self, port: &DeviceIdentity, kind: StreamKind) -> usize {
        self.with_port(port, |sim| sim.acquisitions.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_streaming(&self, port: &DeviceIdentity, kind: StreamKind) -> bool {
        self.with_port(port, |sim| sim.open.contains_key(&kind))
            .unwrap_or(false)
    }

    pub fn push_color(&self, port: &DeviceIdentity, data: &[u8], timestamp: Timestamp) -> bool {
        self.sink()
            .map(|sink| sink.deliver_color(port, data, timestamp))
            .unwrap_or(false)
    }

    pub fn push_depth(&self, port: &DeviceIdentity, data: &[u8], timestamp: Timestamp) -> bool {
        self.sink()
            .map(|sink| sink.deliver_depth(port, data, timestamp))
            .unwrap_or(false)
    }

    pub fn push_infrared(&self, port: &DeviceIdentity, data: &[u8], timestamp: Timestamp) -> bool {
        self.sink()
            .map(|sink| sink.deliver_infrared(port, data, timestamp))
            .unwrap_or(false)
    }

    pub fn push_skeleton(&self, port: &DeviceIdentity, frame: SkeletonFrame) -> bool {
        self.sink()
            .map(|sink| sink.deliver_skeleton(port, frame))
            .unwrap_or(false)
    }

    /// Synthesize one frame for every open stream on every ready port.
    /// Returns the number of frames the registry accepted.
    pub fn produce_frames(&self, frame_number: u32, timestamp: Timestamp) -> usize {
        let work: Vec<(DeviceIdentity, StreamKind, StreamRequest)> = self
            .ports
            .lock()
            .iter()
            .filter(|sim| sim.link == LinkState::Ready)
            .flat_map(|sim| {
                sim.open
                    .iter()
                    .map(|(kind, request)| (sim.id.clone(), *kind, *request))
            })
            .collect();

        let Some(sink) = self.sink() else {
            return 0;
        };

        work.into_iter()
            .filter(|(port, kind, request)| match request {
                StreamRequest::Image { format, near_mode } => {
                    let data = synthesize_image(*kind, format, *near_mode, frame_number);
                    match kind {
                        StreamKind::Color => sink.deliver_color(port, &data, timestamp),
                        StreamKind::Depth => sink.deliver_depth(port, &data, timestamp),
                        StreamKind::Infrared => sink.deliver_infrared(port, &data, timestamp),
                        StreamKind::Skeleton => false,
                    }
                }
                StreamRequest::Skeleton(config) => {
                    sink.deliver_skeleton(port, synthesize_skeleton(config, frame_number))
                }
            })
            .count()
    }
}

impl SensorDriver for SimulatedDriver {
    fn port_count(&self) -> usize {
        self.ports.lock().len()
    }

    fn port_id(&self, index: usize) -> Option<DeviceIdentity> {
        self.ports.lock().get(index).map(|sim| sim.id.clone())
    }

    fn query_link(&self, port: &DeviceIdentity) -> LinkReport {
        LinkReport::from(self.link(port).unwrap_or(LinkState::Absent))
    }

    fn open_stream(
        &self,
        port: &DeviceIdentity,
        kind: StreamKind,
        request: &StreamRequest,
    ) -> Result<()> {
        self.with_port(port, |sim| {
            if sim.refuse_once.remove(&kind) || sim.refused.contains(&kind) {
                return Err(SensorError::driver(format!(
                    "{} stream refused on {}",
                    kind, port
                )));
            }
            if sim.link != LinkState::Ready {
                return Err(SensorError::driver(format!(
                    "port {} is {:?}",
                    port, sim.link
                )));
            }
            sim.open.insert(kind, *request);
            *sim.acquisitions.entry(kind).or_insert(0) += 1;
            trace!("Simulated {} stream opened on {}", kind, port);
            Ok(())
        })
        .unwrap_or_else(|| Err(SensorError::not_found(format!("port {}", port))))
    }

    fn close_stream(&self, port: &DeviceIdentity, kind: StreamKind) {
        self.with_port(port, |sim| {
            if sim.open.remove(&kind).is_some() {
                trace!("Simulated {} stream closed on {}", kind, port);
            }
        });
    }
}

fn synthesize_image(
    kind: StreamKind,
    format: &FrameFormatDescriptor,
    near_mode: bool,
    frame_number: u32,
) -> Vec<u8> {
    let width = format.width() as usize;
    let mut data = format.allocate();
    let bpp = format.bytes_per_pixel() as usize;

    for (index, pixel) in data.chunks_exact_mut(bpp).enumerate() {
        let x = (index % width) as u32;
        let y = (index / width) as u32;
        match kind {
            StreamKind::Color => {
                pixel.copy_from_slice(&[
                    (x.wrapping_add(frame_number) & 0xFF) as u8,
                    (y & 0xFF) as u8,
                    (frame_number & 0xFF) as u8,
                    0xFF,
                ]);
            }
            StreamKind::Depth => {
                let base = if near_mode { 400 } else { 800 };
                let millimeters = base + (x + y + frame_number) % 3200;
                // Depth occupies the upper 13 bits; player index stays 0
                pixel.copy_from_slice(&((millimeters << 3) as u16).to_le_bytes());
            }
            _ => {
                let intensity = (x.wrapping_mul(y).wrapping_add(frame_number) & 0xFFFF) as u16;
                pixel.copy_from_slice(&intensity.to_le_bytes());
            }
        }
    }

    data
}

fn synthesize_skeleton(config: &SkeletalConfig, frame_number: u32) -> SkeletonFrame {
    let mut frame = SkeletonFrame {
        frame_number,
        ..SkeletonFrame::default()
    };

    let sway = (frame_number % 20) as f32 * 0.01;
    let body = &mut frame.bodies[0];
    *body = Body {
        tracking: BodyTrackingState::Tracked,
        tracking_id: 1,
        position: Point3::new(sway, 0.0, 2.0),
        ..Body::default()
    };

    for joint_id in JointId::ALL {
        let joint = &mut body.joints[joint_id.index()];
        if config.seated && !joint_id.is_upper_body() {
            continue;
        }
        let height = 0.8 - joint_id.index() as f32 * 0.08;
        joint.position = Point3::new(sway, height, 2.0);
        joint.tracking = JointTrackingState::Tracked;
    }

    frame
}

/// Background thread that feeds the simulated driver's open streams at a
/// fixed rate. Timestamps are strictly increasing.
pub struct SimulatedProducer {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedProducer {
    pub fn spawn(driver: Arc<SimulatedDriver>, fps: u32) -> Result<Self> {
        let fps = fps.max(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(Duration::from_micros(1_000_000 / fps as u64));

        let thread = thread::Builder::new()
            .name("depthcam-producer".to_string())
            .spawn(move || {
                let started = Instant::now();
                let mut frame_number: u32 = 0;
                let mut last_timestamp: Timestamp = -1;
                info!("Simulated producer running at {} fps", fps);

                loop {
                    let stop = crossbeam::select! {
                        recv(stop_rx) -> _ => true,
                        recv(ticker) -> _ => {
                            frame_number = frame_number.wrapping_add(1);
                            let timestamp = (started.elapsed().as_millis() as Timestamp)
                                .max(last_timestamp + 1);
                            last_timestamp = timestamp;

                            let accepted = driver.produce_frames(frame_number, timestamp);
                            trace!("Produced frame {} ({} accepted)", frame_number, accepted);
                            false
                        }
                    };
                    if stop {
                        break;
                    }
                }

                info!("Simulated producer stopped after {} frames", frame_number);
            })
            .map_err(|e| SensorError::driver(format!("failed to spawn producer: {}", e)))?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Simulated producer thread panicked");
            }
        }
    }
}

impl Drop for SimulatedProducer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
