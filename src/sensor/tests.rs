use super::*;
use crate::driver::{
    native, LinkReport, LinkState, SensorDriver, SimulatedDriver, SimulatedProducer,
    StreamRequest, DEFAULT_SIMULATED_PORT,
};
use crate::error::SensorError;
use crate::events::{DisableReason, EventFilter, SensorEvent};
use crate::frame::ImageResolution;
use crate::stream::{SkeletalConfig, SkeletonFrame, StreamKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Harness {
    driver: Arc<SimulatedDriver>,
    registry: SensorRegistry,
    port: DeviceIdentity,
}

impl Harness {
    fn new() -> Self {
        let driver = Arc::new(SimulatedDriver::new());
        let port = driver.add_port(DEFAULT_SIMULATED_PORT).unwrap();
        let registry = SensorRegistry::new(Arc::clone(&driver), 256);
        driver.attach(registry.hardware_sink());
        Self {
            driver,
            registry,
            port,
        }
    }

    /// Open the default sensor and bring it to `Started`
    fn started(&self) -> SensorHandle {
        let handle = self.registry.open_default().unwrap();
        self.driver.connect(&self.port);
        assert_eq!(self.registry.status(handle).unwrap(), SensorStatus::Started);
        handle
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_open_connect_enable_read() {
    let h = Harness::new();
    let handle = h.registry.open_default().unwrap();
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Initializing);
    assert_eq!(h.registry.port_id(handle).unwrap(), h.port);

    h.driver.emit(&h.port, HardwareEvent::Plugged);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Initializing);
    h.driver.emit(&h.port, HardwareEvent::Ready);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);

    let format = h
        .registry
        .enable_depth_stream(handle, false, ImageResolution::Res640x480)
        .unwrap();
    assert_eq!(format.height(), 480);
    assert_eq!(format.width(), 640);
    assert_eq!(format.bytes_per_pixel(), 2);
    assert_eq!(format.required_buffer_size(), 614_400);
    assert!(!h.registry.is_depth_frame_ready(handle).unwrap());

    let mut buffer = format.allocate();
    let mut last = None;
    for (fill, timestamp) in [(0x11u8, 1_000), (0x22u8, 1_033)] {
        let frame = vec![fill; format.required_buffer_size()];
        assert!(h.driver.push_depth(&h.port, &frame, timestamp));
        assert!(h.registry.is_depth_frame_ready(handle).unwrap());

        let read = h.registry.get_depth_frame(handle, &mut buffer).unwrap();
        assert_eq!(buffer, frame);
        assert!(last.map_or(true, |previous| read > previous));
        last = Some(read);
    }

    assert!(matches!(
        h.registry.get_depth_frame(handle, &mut buffer),
        Err(SensorError::NoFrameAvailable {
            stream: StreamKind::Depth
        })
    ));
}

#[test]
fn test_open_on_ready_device_starts_immediately() {
    let h = Harness::new();
    // Notifications before open are not tracked; open re-queries the link
    h.driver.connect(&h.port);

    let handle = h.registry.open(&h.port).unwrap();
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);
    assert_eq!(h.registry.native_status_code(handle).unwrap(), native::S_OK);
}

#[test]
fn test_open_twice_close_once_keeps_streams() {
    let h = Harness::new();
    let first = h.started();
    let second = h.registry.open(&h.port).unwrap();
    assert_eq!(first, second);
    assert_eq!(h.registry.open_count(first).unwrap(), 2);

    h.registry
        .enable_color_stream(first, ImageResolution::Res640x480)
        .unwrap();

    h.registry.close(second).unwrap();
    assert_eq!(h.registry.open_count(first).unwrap(), 1);
    assert_eq!(h.registry.status(first).unwrap(), SensorStatus::Started);
    assert_eq!(
        h.registry.enabled_streams(first).unwrap(),
        vec![StreamKind::Color]
    );

    h.registry.close(first).unwrap();
    assert_eq!(h.registry.status(first).unwrap(), SensorStatus::None);
    assert!(h.registry.enabled_streams(first).unwrap().is_empty());
    assert!(!h.driver.is_streaming(&h.port, StreamKind::Color));
}

#[test]
fn test_closed_handle_stays_addressable() {
    let h = Harness::new();
    let handle = h.started();
    h.registry.close(handle).unwrap();

    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::None);
    assert_eq!(
        h.registry.native_status_code(handle).unwrap(),
        native::E_NUI_DEVICE_NOT_CONNECTED
    );
    // Closing again is tolerated
    h.registry.close(handle).unwrap();

    // Notifications are ignored while closed
    h.driver.emit(&h.port, HardwareEvent::PowerLost);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::None);

    assert!(matches!(
        h.registry.enable_ir_stream(handle, ImageResolution::Res640x480),
        Err(SensorError::InvalidState {
            status: SensorStatus::None
        })
    ));

    let reopened = h.registry.open(&h.port).unwrap();
    assert_eq!(reopened, handle);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::NotPowered);
}

#[test]
fn test_device_loss_disables_streams() {
    let h = Harness::new();
    let handle = h.started();
    h.registry
        .enable_color_stream(handle, ImageResolution::Res640x480)
        .unwrap();
    h.registry
        .enable_skeletal_stream(handle, SkeletalConfig::default())
        .unwrap();
    let format = h.registry.color_frame_format(handle).unwrap();
    h.driver
        .push_color(&h.port, &format.allocate(), 10);

    h.driver.emit(&h.port, HardwareEvent::Unplugged);

    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::NotPowered);
    assert!(h.registry.enabled_streams(handle).unwrap().is_empty());
    assert!(!h.registry.is_color_frame_ready(handle).unwrap());
    assert!(!h.driver.is_streaming(&h.port, StreamKind::Color));
    assert!(!h.driver.is_streaming(&h.port, StreamKind::Skeleton));
    assert!(matches!(
        h.registry.get_color_frame(handle, &mut format.allocate()),
        Err(SensorError::StreamNotEnabled { .. })
    ));
    assert!(matches!(
        h.registry
            .enable_color_stream(handle, ImageResolution::Res640x480),
        Err(SensorError::InvalidState {
            status: SensorStatus::NotPowered
        })
    ));

    // Recovery does not re-enable anything on its own
    h.driver.emit(&h.port, HardwareEvent::PowerRestored);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);
    assert!(h.registry.enabled_streams(handle).unwrap().is_empty());

    h.registry
        .enable_color_stream(handle, ImageResolution::Res640x480)
        .unwrap();
    assert_eq!(h.driver.acquisitions(&h.port, StreamKind::Color), 2);
}

#[test]
fn test_conflict_and_bandwidth_recover() {
    let h = Harness::new();
    let handle = h.started();

    h.driver.emit(&h.port, HardwareEvent::Claimed);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Conflict);
    assert_eq!(
        h.registry.native_status_code(handle).unwrap(),
        native::E_NUI_DEVICE_IN_USE
    );
    h.driver.emit(&h.port, HardwareEvent::Released);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);

    h.driver
        .emit(&h.port, HardwareEvent::BandwidthInsufficient);
    assert_eq!(
        h.registry.status(handle).unwrap(),
        SensorStatus::InsufficientBandwidth
    );
    assert_eq!(
        h.registry.native_status_code(handle).unwrap(),
        native::E_NUI_INSUFFICIENTBANDWIDTH
    );
    h.driver.emit(&h.port, HardwareEvent::BandwidthRestored);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);
}

#[test]
fn test_terminal_status_requires_reopen() {
    let h = Harness::new();
    let handle = h.started();

    h.driver
        .emit(&h.port, HardwareEvent::Fault(FaultKind::NotGenuine));
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::NotGenuine);
    assert_eq!(
        h.registry.native_status_code(handle).unwrap(),
        native::E_NUI_NOTGENUINE
    );

    h.driver.emit(&h.port, HardwareEvent::Ready);
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::NotGenuine);
    assert_eq!(
        h.registry.native_status_code(handle).unwrap(),
        native::E_NUI_NOTGENUINE
    );

    h.registry.close(handle).unwrap();
    h.driver.set_link(&h.port, LinkState::Ready);
    let handle = h.registry.open(&h.port).unwrap();
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);
}

#[test]
fn test_all_frames_ready_is_and_over_enabled_streams() {
    let h = Harness::new();
    let handle = h.started();
    assert!(h.registry.are_all_frames_ready(handle).unwrap());

    let color = h
        .registry
        .enable_color_stream(handle, ImageResolution::Res640x480)
        .unwrap();
    let depth = h
        .registry
        .enable_depth_stream(handle, true, ImageResolution::Res320x240)
        .unwrap();
    assert!(!h.registry.are_all_frames_ready(handle).unwrap());

    h.driver.push_color(&h.port, &color.allocate(), 1);
    assert!(!h.registry.are_all_frames_ready(handle).unwrap());

    h.driver.push_depth(&h.port, &depth.allocate(), 1);
    assert!(h.registry.are_all_frames_ready(handle).unwrap());

    h.registry
        .get_color_frame(handle, &mut color.allocate())
        .unwrap();
    assert!(!h.registry.are_all_frames_ready(handle).unwrap());

    // Disabled streams no longer count
    h.registry.disable_color_stream(handle).unwrap();
    assert!(h.registry.are_all_frames_ready(handle).unwrap());
}

#[test]
fn test_skeleton_through_registry() {
    let h = Harness::new();
    let handle = h.started();

    assert!(matches!(
        h.registry.get_skeleton_frame(handle),
        Err(SensorError::StreamNotEnabled { .. })
    ));

    h.registry
        .enable_skeletal_stream(handle, SkeletalConfig::default())
        .unwrap();
    assert!(!h.registry.is_skeleton_frame_ready(handle).unwrap());

    let frame = SkeletonFrame {
        frame_number: 12,
        ..SkeletonFrame::default()
    };
    assert!(h.driver.push_skeleton(&h.port, frame));
    assert!(h.registry.is_skeleton_frame_ready(handle).unwrap());
    assert_eq!(h.registry.get_skeleton_frame(handle).unwrap().frame_number, 12);
    assert!(!h.registry.is_skeleton_frame_ready(handle).unwrap());

    h.registry.disable_skeletal_stream(handle).unwrap();
    h.registry.disable_skeletal_stream(handle).unwrap();
    assert!(!h.driver.push_skeleton(&h.port, frame));
}

#[test]
fn test_invalid_handles_and_ports() {
    let h = Harness::new();
    let bogus = SensorHandle::from_raw(41);

    assert!(matches!(
        h.registry.status(bogus),
        Err(SensorError::InvalidHandle { handle: 41 })
    ));
    assert!(matches!(
        h.registry.close(bogus),
        Err(SensorError::InvalidHandle { .. })
    ));
    assert!(matches!(
        h.registry.get_skeleton_frame(bogus),
        Err(SensorError::InvalidHandle { .. })
    ));

    let unknown = DeviceIdentity::new("USB\\VID_0000&PID_0000\\NOPE").unwrap();
    assert!(matches!(
        h.registry.open(&unknown),
        Err(SensorError::NotFound { .. })
    ));
    assert!(matches!(
        h.registry.open_by_index(3),
        Err(SensorError::NotFound { .. })
    ));

    let empty = SensorRegistry::new(Arc::new(SimulatedDriver::new()), 8);
    assert!(empty.enumerate().is_empty());
    assert!(matches!(
        empty.open_default(),
        Err(SensorError::NotFound { .. })
    ));
}

#[test]
fn test_multiple_ports_are_independent() {
    let h = Harness::new();
    let other = h.driver.add_port("USB\\VID_045E&PID_02AE\\SECOND").unwrap();
    assert_eq!(h.registry.enumerate(), vec![h.port.clone(), other.clone()]);

    let first = h.started();
    let second = h.registry.open_by_index(1).unwrap();
    assert_ne!(first, second);

    h.driver.connect(&other);
    h.driver.emit(&other, HardwareEvent::PowerLost);
    assert_eq!(h.registry.status(second).unwrap(), SensorStatus::NotPowered);
    assert_eq!(h.registry.status(first).unwrap(), SensorStatus::Started);
}

#[test]
fn test_frames_for_closed_sensor_are_dropped() {
    let h = Harness::new();
    let handle = h.started();
    let format = h
        .registry
        .enable_ir_stream(handle, ImageResolution::Res640x480)
        .unwrap();
    h.registry.close(handle).unwrap();

    assert!(!h.driver.push_infrared(&h.port, &format.allocate(), 3));
    assert!(!h.registry.is_ir_frame_ready(handle).unwrap());
}

#[test]
fn test_events_follow_lifecycle() {
    let h = Harness::new();
    let mut events = h.registry.subscribe();

    let handle = h.registry.open_default().unwrap();
    h.driver.connect(&h.port);
    h.registry
        .enable_depth_stream(handle, false, ImageResolution::Res80x60)
        .unwrap();
    h.registry.close(handle).unwrap();

    let received = events.drain();
    let types: Vec<&str> = received.iter().map(|event| event.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "status_changed",
            "opened",
            "status_changed",
            "stream_enabled",
            "status_changed",
            "stream_disabled",
            "closed",
        ]
    );

    assert!(matches!(
        received[2],
        SensorEvent::StatusChanged {
            previous: SensorStatus::Initializing,
            current: SensorStatus::Started,
            ..
        }
    ));
    assert!(matches!(
        received[4],
        SensorEvent::StatusChanged {
            previous: SensorStatus::Started,
            current: SensorStatus::None,
            ..
        }
    ));
    assert!(matches!(
        received[5],
        SensorEvent::StreamDisabled {
            stream: StreamKind::Depth,
            reason: DisableReason::Closed,
            ..
        }
    ));
}

#[test]
fn test_device_lost_event_reason() {
    let h = Harness::new();
    let handle = h.started();
    h.registry
        .enable_ir_stream(handle, ImageResolution::Res640x480)
        .unwrap();

    let mut events = h
        .registry
        .subscribe_filtered(EventFilter::EventTypes(vec!["stream_disabled"]));
    h.driver
        .emit(&h.port, HardwareEvent::Fault(FaultKind::Error));

    let received = events.drain();
    assert_eq!(received.len(), 1);
    assert!(matches!(
        received[0],
        SensorEvent::StreamDisabled {
            stream: StreamKind::Infrared,
            reason: DisableReason::DeviceLost,
            ..
        }
    ));
}

#[test]
fn test_sink_outliving_registry_is_inert() {
    let h = Harness::new();
    let Harness {
        driver,
        registry,
        port,
    } = h;
    let handle = registry.open_default().unwrap();
    drop(registry);

    driver.connect(&port);
    assert!(!driver.push_depth(&port, &[0u8; 4], 1));
    assert_eq!(handle.as_raw(), 0);
}

#[test]
fn test_status_reads_during_notifications() {
    let h = Harness::new();
    let handle = h.started();

    let reader = {
        let registry = h.registry.clone();
        thread::spawn(move || {
            for _ in 0..1_000 {
                let status = registry.status(handle).unwrap();
                assert!(matches!(
                    status,
                    SensorStatus::Started | SensorStatus::Conflict
                ));
            }
        })
    };

    for _ in 0..200 {
        h.driver.emit(&h.port, HardwareEvent::Claimed);
        h.driver.emit(&h.port, HardwareEvent::Released);
    }

    reader.join().unwrap();
    assert_eq!(h.registry.status(handle).unwrap(), SensorStatus::Started);
}

#[test]
fn test_producer_feeds_enabled_streams() {
    let h = Harness::new();
    let handle = h.started();
    let format = h
        .registry
        .enable_depth_stream(handle, false, ImageResolution::Res80x60)
        .unwrap();
    h.registry
        .enable_skeletal_stream(
            handle,
            SkeletalConfig {
                seated: true,
                ..SkeletalConfig::default()
            },
        )
        .unwrap();

    let producer = SimulatedProducer::spawn(Arc::clone(&h.driver), 200).unwrap();

    let mut buffer = format.allocate();
    let mut timestamps = Vec::new();
    while timestamps.len() < 2 {
        assert!(wait_for(|| h.registry.is_depth_frame_ready(handle).unwrap()));
        timestamps.push(h.registry.get_depth_frame(handle, &mut buffer).unwrap());
    }
    assert!(timestamps[1] > timestamps[0]);

    assert!(wait_for(|| h.registry.is_skeleton_frame_ready(handle).unwrap()));
    let skeleton = h.registry.get_skeleton_frame(handle).unwrap();
    assert_eq!(skeleton.tracked_bodies().count(), 1);

    producer.stop();
}

#[test]
fn test_failed_renegotiation_keeps_stream() {
    let h = Harness::new();
    let handle = h.started();
    let original = h
        .registry
        .enable_color_stream(handle, ImageResolution::Res640x480)
        .unwrap();
    let mut events = h
        .registry
        .subscribe_filtered(EventFilter::EventTypes(vec!["stream_disabled"]));

    h.driver.refuse_next_open(&h.port, StreamKind::Color);
    let err = h
        .registry
        .enable_color_stream(handle, ImageResolution::Res1280x960)
        .unwrap_err();
    assert!(matches!(err, SensorError::Driver { .. }));

    assert!(events.drain().is_empty());
    assert_eq!(
        h.registry.enabled_streams(handle).unwrap(),
        vec![StreamKind::Color]
    );
    assert_eq!(h.registry.color_frame_format(handle).unwrap(), original);

    let frame = vec![0x5Au8; original.required_buffer_size()];
    assert!(h.driver.push_color(&h.port, &frame, 77));
    let mut buffer = original.allocate();
    assert_eq!(h.registry.get_color_frame(handle, &mut buffer).unwrap(), 77);
    assert_eq!(buffer, frame);
}

#[test]
fn test_failed_renegotiation_reports_lost_stream() {
    let h = Harness::new();
    let handle = h.started();
    h.registry
        .enable_depth_stream(handle, false, ImageResolution::Res320x240)
        .unwrap();
    let mut events = h
        .registry
        .subscribe_filtered(EventFilter::EventTypes(vec!["stream_disabled"]));

    h.driver.refuse_stream(&h.port, StreamKind::Depth);
    assert!(h
        .registry
        .enable_depth_stream(handle, true, ImageResolution::Res320x240)
        .is_err());

    assert!(h.registry.enabled_streams(handle).unwrap().is_empty());
    assert!(!h.driver.is_streaming(&h.port, StreamKind::Depth));
    let received = events.drain();
    assert_eq!(received.len(), 1);
    assert!(matches!(
        received[0],
        SensorEvent::StreamDisabled {
            stream: StreamKind::Depth,
            reason: DisableReason::RenegotiationFailed,
            ..
        }
    ));
}

#[test]
fn test_reenable_returns_identical_descriptor() {
    let h = Harness::new();
    let handle = h.started();

    let first = h
        .registry
        .enable_depth_stream(handle, true, ImageResolution::Res320x240)
        .unwrap();
    h.registry.disable_depth_stream(handle).unwrap();
    assert!(h.registry.enabled_streams(handle).unwrap().is_empty());
    let second = h
        .registry
        .enable_depth_stream(handle, true, ImageResolution::Res320x240)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.registry.depth_frame_format(handle).unwrap(), first);
    assert_eq!(h.driver.acquisitions(&h.port, StreamKind::Depth), 2);
}

/// Records the sensor status whenever stream resources are released
struct ObservingDriver {
    inner: Arc<SimulatedDriver>,
    registry: Mutex<Option<(SensorRegistry, SensorHandle)>>,
    seen: Mutex<Vec<SensorStatus>>,
}

impl SensorDriver for ObservingDriver {
    fn port_count(&self) -> usize {
        self.inner.port_count()
    }

    fn port_id(&self, index: usize) -> Option<DeviceIdentity> {
        self.inner.port_id(index)
    }

    fn query_link(&self, port: &DeviceIdentity) -> LinkReport {
        self.inner.query_link(port)
    }

    fn open_stream(
        &self,
        port: &DeviceIdentity,
        kind: StreamKind,
        request: &StreamRequest,
    ) -> crate::error::Result<()> {
        self.inner.open_stream(port, kind, request)
    }

    fn close_stream(&self, port: &DeviceIdentity, kind: StreamKind) {
        if let Some((registry, handle)) = self.registry.lock().as_ref() {
            if let Ok(status) = registry.status(*handle) {
                self.seen.lock().push(status);
            }
        }
        self.inner.close_stream(port, kind);
    }
}

#[test]
fn test_last_close_leaves_started_before_releasing_streams() {
    let simulated = Arc::new(SimulatedDriver::new());
    let port = simulated.add_port(DEFAULT_SIMULATED_PORT).unwrap();
    simulated.set_link(&port, LinkState::Ready);
    let driver = Arc::new(ObservingDriver {
        inner: Arc::clone(&simulated),
        registry: Mutex::new(None),
        seen: Mutex::new(Vec::new()),
    });
    let registry = SensorRegistry::new(Arc::clone(&driver), 64);
    simulated.attach(registry.hardware_sink());

    let handle = registry.open(&port).unwrap();
    assert_eq!(registry.status(handle).unwrap(), SensorStatus::Started);
    registry
        .enable_color_stream(handle, ImageResolution::Res640x480)
        .unwrap();
    registry
        .enable_skeletal_stream(handle, SkeletalConfig::default())
        .unwrap();
    *driver.registry.lock() = Some((registry.clone(), handle));

    registry.close(handle).unwrap();
    *driver.registry.lock() = None;

    let seen = driver.seen.lock().clone();
    assert_eq!(seen, vec![SensorStatus::None, SensorStatus::None]);
    assert!(matches!(
        registry.enable_color_stream(handle, ImageResolution::Res640x480),
        Err(SensorError::InvalidState {
            status: SensorStatus::None
        })
    ));
    assert!(registry.enabled_streams(handle).unwrap().is_empty());
}
