#![cfg(feature = "sim")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gencam::transport::sim::SimTransport;
use gencam::{
    BufferStrategy, Camera, CaptureCallback, CaptureState, Error, FrameStatus, OpenOptions,
    PacketSizePolicy, Runtime,
};

fn sim_runtime() -> (Arc<SimTransport>, Arc<Runtime>) {
    let transport = Arc::new(SimTransport::new());
    transport.add_device("SIM-CAM-0");
    let runtime = Runtime::init(transport.clone()).expect("runtime init");
    (transport, runtime)
}

fn counting_callback() -> (Arc<CaptureCallback>, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let callback: Arc<CaptureCallback> = Arc::new(|_dev, _stream, frame, user| {
        let counter = user
            .downcast_ref::<AtomicUsize>()
            .expect("callback context is the frame counter");
        assert_eq!(frame.status, FrameStatus::Complete);
        assert!(!frame.data().is_empty());
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (callback, counter)
}

#[test]
fn continuous_capture_delivers_and_requeues() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    camera.set_image_size(64, 64).unwrap();
    assert_eq!(camera.frame_set().payload_size(), 64 * 64);
    assert_eq!(camera.frame_set().frame_count(), 4);

    let (callback, counter) = counting_callback();
    camera.start_capture(callback, counter.clone()).unwrap();
    assert_eq!(camera.state(), CaptureState::Acquiring);
    assert!(camera.streaming() && camera.acquiring());

    let delivered = transport.deliver_frames(camera.device_ref(), 100);
    assert_eq!(delivered, 100);
    assert_eq!(counter.load(Ordering::SeqCst), 100);

    camera.stop_capture().unwrap();
    assert_eq!(camera.state(), CaptureState::Idle);
    assert!(!camera.frame_set().announced());
    assert_eq!(transport.queued(camera.device_ref()), 0);
    assert_eq!(transport.announced(camera.device_ref()), 0);

    // all four descriptors are still owned by the set and cycled through
    let frames = camera.frame_set().frames();
    assert_eq!(frames.len(), 4);
    for frame in frames {
        assert!(frame.frame_id > 0);
        assert_eq!(frame.status, FrameStatus::Complete);
    }
    camera.close().unwrap();
}

#[test]
fn stop_twice_is_idempotent() {
    let (_transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    let (callback, counter) = counting_callback();
    camera.start_capture(callback, counter).unwrap();
    camera.stop_capture().unwrap();
    camera.stop_capture().unwrap();
    assert_eq!(camera.state(), CaptureState::Idle);
}

#[test]
fn restart_with_unchanged_configuration_does_not_reallocate() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    let base = camera.frame_set().frames()[0].as_ptr();

    let (callback, counter) = counting_callback();
    camera.start_capture(callback.clone(), counter.clone()).unwrap();
    transport.deliver_frames(camera.device_ref(), 8);
    camera.stop_capture().unwrap();

    camera.start_capture(callback, counter).unwrap();
    assert_eq!(camera.frame_set().frames()[0].as_ptr(), base);
    camera.stop_capture().unwrap();
}

#[test]
fn reconfiguration_while_streaming_is_busy() {
    let (_transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    camera.set_image_size(64, 64).unwrap();
    let payload = camera.frame_set().payload_size();

    let (callback, counter) = counting_callback();
    camera.start_capture(callback, counter).unwrap();

    assert!(matches!(camera.set_image_size(512, 256), Err(Error::Busy)));
    assert!(matches!(camera.set_binning_factor(2), Err(Error::Busy)));
    assert!(matches!(camera.set_pixel_format("RGB8"), Err(Error::Busy)));
    assert!(matches!(camera.allocate_buffers(8), Err(Error::Busy)));
    assert_eq!(camera.frame_set().payload_size(), payload);

    camera.stop_capture().unwrap();
}

#[test]
fn resize_while_idle_reallocates_and_requeries_alignment() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    camera.set_image_size(64, 64).unwrap();
    let small = camera.frame_set().allocation_size();
    assert_eq!(camera.frame_set().alignment(), 64);

    transport.set_alignment(128);
    camera.set_image_size(512, 256).unwrap();
    assert_eq!(camera.frame_set().payload_size(), 512 * 256);
    assert!(camera.frame_set().allocation_size() > small);
    assert_eq!(camera.frame_set().alignment(), 128);
    assert_eq!(camera.frame_set().frame_count(), 4);
}

#[test]
fn exposure_round_trip_and_validation() {
    let (_transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();

    camera.set_exposure_us(1234.0).unwrap();
    assert_eq!(camera.exposure_us().unwrap(), 1234.0);

    assert!(matches!(
        camera.set_exposure_us(0.0),
        Err(Error::InvalidValue(_))
    ));
    assert!(matches!(
        camera.set_exposure_us(-5.0),
        Err(Error::InvalidValue(_))
    ));
    assert_eq!(camera.exposure_us().unwrap(), 1234.0);

    let range = camera.exposure_range_us().unwrap();
    assert!(range.min > 0.0 && range.max > range.min);
}

#[test]
fn divergent_binning_axes_are_an_internal_fault() {
    let (_transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();

    camera.set_binning_factor(2).unwrap();
    assert_eq!(camera.binning_factor().unwrap(), 2);

    // bypass the paired setter through the low-level accessor
    camera.set_feature_int("BinningHorizontal", 4).unwrap();
    assert!(matches!(
        camera.binning_factor(),
        Err(Error::InternalFault(_))
    ));
}

#[test]
fn zero_sizes_are_rejected_before_transport_calls() {
    let (_transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();

    assert!(matches!(
        camera.allocate_buffers(0),
        Err(Error::BadParameter(_))
    ));
    assert!(matches!(
        camera.set_image_size(0, 64),
        Err(Error::BadParameter(_))
    ));
    assert!(matches!(
        camera.set_binning_factor(0),
        Err(Error::BadParameter(_))
    ));
    camera.close().unwrap();

    let open_err = Camera::open(&runtime, OpenOptions::default().frame_count(0));
    assert!(matches!(open_err, Err(Error::BadParameter(_))));
}

#[test]
fn announce_failure_rolls_back_to_idle() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();

    transport.fail_announce_at(2);
    let (callback, counter) = counting_callback();
    let err = camera.start_capture(callback.clone(), counter.clone());
    assert!(matches!(err, Err(Error::Transport(_))));
    assert_eq!(camera.state(), CaptureState::Idle);
    assert!(!camera.frame_set().announced());
    assert_eq!(transport.announced(camera.device_ref()), 0);

    transport.clear_faults();
    camera.start_capture(callback, counter.clone()).unwrap();
    transport.deliver_frames(camera.device_ref(), 4);
    camera.stop_capture().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[test]
fn acquisition_start_failure_surfaces_the_real_error() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();

    transport.fail_command("AcquisitionStart");
    let (callback, counter) = counting_callback();
    match camera.start_capture(callback, counter) {
        // the transport's own error passes through, not a generic fault
        Err(Error::Transport(message)) => assert!(message.contains("AcquisitionStart")),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(camera.state(), CaptureState::Idle);
    assert!(!camera.frame_set().announced());
    assert_eq!(transport.announced(camera.device_ref()), 0);
}

#[test]
fn revocation_is_retried_until_the_transport_yields() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();

    let (callback, counter) = counting_callback();
    camera.start_capture(callback, counter).unwrap();
    transport.fail_revoke_times(3);
    camera.stop_capture().unwrap();
    assert_eq!(transport.announced(camera.device_ref()), 0);
    assert_eq!(camera.state(), CaptureState::Idle);
}

#[test]
fn open_without_devices_is_not_found() {
    let transport = Arc::new(SimTransport::new());
    let runtime = Runtime::init(transport).unwrap();
    assert!(matches!(
        Camera::open(&runtime, OpenOptions::default()),
        Err(Error::NotFound)
    ));
    assert!(matches!(runtime.list_devices(), Err(Error::NotFound)));
}

#[test]
fn packet_size_negotiation_policy_is_configurable() {
    let (transport, runtime) = sim_runtime();
    transport.fail_command("GVSPAdjustPacketSize");

    let strict = Camera::open(
        &runtime,
        OpenOptions::default().packet_size(PacketSizePolicy::Require),
    );
    assert!(matches!(strict, Err(Error::Transport(_))));

    // best effort tolerates the failure and the device is usable
    let camera = Camera::open(
        &runtime,
        OpenOptions::default().packet_size(PacketSizePolicy::BestEffort),
    )
    .unwrap();
    assert!(camera.frame_set().is_allocated());
    camera.close().unwrap();
}

#[test]
fn discrete_buffer_strategy_captures() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(
        &runtime,
        OpenOptions::default().strategy(BufferStrategy::Discrete),
    )
    .unwrap();
    camera.set_image_size(64, 64).unwrap();

    let (callback, counter) = counting_callback();
    camera.start_capture(callback, counter.clone()).unwrap();
    assert_eq!(transport.deliver_frames(camera.device_ref(), 10), 10);
    camera.stop_capture().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn close_propagates_stop_failure() {
    let (transport, runtime) = sim_runtime();
    let mut camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    let (callback, counter) = counting_callback();
    camera.start_capture(callback, counter).unwrap();

    transport.fail_command("AcquisitionStop");
    assert!(matches!(camera.close(), Err(Error::Transport(_))));
    // the drop safety net must not panic even though the stop keeps failing
}

#[test]
fn reset_consumes_the_handle() {
    let (transport, runtime) = sim_runtime();
    let camera = Camera::open(&runtime, OpenOptions::default()).unwrap();
    let dev = camera.device_ref();
    camera.reset().unwrap();
    // the device was closed along with the reset
    assert_eq!(transport.announced(dev), 0);
}

#[test]
fn enumeration_reports_known_devices() {
    let (_transport, runtime) = sim_runtime();
    let devices = runtime.list_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "SIM-CAM-0");
}
