//! In-process transport simulation.
//!
//! Behaves like a GenTL runtime with one or more virtual cameras: GenICam
//! named features, payload size derived from the current geometry and pixel
//! format, announce/queue/revoke bookkeeping and frame-completion
//! injection. Fault injection hooks cover the error paths the capture core
//! has to unwind.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{
    AccessMode, DeviceInfo, DeviceRef, EnumOption, FrameObserver, ModuleRef, StreamRef, Transport,
};
use crate::error::{Error, Result};
use crate::frame::{FrameDescriptor, FrameStatus};

#[derive(Debug, Clone, PartialEq)]
enum FeatureValue {
    Int(i64),
    Float(f64),
    Enum(String),
    Bool(bool),
}

struct QueuedFrame {
    frame: *mut FrameDescriptor,
    observer: Arc<dyn FrameObserver>,
}

// Queued descriptors are exclusively accessed by the delivery path while
// queued, per the queue_buffer contract.
unsafe impl Send for QueuedFrame {}

struct SimDevice {
    info: DeviceInfo,
    open: bool,
    engine_running: bool,
    features: HashMap<&'static str, FeatureValue>,
    int_ranges: HashMap<&'static str, (i64, i64, i64)>,
    int_value_sets: HashMap<&'static str, Vec<i64>>,
    float_ranges: HashMap<&'static str, (f64, f64, Option<f64>)>,
    enum_options: HashMap<&'static str, Vec<&'static str>>,
    announced: Vec<usize>,
    queue: VecDeque<QueuedFrame>,
    next_frame_id: u64,
    commands: Vec<String>,
}

impl SimDevice {
    fn new(id: &str) -> Self {
        let mut features = HashMap::new();
        for (name, value) in [
            ("Width", 640),
            ("Height", 480),
            ("SensorWidth", 1936),
            ("SensorHeight", 1216),
            ("OffsetX", 0),
            ("OffsetY", 0),
            ("BinningHorizontal", 1),
            ("BinningVertical", 1),
            ("DeviceIndicatorLuminance", 10),
            ("DeviceLinkThroughputLimit", 450_000_000),
            ("DeviceLinkSpeed", 480_000_000),
        ] {
            features.insert(name, FeatureValue::Int(value));
        }
        for (name, value) in [
            ("ExposureTime", 5000.0),
            ("Gain", 1.0),
            ("AcquisitionFrameRate", 30.0),
            ("DeviceTemperature", 42.5),
            ("LineDebounceDuration", 0.0),
        ] {
            features.insert(name, FeatureValue::Float(value));
        }
        for (name, value) in [
            ("PixelFormat", "Mono8"),
            ("SensorBitDepth", "Bpp8"),
            ("BinningHorizontalMode", "Sum"),
            ("BinningVerticalMode", "Sum"),
            ("DeviceTemperatureSelector", "Sensor"),
            ("DeviceIndicatorMode", "Active"),
            ("LineSelector", "Line0"),
            ("LineMode", "Input"),
            ("LineSource", "ExposureActive"),
            ("LineDebounceMode", "Off"),
        ] {
            features.insert(name, FeatureValue::Enum(value.to_string()));
        }
        for (name, value) in [
            ("ReverseX", false),
            ("ReverseY", false),
            ("AcquisitionFrameRateEnable", false),
            ("LineInverter", false),
        ] {
            features.insert(name, FeatureValue::Bool(value));
        }

        let int_ranges = HashMap::from([
            ("Width", (8, 1936, 8)),
            ("Height", (8, 1216, 8)),
            ("OffsetX", (0, 1928, 2)),
            ("OffsetY", (0, 1208, 2)),
            ("BinningHorizontal", (1, 8, 1)),
            ("BinningVertical", (1, 8, 1)),
            ("DeviceIndicatorLuminance", (0, 255, 1)),
            ("DeviceLinkThroughputLimit", (1_000_000, 480_000_000, 1)),
        ]);
        let int_value_sets = HashMap::from([
            ("BinningHorizontal", vec![1, 2, 4, 8]),
            ("BinningVertical", vec![1, 2, 4, 8]),
        ]);
        let float_ranges = HashMap::from([
            ("ExposureTime", (10.0, 1e7, Some(1.0))),
            ("Gain", (0.0, 48.0, Some(0.1))),
            ("AcquisitionFrameRate", (1.0, 1000.0, None)),
            ("LineDebounceDuration", (0.0, 1e4, Some(1.0))),
        ]);
        let enum_options = HashMap::from([
            ("PixelFormat", vec!["Mono8", "Mono12", "RGB8", "BayerRG8"]),
            ("SensorBitDepth", vec!["Bpp8", "Bpp10", "Bpp12"]),
            ("BinningHorizontalMode", vec!["Sum", "Average"]),
            ("BinningVerticalMode", vec!["Sum", "Average"]),
            ("DeviceTemperatureSelector", vec!["Sensor", "Mainboard"]),
            ("DeviceIndicatorMode", vec!["Active", "Inactive", "ErrorStatus"]),
            ("LineSelector", vec!["Line0", "Line1", "Line2", "Line3"]),
            ("LineMode", vec!["Input", "Output"]),
            (
                "LineSource",
                vec!["ExposureActive", "FrameTriggerWait", "AcquisitionActive"],
            ),
            ("LineDebounceMode", vec!["Off", "On"]),
        ]);

        SimDevice {
            info: DeviceInfo {
                id: id.to_string(),
                model: "SimCam 1800".to_string(),
                serial: format!("{}-SN", id),
            },
            open: false,
            engine_running: false,
            features,
            int_ranges,
            int_value_sets,
            float_ranges,
            enum_options,
            announced: Vec::new(),
            queue: VecDeque::new(),
            next_frame_id: 0,
            commands: Vec::new(),
        }
    }

    fn int(&self, name: &str) -> i64 {
        match self.features.get(name) {
            Some(FeatureValue::Int(value)) => *value,
            _ => 0,
        }
    }

    fn payload(&self) -> u32 {
        let width = self.int("Width") as u32;
        let height = self.int("Height") as u32;
        let bpp = match self.features.get("PixelFormat") {
            Some(FeatureValue::Enum(format)) => match format.as_str() {
                "Mono10" | "Mono12" | "Mono16" => 2,
                "RGB8" | "BGR8" => 3,
                _ => 1,
            },
            _ => 1,
        };
        width * height * bpp
    }
}

struct SimState {
    started: bool,
    alignment: i64,
    devices: Vec<SimDevice>,
    fail_announce_at: Option<usize>,
    fail_revoke_times: usize,
    failing_commands: HashSet<String>,
}

fn device_entry<'a>(state: &'a mut SimState, dev: DeviceRef) -> Result<&'a mut SimDevice> {
    if !state.started {
        return Err(Error::NotInitialized);
    }
    let index = (dev.0 as usize)
        .checked_sub(1)
        .ok_or_else(|| Error::Transport("invalid device handle".into()))?;
    let device = state
        .devices
        .get_mut(index)
        .ok_or_else(|| Error::Transport("invalid device handle".into()))?;
    if !device.open {
        return Err(Error::Transport("device not open".into()));
    }
    Ok(device)
}

/// Simulated camera transport.
pub struct SimTransport {
    state: Mutex<SimState>,
}

impl SimTransport {
    /// Returns a transport with no devices; add them with
    /// [`SimTransport::add_device`].
    pub fn new() -> Self {
        SimTransport {
            state: Mutex::new(SimState {
                started: false,
                alignment: 64,
                devices: Vec::new(),
                fail_announce_at: None,
                fail_revoke_times: 0,
                failing_commands: HashSet::new(),
            }),
        }
    }

    /// Add a simulated camera.
    pub fn add_device(&self, id: &str) {
        self.state.lock().devices.push(SimDevice::new(id));
    }

    /// Set the buffer alignment the transport reports.
    pub fn set_alignment(&self, alignment: i64) {
        self.state.lock().alignment = alignment;
    }

    /// Make the announce call fail once the device has `index` buffers
    /// registered.
    pub fn fail_announce_at(&self, index: usize) {
        self.state.lock().fail_announce_at = Some(index);
    }

    /// Make the next `times` revoke calls fail.
    pub fn fail_revoke_times(&self, times: usize) {
        self.state.lock().fail_revoke_times = times;
    }

    /// Make the named command feature fail.
    pub fn fail_command(&self, name: &str) {
        self.state.lock().failing_commands.insert(name.to_string());
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.fail_announce_at = None;
        state.fail_revoke_times = 0;
        state.failing_commands.clear();
    }

    /// Number of buffers waiting in the device's receive queue.
    pub fn queued(&self, dev: DeviceRef) -> usize {
        let mut state = self.state.lock();
        device_entry(&mut state, dev).map_or(0, |d| d.queue.len())
    }

    /// Number of buffers currently announced to the device.
    pub fn announced(&self, dev: DeviceRef) -> usize {
        let mut state = self.state.lock();
        device_entry(&mut state, dev).map_or(0, |d| d.announced.len())
    }

    /// Command features run against the device so far, in order.
    pub fn commands_run(&self, dev: DeviceRef) -> Vec<String> {
        let mut state = self.state.lock();
        device_entry(&mut state, dev).map_or_else(|_| Vec::new(), |d| d.commands.clone())
    }

    /// Complete up to `count` queued frames, invoking their observers the
    /// way a delivery thread would.
    ///
    /// Returns the number of frames actually delivered; delivery stops
    /// early when the queue runs dry or the capture engine is not running.
    pub fn deliver_frames(&self, dev: DeviceRef, count: usize) -> usize {
        let stream = StreamRef(dev.0);
        let mut delivered = 0;
        for _ in 0..count {
            // the lock is dropped before the observer runs: the relay
            // re-enters queue_buffer from inside frame_done
            let next = {
                let mut state = self.state.lock();
                let Ok(device) = device_entry(&mut state, dev) else {
                    break;
                };
                if !device.engine_running {
                    break;
                }
                match device.queue.pop_front() {
                    Some(queued) => {
                        device.next_frame_id += 1;
                        Some((
                            queued,
                            device.payload() as usize,
                            device.next_frame_id,
                            device.int("Width") as u32,
                            device.int("Height") as u32,
                        ))
                    }
                    None => None,
                }
            };
            let Some((queued, payload, frame_id, width, height)) = next else {
                break;
            };
            let frame = unsafe { &mut *queued.frame };
            let filled = payload.min(frame.buffer_size());
            unsafe { std::ptr::write_bytes(frame.buffer, (frame_id & 0xff) as u8, filled) };
            frame.image_size = filled;
            frame.width = width;
            frame.height = height;
            frame.frame_id = frame_id;
            frame.timestamp = frame_id * 1_000;
            frame.status = FrameStatus::Complete;
            trace!(frame_id, filled, "sim frame delivered");
            queued.observer.frame_done(&dev, &stream, frame);
            delivered += 1;
        }
        delivered
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn startup(&self, _config_path: Option<&Path>) -> Result<()> {
        let mut state = self.state.lock();
        // the flag is checked and set under one lock: no startup race
        state.started = true;
        Ok(())
    }

    fn shutdown(&self) {
        self.state.lock().started = false;
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        let state = self.state.lock();
        if !state.started {
            return Err(Error::NotInitialized);
        }
        Ok(state.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn open_device(&self, id: &str, _mode: AccessMode) -> Result<DeviceRef> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(Error::NotInitialized);
        }
        let index = state
            .devices
            .iter()
            .position(|d| d.info.id == id)
            .ok_or(Error::NotFound)?;
        let device = &mut state.devices[index];
        if device.open {
            return Err(Error::Transport(format!("device {} is already open", id)));
        }
        device.open = true;
        Ok(DeviceRef(index as u64 + 1))
    }

    fn close_device(&self, dev: DeviceRef) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        device.open = false;
        device.engine_running = false;
        device.queue.clear();
        device.announced.clear();
        Ok(())
    }

    fn stream(&self, dev: DeviceRef) -> Result<StreamRef> {
        let mut state = self.state.lock();
        device_entry(&mut state, dev)?;
        Ok(StreamRef(dev.0))
    }

    fn payload_size(&self, dev: DeviceRef) -> Result<u32> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        Ok(device.payload())
    }

    fn buffer_alignment(&self, dev: DeviceRef) -> Result<i64> {
        let mut state = self.state.lock();
        let alignment = state.alignment;
        device_entry(&mut state, dev)?;
        Ok(alignment)
    }

    unsafe fn announce_buffer(
        &self,
        dev: DeviceRef,
        frame: NonNull<FrameDescriptor>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let fail_at = state.fail_announce_at;
        let device = device_entry(&mut state, dev)?;
        if fail_at == Some(device.announced.len()) {
            return Err(Error::Transport("announce rejected by transport".into()));
        }
        let addr = frame.as_ptr() as usize;
        if device.announced.contains(&addr) {
            return Err(Error::Transport("buffer already announced".into()));
        }
        device.announced.push(addr);
        Ok(())
    }

    fn revoke_all_buffers(&self, dev: DeviceRef) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_revoke_times > 0 {
            state.fail_revoke_times -= 1;
            return Err(Error::Transport("buffers still in use".into()));
        }
        let device = device_entry(&mut state, dev)?;
        if !device.queue.is_empty() {
            return Err(Error::Transport("frames still queued".into()));
        }
        device.announced.clear();
        Ok(())
    }

    fn start_capture_engine(&self, dev: DeviceRef) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        device.engine_running = true;
        Ok(())
    }

    fn end_capture_engine(&self, dev: DeviceRef) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        device.engine_running = false;
        Ok(())
    }

    fn flush_queue(&self, dev: DeviceRef) {
        let mut state = self.state.lock();
        if let Ok(device) = device_entry(&mut state, dev) {
            device.queue.clear();
        }
    }

    unsafe fn queue_buffer(
        &self,
        dev: DeviceRef,
        frame: NonNull<FrameDescriptor>,
        observer: Arc<dyn FrameObserver>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        let addr = frame.as_ptr() as usize;
        if !device.announced.contains(&addr) {
            return Err(Error::Transport("buffer not announced".into()));
        }
        device.queue.push_back(QueuedFrame {
            frame: frame.as_ptr(),
            observer,
        });
        Ok(())
    }

    fn run_command(&self, module: ModuleRef, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(Error::NotInitialized);
        }
        if state.failing_commands.contains(name) {
            return Err(Error::Transport(format!("command {} failed", name)));
        }
        let dev = match module {
            ModuleRef::Device(dev) => dev,
            ModuleRef::Stream(stream) => DeviceRef(stream.0),
        };
        let device = device_entry(&mut state, dev)?;
        device.commands.push(name.to_string());
        Ok(())
    }

    fn poll_command_done(&self, _module: ModuleRef, _name: &str) -> Result<bool> {
        Ok(true)
    }

    fn feature_int(&self, dev: DeviceRef, name: &str) -> Result<i64> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        match device.features.get(name) {
            Some(FeatureValue::Int(value)) => Ok(*value),
            Some(_) => Err(Error::Transport(format!("feature {} is not an integer", name))),
            None => Err(Error::NotSupported(name.into())),
        }
    }

    fn set_feature_int(&self, dev: DeviceRef, name: &str, value: i64) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        let key = match device.features.get_key_value(name) {
            Some((key, FeatureValue::Int(_))) => *key,
            Some(_) => {
                return Err(Error::Transport(format!("feature {} is not an integer", name)))
            }
            None => return Err(Error::NotSupported(name.into())),
        };
        if let Some((min, max, _)) = device.int_ranges.get(name) {
            if value < *min || value > *max {
                return Err(Error::InvalidValue(format!(
                    "{} out of range [{}, {}]: {}",
                    name, min, max, value
                )));
            }
        }
        device.features.insert(key, FeatureValue::Int(value));
        Ok(())
    }

    fn feature_int_range(&self, dev: DeviceRef, name: &str) -> Result<(i64, i64, i64)> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        device
            .int_ranges
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotSupported(name.into()))
    }

    fn feature_int_values(&self, dev: DeviceRef, name: &str) -> Result<Vec<i64>> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        device
            .int_value_sets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotSupported(name.into()))
    }

    fn feature_float(&self, dev: DeviceRef, name: &str) -> Result<f64> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        match device.features.get(name) {
            Some(FeatureValue::Float(value)) => Ok(*value),
            Some(_) => Err(Error::Transport(format!("feature {} is not a float", name))),
            None => Err(Error::NotSupported(name.into())),
        }
    }

    fn set_feature_float(&self, dev: DeviceRef, name: &str, value: f64) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        let key = match device.features.get_key_value(name) {
            Some((key, FeatureValue::Float(_))) => *key,
            Some(_) => return Err(Error::Transport(format!("feature {} is not a float", name))),
            None => return Err(Error::NotSupported(name.into())),
        };
        if let Some((min, max, _)) = device.float_ranges.get(name) {
            if value < *min || value > *max {
                return Err(Error::InvalidValue(format!(
                    "{} out of range [{}, {}]: {}",
                    name, min, max, value
                )));
            }
        }
        device.features.insert(key, FeatureValue::Float(value));
        Ok(())
    }

    fn feature_float_range(&self, dev: DeviceRef, name: &str) -> Result<(f64, f64, Option<f64>)> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        device
            .float_ranges
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotSupported(name.into()))
    }

    fn feature_enum(&self, dev: DeviceRef, name: &str) -> Result<String> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        match device.features.get(name) {
            Some(FeatureValue::Enum(value)) => Ok(value.clone()),
            Some(_) => Err(Error::Transport(format!(
                "feature {} is not an enumeration",
                name
            ))),
            None => Err(Error::NotSupported(name.into())),
        }
    }

    fn set_feature_enum(&self, dev: DeviceRef, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        let key = match device.features.get_key_value(name) {
            Some((key, FeatureValue::Enum(_))) => *key,
            Some(_) => {
                return Err(Error::Transport(format!(
                    "feature {} is not an enumeration",
                    name
                )))
            }
            None => return Err(Error::NotSupported(name.into())),
        };
        let valid = device
            .enum_options
            .get(name)
            .map_or(false, |options| options.iter().any(|o| *o == value));
        if !valid {
            return Err(Error::InvalidValue(format!(
                "{} is not a valid entry of {}",
                value, name
            )));
        }
        device
            .features
            .insert(key, FeatureValue::Enum(value.to_string()));
        Ok(())
    }

    fn feature_enum_options(&self, dev: DeviceRef, name: &str) -> Result<Vec<EnumOption>> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        let options = device
            .enum_options
            .get(name)
            .ok_or_else(|| Error::NotSupported(name.into()))?;
        Ok(options
            .iter()
            .map(|name| EnumOption {
                name: name.to_string(),
                available: true,
            })
            .collect())
    }

    fn feature_bool(&self, dev: DeviceRef, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        match device.features.get(name) {
            Some(FeatureValue::Bool(value)) => Ok(*value),
            Some(_) => Err(Error::Transport(format!("feature {} is not a boolean", name))),
            None => Err(Error::NotSupported(name.into())),
        }
    }

    fn set_feature_bool(&self, dev: DeviceRef, name: &str, value: bool) -> Result<()> {
        let mut state = self.state.lock();
        let device = device_entry(&mut state, dev)?;
        let key = match device.features.get_key_value(name) {
            Some((key, FeatureValue::Bool(_))) => *key,
            Some(_) => {
                return Err(Error::Transport(format!("feature {} is not a boolean", name)))
            }
            None => return Err(Error::NotSupported(name.into())),
        };
        device.features.insert(key, FeatureValue::Bool(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_is_idempotent() {
        let transport = SimTransport::new();
        transport.startup(None).unwrap();
        transport.startup(None).unwrap();
        assert!(transport.enumerate_devices().unwrap().is_empty());
    }

    #[test]
    fn payload_follows_geometry_and_format() {
        let transport = SimTransport::new();
        transport.add_device("CAM");
        transport.startup(None).unwrap();
        let dev = transport.open_device("CAM", AccessMode::EXCLUSIVE).unwrap();
        transport.set_feature_int(dev, "Width", 64).unwrap();
        transport.set_feature_int(dev, "Height", 64).unwrap();
        assert_eq!(transport.payload_size(dev).unwrap(), 64 * 64);
        transport.set_feature_enum(dev, "PixelFormat", "RGB8").unwrap();
        assert_eq!(transport.payload_size(dev).unwrap(), 64 * 64 * 3);
    }

    #[test]
    fn operations_require_startup() {
        let transport = SimTransport::new();
        transport.add_device("CAM");
        assert!(matches!(
            transport.enumerate_devices(),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            transport.open_device("CAM", AccessMode::FULL),
            Err(Error::NotInitialized)
        ));
    }
}
