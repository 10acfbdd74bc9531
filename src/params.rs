//! Parameter accessors: thin pass-throughs to the transport's named-feature
//! interface, following the get / get-range / get-list / set pattern.

use crate::device::Camera;
use crate::error::{Error, Result};
use crate::transport::EnumOption;

/// Inclusive numeric range of a feature, with optional increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRange<T> {
    pub min: T,
    pub max: T,
    pub step: Option<T>,
}

impl Camera {
    // Low-level named-feature accessors. The typed accessors below are
    // built on these.

    pub fn feature_int(&self, name: &str) -> Result<i64> {
        self.transport.feature_int(self.dev, name)
    }

    pub fn set_feature_int(&mut self, name: &str, value: i64) -> Result<()> {
        self.transport.set_feature_int(self.dev, name, value)
    }

    pub fn feature_int_range(&self, name: &str) -> Result<FeatureRange<i64>> {
        let (min, max, step) = self.transport.feature_int_range(self.dev, name)?;
        Ok(FeatureRange {
            min,
            max,
            step: (step > 0).then_some(step),
        })
    }

    pub fn feature_int_values(&self, name: &str) -> Result<Vec<i64>> {
        self.transport.feature_int_values(self.dev, name)
    }

    pub fn feature_float(&self, name: &str) -> Result<f64> {
        self.transport.feature_float(self.dev, name)
    }

    pub fn set_feature_float(&mut self, name: &str, value: f64) -> Result<()> {
        self.transport.set_feature_float(self.dev, name, value)
    }

    pub fn feature_float_range(&self, name: &str) -> Result<FeatureRange<f64>> {
        let (min, max, step) = self.transport.feature_float_range(self.dev, name)?;
        Ok(FeatureRange { min, max, step })
    }

    pub fn feature_enum(&self, name: &str) -> Result<String> {
        self.transport.feature_enum(self.dev, name)
    }

    pub fn set_feature_enum(&mut self, name: &str, value: &str) -> Result<()> {
        self.transport.set_feature_enum(self.dev, name, value)
    }

    pub fn feature_enum_options(&self, name: &str) -> Result<Vec<EnumOption>> {
        self.transport.feature_enum_options(self.dev, name)
    }

    pub fn feature_bool(&self, name: &str) -> Result<bool> {
        self.transport.feature_bool(self.dev, name)
    }

    pub fn set_feature_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.transport.set_feature_bool(self.dev, name, value)
    }

    // Image geometry

    /// Image size (width, height) after binning.
    pub fn image_size(&self) -> Result<(i64, i64)> {
        Ok((self.feature_int("Width")?, self.feature_int("Height")?))
    }

    /// Set the image size. Requires idle capture; reallocates the frame
    /// buffers when the payload size changes.
    pub fn set_image_size(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::BadParameter("image dimensions must be non-zero"));
        }
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        self.set_feature_int("Width", i64::from(width))?;
        self.set_feature_int("Height", i64::from(height))?;
        self.reconcile_buffers()
    }

    /// Image offset (x, y), applied after binning.
    pub fn image_offset(&self) -> Result<(i64, i64)> {
        Ok((self.feature_int("OffsetX")?, self.feature_int("OffsetY")?))
    }

    pub fn set_image_offset(&mut self, x: u32, y: u32) -> Result<()> {
        self.set_feature_int("OffsetX", i64::from(x))?;
        self.set_feature_int("OffsetY", i64::from(y))
    }

    pub fn sensor_size(&self) -> Result<(i64, i64)> {
        Ok((
            self.feature_int("SensorWidth")?,
            self.feature_int("SensorHeight")?,
        ))
    }

    // Binning

    /// The binning factor shared by both axes.
    ///
    /// The two axes always move together for this device family; a
    /// divergent pair read back is an internal fault.
    pub fn binning_factor(&self) -> Result<i64> {
        let horizontal = self.feature_int("BinningHorizontal")?;
        let vertical = self.feature_int("BinningVertical")?;
        if horizontal != vertical {
            return Err(Error::InternalFault(format!(
                "binning axes diverged ({} horizontal, {} vertical)",
                horizontal, vertical
            )));
        }
        Ok(horizontal)
    }

    /// Set the binning factor on both axes. Requires idle capture;
    /// reallocates the frame buffers when the payload size changes.
    pub fn set_binning_factor(&mut self, factor: u32) -> Result<()> {
        if factor == 0 {
            return Err(Error::BadParameter("binning factor must be non-zero"));
        }
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        self.set_feature_int("BinningHorizontal", i64::from(factor))?;
        self.set_feature_int("BinningVertical", i64::from(factor))?;
        self.reconcile_buffers()
    }

    /// Binning mode ("Sum" or "Average").
    pub fn binning_mode(&self) -> Result<String> {
        self.feature_enum("BinningHorizontalMode")
    }

    pub fn set_binning_mode(&mut self, mode: &str) -> Result<()> {
        self.set_feature_enum("BinningHorizontalMode", mode)?;
        self.set_feature_enum("BinningVerticalMode", mode)
    }

    // Pixel format and bit depth

    pub fn pixel_format(&self) -> Result<String> {
        self.feature_enum("PixelFormat")
    }

    /// Set the pixel format. Requires idle capture; reallocates the frame
    /// buffers when the payload size changes.
    pub fn set_pixel_format(&mut self, format: &str) -> Result<()> {
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        self.set_feature_enum("PixelFormat", format)?;
        self.reconcile_buffers()
    }

    pub fn pixel_format_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("PixelFormat")
    }

    pub fn sensor_bit_depth(&self) -> Result<String> {
        self.feature_enum("SensorBitDepth")
    }

    pub fn set_sensor_bit_depth(&mut self, depth: &str) -> Result<()> {
        if self.state.is_streaming() {
            return Err(Error::Busy);
        }
        self.set_feature_enum("SensorBitDepth", depth)
    }

    pub fn sensor_bit_depth_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("SensorBitDepth")
    }

    // Image flip

    pub fn image_flip(&self) -> Result<(bool, bool)> {
        Ok((
            self.feature_bool("ReverseX")?,
            self.feature_bool("ReverseY")?,
        ))
    }

    pub fn set_image_flip(&mut self, flip_x: bool, flip_y: bool) -> Result<()> {
        self.set_feature_bool("ReverseX", flip_x)?;
        self.set_feature_bool("ReverseY", flip_y)
    }

    // Exposure

    /// Exposure time in microseconds.
    pub fn exposure_us(&self) -> Result<f64> {
        self.feature_float("ExposureTime")
    }

    pub fn set_exposure_us(&mut self, value: f64) -> Result<()> {
        if value <= 0.0 {
            return Err(Error::InvalidValue(format!(
                "exposure must be positive, got {}",
                value
            )));
        }
        self.set_feature_float("ExposureTime", value)
    }

    pub fn exposure_range_us(&self) -> Result<FeatureRange<f64>> {
        self.feature_float_range("ExposureTime")
    }

    // Gain

    pub fn gain(&self) -> Result<f64> {
        self.feature_float("Gain")
    }

    pub fn set_gain(&mut self, value: f64) -> Result<()> {
        if value <= 0.0 {
            return Err(Error::InvalidValue(format!(
                "gain must be positive, got {}",
                value
            )));
        }
        self.set_feature_float("Gain", value)
    }

    pub fn gain_range(&self) -> Result<FeatureRange<f64>> {
        self.feature_float_range("Gain")
    }

    // Frame rate

    pub fn framerate(&self) -> Result<f64> {
        self.feature_float("AcquisitionFrameRate")
    }

    /// Set the frame rate in Hz. Automatic frame rate control must be off.
    pub fn set_framerate(&mut self, framerate: f64) -> Result<()> {
        if framerate <= 0.0 {
            return Err(Error::InvalidValue(format!(
                "framerate must be positive, got {}",
                framerate
            )));
        }
        self.set_feature_float("AcquisitionFrameRate", framerate)
    }

    pub fn framerate_range(&self) -> Result<FeatureRange<f64>> {
        self.feature_float_range("AcquisitionFrameRate")
    }

    pub fn framerate_auto(&self) -> Result<bool> {
        self.feature_bool("AcquisitionFrameRateEnable")
    }

    pub fn set_framerate_auto(&mut self, auto: bool) -> Result<()> {
        self.set_feature_bool("AcquisitionFrameRateEnable", auto)
    }

    // Temperature

    /// Temperature of the selected source in degrees Celsius.
    pub fn temperature(&self) -> Result<f64> {
        self.feature_float("DeviceTemperature")
    }

    pub fn temperature_source(&self) -> Result<String> {
        self.feature_enum("DeviceTemperatureSelector")
    }

    pub fn set_temperature_source(&mut self, source: &str) -> Result<()> {
        self.set_feature_enum("DeviceTemperatureSelector", source)
    }

    pub fn temperature_source_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("DeviceTemperatureSelector")
    }

    // Indicator LED

    pub fn indicator_mode(&self) -> Result<String> {
        self.feature_enum("DeviceIndicatorMode")
    }

    pub fn set_indicator_mode(&mut self, mode: &str) -> Result<()> {
        self.set_feature_enum("DeviceIndicatorMode", mode)
    }

    pub fn indicator_mode_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("DeviceIndicatorMode")
    }

    pub fn indicator_luma(&self) -> Result<i64> {
        self.feature_int("DeviceIndicatorLuminance")
    }

    pub fn set_indicator_luma(&mut self, luma: i64) -> Result<()> {
        self.set_feature_int("DeviceIndicatorLuminance", luma)
    }

    pub fn indicator_luma_range(&self) -> Result<FeatureRange<i64>> {
        self.feature_int_range("DeviceIndicatorLuminance")
    }

    // Trigger lines

    pub fn trigger_line_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("LineSelector")
    }

    /// The trigger line currently selected for configuration.
    pub fn trigger_line(&self) -> Result<String> {
        self.feature_enum("LineSelector")
    }

    pub fn set_trigger_line(&mut self, line: &str) -> Result<()> {
        self.set_feature_enum("LineSelector", line)
    }

    pub fn trigger_line_mode(&self) -> Result<String> {
        self.feature_enum("LineMode")
    }

    pub fn set_trigger_line_mode(&mut self, mode: &str) -> Result<()> {
        self.set_feature_enum("LineMode", mode)
    }

    pub fn trigger_line_mode_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("LineMode")
    }

    /// Source driving the selected line. The line must be in "Output" mode.
    pub fn trigger_line_source(&self) -> Result<String> {
        self.feature_enum("LineSource")
    }

    pub fn set_trigger_line_source(&mut self, source: &str) -> Result<()> {
        self.set_feature_enum("LineSource", source)
    }

    pub fn trigger_line_source_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("LineSource")
    }

    /// Whether the selected line's polarity is inverted.
    pub fn trigger_line_polarity(&self) -> Result<bool> {
        self.feature_bool("LineInverter")
    }

    pub fn set_trigger_line_polarity(&mut self, inverted: bool) -> Result<()> {
        self.set_feature_bool("LineInverter", inverted)
    }

    /// Debounce mode of the selected line. The line must be in "Input" mode.
    pub fn trigger_line_debounce_mode(&self) -> Result<String> {
        self.feature_enum("LineDebounceMode")
    }

    pub fn set_trigger_line_debounce_mode(&mut self, mode: &str) -> Result<()> {
        self.set_feature_enum("LineDebounceMode", mode)
    }

    pub fn trigger_line_debounce_mode_list(&self) -> Result<Vec<EnumOption>> {
        self.feature_enum_options("LineDebounceMode")
    }

    pub fn trigger_line_debounce_time(&self) -> Result<f64> {
        self.feature_float("LineDebounceDuration")
    }

    pub fn set_trigger_line_debounce_time(&mut self, time: f64) -> Result<()> {
        self.set_feature_float("LineDebounceDuration", time)
    }

    pub fn trigger_line_debounce_time_range(&self) -> Result<FeatureRange<f64>> {
        self.feature_float_range("LineDebounceDuration")
    }

    // Link

    /// Link throughput limit in bytes per second.
    pub fn throughput_limit(&self) -> Result<i64> {
        self.feature_int("DeviceLinkThroughputLimit")
    }

    pub fn set_throughput_limit(&mut self, limit: i64) -> Result<()> {
        self.set_feature_int("DeviceLinkThroughputLimit", limit)
    }

    pub fn throughput_limit_range(&self) -> Result<FeatureRange<i64>> {
        self.feature_int_range("DeviceLinkThroughputLimit")
    }

    pub fn link_speed(&self) -> Result<i64> {
        self.feature_int("DeviceLinkSpeed")
    }
}
