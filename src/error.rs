use crate::driver::native;
use crate::frame::ImageResolution;
use crate::sensor::SensorStatus;
use crate::stream::StreamKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("No sensor found for {what}")]
    NotFound { what: String },

    #[error("Unknown sensor handle {handle}")]
    InvalidHandle { handle: u32 },

    #[error("Invalid device identity: {details}")]
    InvalidIdentity { details: String },

    #[error("Sensor is not started (status: {status})")]
    InvalidState { status: SensorStatus },

    #[error("{stream} stream does not offer resolution {resolution}")]
    UnsupportedResolution {
        stream: StreamKind,
        resolution: ImageResolution,
    },

    #[error("Unsupported {stream} configuration: {details}")]
    UnsupportedConfig { stream: StreamKind, details: String },

    #[error("Buffer too small: {required} bytes required, {provided} provided")]
    BufferTooSmall { required: usize, provided: usize },

    #[error("{stream} stream is not enabled")]
    StreamNotEnabled { stream: StreamKind },

    #[error("No {stream} frame available")]
    NoFrameAvailable { stream: StreamKind },

    #[error("Driver error: {details}")]
    Driver { details: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl SensorError {
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn driver<S: Into<String>>(details: S) -> Self {
        Self::Driver {
            details: details.into(),
        }
    }

    pub fn unsupported_config<S: Into<String>>(stream: StreamKind, details: S) -> Self {
        Self::UnsupportedConfig {
            stream,
            details: details.into(),
        }
    }

    /// Errors caused by how the caller used the API rather than by the device.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SensorError::InvalidHandle { .. }
                | SensorError::InvalidIdentity { .. }
                | SensorError::UnsupportedResolution { .. }
                | SensorError::UnsupportedConfig { .. }
                | SensorError::BufferTooSmall { .. }
                | SensorError::StreamNotEnabled { .. }
                | SensorError::NoFrameAvailable { .. }
        )
    }

    /// Result code in the same family the native sensor runtime reports.
    pub fn code(&self) -> i32 {
        match self {
            SensorError::NotFound { .. } => native::E_NUI_DEVICE_NOT_CONNECTED,
            SensorError::InvalidHandle { .. } => native::E_HANDLE,
            SensorError::InvalidIdentity { .. } => native::E_INVALIDARG,
            SensorError::InvalidState { .. } => native::E_NUI_DEVICE_NOT_READY,
            SensorError::UnsupportedResolution { .. } => native::E_INVALIDARG,
            SensorError::UnsupportedConfig { .. } => native::E_INVALIDARG,
            SensorError::BufferTooSmall { .. } => native::E_INVALIDARG,
            SensorError::StreamNotEnabled { .. } => native::E_NUI_STREAM_NOT_ENABLED,
            SensorError::NoFrameAvailable { .. } => native::E_NUI_FRAME_NO_DATA,
            SensorError::Driver { .. } => native::E_FAIL,
            SensorError::Config(_) => native::E_FAIL,
        }
    }
}

/// Errors raised by the sensor event bus
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Receiver lagged behind by {count} events")]
    Lagged { count: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_error_classification() {
        let err = SensorError::BufferTooSmall {
            required: 10,
            provided: 5,
        };
        assert!(err.is_caller_error());

        let err = SensorError::InvalidState {
            status: SensorStatus::NotPowered,
        };
        assert!(!err.is_caller_error());
        assert!(!SensorError::not_found("index 3").is_caller_error());
    }

    #[test]
    fn test_error_codes_are_failures() {
        let errors = [
            SensorError::not_found("index 0"),
            SensorError::InvalidHandle { handle: 9 },
            SensorError::StreamNotEnabled {
                stream: StreamKind::Depth,
            },
            SensorError::NoFrameAvailable {
                stream: StreamKind::Color,
            },
            SensorError::driver("refused"),
        ];

        for err in errors {
            assert!(err.code() < 0, "{} should map to a failure code", err);
        }
    }

    #[test]
    fn test_error_messages() {
        let err = SensorError::BufferTooSmall {
            required: 614400,
            provided: 100,
        };
        assert_eq!(
            err.to_string(),
            "Buffer too small: 614400 bytes required, 100 provided"
        );

        let err = SensorError::UnsupportedResolution {
            stream: StreamKind::Infrared,
            resolution: ImageResolution::Res1280x960,
        };
        assert!(err.to_string().contains("1280x960"));
    }
}
