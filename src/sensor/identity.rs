use crate::error::{Result, SensorError};
use serde::Serialize;
use std::fmt;

/// Longest port identity the hardware layer hands out, in UTF-16 units
pub const MAX_PORT_ID_LENGTH: usize = 250;

/// Identifies one physical sensor port. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(SensorError::InvalidIdentity {
                details: "port id is empty".to_string(),
            });
        }

        let units = id.encode_utf16().count();
        if units > MAX_PORT_ID_LENGTH {
            return Err(SensorError::InvalidIdentity {
                details: format!(
                    "port id is {} units long, limit is {}",
                    units, MAX_PORT_ID_LENGTH
                ),
            });
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a sensor slot owned by a
/// [`SensorRegistry`](super::SensorRegistry).
///
/// A handle stays valid after close and is handed out again when the same
/// port is re-opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SensorHandle(u32);

impl SensorHandle {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor#{}", self.0)
    }
}
