use crate::frame::ImageResolution;
use crate::stream::{
    ColorProfile, DepthProfile, InfraredProfile, SelectionMode, SkeletalConfig, SmoothingParams,
    StreamProfile,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DepthcamConfig {
    pub sensor: SensorConfig,
    pub color: ImageStreamConfig,
    pub depth: DepthStreamConfig,
    pub infrared: ImageStreamConfig,
    pub skeleton: SkeletonConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorConfig {
    /// Port to open; takes precedence over `index` when set
    pub port_id: Option<String>,

    /// Enumeration index to open when no port id is given
    #[serde(default = "default_sensor_index")]
    pub index: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ImageStreamConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_image_resolution")]
    pub resolution: ImageResolution,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DepthStreamConfig {
    #[serde(default = "default_depth_enabled")]
    pub enabled: bool,

    #[serde(default = "default_image_resolution")]
    pub resolution: ImageResolution,

    /// Favour the 400mm-3m range over the default 800mm-4m
    #[serde(default)]
    pub near_mode: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SkeletonConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Track the upper body only
    #[serde(default)]
    pub seated: bool,

    #[serde(default)]
    pub selection_mode: SelectionMode,

    pub smoothing: Option<SmoothingParams>,
}

impl SkeletonConfig {
    pub fn skeletal_config(&self) -> SkeletalConfig {
        SkeletalConfig {
            seated: self.seated,
            selection_mode: self.selection_mode,
            smoothing: self.smoothing,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// How often the binary polls for frames
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Frame rate of the simulated producer
    #[serde(default = "default_simulated_fps")]
    pub simulated_fps: u32,
}

impl DepthcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("depthcam.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment overrides use the `DEPTHCAM_` prefix and `__` between
    /// keys, e.g. `DEPTHCAM_DEPTH__NEAR_MODE=true`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("sensor.index", default_sensor_index() as i64)?
            .set_default("color.enabled", false)?
            .set_default("color.resolution", default_image_resolution().to_string())?
            .set_default("depth.enabled", default_depth_enabled())?
            .set_default("depth.resolution", default_image_resolution().to_string())?
            .set_default("depth.near_mode", false)?
            .set_default("infrared.enabled", false)?
            .set_default(
                "infrared.resolution",
                default_image_resolution().to_string(),
            )?
            .set_default("skeleton.enabled", false)?
            .set_default("skeleton.seated", false)?
            .set_default("skeleton.selection_mode", "Default")?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.poll_interval_ms",
                default_poll_interval_ms() as i64,
            )?
            .set_default("system.simulated_fps", default_simulated_fps() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("DEPTHCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: DepthcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_resolution::<ColorProfile>(self.color.enabled, self.color.resolution)?;
        check_resolution::<DepthProfile>(self.depth.enabled, self.depth.resolution)?;
        check_resolution::<InfraredProfile>(self.infrared.enabled, self.infrared.resolution)?;

        if let Some(smoothing) = &self.skeleton.smoothing {
            smoothing
                .validate()
                .map_err(|details| ConfigError::Message(format!("Skeleton {}", details)))?;
        }

        if let Some(port_id) = &self.sensor.port_id {
            if port_id.trim().is_empty() {
                return Err(ConfigError::Message(
                    "Sensor port_id must not be empty".to_string(),
                ));
            }
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.system.simulated_fps == 0 {
            return Err(ConfigError::Message(
                "Simulated fps must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_resolution<P: StreamProfile>(
    enabled: bool,
    resolution: ImageResolution,
) -> Result<(), ConfigError> {
    if enabled && !P::supported_resolutions().contains(&resolution) {
        return Err(ConfigError::Message(format!(
            "{} stream does not offer resolution {}",
            P::KIND,
            resolution
        )));
    }
    Ok(())
}

impl Default for DepthcamConfig {
    fn default() -> Self {
        Self {
            sensor: SensorConfig {
                port_id: None,
                index: default_sensor_index(),
            },
            color: ImageStreamConfig {
                enabled: false,
                resolution: default_image_resolution(),
            },
            depth: DepthStreamConfig {
                enabled: default_depth_enabled(),
                resolution: default_image_resolution(),
                near_mode: false,
            },
            infrared: ImageStreamConfig {
                enabled: false,
                resolution: default_image_resolution(),
            },
            skeleton: SkeletonConfig {
                enabled: false,
                seated: false,
                selection_mode: SelectionMode::Default,
                smoothing: None,
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                poll_interval_ms: default_poll_interval_ms(),
                simulated_fps: default_simulated_fps(),
            },
        }
    }
}

fn default_sensor_index() -> usize {
    0
}
fn default_image_resolution() -> ImageResolution {
    ImageResolution::Res640x480
}
fn default_depth_enabled() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_poll_interval_ms() -> u64 {
    33
}
fn default_simulated_fps() -> u32 {
    30
}
