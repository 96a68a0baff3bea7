use std::{
    fs::File,
    io::{Read, Write},
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use crate::error::*;
use crate::utils::gen_team_ip;

/// Places we look for a config file when none is given on the command line
pub const CONFIG_PATHS: &[&str] = &["/etc/aruco-pose-publisher.toml", "./aruco-pose-publisher.toml"];

macro_rules! def_cfg {
    ($(
        $(#[$struct_attr:meta])*
        $struct_ident:ident {
            $(
            $(#[$attr:meta])*
            $ident:ident : $ty:ty ,
            )*
        }
    )*) => {
       $(
           #[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
           #[serde(default)]
           $(#[$struct_attr])*
           pub struct $struct_ident {
               $(
                $(#[$attr])*
                pub $ident: $ty,
               )*
           }
       )*
    };
}

def_cfg! {
    Config {
        /// Name of this node, used as the NT client identity and topic prefix
        node_name: String,
        /// Calibration file (OpenCV FileStorage YAML, or JSON)
        calibration: PathBuf,
        /// Default log filter, overridden by `RUST_LOG`
        log_filter: String,
        camera: CameraCfg,
        marker: MarkerCfg,
        detection: DetectionCfg,
        publish: PublishCfg,
        display: DisplayCfg,
    }
    CameraCfg {
        backend: CaptureBackend,
        /// Devices to probe, highest priority first
        candidates: Vec<String>,
        /// Frames to replay with the `images` backend
        images: Vec<PathBuf>,
        width: Option<u32>,
        height: Option<u32>,
    }
    MarkerCfg {
        /// Dictionary name, e.g. `DICT_6X6_100`
        dictionary: String,
        /// JSON dictionary used by the native detector
        dictionary_path: Option<PathBuf>,
        /// Side length of the marker's black square, in meters
        length: f64,
        detector: DetectorKind,
        selection: MarkerSelection,
        rotation: RotationConvention,
    }
    DetectionCfg {
        threshold: ThresholdMethod,
        /// Adaptive threshold window size in pixels (odd)
        adaptive_window: u32,
        /// Adaptive threshold offset subtracted from the local mean
        adaptive_offset: i32,
        min_marker_perimeter_rate: f64,
        max_marker_perimeter_rate: f64,
        /// Fraction of a dictionary's correction capacity we're willing to use
        error_correction_rate: f64,
        /// Fraction of border cells allowed to read white
        max_border_error_rate: f64,
        refine_corners: bool,
    }
    PublishCfg {
        transport: Transport,
        topic: String,
        frame_id: String,
        /// Outgoing queue size, in messages
        queue_size: usize,
        /// Explicit NT server address, takes precedence over `team_number`
        server: Option<String>,
        team_number: Option<u16>,
        port: u16,
        retained: bool,
    }
    DisplayCfg {
        enabled: bool,
        window: String,
        exit_key: char,
        /// Length of the drawn pose axes, in meters
        axis_length: f64,
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureBackend {
    Opencv,
    Gstreamer,
    /// Replay still images, mostly for testing without hardware
    Images,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// OpenCV if it's compiled in and no dictionary file is given, native otherwise
    Auto,
    Native,
    Opencv,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerSelection {
    /// Only the first marker in detection order
    First,
    All,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RotationConvention {
    /// Treat the rotation vector as axis * angle
    AxisAngle,
    /// Treat the rotation vector's components as roll, pitch and yaw
    EulerRpy,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdMethod {
    Adaptive,
    Otsu,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Networktables,
    /// Just log every message
    Log,
}

impl Config {
    /// Load the configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut f = File::open(path).context(FailedToReadConfigSnafu { path })?;
        let mut buf = String::new();
        f.read_to_string(&mut buf)
            .context(FailedToReadConfigSnafu { path })?;
        toml::from_str(&buf).context(InvalidConfigSnafu { path })
    }

    /// Save the configuration to the specified path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let toml_cfg = toml::to_string_pretty(&self).context(SerializeConfigSnafu)?;
        let mut f = File::create(path).context(FailedToWriteConfigSnafu { path })?;
        f.write_all(toml_cfg.as_bytes())
            .context(FailedToWriteConfigSnafu { path })?;
        f.flush().context(FailedToWriteConfigSnafu { path })?;

        Ok(())
    }

    /// Find and load the configuration
    ///
    /// An explicit path must exist and parse. Otherwise the first of [CONFIG_PATHS] that exists
    /// is used, and if there are none we fall back to the defaults.
    pub fn locate(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_owned())));
        }

        match CONFIG_PATHS.iter().map(Path::new).find(|path| path.exists()) {
            Some(path) => Ok((Self::load(path)?, Some(path.to_owned()))),
            None => Ok((Self::default(), None)),
        }
    }
}

impl PublishCfg {
    /// Resolve the NT server address
    ///
    /// An explicit `server` wins, then the team number's roboRIO address, then localhost.
    pub fn server_addr(&self) -> Result<IpAddr> {
        if let Some(server) = &self.server {
            return server.parse().map_err(|_| Error::InvalidServerAddress {
                address: server.clone(),
            });
        }

        match self.team_number {
            Some(team) => gen_team_ip(team)
                .map(IpAddr::from)
                .ok_or_else(|| Error::InvalidServerAddress {
                    address: format!("team {team}"),
                }),
            None => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "aruco_pose_publisher".to_owned(),
            calibration: PathBuf::from("calibration/calibration.yaml"),
            log_filter: "info".to_owned(),
            camera: CameraCfg::default(),
            marker: MarkerCfg::default(),
            detection: DetectionCfg::default(),
            publish: PublishCfg::default(),
            display: DisplayCfg::default(),
        }
    }
}
impl Default for CaptureBackend {
    /// Whichever camera backend was compiled in, OpenCV first
    fn default() -> Self {
        if cfg!(feature = "gstreamer") && !cfg!(feature = "opencv") {
            CaptureBackend::Gstreamer
        } else {
            CaptureBackend::Opencv
        }
    }
}

impl Default for CameraCfg {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            candidates: vec![
                "/dev/video2".to_owned(),
                "/dev/video1".to_owned(),
                "/dev/video0".to_owned(),
            ],
            images: Vec::new(),
            width: None,
            height: None,
        }
    }
}
impl Default for MarkerCfg {
    fn default() -> Self {
        Self {
            dictionary: "DICT_6X6_100".to_owned(),
            dictionary_path: None,
            length: 0.05,
            detector: DetectorKind::Auto,
            selection: MarkerSelection::First,
            rotation: RotationConvention::AxisAngle,
        }
    }
}
impl Default for DetectionCfg {
    fn default() -> Self {
        Self {
            threshold: ThresholdMethod::Adaptive,
            adaptive_window: 31,
            adaptive_offset: 7,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            error_correction_rate: 0.6,
            max_border_error_rate: 0.35,
            refine_corners: true,
        }
    }
}
impl Default for PublishCfg {
    fn default() -> Self {
        Self {
            transport: Transport::Networktables,
            topic: "marker_pose".to_owned(),
            frame_id: "aruco_marker".to_owned(),
            queue_size: 10,
            server: None,
            team_number: None,
            port: minint::DEFAULT_PORT,
            retained: false,
        }
    }
}
impl Default for DisplayCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            window: "ArucoDetection".to_owned(),
            exit_key: 'q',
            axis_length: 0.1,
        }
    }
}
