use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{CameraError, Result};

/// Default RTSP port (RFC 2326 §3.2).
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// How RTP reaches the client after SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// RTP interleaved on the RTSP TCP connection.
    #[default]
    Tcp,
    /// RTP on a separate UDP port pair.
    Udp,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

impl FromStr for TransportMode {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(CameraError::InvalidConfig(format!(
                "unknown transport {other:?}, expected tcp or udp"
            ))),
        }
    }
}

/// Pinhole camera intrinsics, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeIntrinsics {
    pub width_px: u32,
    pub height_px: u32,
    /// Focal length along x.
    pub fx: f64,
    /// Focal length along y.
    pub fy: f64,
    /// Principal point x.
    pub ppx: f64,
    /// Principal point y.
    pub ppy: f64,
}

impl PinholeIntrinsics {
    pub fn validate(&self) -> Result<()> {
        if self.width_px == 0 || self.height_px == 0 {
            return Err(CameraError::InvalidConfig(format!(
                "intrinsics image size must be positive, got {}x{}",
                self.width_px, self.height_px
            )));
        }
        if !(self.fx > 0.0 && self.fy > 0.0) {
            return Err(CameraError::InvalidConfig(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        if !(self.ppx.is_finite() && self.ppy.is_finite()) {
            return Err(CameraError::InvalidConfig("principal point must be finite".into()));
        }
        Ok(())
    }
}

/// Brown–Conrady lens distortion coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BrownConrady {
    /// Radial coefficients.
    pub rk1: f64,
    pub rk2: f64,
    pub rk3: f64,
    /// Tangential coefficients.
    pub tp1: f64,
    pub tp2: f64,
}

impl BrownConrady {
    pub fn validate(&self) -> Result<()> {
        let all_finite = [self.rk1, self.rk2, self.rk3, self.tp1, self.tp2]
            .iter()
            .all(|c| c.is_finite());
        if !all_finite {
            return Err(CameraError::InvalidConfig(
                "distortion coefficients must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Camera configuration.
///
/// `address` is the only required field:
///
/// ```
/// use rtsp_camera::CameraConfig;
///
/// let config = CameraConfig {
///     address: "rtsp://192.168.1.20:554/stream1".to_string(),
///     rtp_passthrough: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// `rtsp://[user:pass@]host[:port]/path`. Credentials are used for
    /// Basic authentication.
    pub address: String,
    /// Re-packetize the H.264 stream for passthrough subscribers.
    pub rtp_passthrough: bool,
    pub transport: TransportMode,
    /// How long to wait for each RTSP response.
    pub request_timeout: Duration,
    /// Period of the connection health check.
    pub health_check_interval: Duration,
    pub intrinsic_parameters: Option<PinholeIntrinsics>,
    pub distortion_parameters: Option<BrownConrady>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            rtp_passthrough: false,
            transport: TransportMode::Tcp,
            request_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(5),
            intrinsic_parameters: None,
            distortion_parameters: None,
        }
    }
}

impl CameraConfig {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Check the address and calibration values.
    pub fn validate(&self) -> Result<()> {
        parse_address(&self.address)?;
        if self.request_timeout.is_zero() {
            return Err(CameraError::InvalidConfig("request timeout must be non-zero".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(CameraError::InvalidConfig(
                "health check interval must be non-zero".into(),
            ));
        }
        if let Some(intrinsics) = &self.intrinsic_parameters {
            intrinsics.validate()?;
        }
        if let Some(distortion) = &self.distortion_parameters {
            distortion.validate()?;
        }
        Ok(())
    }
}

/// Parse and check an `rtsp://` address.
pub fn parse_address(address: &str) -> Result<Url> {
    let invalid = |reason: &str| CameraError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(address).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "rtsp" {
        return Err(invalid("scheme must be rtsp"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}
