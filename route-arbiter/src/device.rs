//! Output devices, routes and call modes.
//!
//! Besides the strongly typed model this module decodes the raw device
//! identifiers that presence sources deliver (Android `AudioDeviceInfo` type
//! codes and lowercase names). Anything that does not map to one of the four
//! device kinds is rejected with [`RouteError::InvalidDeviceKind`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RouteError;

/// The four kinds of audio output a call can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Built-in receiver held to the ear (phones only)
    Earpiece,
    /// Built-in loudspeaker
    Speaker,
    /// Wired headset or headphones, including USB headsets
    WiredHeadset,
    /// Any Bluetooth audio device
    Bluetooth,
}

impl DeviceKind {
    /// All device kinds, in declaration order.
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::Earpiece,
        DeviceKind::Speaker,
        DeviceKind::WiredHeadset,
        DeviceKind::Bluetooth,
    ];

    /// Human readable name, as used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Earpiece => "earpiece",
            DeviceKind::Speaker => "speaker",
            DeviceKind::WiredHeadset => "wired headset",
            DeviceKind::Bluetooth => "bluetooth",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earpiece" | "receiver" => Ok(DeviceKind::Earpiece),
            "speaker" | "loudspeaker" | "speakerphone" => Ok(DeviceKind::Speaker),
            "wired_headset" | "wired headset" | "headset" | "headphones" => {
                Ok(DeviceKind::WiredHeadset)
            }
            "bluetooth" | "bt" => Ok(DeviceKind::Bluetooth),
            _ => Err(RouteError::InvalidDeviceKind(s.to_string())),
        }
    }
}

/// Bluetooth audio profile a device was announced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BluetoothProfile {
    /// Hands-free / headset profile carried over an SCO link
    Sco,
    /// Stereo media profile; never carries call voice
    A2dp,
    /// LE audio headset, speaker or broadcast sink
    Ble,
}

impl BluetoothProfile {
    /// Whether call voice can be routed over this profile.
    pub fn carries_voice(&self) -> bool {
        !matches!(self, BluetoothProfile::A2dp)
    }
}

impl fmt::Display for BluetoothProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BluetoothProfile::Sco => f.write_str("SCO"),
            BluetoothProfile::A2dp => f.write_str("A2DP"),
            BluetoothProfile::Ble => f.write_str("BLE"),
        }
    }
}

/// A device announced by the presence source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// What kind of output this is
    pub kind: DeviceKind,
    /// Bluetooth profile, only meaningful when `kind` is Bluetooth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<BluetoothProfile>,
}

impl Device {
    /// The built-in earpiece.
    pub const fn earpiece() -> Self {
        Self {
            kind: DeviceKind::Earpiece,
            profile: None,
        }
    }

    /// The built-in loudspeaker.
    pub const fn speaker() -> Self {
        Self {
            kind: DeviceKind::Speaker,
            profile: None,
        }
    }

    /// A wired headset.
    pub const fn wired_headset() -> Self {
        Self {
            kind: DeviceKind::WiredHeadset,
            profile: None,
        }
    }

    /// A Bluetooth device using the given profile.
    pub const fn bluetooth(profile: BluetoothProfile) -> Self {
        Self {
            kind: DeviceKind::Bluetooth,
            profile: Some(profile),
        }
    }

    /// Device for a kind with no profile information.
    ///
    /// Bluetooth without a profile is assumed to be a hands-free (SCO) device.
    pub fn from_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Bluetooth => Self::bluetooth(BluetoothProfile::Sco),
            kind => Self { kind, profile: None },
        }
    }

    /// Bluetooth profile, defaulting to SCO for Bluetooth devices.
    pub fn bluetooth_profile(&self) -> Option<BluetoothProfile> {
        match self.kind {
            DeviceKind::Bluetooth => Some(self.profile.unwrap_or(BluetoothProfile::Sco)),
            _ => None,
        }
    }

    /// Decode an Android `AudioDeviceInfo` type code.
    ///
    /// Only output types that can carry call audio are accepted; everything
    /// else (HDMI, line out, telephony, ...) is an invalid kind for routing.
    pub fn from_android_type(code: i32) -> Result<Self, RouteError> {
        match code {
            1 => Ok(Self::earpiece()),
            2 => Ok(Self::speaker()),
            // wired headset, wired headphones, USB headset
            3 | 4 | 22 => Ok(Self::wired_headset()),
            7 => Ok(Self::bluetooth(BluetoothProfile::Sco)),
            8 => Ok(Self::bluetooth(BluetoothProfile::A2dp)),
            // BLE headset, BLE speaker, BLE broadcast
            26 | 27 | 30 => Ok(Self::bluetooth(BluetoothProfile::Ble)),
            other => Err(RouteError::InvalidDeviceKind(format!("android device type {other}"))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bluetooth_profile() {
            Some(profile) => write!(f, "{} ({})", self.kind, profile),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for Device {
    type Err = RouteError;

    /// Parses `kind` or `bluetooth:<profile>` (e.g. `bluetooth:a2dp`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, profile)) => {
                let kind: DeviceKind = kind.parse()?;
                if kind != DeviceKind::Bluetooth {
                    return Err(RouteError::InvalidDeviceKind(s.to_string()));
                }
                let profile = match profile.trim().to_ascii_lowercase().as_str() {
                    "sco" | "hfp" => BluetoothProfile::Sco,
                    "a2dp" => BluetoothProfile::A2dp,
                    "ble" | "le" => BluetoothProfile::Ble,
                    _ => return Err(RouteError::InvalidDeviceKind(s.to_string())),
                };
                Ok(Self::bluetooth(profile))
            }
            None => Ok(Self::from_kind(s.parse()?)),
        }
    }
}

/// The active output route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// No call audio is routed (before a call or after teardown)
    #[default]
    Invalid,
    /// Built-in earpiece
    Earpiece,
    /// Built-in loudspeaker
    Speaker,
    /// Wired headset
    WiredHeadset,
    /// Bluetooth over an established SCO link
    Bluetooth,
}

impl Route {
    /// The device backing this route, `None` for [`Route::Invalid`].
    pub fn device(&self) -> Option<DeviceKind> {
        match self {
            Route::Invalid => None,
            Route::Earpiece => Some(DeviceKind::Earpiece),
            Route::Speaker => Some(DeviceKind::Speaker),
            Route::WiredHeadset => Some(DeviceKind::WiredHeadset),
            Route::Bluetooth => Some(DeviceKind::Bluetooth),
        }
    }

    /// Whether audio is routed at all.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Route::Invalid)
    }
}

impl From<DeviceKind> for Route {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Earpiece => Route::Earpiece,
            DeviceKind::Speaker => Route::Speaker,
            DeviceKind::WiredHeadset => Route::WiredHeadset,
            DeviceKind::Bluetooth => Route::Bluetooth,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device() {
            Some(kind) => kind.fmt(f),
            None => f.write_str("invalid"),
        }
    }
}

/// What kind of call is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// Audio call: the earpiece is preferred over the loudspeaker
    #[default]
    Voice,
    /// Video call: the loudspeaker is preferred over the earpiece
    Video,
}
