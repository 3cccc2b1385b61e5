//! Value types carried by composition operations.
//!
//! Identifiers and native resources are opaque newtypes: the crate never
//! interprets a buffer handle or a fence, it only relays them positionally.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Display identifier as handed out by the composition service (0 is invalid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Display(pub u64);

/// Layer identifier, unique within its display (0 is invalid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Layer(pub u64);

/// Display configuration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config(pub u32);

/// Opaque native buffer handle owned by the platform runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub u64);

/// Opaque sync fence owned by the platform runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fence(pub u64);

/// Entry of the out-of-band handle list that travels next to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleToken {
    Buffer(NativeHandle),
    Fence(Fence),
}

/// Display power mode.
///
/// `OnSuspend` was introduced with protocol V2 and is rejected by the
/// V1 `set_power_mode` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PowerMode {
    Off = 0,
    Doze = 1,
    On = 2,
    DozeSuspend = 3,
    OnSuspend = 4,
}

impl PowerMode {
    /// Whether the mode can be sent through the V1 operation.
    pub fn is_v1(self) -> bool {
        !matches!(self, PowerMode::OnSuspend)
    }

    /// Decode a wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PowerMode::Off),
            1 => Some(PowerMode::Doze),
            2 => Some(PowerMode::On),
            3 => Some(PowerMode::DozeSuspend),
            4 => Some(PowerMode::OnSuspend),
            _ => None,
        }
    }
}

/// Color mode as defined by the graphics common types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorMode(pub i32);

/// Pixel format as defined by the graphics common types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub i32);

/// Dataspace as defined by the graphics common types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dataspace(pub i32);

/// Format and dataspace the service will use for readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadbackAttributes {
    pub format: PixelFormat,
    pub dataspace: Dataspace,
}

/// HDR metadata keys a display accepts per frame.
///
/// Keys added by newer services decode as `Other` instead of failing the
/// reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PerFrameMetadataKey {
    DisplayRedPrimaryX,
    DisplayRedPrimaryY,
    DisplayGreenPrimaryX,
    DisplayGreenPrimaryY,
    DisplayBluePrimaryX,
    DisplayBluePrimaryY,
    WhitePointX,
    WhitePointY,
    MaxLuminance,
    MinLuminance,
    MaxContentLightLevel,
    MaxFrameAverageLightLevel,
    Other(i32),
}

impl PerFrameMetadataKey {
    const KNOWN: [PerFrameMetadataKey; 12] = [
        PerFrameMetadataKey::DisplayRedPrimaryX,
        PerFrameMetadataKey::DisplayRedPrimaryY,
        PerFrameMetadataKey::DisplayGreenPrimaryX,
        PerFrameMetadataKey::DisplayGreenPrimaryY,
        PerFrameMetadataKey::DisplayBluePrimaryX,
        PerFrameMetadataKey::DisplayBluePrimaryY,
        PerFrameMetadataKey::WhitePointX,
        PerFrameMetadataKey::WhitePointY,
        PerFrameMetadataKey::MaxLuminance,
        PerFrameMetadataKey::MinLuminance,
        PerFrameMetadataKey::MaxContentLightLevel,
        PerFrameMetadataKey::MaxFrameAverageLightLevel,
    ];

    /// Wire value.
    pub fn as_i32(self) -> i32 {
        match self {
            PerFrameMetadataKey::Other(v) => v,
            known => Self::KNOWN
                .iter()
                .position(|k| *k == known)
                .map_or(-1, |i| i as i32),
        }
    }

    /// Decode a wire value.
    pub fn from_i32(value: i32) -> Self {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::KNOWN.get(i).copied())
            .unwrap_or(PerFrameMetadataKey::Other(value))
    }
}

/// Per-operation error status reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadConfig,
    BadDisplay,
    BadLayer,
    BadParameter,
    NoResources,
    NotValidated,
    Unsupported,
    /// Status value outside the known set.
    Other(i32),
}

impl ErrorCode {
    /// Wire status for this error (never 0).
    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::BadConfig => 1,
            ErrorCode::BadDisplay => 2,
            ErrorCode::BadLayer => 3,
            ErrorCode::BadParameter => 4,
            ErrorCode::NoResources => 6,
            ErrorCode::NotValidated => 7,
            ErrorCode::Unsupported => 8,
            ErrorCode::Other(v) => v,
        }
    }

    /// Map a non-zero wire status.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ErrorCode::BadConfig,
            2 => ErrorCode::BadDisplay,
            3 => ErrorCode::BadLayer,
            4 => ErrorCode::BadParameter,
            6 => ErrorCode::NoResources,
            7 => ErrorCode::NotValidated,
            8 => ErrorCode::Unsupported,
            other => ErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BadConfig => f.write_str("BAD_CONFIG"),
            ErrorCode::BadDisplay => f.write_str("BAD_DISPLAY"),
            ErrorCode::BadLayer => f.write_str("BAD_LAYER"),
            ErrorCode::BadParameter => f.write_str("BAD_PARAMETER"),
            ErrorCode::NoResources => f.write_str("NO_RESOURCES"),
            ErrorCode::NotValidated => f.write_str("NOT_VALIDATED"),
            ErrorCode::Unsupported => f.write_str("UNSUPPORTED"),
            ErrorCode::Other(v) => write!(f, "status {}", v),
        }
    }
}
