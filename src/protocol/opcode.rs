//! Closed opcode enumeration and the version that introduced each opcode.
//!
//! A version-N client supports the union of the capability sets of every
//! version up to N. Capability sets are derived from [`Opcode::introduced_in`]
//! so the two can never disagree.

use std::fmt;

/// Protocol version spoken by a connection or required by a client layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
}

impl ProtocolVersion {
    /// Highest version this crate implements.
    pub const LATEST: ProtocolVersion = ProtocolVersion::V2;

    /// Wire representation used during negotiation.
    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Map a peer's advertised version, clamping newer peers to [`Self::LATEST`].
    ///
    /// Returns `None` for 0, which no peer may advertise.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => None,
            1 => Some(ProtocolVersion::V1),
            _ => Some(ProtocolVersion::LATEST),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.as_u16())
    }
}

/// What the service sends back for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Fire-and-forget state update, no record in the reply.
    None,
    /// Status-only record.
    Status,
    /// Status followed by a `u32` on success.
    U32,
    /// Status followed by a `u64` on success.
    U64,
    /// Status followed by a fence handle index on success.
    Fence,
    /// Status followed by a pixel format and dataspace on success.
    ReadbackAttributes,
    /// Status followed by a list of per-frame metadata keys on success.
    MetadataKeys,
}

impl ReplyKind {
    /// Whether the operation contributes a record to the reply.
    #[inline]
    pub fn produces_record(self) -> bool {
        !matches!(self, ReplyKind::None)
    }
}

/// Composition operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // V1
    CreateLayer,
    DestroyLayer,
    GetActiveConfig,
    SetActiveConfig,
    SetPowerMode,
    SetVsyncEnabled,
    SetColorMode,
    SetClientTarget,
    SetLayerBuffer,
    SetLayerZOrder,
    SetLayerPlaneAlpha,
    ValidateDisplay,
    PresentDisplay,
    // V2
    GetPerFrameMetadataKeys,
    SetPowerMode2_2,
    SetReadbackBuffer,
    GetReadbackBufferAttributes,
    GetReadbackBufferFence,
}

impl Opcode {
    /// Every opcode, in wire order.
    pub const ALL: [Opcode; 18] = [
        Opcode::CreateLayer,
        Opcode::DestroyLayer,
        Opcode::GetActiveConfig,
        Opcode::SetActiveConfig,
        Opcode::SetPowerMode,
        Opcode::SetVsyncEnabled,
        Opcode::SetColorMode,
        Opcode::SetClientTarget,
        Opcode::SetLayerBuffer,
        Opcode::SetLayerZOrder,
        Opcode::SetLayerPlaneAlpha,
        Opcode::ValidateDisplay,
        Opcode::PresentDisplay,
        Opcode::GetPerFrameMetadataKeys,
        Opcode::SetPowerMode2_2,
        Opcode::SetReadbackBuffer,
        Opcode::GetReadbackBufferAttributes,
        Opcode::GetReadbackBufferFence,
    ];

    /// Wire value. The high byte is the introducing version.
    pub fn code(self) -> u16 {
        match self {
            Opcode::CreateLayer => 0x0101,
            Opcode::DestroyLayer => 0x0102,
            Opcode::GetActiveConfig => 0x0103,
            Opcode::SetActiveConfig => 0x0104,
            Opcode::SetPowerMode => 0x0105,
            Opcode::SetVsyncEnabled => 0x0106,
            Opcode::SetColorMode => 0x0107,
            Opcode::SetClientTarget => 0x0108,
            Opcode::SetLayerBuffer => 0x0109,
            Opcode::SetLayerZOrder => 0x010A,
            Opcode::SetLayerPlaneAlpha => 0x010B,
            Opcode::ValidateDisplay => 0x010C,
            Opcode::PresentDisplay => 0x010D,
            Opcode::GetPerFrameMetadataKeys => 0x0201,
            Opcode::SetPowerMode2_2 => 0x0202,
            Opcode::SetReadbackBuffer => 0x0203,
            Opcode::GetReadbackBufferAttributes => 0x0204,
            Opcode::GetReadbackBufferFence => 0x0205,
        }
    }

    /// Decode a wire value.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Protocol version that introduced this opcode.
    pub fn introduced_in(self) -> ProtocolVersion {
        match self {
            Opcode::GetPerFrameMetadataKeys
            | Opcode::SetPowerMode2_2
            | Opcode::SetReadbackBuffer
            | Opcode::GetReadbackBufferAttributes
            | Opcode::GetReadbackBufferFence => ProtocolVersion::V2,
            _ => ProtocolVersion::V1,
        }
    }

    /// Shape of the reply record for this opcode.
    pub fn reply_kind(self) -> ReplyKind {
        match self {
            Opcode::CreateLayer => ReplyKind::U64,
            Opcode::GetActiveConfig => ReplyKind::U32,
            Opcode::PresentDisplay | Opcode::GetReadbackBufferFence => ReplyKind::Fence,
            Opcode::GetReadbackBufferAttributes => ReplyKind::ReadbackAttributes,
            Opcode::GetPerFrameMetadataKeys => ReplyKind::MetadataKeys,
            Opcode::SetLayerZOrder | Opcode::SetLayerPlaneAlpha => ReplyKind::None,
            _ => ReplyKind::Status,
        }
    }

    /// Whether a connection at `version` understands this opcode.
    #[inline]
    pub fn supported_by(self, version: ProtocolVersion) -> bool {
        self.introduced_in() <= version
    }
}

/// Opcodes added by exactly `version`.
pub fn capability_set(version: ProtocolVersion) -> Vec<Opcode> {
    Opcode::ALL
        .iter()
        .copied()
        .filter(|op| op.introduced_in() == version)
        .collect()
}

/// Opcodes available at `version`: the union of every set up to it.
pub fn capabilities_up_to(version: ProtocolVersion) -> Vec<Opcode> {
    Opcode::ALL
        .iter()
        .copied()
        .filter(|op| op.supported_by(version))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_codes_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_code(op.code()), Some(op));
        }
        assert_eq!(Opcode::from_code(0), None);
        assert_eq!(Opcode::from_code(0x0300), None);
    }

    #[test]
    fn test_opcode_codes_unique() {
        let mut codes: Vec<u16> = Opcode::ALL.iter().map(|op| op.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), Opcode::ALL.len());
    }

    #[test]
    fn test_v2_adds_exactly_five() {
        let v2 = capability_set(ProtocolVersion::V2);
        assert_eq!(
            v2,
            vec![
                Opcode::GetPerFrameMetadataKeys,
                Opcode::SetPowerMode2_2,
                Opcode::SetReadbackBuffer,
                Opcode::GetReadbackBufferAttributes,
                Opcode::GetReadbackBufferFence,
            ]
        );
    }

    #[test]
    fn test_capabilities_are_cumulative() {
        let v1 = capabilities_up_to(ProtocolVersion::V1);
        let v2 = capabilities_up_to(ProtocolVersion::V2);
        assert!(v1.iter().all(|op| v2.contains(op)));
        assert_eq!(v2.len(), v1.len() + capability_set(ProtocolVersion::V2).len());
        assert!(!Opcode::SetReadbackBuffer.supported_by(ProtocolVersion::V1));
    }

    #[test]
    fn test_version_from_wire() {
        assert_eq!(ProtocolVersion::from_u16(0), None);
        assert_eq!(ProtocolVersion::from_u16(1), Some(ProtocolVersion::V1));
        assert_eq!(ProtocolVersion::from_u16(2), Some(ProtocolVersion::V2));
        assert_eq!(ProtocolVersion::from_u16(9), Some(ProtocolVersion::V2));
        assert_eq!(ProtocolVersion::V2.to_string(), "V2");
    }

    #[test]
    fn test_reply_kinds() {
        assert!(!Opcode::SetLayerZOrder.reply_kind().produces_record());
        assert!(Opcode::SetPowerMode.reply_kind().produces_record());
        assert_eq!(Opcode::PresentDisplay.reply_kind(), ReplyKind::Fence);
    }
}
