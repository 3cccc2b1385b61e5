//! V2 client: the V1 client plus the five operations introduced in V2.

use std::ops::{Deref, DerefMut};

use crate::error::{ComposerError, Result};
use crate::protocol::{
    Arg, Display, Fence, NativeHandle, Opcode, PerFrameMetadataKey, PowerMode, ProtocolVersion,
    ReadbackAttributes,
};
use crate::reply::ReplyValue;
use crate::transport::ServiceConnection;

use super::results::Ticket;
use super::v1::{check_display, unexpected, ComposerClient};

/// V2 view over a V1 client.
///
/// Holds the V1 client by reference: both views share one batch, one
/// connection and one set of result slots, and every V1 method is reachable
/// through `Deref`.
pub struct ComposerClientV2<'a, C> {
    base: &'a mut ComposerClient<C>,
}

impl<'a, C: ServiceConnection> ComposerClientV2<'a, C> {
    /// Wrap `base`.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` if the connection speaks less than V2.
    pub fn new(base: &'a mut ComposerClient<C>) -> Result<Self> {
        let available = base.version();
        if available < ProtocolVersion::V2 {
            return Err(ComposerError::UnsupportedVersion {
                required: ProtocolVersion::V2,
                available,
            });
        }
        Ok(Self { base })
    }

    pub fn get_per_frame_metadata_keys(&mut self, display: Display) -> Result<Ticket> {
        check_display(display)?;
        self.base
            .enqueue(Opcode::GetPerFrameMetadataKeys, &[Arg::U64(display.0)])
    }

    /// Set any power mode, including `OnSuspend`.
    pub fn set_power_mode_2_2(&mut self, display: Display, mode: PowerMode) -> Result<Ticket> {
        check_display(display)?;
        self.base.enqueue(
            Opcode::SetPowerMode2_2,
            &[Arg::U64(display.0), Arg::I32(mode as i32)],
        )
    }

    pub fn set_readback_buffer(
        &mut self,
        display: Display,
        buffer: NativeHandle,
        release_fence: Option<Fence>,
    ) -> Result<Ticket> {
        check_display(display)?;
        self.base.enqueue(
            Opcode::SetReadbackBuffer,
            &[
                Arg::U64(display.0),
                Arg::Buffer(buffer),
                Arg::Fence(release_fence),
            ],
        )
    }

    pub fn get_readback_buffer_attributes(&mut self, display: Display) -> Result<Ticket> {
        check_display(display)?;
        self.base
            .enqueue(Opcode::GetReadbackBufferAttributes, &[Arg::U64(display.0)])
    }

    pub fn get_readback_buffer_fence(&mut self, display: Display) -> Result<Ticket> {
        check_display(display)?;
        self.base
            .enqueue(Opcode::GetReadbackBufferFence, &[Arg::U64(display.0)])
    }

    /// Keys returned by `get_per_frame_metadata_keys`.
    pub fn per_frame_metadata_keys(&self, ticket: &Ticket) -> Result<&[PerFrameMetadataKey]> {
        match self.base.value(ticket, Opcode::GetPerFrameMetadataKeys)? {
            ReplyValue::MetadataKeys(keys) => Ok(keys),
            other => Err(unexpected(ticket, other)),
        }
    }

    /// Attributes returned by `get_readback_buffer_attributes`.
    pub fn readback_buffer_attributes(&self, ticket: &Ticket) -> Result<ReadbackAttributes> {
        match self.base.value(ticket, Opcode::GetReadbackBufferAttributes)? {
            ReplyValue::ReadbackAttributes(attributes) => Ok(*attributes),
            other => Err(unexpected(ticket, other)),
        }
    }

    /// Fence returned by `get_readback_buffer_fence`.
    pub fn readback_buffer_fence(&self, ticket: &Ticket) -> Result<Fence> {
        match self.base.value(ticket, Opcode::GetReadbackBufferFence)? {
            ReplyValue::Fence(fence) => Ok(*fence),
            other => Err(unexpected(ticket, other)),
        }
    }
}

impl<C> Deref for ComposerClientV2<'_, C> {
    type Target = ComposerClient<C>;

    fn deref(&self) -> &Self::Target {
        self.base
    }
}

impl<C> DerefMut for ComposerClientV2<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::loopback::Loopback;
    use crate::protocol::{Dataspace, Layer, PixelFormat};

    const DISPLAY: Display = Display(1);

    #[test]
    fn test_requires_v2_connection() {
        let mut client = ComposerClient::new(Loopback::new(ProtocolVersion::V1));
        let err = ComposerClientV2::new(&mut client).err().unwrap();
        assert!(err.to_string().contains("requires V2, connection speaks V1"));
    }

    #[test]
    fn test_v1_methods_encode_identically() {
        let mut plain = ComposerClient::new(Loopback::new(ProtocolVersion::V2));
        plain.set_vsync_enabled(DISPLAY, true).unwrap();
        plain.set_layer_plane_alpha(DISPLAY, Layer(3), 0.5).unwrap();
        plain.validate_display(DISPLAY).unwrap();

        let mut layered = ComposerClient::new(Loopback::new(ProtocolVersion::V2));
        {
            let mut v2 = layered.v2().unwrap();
            v2.set_vsync_enabled(DISPLAY, true).unwrap();
            v2.set_layer_plane_alpha(DISPLAY, Layer(3), 0.5).unwrap();
            v2.validate_display(DISPLAY).unwrap();
        }

        assert_eq!(plain.encoded(), layered.encoded());
    }

    #[test]
    fn test_power_mode_2_2_accepts_on_suspend() {
        let mut client = ComposerClient::new(Loopback::new(ProtocolVersion::V2));
        let mut v2 = client.v2().unwrap();
        assert!(v2.set_power_mode(DISPLAY, PowerMode::OnSuspend).is_err());
        assert!(v2.set_power_mode_2_2(DISPLAY, PowerMode::OnSuspend).is_ok());
        assert_eq!(v2.pending(), 1);
    }

    #[tokio::test]
    async fn test_v2_round_trip() {
        let loopback = Loopback::new(ProtocolVersion::V2);
        let log = loopback.log.clone();
        let mut client = ComposerClient::new(loopback);
        let mut v2 = client.v2().unwrap();

        let readback = v2
            .set_readback_buffer(DISPLAY, NativeHandle(40), Some(Fence(41)))
            .unwrap();
        let keys = v2.get_per_frame_metadata_keys(DISPLAY).unwrap();
        let attributes = v2.get_readback_buffer_attributes(DISPLAY).unwrap();
        let fence = v2.get_readback_buffer_fence(DISPLAY).unwrap();
        let present = v2.present_display(DISPLAY).unwrap();

        let report = v2.execute().await.unwrap();
        assert_eq!(report.succeeded, 5);

        assert!(v2.status(&readback).is_ok());
        assert_eq!(
            v2.per_frame_metadata_keys(&keys).unwrap(),
            &[
                PerFrameMetadataKey::MaxLuminance,
                PerFrameMetadataKey::MinLuminance
            ]
        );
        assert_eq!(
            v2.readback_buffer_attributes(&attributes).unwrap(),
            ReadbackAttributes {
                format: PixelFormat(1),
                dataspace: Dataspace(0x8C20000),
            }
        );
        assert_eq!(v2.readback_buffer_fence(&fence).unwrap(), Fence(900 + 0x0205));
        assert_eq!(v2.present_fence(&present).unwrap(), Fence(900 + 0x010D));
        assert!(v2.readback_buffer_fence(&present).is_err());

        let log = log.lock().unwrap();
        let first = &log.batches[0][0];
        assert_eq!(first.opcode, Opcode::SetReadbackBuffer);
        assert_eq!(
            first.args,
            vec![
                Arg::U64(1),
                Arg::Buffer(NativeHandle(40)),
                Arg::Fence(Some(Fence(41)))
            ]
        );
        drop(log);

        // Both views read the same result slots.
        drop(v2);
        assert!(client.status(&readback).is_ok());
    }
}
