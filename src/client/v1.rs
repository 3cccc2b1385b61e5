//! V1 client: the basic composition operation set.

use std::collections::{BTreeMap, BTreeSet};

use crate::command::CommandWriter;
use crate::error::{ComposerError, Result};
use crate::executor::{BatchExecutor, BatchReport, Outcome};
use crate::protocol::{
    Arg, ColorMode, Config, Dataspace, Display, Fence, Layer, NativeHandle, Opcode, PowerMode,
    ProtocolVersion,
};
use crate::reply::ReplyValue;
use crate::transport::ServiceConnection;

use super::config::{ClientBuilder, ClientConfig};
use super::results::{ResultTable, Ticket, TicketState};
use super::v2::ComposerClientV2;

/// Layer bookkeeping waiting on the outcome of the current batch.
#[derive(Debug, Clone, Copy)]
enum LayerChange {
    Create(Display),
    Destroy(Display, Layer),
}

/// Batching client for the V1 operation set.
///
/// Operations are appended to an in-memory batch and only reach the service
/// on [`execute`](Self::execute). Each method returns a [`Ticket`] that reads
/// the operation's result once the batch has executed.
pub struct ComposerClient<C> {
    writer: CommandWriter,
    executor: BatchExecutor<C>,
    results: ResultTable,
    /// Layers created through this client and not yet destroyed.
    layers: BTreeMap<Display, BTreeSet<Layer>>,
    /// Batch position and layer effect of pending create/destroy operations.
    layer_changes: Vec<(usize, LayerChange)>,
}

impl<C: ServiceConnection> ComposerClient<C> {
    /// Create a client with default settings.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, ClientConfig::default())
    }

    /// Create a client with explicit settings.
    pub fn with_config(connection: C, config: ClientConfig) -> Self {
        Self {
            writer: CommandWriter::new(config.limits),
            executor: BatchExecutor::new(connection, config.timeout),
            results: ResultTable::new(),
            layers: BTreeMap::new(),
            layer_changes: Vec::new(),
        }
    }

    /// Create a builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Protocol version of the connection.
    #[inline]
    pub fn version(&self) -> ProtocolVersion {
        self.executor.version()
    }

    /// Borrow this client with the V2 operation set.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` if the connection speaks V1 only.
    pub fn v2(&mut self) -> Result<ComposerClientV2<'_, C>> {
        ComposerClientV2::new(self)
    }

    /// Number of operations waiting in the current batch.
    #[inline]
    pub fn pending(&self) -> usize {
        self.writer.len()
    }

    /// Encoded bytes of the current batch.
    #[inline]
    pub fn encoded(&self) -> &[u8] {
        self.writer.as_bytes()
    }

    /// Layers created through this client that are still alive.
    pub fn layers(&self, display: Display) -> impl Iterator<Item = Layer> + '_ {
        self.layers.get(&display).into_iter().flatten().copied()
    }

    pub(crate) fn enqueue(&mut self, opcode: Opcode, args: &[Arg]) -> Result<Ticket> {
        let version = self.version();
        if !opcode.supported_by(version) {
            return Err(ComposerError::UnsupportedVersion {
                required: opcode.introduced_in(),
                available: version,
            });
        }
        let index = self.writer.append(opcode, args)?;
        Ok(self.results.enqueue(index, opcode))
    }

    // ------------------------------------------------------------------
    // V1 operations
    // ------------------------------------------------------------------

    /// Create a layer with `buffer_slot_count` buffer slots.
    pub fn create_layer(&mut self, display: Display, buffer_slot_count: u32) -> Result<Ticket> {
        check_display(display)?;
        if buffer_slot_count == 0 {
            return Err(ComposerError::InvalidArgument(
                "buffer slot count must be non-zero".to_string(),
            ));
        }
        let ticket = self.enqueue(
            Opcode::CreateLayer,
            &[Arg::U64(display.0), Arg::U32(buffer_slot_count)],
        )?;
        self.layer_changes
            .push((ticket.index(), LayerChange::Create(display)));
        Ok(ticket)
    }

    pub fn destroy_layer(&mut self, display: Display, layer: Layer) -> Result<Ticket> {
        check_display(display)?;
        check_layer(layer)?;
        let ticket = self.enqueue(
            Opcode::DestroyLayer,
            &[Arg::U64(display.0), Arg::U64(layer.0)],
        )?;
        self.layer_changes
            .push((ticket.index(), LayerChange::Destroy(display, layer)));
        Ok(ticket)
    }

    pub fn get_active_config(&mut self, display: Display) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(Opcode::GetActiveConfig, &[Arg::U64(display.0)])
    }

    pub fn set_active_config(&mut self, display: Display, config: Config) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(
            Opcode::SetActiveConfig,
            &[Arg::U64(display.0), Arg::U32(config.0)],
        )
    }

    /// Set the power mode. `OnSuspend` needs the V2 variant.
    pub fn set_power_mode(&mut self, display: Display, mode: PowerMode) -> Result<Ticket> {
        check_display(display)?;
        if !mode.is_v1() {
            return Err(ComposerError::InvalidArgument(format!(
                "{:?} is not a V1 power mode",
                mode
            )));
        }
        self.enqueue(
            Opcode::SetPowerMode,
            &[Arg::U64(display.0), Arg::I32(mode as i32)],
        )
    }

    pub fn set_vsync_enabled(&mut self, display: Display, enabled: bool) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(
            Opcode::SetVsyncEnabled,
            &[Arg::U64(display.0), Arg::Bool(enabled)],
        )
    }

    pub fn set_color_mode(&mut self, display: Display, mode: ColorMode) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(
            Opcode::SetColorMode,
            &[Arg::U64(display.0), Arg::I32(mode.0)],
        )
    }

    /// Set the buffer the client composes into.
    pub fn set_client_target(
        &mut self,
        display: Display,
        target: NativeHandle,
        acquire_fence: Option<Fence>,
        dataspace: Dataspace,
    ) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(
            Opcode::SetClientTarget,
            &[
                Arg::U64(display.0),
                Arg::Buffer(target),
                Arg::Fence(acquire_fence),
                Arg::I32(dataspace.0),
            ],
        )
    }

    pub fn set_layer_buffer(
        &mut self,
        display: Display,
        layer: Layer,
        buffer: NativeHandle,
        acquire_fence: Option<Fence>,
    ) -> Result<Ticket> {
        check_display(display)?;
        check_layer(layer)?;
        self.enqueue(
            Opcode::SetLayerBuffer,
            &[
                Arg::U64(display.0),
                Arg::U64(layer.0),
                Arg::Buffer(buffer),
                Arg::Fence(acquire_fence),
            ],
        )
    }

    /// Fire-and-forget: the service sends no record back.
    pub fn set_layer_z_order(&mut self, display: Display, layer: Layer, z: u32) -> Result<Ticket> {
        check_display(display)?;
        check_layer(layer)?;
        self.enqueue(
            Opcode::SetLayerZOrder,
            &[Arg::U64(display.0), Arg::U64(layer.0), Arg::U32(z)],
        )
    }

    /// Fire-and-forget. `alpha` must lie in `[0, 1]`.
    pub fn set_layer_plane_alpha(
        &mut self,
        display: Display,
        layer: Layer,
        alpha: f32,
    ) -> Result<Ticket> {
        check_display(display)?;
        check_layer(layer)?;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ComposerError::InvalidArgument(format!(
                "plane alpha {} outside [0, 1]",
                alpha
            )));
        }
        self.enqueue(
            Opcode::SetLayerPlaneAlpha,
            &[Arg::U64(display.0), Arg::U64(layer.0), Arg::F32(alpha)],
        )
    }

    pub fn validate_display(&mut self, display: Display) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(Opcode::ValidateDisplay, &[Arg::U64(display.0)])
    }

    pub fn present_display(&mut self, display: Display) -> Result<Ticket> {
        check_display(display)?;
        self.enqueue(Opcode::PresentDisplay, &[Arg::U64(display.0)])
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Send the current batch and bind every ticket in it.
    ///
    /// The batch is flushed before anything is sent, so the client is empty
    /// afterwards whatever the outcome. An empty batch returns an empty report
    /// and leaves the results of the previous batch readable.
    ///
    /// # Errors
    ///
    /// `TransportFailure` or `MalformedReply`; every ticket of the batch then
    /// reads as [`Outcome::Unknown`].
    pub async fn execute(&mut self) -> Result<BatchReport> {
        let batch = self.writer.flush();
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        // Tickets read Unknown until the reply binds, even if this future
        // is dropped.
        let changes = std::mem::take(&mut self.layer_changes);
        let generation = self.results.commit_unknown();

        let executed = self.executor.execute(batch).await?;
        self.apply_layer_changes(&changes, &executed.outcomes);
        self.results.bind(generation, executed.outcomes);
        Ok(executed.report)
    }

    /// Drop the current batch without sending it.
    pub fn discard(&mut self) {
        self.writer.reset();
        self.results.discard();
        self.layer_changes.clear();
    }

    /// Destroy every layer this client still tracks.
    ///
    /// Anything already enqueued goes out with the first batch, and layers
    /// with a destroy already enqueued are not destroyed twice. Batches are
    /// split when the configured limits are reached.
    pub async fn teardown(&mut self) -> Result<Vec<BatchReport>> {
        let queued: BTreeSet<(Display, Layer)> = self
            .layer_changes
            .iter()
            .filter_map(|(_, change)| match change {
                LayerChange::Destroy(display, layer) => Some((*display, *layer)),
                LayerChange::Create(_) => None,
            })
            .collect();
        let doomed: Vec<(Display, Layer)> = self
            .layers
            .iter()
            .flat_map(|(display, layers)| layers.iter().map(move |layer| (*display, *layer)))
            .filter(|entry| !queued.contains(entry))
            .collect();

        let mut reports = Vec::new();
        for (display, layer) in doomed {
            match self.destroy_layer(display, layer) {
                Ok(_) => {}
                Err(ComposerError::EncodingOverflow(_)) if self.pending() > 0 => {
                    reports.push(self.execute().await?);
                    self.destroy_layer(display, layer)?;
                }
                Err(e) => return Err(e),
            }
        }
        if self.pending() > 0 {
            reports.push(self.execute().await?);
        }
        tracing::debug!("Teardown finished in {} batches", reports.len());
        Ok(reports)
    }

    fn apply_layer_changes(&mut self, changes: &[(usize, LayerChange)], outcomes: &[Outcome]) {
        for (index, change) in changes {
            match (change, outcomes.get(*index)) {
                (LayerChange::Create(display), Some(Outcome::Succeeded(ReplyValue::U64(id)))) => {
                    self.layers.entry(*display).or_default().insert(Layer(*id));
                }
                (LayerChange::Destroy(display, layer), Some(Outcome::Succeeded(_))) => {
                    if let Some(layers) = self.layers.get_mut(display) {
                        layers.remove(layer);
                        if layers.is_empty() {
                            self.layers.remove(display);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Lifecycle state of a ticket.
    pub fn ticket_state(&self, ticket: &Ticket) -> TicketState {
        self.results.state(ticket)
    }

    /// Raw outcome of an executed ticket.
    pub fn outcome(&self, ticket: &Ticket) -> Result<&Outcome> {
        self.results.outcome(ticket)
    }

    /// Status of any executed operation.
    ///
    /// `Ok(())` for success, including fire-and-forget delivery.
    pub fn status(&self, ticket: &Ticket) -> Result<()> {
        match self.outcome(ticket)? {
            Outcome::Succeeded(_) | Outcome::Delivered => Ok(()),
            Outcome::Failed(code) => Err(ComposerError::OperationFailed {
                opcode: ticket.opcode(),
                code: *code,
            }),
            Outcome::Unknown => Err(ComposerError::OutcomeUnknown),
        }
    }

    /// Layer returned by `create_layer`.
    pub fn layer(&self, ticket: &Ticket) -> Result<Layer> {
        match self.value(ticket, Opcode::CreateLayer)? {
            ReplyValue::U64(id) => Ok(Layer(*id)),
            other => Err(unexpected(ticket, other)),
        }
    }

    /// Config returned by `get_active_config`.
    pub fn active_config(&self, ticket: &Ticket) -> Result<Config> {
        match self.value(ticket, Opcode::GetActiveConfig)? {
            ReplyValue::U32(config) => Ok(Config(*config)),
            other => Err(unexpected(ticket, other)),
        }
    }

    /// Release fence returned by `present_display`.
    pub fn present_fence(&self, ticket: &Ticket) -> Result<Fence> {
        match self.value(ticket, Opcode::PresentDisplay)? {
            ReplyValue::Fence(fence) => Ok(*fence),
            other => Err(unexpected(ticket, other)),
        }
    }

    /// Success value of a ticket issued for `opcode`.
    pub(crate) fn value(&self, ticket: &Ticket, opcode: Opcode) -> Result<&ReplyValue> {
        if ticket.opcode() != opcode {
            return Err(ComposerError::ResultNotAvailable(format!(
                "ticket is for {:?}, not {:?}",
                ticket.opcode(),
                opcode
            )));
        }
        match self.outcome(ticket)? {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(code) => Err(ComposerError::OperationFailed {
                opcode,
                code: *code,
            }),
            Outcome::Unknown => Err(ComposerError::OutcomeUnknown),
            Outcome::Delivered => Err(ComposerError::ResultNotAvailable(format!(
                "{:?} returns no value",
                opcode
            ))),
        }
    }
}

pub(crate) fn check_display(display: Display) -> Result<()> {
    if display.0 == 0 {
        return Err(ComposerError::InvalidArgument(
            "display id must be non-zero".to_string(),
        ));
    }
    Ok(())
}

fn check_layer(layer: Layer) -> Result<()> {
    if layer.0 == 0 {
        return Err(ComposerError::InvalidArgument(
            "layer id must be non-zero".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn unexpected(ticket: &Ticket, value: &ReplyValue) -> ComposerError {
    ComposerError::MalformedReply(format!(
        "{:?} bound to a {:?} value",
        ticket.opcode(),
        value.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::loopback::{Loopback, BAD_DISPLAY};
    use crate::protocol::ErrorCode;
    use std::time::Duration;

    const DISPLAY: Display = Display(1);

    fn client() -> ComposerClient<Loopback> {
        ComposerClient::new(Loopback::new(ProtocolVersion::V1))
    }

    #[test]
    fn test_validation_rejects_without_enqueuing() {
        let mut client = client();
        assert!(matches!(
            client.validate_display(Display(0)),
            Err(ComposerError::InvalidArgument(_))
        ));
        assert!(client.create_layer(DISPLAY, 0).is_err());
        assert!(client.destroy_layer(DISPLAY, Layer(0)).is_err());
        assert!(client.set_layer_plane_alpha(DISPLAY, Layer(2), 1.5).is_err());
        assert!(client
            .set_layer_plane_alpha(DISPLAY, Layer(2), f32::NAN)
            .is_err());
        assert!(client.set_power_mode(DISPLAY, PowerMode::OnSuspend).is_err());
        assert_eq!(client.pending(), 0);
        assert!(client.encoded().is_empty());
    }

    #[test]
    fn test_v2_opcode_rejected_on_v1_connection() {
        let mut client = client();
        let err = client
            .enqueue(Opcode::GetReadbackBufferFence, &[Arg::U64(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            ComposerError::UnsupportedVersion {
                required: ProtocolVersion::V2,
                available: ProtocolVersion::V1
            }
        ));
        assert!(client.v2().is_err());
    }

    #[tokio::test]
    async fn test_accessors_after_execute() {
        let mut client = client();
        let create = client.create_layer(DISPLAY, 3).unwrap();
        let config = client.get_active_config(DISPLAY).unwrap();
        let z = client.set_layer_z_order(DISPLAY, Layer(5), 2).unwrap();
        let present = client.present_display(DISPLAY).unwrap();

        assert!(matches!(
            client.layer(&create),
            Err(ComposerError::ResultNotAvailable(_))
        ));
        assert_eq!(client.ticket_state(&create), TicketState::Enqueued);

        let report = client.execute().await.unwrap();
        assert_eq!(report.operations, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.delivered, 1);
        assert!(report.is_clean());

        assert_eq!(client.layer(&create).unwrap(), Layer(2));
        assert_eq!(client.active_config(&config).unwrap(), Config(7));
        assert!(client.status(&z).is_ok());
        assert_eq!(client.outcome(&z).unwrap(), &Outcome::Delivered);
        assert_eq!(client.present_fence(&present).unwrap(), Fence(900 + 0x010D));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_accessor_for_wrong_opcode() {
        let mut client = client();
        let validate = client.validate_display(DISPLAY).unwrap();
        client.execute().await.unwrap();

        assert!(client.status(&validate).is_ok());
        assert!(matches!(
            client.layer(&validate),
            Err(ComposerError::ResultNotAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_operation_surfaces_through_its_ticket() {
        let mut client = client();
        let ok = client.validate_display(DISPLAY).unwrap();
        let bad = client.get_active_config(Display(BAD_DISPLAY)).unwrap();

        let report = client.execute().await.unwrap();
        assert_eq!(
            report.first_failure(),
            Some((1, Opcode::GetActiveConfig, ErrorCode::BadDisplay))
        );
        assert!(client.status(&ok).is_ok());
        assert!(matches!(
            client.active_config(&bad),
            Err(ComposerError::OperationFailed {
                opcode: Opcode::GetActiveConfig,
                code: ErrorCode::BadDisplay
            })
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_marks_batch_unknown() {
        let mut client = ComposerClient::new(Loopback::failing(ProtocolVersion::V1));
        let a = client.validate_display(DISPLAY).unwrap();
        let b = client.create_layer(DISPLAY, 1).unwrap();

        let err = client.execute().await.unwrap_err();
        assert!(matches!(err, ComposerError::TransportFailure(_)));
        assert_eq!(client.pending(), 0);
        assert!(matches!(client.status(&a), Err(ComposerError::OutcomeUnknown)));
        assert!(matches!(client.layer(&b), Err(ComposerError::OutcomeUnknown)));
        assert_eq!(client.layers(DISPLAY).count(), 0);
    }

    #[tokio::test]
    async fn test_empty_execute_keeps_previous_results() {
        let mut client = client();
        let ticket = client.validate_display(DISPLAY).unwrap();
        client.execute().await.unwrap();

        let report = client.execute().await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(client.status(&ticket).is_ok());
    }

    #[tokio::test]
    async fn test_discard_drops_batch_and_tickets() {
        let mut client = client();
        let ticket = client.create_layer(DISPLAY, 1).unwrap();
        client.discard();

        assert_eq!(client.pending(), 0);
        assert_eq!(client.ticket_state(&ticket), TicketState::Unissued);
        client.execute().await.unwrap();
        assert_eq!(client.layers(DISPLAY).count(), 0);
    }

    #[tokio::test]
    async fn test_layer_tracking_and_teardown() {
        let loopback = Loopback::new(ProtocolVersion::V1);
        let log = loopback.log.clone();
        let mut client = ComposerClient::<Loopback>::builder().max_operations(2).build(loopback);

        client.create_layer(DISPLAY, 1).unwrap();
        client.create_layer(DISPLAY, 1).unwrap();
        client.execute().await.unwrap();
        client.create_layer(Display(2), 1).unwrap();
        client.execute().await.unwrap();
        assert_eq!(client.layers(DISPLAY).collect::<Vec<_>>(), vec![Layer(2), Layer(3)]);
        assert_eq!(client.layers(Display(2)).count(), 1);

        let reports = client.teardown().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports.iter().map(|r| r.operations).sum::<usize>(), 3);
        assert_eq!(client.layers(DISPLAY).count(), 0);
        assert_eq!(client.layers(Display(2)).count(), 0);

        let log = log.lock().unwrap();
        let destroyed = log
            .batches
            .iter()
            .flatten()
            .filter(|op| op.opcode == Opcode::DestroyLayer)
            .count();
        assert_eq!(destroyed, 3);
    }

    #[tokio::test]
    async fn test_cancelled_execute_leaves_batch_unknown() {
        let mut client = ComposerClient::new(Loopback::stalling(ProtocolVersion::V1));
        let a = client.validate_display(DISPLAY).unwrap();
        let b = client.create_layer(DISPLAY, 1).unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(10), client.execute()).await;
        assert!(cancelled.is_err());
        assert_eq!(client.pending(), 0);
        assert_eq!(client.ticket_state(&a), TicketState::Executed(Outcome::Unknown));
        assert!(matches!(client.layer(&b), Err(ComposerError::OutcomeUnknown)));

        let c = client.validate_display(DISPLAY).unwrap();
        assert_eq!(c.index(), 0);
        let report = client.execute().await.unwrap();
        assert_eq!(report.operations, 1);
        assert!(client.status(&c).is_ok());
        assert_eq!(client.ticket_state(&a), TicketState::Unissued);
        assert!(matches!(
            client.status(&a),
            Err(ComposerError::ResultNotAvailable(_))
        ));
        assert_eq!(client.layers(DISPLAY).count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_skips_queued_destroy() {
        let loopback = Loopback::new(ProtocolVersion::V1);
        let log = loopback.log.clone();
        let mut client = ComposerClient::new(loopback);

        client.create_layer(DISPLAY, 1).unwrap();
        client.create_layer(DISPLAY, 1).unwrap();
        client.execute().await.unwrap();

        client.destroy_layer(DISPLAY, Layer(2)).unwrap();
        let reports = client.teardown().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].operations, 2);
        assert_eq!(client.layers(DISPLAY).count(), 0);

        let log = log.lock().unwrap();
        let destroyed: Vec<_> = log.batches[1]
            .iter()
            .map(|op| (op.opcode, op.arg(1)))
            .collect();
        assert_eq!(
            destroyed,
            vec![
                (Opcode::DestroyLayer, Some(Arg::U64(2))),
                (Opcode::DestroyLayer, Some(Arg::U64(3))),
            ]
        );
    }
}
