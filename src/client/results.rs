//! Result slots bound to tickets.
//!
//! Every enqueued operation gets a [`Ticket`]. The table keeps the outcomes
//! of the most recently executed batch only; a ticket from any other batch,
//! or from another client, reads as [`TicketState::Unissued`].

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ComposerError, Result};
use crate::executor::Outcome;
use crate::protocol::Opcode;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to the result slot of one enqueued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    client: u64,
    generation: u64,
    index: usize,
    opcode: Opcode,
}

impl Ticket {
    /// Operation this ticket was issued for.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Position of the operation within its batch.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Where a ticket's operation is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketState {
    /// Unknown to this client, discarded, or superseded by a later batch.
    Unissued,
    /// Waiting in the current batch.
    Enqueued,
    /// Part of the most recently executed batch.
    Executed(Outcome),
}

#[derive(Debug)]
pub(crate) struct ResultTable {
    client: u64,
    /// Generation of the batch being built.
    generation: u64,
    pending: Vec<Opcode>,
    /// Generation whose outcomes are held in `outcomes`.
    executed: Option<u64>,
    outcomes: Vec<Outcome>,
}

impl ResultTable {
    pub(crate) fn new() -> Self {
        Self {
            client: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            pending: Vec::new(),
            executed: None,
            outcomes: Vec::new(),
        }
    }

    /// Issue a ticket for the operation the writer just placed at `index`.
    pub(crate) fn enqueue(&mut self, index: usize, opcode: Opcode) -> Ticket {
        debug_assert_eq!(index, self.pending.len());
        self.pending.push(opcode);
        Ticket {
            client: self.client,
            generation: self.generation,
            index,
            opcode,
        }
    }

    /// Close the current batch with every operation `Unknown`.
    ///
    /// Called before the batch is sent, so a round trip that never finishes
    /// leaves its tickets `Unknown`. Returns the closed generation.
    pub(crate) fn commit_unknown(&mut self) -> u64 {
        let generation = self.generation;
        self.outcomes = vec![Outcome::Unknown; self.pending.len()];
        self.executed = Some(generation);
        self.advance();
        generation
    }

    /// Replace the `Unknown` outcomes of `generation` with real ones.
    pub(crate) fn bind(&mut self, generation: u64, outcomes: Vec<Outcome>) {
        if self.executed != Some(generation) {
            return;
        }
        debug_assert_eq!(outcomes.len(), self.outcomes.len());
        self.outcomes = outcomes;
    }

    /// Forget the current batch without executing it.
    pub(crate) fn discard(&mut self) {
        self.advance();
    }

    fn advance(&mut self) {
        self.pending.clear();
        self.generation += 1;
    }

    pub(crate) fn state(&self, ticket: &Ticket) -> TicketState {
        if ticket.client != self.client {
            return TicketState::Unissued;
        }
        if ticket.generation == self.generation
            && self.pending.get(ticket.index) == Some(&ticket.opcode)
        {
            return TicketState::Enqueued;
        }
        match self.outcome(ticket) {
            Ok(outcome) => TicketState::Executed(outcome.clone()),
            Err(_) => TicketState::Unissued,
        }
    }

    /// Outcome of an executed ticket.
    ///
    /// # Errors
    ///
    /// `ResultNotAvailable` unless the ticket belongs to this client's most
    /// recently executed batch.
    pub(crate) fn outcome(&self, ticket: &Ticket) -> Result<&Outcome> {
        if ticket.client != self.client {
            return Err(ComposerError::ResultNotAvailable(format!(
                "{:?} ticket was issued by another client",
                ticket.opcode
            )));
        }
        if ticket.generation == self.generation {
            return Err(ComposerError::ResultNotAvailable(format!(
                "{:?} at position {} has not been executed",
                ticket.opcode, ticket.index
            )));
        }
        if self.executed != Some(ticket.generation) {
            return Err(ComposerError::ResultNotAvailable(format!(
                "{:?} ticket belongs to a batch that is no longer current",
                ticket.opcode
            )));
        }
        self.outcomes.get(ticket.index).ok_or_else(|| {
            ComposerError::ResultNotAvailable(format!(
                "no result at position {}",
                ticket.index
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::reply::ReplyValue;

    fn commit(table: &mut ResultTable, outcomes: Vec<Outcome>) {
        let generation = table.commit_unknown();
        table.bind(generation, outcomes);
    }

    #[test]
    fn test_ticket_lifecycle() {
        let mut table = ResultTable::new();
        let ticket = table.enqueue(0, Opcode::ValidateDisplay);
        assert_eq!(table.state(&ticket), TicketState::Enqueued);
        assert!(matches!(
            table.outcome(&ticket),
            Err(ComposerError::ResultNotAvailable(_))
        ));

        commit(&mut table, vec![Outcome::Succeeded(ReplyValue::Empty)]);
        assert_eq!(
            table.state(&ticket),
            TicketState::Executed(Outcome::Succeeded(ReplyValue::Empty))
        );
    }

    #[test]
    fn test_stale_ticket_after_next_batch() {
        let mut table = ResultTable::new();
        let old = table.enqueue(0, Opcode::SetPowerMode);
        commit(&mut table, vec![Outcome::Failed(ErrorCode::BadDisplay)]);

        let new = table.enqueue(0, Opcode::SetPowerMode);
        // Still readable while the next batch is being built.
        assert!(table.outcome(&old).is_ok());
        commit(&mut table, vec![Outcome::Succeeded(ReplyValue::Empty)]);

        assert_eq!(table.state(&old), TicketState::Unissued);
        let err = table.outcome(&old).unwrap_err();
        assert!(err.to_string().contains("no longer current"));
        assert!(table.outcome(&new).is_ok());
    }

    #[test]
    fn test_ticket_from_other_client() {
        let mut ours = ResultTable::new();
        let mut theirs = ResultTable::new();
        ours.enqueue(0, Opcode::ValidateDisplay);
        commit(&mut ours, vec![Outcome::Delivered]);
        let foreign = theirs.enqueue(0, Opcode::ValidateDisplay);
        commit(&mut theirs, vec![Outcome::Delivered]);

        assert_eq!(ours.state(&foreign), TicketState::Unissued);
        assert!(ours
            .outcome(&foreign)
            .unwrap_err()
            .to_string()
            .contains("another client"));
    }

    #[test]
    fn test_late_bind_for_closed_generation_is_ignored() {
        let mut table = ResultTable::new();
        let first = table.enqueue(0, Opcode::ValidateDisplay);
        let abandoned = table.commit_unknown();
        assert_eq!(table.outcome(&first).unwrap(), &Outcome::Unknown);

        // A new batch starts at position 0 before the old one ever binds.
        let second = table.enqueue(0, Opcode::ValidateDisplay);
        commit(&mut table, vec![Outcome::Succeeded(ReplyValue::Empty)]);
        table.bind(abandoned, vec![Outcome::Failed(ErrorCode::BadDisplay)]);

        assert_eq!(table.state(&first), TicketState::Unissued);
        assert_eq!(
            table.outcome(&second).unwrap(),
            &Outcome::Succeeded(ReplyValue::Empty)
        );
    }

    #[test]
    fn test_commit_unknown_and_discard() {
        let mut table = ResultTable::new();
        let a = table.enqueue(0, Opcode::CreateLayer);
        let b = table.enqueue(1, Opcode::PresentDisplay);
        table.commit_unknown();
        assert_eq!(table.outcome(&a).unwrap(), &Outcome::Unknown);
        assert_eq!(table.outcome(&b).unwrap(), &Outcome::Unknown);

        let dropped = table.enqueue(0, Opcode::ValidateDisplay);
        table.discard();
        assert_eq!(table.state(&dropped), TicketState::Unissued);
        // The last executed batch is untouched by a discard.
        assert_eq!(table.outcome(&a).unwrap(), &Outcome::Unknown);
    }
}
