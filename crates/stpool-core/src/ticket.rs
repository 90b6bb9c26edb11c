//! Withdrawal ticket ledger.
//!
//! Non-fungible pending-redemption claims, indexed by owner with the
//! swap-remove discipline of [`IndexedBag`]. Approvals live in a parallel
//! spender-indexed bag with the same discipline and are cleared on
//! transfer and burn.

use crate::index::IndexedBag;
use std::collections::HashMap;
use stpool_common::{Address, Epoch, Error, OperatorId, Result, TicketId, UnbondNonce, ValidatorId};
use tracing::debug;

/// Backing source of a pending withdrawal: exactly one of the pool
/// buffer (fixed amount) or a specific validator's unbond (settles at
/// claim time against the post-slash share price).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketBacking {
    Buffer {
        amount: u64,
    },
    Validator {
        operator: OperatorId,
        validator: ValidatorId,
        shares: u64,
        nonce: UnbondNonce,
    },
}

#[derive(Debug, Clone)]
pub struct WithdrawalTicket {
    pub id: TicketId,
    pub owner: Address,
    pub request_epoch: Epoch,
    pub backing: TicketBacking,
}

#[derive(Debug, Default)]
pub struct WithdrawalTicketLedger {
    next_id: TicketId,
    tickets: HashMap<TicketId, WithdrawalTicket>,
    holdings: IndexedBag<Address, TicketId>,
    /// spender -> approved ticket ids
    approvals: IndexedBag<Address, TicketId>,
    approved_by: HashMap<TicketId, Address>,
}

impl WithdrawalTicketLedger {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn mint(&mut self, owner: Address, request_epoch: Epoch, backing: TicketBacking) -> TicketId {
        let id = self.next_id;
        self.next_id += 1;
        self.tickets.insert(
            id,
            WithdrawalTicket {
                id,
                owner,
                request_epoch,
                backing,
            },
        );
        self.holdings.insert(owner, id);
        debug!(ticket = id, %owner, "ticket minted");
        id
    }

    pub fn transfer(&mut self, from: Address, to: Address, id: TicketId) -> Result<()> {
        let ticket = self
            .tickets
            .get(&id)
            .ok_or(Error::TicketNotFound(id))?;
        if ticket.owner != from {
            return Err(Error::PermissionDenied(format!(
                "{from} does not own ticket {id}"
            )));
        }
        self.clear_approval(id);
        self.tickets
            .get_mut(&id)
            .expect("ticket presence checked above")
            .owner = to;
        self.holdings.remove(id);
        self.holdings.insert(to, id);
        Ok(())
    }

    pub fn burn(&mut self, id: TicketId) -> Result<WithdrawalTicket> {
        let ticket = self.tickets.remove(&id).ok_or(Error::TicketNotFound(id))?;
        self.clear_approval(id);
        self.holdings.remove(id);
        debug!(ticket = id, "ticket burned");
        Ok(ticket)
    }

    pub fn approve(&mut self, owner: Address, spender: Address, id: TicketId) -> Result<()> {
        let ticket = self.tickets.get(&id).ok_or(Error::TicketNotFound(id))?;
        if ticket.owner != owner {
            return Err(Error::PermissionDenied(format!(
                "{owner} does not own ticket {id}"
            )));
        }
        self.clear_approval(id);
        self.approvals.insert(spender, id);
        self.approved_by.insert(id, spender);
        Ok(())
    }

    pub fn is_approved_or_owner(&self, addr: Address, id: TicketId) -> bool {
        match self.tickets.get(&id) {
            Some(ticket) => {
                ticket.owner == addr || self.approved_by.get(&id) == Some(&addr)
            }
            None => false,
        }
    }

    pub fn ticket(&self, id: TicketId) -> Option<&WithdrawalTicket> {
        self.tickets.get(&id)
    }

    pub fn tickets_of(&self, owner: Address) -> &[TicketId] {
        self.holdings.items_of(&owner)
    }

    pub fn approved_of(&self, spender: Address) -> &[TicketId] {
        self.approvals.items_of(&spender)
    }

    /// All outstanding tickets, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &WithdrawalTicket> {
        self.tickets.values()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    fn clear_approval(&mut self, id: TicketId) {
        if self.approved_by.remove(&id).is_some() {
            self.approvals.remove(id);
        }
    }

    /// Both indexes are position-true and agree with the ticket map.
    pub fn is_consistent(&self) -> bool {
        self.holdings.is_consistent()
            && self.approvals.is_consistent()
            && self.holdings.len() == self.tickets.len()
            && self.tickets.values().all(|ticket| {
                self.holdings.owner_of(ticket.id) == Some(&ticket.owner)
            })
            && self
                .approved_by
                .iter()
                .all(|(id, spender)| self.approvals.owner_of(*id) == Some(spender))
    }
}
