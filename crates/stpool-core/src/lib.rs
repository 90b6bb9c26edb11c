//! Pooled-stake accounting engine: the stake pool, its withdrawal ticket
//! ledger, and the swap-remove ownership index they share.

pub mod index;
pub mod pool;
pub mod ticket;

pub use index::IndexedBag;
pub use pool::StakePool;
pub use ticket::{TicketBacking, WithdrawalTicket, WithdrawalTicketLedger};
