//! Services shared across clients.

mod ledger;

pub use ledger::Ledger;
