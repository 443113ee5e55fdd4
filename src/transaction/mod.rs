mod lock_manager;
mod transaction;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    Transaction, TransactionManager, TransactionState, TwoPhaseLocking, INVALID_TXN_ID,
};

pub type TransactionId = i32;
