//! Connection and transaction-behavior types for the rusqlite-backed engine.

/// SQLite transaction types.
#[derive(Default, Debug, Clone, Copy)]
pub enum SQLiteTransactionType {
    #[default]
    /// A deferred transaction is the default - it does not acquire locks until needed
    Deferred,
    /// An immediate transaction acquires a RESERVED lock immediately
    Immediate,
    /// An exclusive transaction acquires an EXCLUSIVE lock immediately
    Exclusive,
}

impl From<SQLiteTransactionType> for rusqlite::TransactionBehavior {
    fn from(tx_type: SQLiteTransactionType) -> Self {
        match tx_type {
            SQLiteTransactionType::Deferred => rusqlite::TransactionBehavior::Deferred,
            SQLiteTransactionType::Immediate => rusqlite::TransactionBehavior::Immediate,
            SQLiteTransactionType::Exclusive => rusqlite::TransactionBehavior::Exclusive,
        }
    }
}

impl From<rusqlite::TransactionBehavior> for SQLiteTransactionType {
    fn from(behavior: rusqlite::TransactionBehavior) -> Self {
        match behavior {
            rusqlite::TransactionBehavior::Deferred => SQLiteTransactionType::Deferred,
            rusqlite::TransactionBehavior::Immediate => SQLiteTransactionType::Immediate,
            rusqlite::TransactionBehavior::Exclusive => SQLiteTransactionType::Exclusive,
            _ => SQLiteTransactionType::Deferred,
        }
    }
}
