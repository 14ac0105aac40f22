mod transaction;

pub use transaction::{TransactionManager, TxnHandle, TxnStatus};
