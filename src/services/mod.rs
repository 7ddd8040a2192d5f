pub mod advisory;
pub mod checker;
pub mod ledger;
pub mod listener;
pub mod pipeline;
pub mod storage;
