pub mod api;
pub mod backup;
pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod humanize;
pub mod ledger;
pub mod observability;
pub mod scheduler;
pub mod storage;
