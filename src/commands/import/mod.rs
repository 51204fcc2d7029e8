mod backfill;
mod chunks;
mod client;
mod convert;
mod discover;
pub mod ledger;
mod pipeline;
mod run;


pub use run::{open_run_log, run};
