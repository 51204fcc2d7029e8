pub mod dispatch;
pub mod import;
pub mod sites;
pub mod status;
