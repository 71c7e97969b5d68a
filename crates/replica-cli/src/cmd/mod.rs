pub mod bundle;
pub mod config;
pub mod init;
pub mod ledger;
pub mod run;
pub mod tenant;
