pub mod checkout;
pub mod common;
pub mod conflicts;
pub mod create;
pub mod recover;
pub mod save;
pub mod show;
pub mod state;
pub mod version;
