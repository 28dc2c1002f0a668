pub mod actor;
pub mod attendance;
pub mod command;
pub mod device;
pub mod history;
pub mod role;
pub mod worker;
