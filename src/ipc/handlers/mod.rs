pub mod attendance;
pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod fees;
pub mod import;
pub mod records_review;
pub mod remarks;
pub mod students;
