pub mod advisory;
pub mod notifications;
pub mod telegram;
pub mod users;
pub mod vouchers;
