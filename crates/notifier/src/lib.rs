//! Delayed-delivery notifier for Keepla keepsakes.
//!
//! Finds keepsakes and scheduled notifications whose delivery date has
//! arrived, emails the recipient and the sender through Resend, and records
//! each row as `sent` or `error`.

pub mod dispatcher;
pub mod email;
pub mod store;
pub mod templates;
