//! Delivery channels. Currently one: SMTP via async lettre.

mod smtp;

pub use smtp::{SmtpChannel, classify_send_error};
