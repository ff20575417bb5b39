//! Domain model for carrier tracking reconciliation.
//!
//! Packages, carrier integrations, the notification queue and the
//! request/response bodies of the Worker's HTTP surface.

mod integration;
mod notification;
mod package;
mod requests;

pub use integration::*;
pub use notification::*;
pub use package::*;
pub use requests::*;

#[cfg(test)]
mod tests;
