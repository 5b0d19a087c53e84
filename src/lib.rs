//! Appliance Controller
//!
//! Supervises shared appliances behind gateway-switched outlets: powers a
//! device on for the duration of a booked program, detects the program's end
//! from the power draw, and tells the user when it is done.

pub mod config;
pub mod devices;
pub mod execution;
pub mod gateway;
pub mod mailbox;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
