#![doc = include_str!("RUSTDOC.md")]

pub mod clock;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod logger;
pub mod phone;
pub mod platform;
pub mod session;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub mod test_support;
