pub mod auth;
pub mod rest;
pub mod server;

pub use server::{FanoutContext, FanoutServer};
