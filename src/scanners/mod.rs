pub mod general;
pub mod primary;
