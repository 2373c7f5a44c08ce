//! Command implementations

pub mod inspect;
pub mod predict;
pub mod status;
pub mod train;
pub mod windows;
