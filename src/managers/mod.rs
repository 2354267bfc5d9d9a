//! Manager modules

pub mod logging;
pub mod notification;
pub mod retention;
pub mod snapshot;
