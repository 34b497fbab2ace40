//! In-process task dispatch.

pub mod dispatcher;

pub use dispatcher::{DispatchStats, Dispatcher};
