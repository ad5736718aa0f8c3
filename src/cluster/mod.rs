//! Multi-process mode: a supervisor process restarting worker processes that each
//! serve HTTP on the same port.

pub mod message;
pub mod supervisor;
pub mod worker;

pub use message::{MessageKind, WorkerMessage};
