//! Bridge engine
//!
//! Telemetry flows broker -> decoder -> fan-out -> realtime clients;
//! commands flow the other way through the relay and the publisher role.
//! The supervisor wires both directions together and owns the health view.

mod event;
mod fanout;
mod journal;
mod relay;
mod supervisor;

pub use event::MessageEvent;
pub use fanout::{ClientFrame, EventFanout};
pub use journal::MessageJournal;
pub use relay::{CommandPublisher, CommandRelay, CommandResult};
pub use supervisor::{HealthSnapshot, Supervisor};
