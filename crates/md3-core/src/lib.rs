pub mod commands;
pub mod device;
pub mod error;
pub mod motion;
pub mod protocol;
pub mod store;
pub mod tasks;
pub mod value;

pub use commands::{CommandOutcome, CommandTable};
pub use device::Diffractometer;
pub use error::DeviceError;
pub use motion::{Timeline, TimelineStep, Timings};
pub use protocol::{Event, Outbound, Reply, Request};
pub use store::{ChangeListener, ListenerId};
