pub mod config;
pub mod frame;
pub mod task;

pub use frame::{Frame, FrameError};
pub use task::{StopSignal, TaskHandle};
