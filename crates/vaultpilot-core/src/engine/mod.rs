//! Task iteration engine and the stop hooks it consults between steps.

mod iteration;
mod stop_hook;

pub use iteration::{EngineConfig, IterationEngine};
pub use stop_hook::{FlagStopHook, NeverStop, PauseFileHook, StopHook};
