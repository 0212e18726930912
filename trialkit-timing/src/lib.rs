pub mod clock;
pub mod deadline;
pub mod frame;
pub mod sleep;

pub use clock::{Clock, ManualClock, ManualClockHandle, MonotonicClock};
pub use deadline::DeadlineTimer;
pub use frame::{FrameMonitor, FrameStats};
pub use sleep::precise_sleep;
