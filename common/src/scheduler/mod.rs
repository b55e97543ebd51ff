// Publication scheduler: tick flag and polling engine

pub mod engine;
pub mod guard;

pub use engine::{Scheduler, SchedulerEngine, TickReport};
pub use guard::{FlagStatus, TickBusy, TickGuard, TickPermit};
