//! The CAKE (Common Applications Kept Enhanced) shaper core.
//!
//! This is a combination of several shaping, AQM and FQ techniques in one
//! package:
//!
//! - An overall bandwidth shaper, moving the bottleneck away from dumb CPE
//!   equipment and bloated device buffers. It operates in deficit mode, so
//!   there is no burst parameter to tune.
//! - A Diffserv-aware priority queue, giving more priority to certain
//!   classes up to a specified fraction of bandwidth. Above that threshold
//!   the priority collapses to an ordinary bandwidth share, so nothing
//!   starves.
//! - A flow-queue system inside each priority tin, isolating traffic flows
//!   from each other so a burst on one flow cannot add delay to another.
//! - CoDel on every flow queue, signalling congestion early via ECN where
//!   available and packet drops where not.
//!
//! The engine is a pure dataplane: single-threaded, no timers of its own
//! (the host supplies a [`Watchdog`]), time injected as nanosecond values
//! on every call. Enqueue and dequeue never block and never allocate once
//! the scheduler is built.

mod codel;
mod config;
mod engine;
mod flow;
mod flowchain;
mod hash;
mod packet;
mod shaper;
mod stats;
mod tin;
mod watchdog;

pub use config::{CakeSettings, ConfigError, DiffservMode, FlowMode};
pub use engine::{CakeScheduler, CAKE_MAX_TINS};
pub use packet::{FlowKeys, Packet};
pub use stats::{CakeStats, FlowStats, TinStats};
pub use watchdog::{NoopWatchdog, Watchdog};
