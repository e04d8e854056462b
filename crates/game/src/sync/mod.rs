pub mod clock;
pub mod replicate;
pub mod timeline;

pub use clock::{ClockSync, SYNC_HISTORY_CAPACITY, SyncRecord};
pub use replicate::{Chart, ChartNote, mirror_lanes, spawn_payload};
pub use timeline::{Correction, GuestTimeline, HostTimeline};
