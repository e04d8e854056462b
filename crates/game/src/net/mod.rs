pub mod protocol;
pub mod transport;

pub use protocol::{
    Body, DEFAULT_PORT, Grade, HitReport, LANE_COUNT, MAX_PACKET_SIZE, Message, MessageError,
    MessageHeader, PROTOCOL_MAGIC, PROTOCOL_VERSION, SpawnNote, TICKS_PER_MS, TimeProbe,
    TimelineSnapshot, wall_clock_ticks,
};
pub use transport::Transport;
