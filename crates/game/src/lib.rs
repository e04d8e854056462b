pub mod config;
pub mod event;
pub mod net;
pub mod peer;
pub mod session;
pub mod sync;

pub use config::PeerConfig;
pub use event::SessionEvent;
pub use net::{
    Body, DEFAULT_PORT, Grade, HitReport, LANE_COUNT, MAX_PACKET_SIZE, Message, MessageError,
    MessageHeader, SpawnNote, TimeProbe, TimelineSnapshot, Transport, wall_clock_ticks,
};
pub use peer::NetPeer;
pub use session::{EndpointTable, HandshakeState, PeerRecord, Phase, Role, Roster};
pub use sync::{Chart, ChartNote, ClockSync, GuestTimeline, HostTimeline, mirror_lanes};
