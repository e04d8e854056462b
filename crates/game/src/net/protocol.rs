use rkyv::{rancor, Archive, Deserialize, Serialize};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x44554554;
pub const DEFAULT_PORT: u16 = 8080;

/// Physical lanes per player. A guest mirrors the host's base lanes into
/// `base + LANE_COUNT`.
pub const LANE_COUNT: u8 = 4;

/// Wall-clock stamps are 100ns ticks since the Unix epoch, used only for
/// round-trip measurement so both peers stamp against the same scale.
pub const TICKS_PER_MS: f64 = 10_000.0;

pub fn wall_clock_ticks() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_nanos() / 100) as i64,
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct MessageHeader {
    pub magic: u32,
    pub version: u32,
}

impl MessageHeader {
    pub fn new() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum Grade {
    Perfect,
    Good,
    Okay,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct SpawnNote {
    pub beat: f32,
    /// Base lane in `0..LANE_COUNT`; receivers derive the mirror pair.
    pub lane: u8,
    pub emit_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct HitReport {
    pub lane: u8,
    pub grade: Grade,
    pub hit_time: f64,
}

/// One clock-sync exchange: sender's session time plus its timeline state
/// so the receiver can correlate both clocks.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TimeProbe {
    pub send_time: f64,
    pub timeline_pos: f64,
    pub beat_index: u32,
}

/// Authoritative timeline state, broadcast by the host on a short interval.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TimelineSnapshot {
    pub start_time: f64,
    pub position: f64,
    pub beat_index: u32,
    pub beat_fraction: f32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Body {
    Connect { display_name: String },
    Disconnect,
    Ping,
    GameStart,
    GameStop,
    NoteSpawn(SpawnNote),
    NoteHit(HitReport),
    NoteMiss { lane: u8 },
    PlayerInput { lane: u8, input_time: f64 },
    PlayerScore { score: u32, combo: u32, grade: Grade },
    PlayerReady,
    SyncTime(TimeProbe),
    SyncTimeline(TimelineSnapshot),
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Message {
    pub header: MessageHeader,
    pub sender_id: String,
    pub send_time: f64,
    pub wall_ticks: i64,
    pub body: Body,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Message {
    pub fn new(sender_id: &str, send_time: f64, body: Body) -> Self {
        Self {
            header: MessageHeader::new(),
            sender_id: sender_id.to_owned(),
            send_time,
            wall_ticks: wall_clock_ticks(),
            body,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, MessageError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(MessageError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MessageError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(MessageError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_validation() {
        assert!(MessageHeader::new().is_valid());

        let stale = MessageHeader {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION + 1,
        };
        assert!(!stale.is_valid());

        let garbage = MessageHeader {
            magic: 0xDEADBEEF,
            version: PROTOCOL_VERSION,
        };
        assert!(!garbage.is_valid());
    }

    #[test]
    fn test_message_round_trip_all_bodies() {
        let bodies = vec![
            Body::Connect {
                display_name: "Player_1".to_owned(),
            },
            Body::Disconnect,
            Body::Ping,
            Body::GameStart,
            Body::GameStop,
            Body::NoteSpawn(SpawnNote {
                beat: 16.0,
                lane: 2,
                emit_time: 8.125,
            }),
            Body::NoteHit(HitReport {
                lane: 5,
                grade: Grade::Perfect,
                hit_time: 12.5,
            }),
            Body::NoteMiss { lane: 7 },
            Body::PlayerInput {
                lane: 1,
                input_time: 3.25,
            },
            Body::PlayerScore {
                score: 4200,
                combo: 17,
                grade: Grade::Good,
            },
            Body::PlayerReady,
            Body::SyncTime(TimeProbe {
                send_time: 42.0,
                timeline_pos: 10.5,
                beat_index: 21,
            }),
            Body::SyncTimeline(TimelineSnapshot {
                start_time: 100.0,
                position: 5.5,
                beat_index: 11,
                beat_fraction: 0.25,
            }),
        ];

        for body in bodies {
            let msg = Message::new("abc123", 1.5, body.clone());
            let bytes = msg.serialize().unwrap();
            assert!(bytes.len() <= MAX_PACKET_SIZE);

            let decoded = Message::deserialize(&bytes).unwrap();
            assert_eq!(decoded.header, msg.header);
            assert_eq!(decoded.sender_id, "abc123");
            assert_eq!(decoded.body, body);
        }
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(Message::deserialize(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_wall_clock_tick_scale() {
        let a = wall_clock_ticks();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = wall_clock_ticks();
        let elapsed_ms = (b - a) as f64 / TICKS_PER_MS;
        assert!(elapsed_ms >= 4.0 && elapsed_ms < 1000.0);
    }
}
