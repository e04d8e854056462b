/// Tunables for a session peer. Defaults match the cadences the protocol
/// was designed around; tests shrink the intervals instead of mocking time.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub display_name: String,
    pub beats_per_minute: f32,
    /// Guest-initiated latency probe cadence.
    pub ping_interval_secs: f32,
    /// SyncTime exchange cadence (both roles).
    pub sync_interval_secs: f32,
    /// Host timeline snapshot cadence. Useful range is roughly 15-500ms.
    pub timeline_interval_secs: f32,
    pub ready_resend_secs: f32,
    /// Host keepalive ping to registered guests.
    pub heartbeat_interval_secs: f32,
    /// Host drops a guest not heard from for this long, freeing its
    /// session slot for a reconnect.
    pub guest_timeout_secs: f32,
    /// GameStart is re-broadcast this many times...
    pub start_broadcast_rounds: u32,
    /// ...this far apart, since a single lost start would strand the guest.
    pub start_broadcast_interval_secs: f32,
    /// Timeline error beyond this snaps instead of smoothing.
    pub snap_threshold_secs: f32,
    pub smoothing_rate: f32,
    /// Fold the estimated clock offset into timeline candidates. Off by
    /// default: the raw candidate already absorbs the offset implicitly,
    /// folding helps only on asymmetric links.
    pub apply_clock_offset: bool,
    /// Session size cap beyond the host itself.
    pub max_guests: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            beats_per_minute: 120.0,
            ping_interval_secs: 1.0,
            sync_interval_secs: 1.0,
            timeline_interval_secs: 0.05,
            ready_resend_secs: 0.5,
            heartbeat_interval_secs: 1.0,
            guest_timeout_secs: 5.0,
            start_broadcast_rounds: 5,
            start_broadcast_interval_secs: 0.1,
            snap_threshold_secs: 0.5,
            smoothing_rate: 10.0,
            apply_clock_offset: false,
            max_guests: 1,
        }
    }
}

impl PeerConfig {
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.beats_per_minute as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_duration_from_bpm() {
        let config = PeerConfig::default();
        assert!((config.beat_duration() - 0.5).abs() < 1e-9);

        let fast = PeerConfig {
            beats_per_minute: 180.0,
            ..Default::default()
        };
        assert!((fast.beat_duration() - 1.0 / 3.0).abs() < 1e-9);
    }
}
