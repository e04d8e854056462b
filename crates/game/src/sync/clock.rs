use std::collections::VecDeque;

use crate::net::protocol::{TICKS_PER_MS, TimeProbe};

pub const SYNC_HISTORY_CAPACITY: usize = 10;

/// One observed pairing of the local session clock with the remote one.
#[derive(Debug, Clone, Copy)]
pub struct SyncRecord {
    pub local_time: f64,
    pub remote_time: f64,
    pub remote_pos: f64,
    pub remote_beat: u32,
}

/// Clock-offset estimator fed by periodic SyncTime exchanges.
///
/// History is bounded; each new record evicts the oldest once full, so the
/// estimate tracks drift instead of averaging over the whole session.
#[derive(Debug)]
pub struct ClockSync {
    records: VecDeque<SyncRecord>,
    capacity: usize,
    latency_ms: f64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::with_capacity(SYNC_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            latency_ms: 0.0,
        }
    }

    pub fn observe(&mut self, local_time: f64, probe: &TimeProbe) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(SyncRecord {
            local_time,
            remote_time: probe.send_time,
            remote_pos: probe.timeline_pos,
            remote_beat: probe.beat_index,
        });
    }

    /// Estimated remote-minus-local clock offset in seconds.
    ///
    /// Averages `((r2 - l2) + (r1 - l1)) / 2` over consecutive record pairs,
    /// which damps one-off jitter spikes better than the latest sample
    /// alone. Needs at least two records; returns 0.0 before that.
    pub fn offset(&self) -> f64 {
        if self.records.len() < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        let mut iter = self.records.iter();
        let mut prev = iter.next().copied();
        for record in iter {
            if let Some(p) = prev {
                let a = record.remote_time - record.local_time;
                let b = p.remote_time - p.local_time;
                total += (a + b) / 2.0;
                pairs += 1;
            }
            prev = Some(*record);
        }

        total / pairs as f64
    }

    /// Local session time translated onto the remote peer's clock.
    pub fn adjusted_time(&self, local_time: f64) -> f64 {
        local_time + self.offset()
    }

    /// Feeds an echoed wall-clock stamp back in, updating the latency
    /// figure. Returns the measured round trip in milliseconds.
    pub fn observe_round_trip(&mut self, now_ticks: i64, echoed_ticks: i64) -> f64 {
        let rtt_ms = (now_ticks - echoed_ticks) as f64 / TICKS_PER_MS;
        if rtt_ms >= 0.0 {
            self.latency_ms = rtt_ms;
        }
        rtt_ms
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn latest(&self) -> Option<&SyncRecord> {
        self.records.back()
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.latency_ms = 0.0;
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(send_time: f64) -> TimeProbe {
        TimeProbe {
            send_time,
            timeline_pos: 0.0,
            beat_index: 0,
        }
    }

    #[test]
    fn test_offset_needs_two_records() {
        let mut clock = ClockSync::new();
        assert_eq!(clock.offset(), 0.0);

        clock.observe(1.0, &probe(4.0));
        assert_eq!(clock.offset(), 0.0);

        clock.observe(2.0, &probe(5.0));
        assert!((clock.offset() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_converges_under_fixed_skew() {
        let mut clock = ClockSync::new();
        // Remote clock runs 2.5s ahead; exchanges every second.
        for i in 0..6 {
            let local = i as f64;
            clock.observe(local, &probe(local + 2.5));
        }
        assert!((clock.offset() - 2.5).abs() < 1e-6);
        assert!((clock.adjusted_time(10.0) - 12.5).abs() < 1e-6);
    }

    #[test]
    fn test_offset_settles_under_fixed_one_way_latency() {
        let mut clock = ClockSync::new();
        // Remote clock runs 2.5s ahead; every probe spends a fixed 40ms
        // in transit, so a probe sent at remote time `l + skew` is
        // observed at local time `l + latency`.
        let skew = 2.5;
        let latency = 0.04;
        for i in 0..4 {
            let local_send = i as f64;
            clock.observe(local_send + latency, &probe(local_send + skew));
        }

        // The estimator cannot separate transit delay from skew, so it
        // settles at skew minus the one-way trip.
        let expected = skew - latency;
        assert!((clock.offset() - expected).abs() < 1e-6);

        // Further exchanges at the same latency leave it stable.
        for i in 4..10 {
            let local_send = i as f64;
            clock.observe(local_send + latency, &probe(local_send + skew));
        }
        assert!((clock.offset() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut clock = ClockSync::with_capacity(3);
        // Early records carry a wild offset; later ones settle at +1.0.
        clock.observe(0.0, &probe(100.0));
        for i in 1..=4 {
            let local = i as f64;
            clock.observe(local, &probe(local + 1.0));
        }
        assert_eq!(clock.record_count(), 3);
        // The outlier has been evicted.
        assert!((clock.offset() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_from_tick_stamps() {
        let mut clock = ClockSync::new();
        // 80ms expressed in 100ns ticks.
        let rtt = clock.observe_round_trip(800_000, 0);
        assert!((rtt - 80.0).abs() < 1e-9);
        assert!((clock.latency_ms() - 80.0).abs() < 1e-9);

        // A stamp from the future is reported but never stored.
        clock.observe_round_trip(0, 800_000);
        assert!((clock.latency_ms() - 80.0).abs() < 1e-9);
    }
}
