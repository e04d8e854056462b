use crate::net::protocol::TimelineSnapshot;

/// Authoritative song timeline. Only the host owns one; everything the
/// guests see derives from the snapshots it broadcasts.
#[derive(Debug)]
pub struct HostTimeline {
    start_time: f64,
    beat_duration: f64,
}

impl HostTimeline {
    pub fn start(now: f64, beat_duration: f64) -> Self {
        Self {
            start_time: now,
            beat_duration,
        }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn beat_duration(&self) -> f64 {
        self.beat_duration
    }

    pub fn position(&self, now: f64) -> f64 {
        now - self.start_time
    }

    pub fn beat_index(&self, now: f64) -> u32 {
        let pos = self.position(now).max(0.0);
        (pos / self.beat_duration) as u32
    }

    pub fn beat_fraction(&self, now: f64) -> f32 {
        let pos = self.position(now).max(0.0);
        ((pos % self.beat_duration) / self.beat_duration) as f32
    }

    pub fn beat_to_time(&self, beat: f32) -> f64 {
        self.start_time + beat as f64 * self.beat_duration
    }

    pub fn snapshot(&self, now: f64) -> TimelineSnapshot {
        TimelineSnapshot {
            start_time: self.start_time,
            position: self.position(now),
            beat_index: self.beat_index(now),
            beat_fraction: self.beat_fraction(now),
        }
    }
}

/// What a correction tick did to the reconciled timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Start time jumped straight to the target.
    Snapped { start_time: f64 },
    /// Start time moved part of the way toward the target.
    Smoothed { start_time: f64 },
}

/// Guest-side reconciled timeline.
///
/// Each host snapshot yields a candidate start time (`local_now - position`;
/// transit delay is deliberately ignored, it is sub-frame on the links this
/// targets). The first snapshot after a start hard-snaps; afterwards
/// snapshots only move the target and the per-tick correction closes the
/// gap, snapping when the error is too large to smooth through.
#[derive(Debug)]
pub struct GuestTimeline {
    start_time: f64,
    target_start: f64,
    has_synced: bool,
    beat_duration: f64,
    snap_threshold: f64,
    smoothing_rate: f64,
}

impl GuestTimeline {
    pub fn new(beat_duration: f64, snap_threshold: f64, smoothing_rate: f64) -> Self {
        Self {
            start_time: 0.0,
            target_start: 0.0,
            has_synced: false,
            beat_duration,
            snap_threshold,
            smoothing_rate,
        }
    }

    pub fn has_synced(&self) -> bool {
        self.has_synced
    }

    pub fn start_time(&self) -> Option<f64> {
        self.has_synced.then_some(self.start_time)
    }

    pub fn beat_duration(&self) -> f64 {
        self.beat_duration
    }

    pub fn position(&self, now: f64) -> Option<f64> {
        self.has_synced.then(|| now - self.start_time)
    }

    pub fn beat_to_time(&self, beat: f32) -> Option<f64> {
        self.has_synced
            .then(|| self.start_time + beat as f64 * self.beat_duration)
    }

    /// Ingests a host snapshot. `clock_offset` is subtracted from the local
    /// clock before deriving the candidate when offset folding is enabled;
    /// pass 0.0 otherwise.
    pub fn on_snapshot(
        &mut self,
        local_now: f64,
        snapshot: &TimelineSnapshot,
        clock_offset: f64,
    ) -> Option<Correction> {
        let candidate = (local_now - clock_offset) - snapshot.position;
        if !self.has_synced {
            self.start_time = candidate;
            self.target_start = candidate;
            self.has_synced = true;
            return Some(Correction::Snapped {
                start_time: candidate,
            });
        }
        self.target_start = candidate;
        None
    }

    /// One correction step. Smoothing never overshoots: the step factor is
    /// clamped to 1 for large `dt`.
    pub fn tick(&mut self, dt: f64) -> Option<Correction> {
        if !self.has_synced {
            return None;
        }

        let error = self.target_start - self.start_time;
        if error == 0.0 {
            return None;
        }

        if error.abs() > self.snap_threshold {
            self.start_time = self.target_start;
            Some(Correction::Snapped {
                start_time: self.start_time,
            })
        } else {
            let step = (dt * self.smoothing_rate).min(1.0);
            self.start_time += error * step;
            Some(Correction::Smoothed {
                start_time: self.start_time,
            })
        }
    }

    /// Re-arms the hard-snap path for a new session.
    pub fn reset(&mut self) {
        self.start_time = 0.0;
        self.target_start = 0.0;
        self.has_synced = false;
    }
}
