use crate::net::protocol::{LANE_COUNT, SpawnNote};

/// Deterministic lane pair for a base lane: the host's own lane plus the
/// guest-side mirror. Both peers derive the identical pair from the base
/// lane alone, so a spawn needs no per-lane payload.
pub fn mirror_lanes(base: u8) -> [u8; 2] {
    [base, base + LANE_COUNT]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartNote {
    pub beat: f32,
    pub lane: u8,
}

/// The host's spawn schedule for one song, consumed front to back as the
/// timeline advances.
#[derive(Debug)]
pub struct Chart {
    notes: Vec<ChartNote>,
    cursor: usize,
    /// Seconds before a note's beat at which it is emitted, giving the note
    /// time to travel on screen and the spawn datagram time to arrive.
    lead_time: f64,
}

impl Chart {
    pub fn new(mut notes: Vec<ChartNote>, lead_time: f64) -> Self {
        notes.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        Self {
            notes,
            cursor: 0,
            lead_time,
        }
    }

    /// A one-note-per-beat chart cycling through the base lanes, used by
    /// the host binary when no chart is supplied.
    pub fn metronome(beats: u32) -> Self {
        let notes = (0..beats)
            .map(|i| ChartNote {
                beat: i as f32,
                lane: (i % LANE_COUNT as u32) as u8,
            })
            .collect();
        Self::new(notes, 2.0)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.notes.len() - self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Pops every note whose emit instant has been reached. `position` is
    /// the current timeline position, `beat_duration` the seconds per beat.
    pub fn due_spawns(&mut self, position: f64, beat_duration: f64) -> Vec<ChartNote> {
        let mut due = Vec::new();
        while self.cursor < self.notes.len() {
            let note = self.notes[self.cursor];
            let emit_at = note.beat as f64 * beat_duration - self.lead_time;
            if position < emit_at {
                break;
            }
            due.push(note);
            self.cursor += 1;
        }
        due
    }
}

/// Builds the wire payload for a spawn popped off the chart.
pub fn spawn_payload(note: ChartNote, emit_time: f64) -> SpawnNote {
    SpawnNote {
        beat: note.beat,
        lane: note.lane,
        emit_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_lanes_deterministic() {
        assert_eq!(mirror_lanes(0), [0, 4]);
        assert_eq!(mirror_lanes(1), [1, 5]);
        assert_eq!(mirror_lanes(2), [2, 6]);
        assert_eq!(mirror_lanes(3), [3, 7]);
    }

    #[test]
    fn test_due_spawns_respect_lead_time() {
        let mut chart = Chart::new(
            vec![
                ChartNote { beat: 4.0, lane: 0 },
                ChartNote { beat: 8.0, lane: 1 },
            ],
            1.0,
        );

        // Beat duration 0.5s: first note emits at 4*0.5 - 1.0 = 1.0s.
        assert!(chart.due_spawns(0.5, 0.5).is_empty());

        let due = chart.due_spawns(1.0, 0.5);
        assert_eq!(due, vec![ChartNote { beat: 4.0, lane: 0 }]);

        // Already consumed; not emitted again.
        assert!(chart.due_spawns(1.5, 0.5).is_empty());

        let due = chart.due_spawns(10.0, 0.5);
        assert_eq!(due, vec![ChartNote { beat: 8.0, lane: 1 }]);
        assert_eq!(chart.remaining(), 0);
    }

    #[test]
    fn test_notes_sorted_and_batched() {
        let mut chart = Chart::new(
            vec![
                ChartNote { beat: 6.0, lane: 2 },
                ChartNote { beat: 2.0, lane: 0 },
                ChartNote { beat: 4.0, lane: 1 },
            ],
            0.0,
        );

        // A late tick catches several notes at once, in beat order.
        let due = chart.due_spawns(2.5, 0.5);
        assert_eq!(
            due,
            vec![
                ChartNote { beat: 2.0, lane: 0 },
                ChartNote { beat: 4.0, lane: 1 },
            ]
        );
    }

    #[test]
    fn test_metronome_cycles_base_lanes() {
        let mut chart = Chart::metronome(8);
        assert_eq!(chart.len(), 8);
        let all = chart.due_spawns(1000.0, 0.5);
        let lanes: Vec<u8> = all.iter().map(|n| n.lane).collect();
        assert_eq!(lanes, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }
}
