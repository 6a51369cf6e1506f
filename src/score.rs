//! Score Store: the symbolic score the sequencer reads each tick.
//!
//! A submitted note list is partitioned into one slot per beat at
//! ingestion time. Rests (non-positive duration) and notes outside the
//! measure are dropped here, so nothing downstream has to re-check them.
//! The active score is published through a single atomic pointer swap.

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One sound to trigger, as pushed by the application layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// 1-based position in the measure.
    pub beat: i32,
    pub track_id: u32,
    /// Explicit preset name; when absent the track's instrument is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    /// Semitone offset from the track's octave base.
    pub tone: i32,
    /// Length in beats. `<= 0` is a rest.
    pub duration: f64,
}

impl Note {
    pub fn new(beat: i32, track_id: u32, tone: i32, duration: f64) -> Self {
        Note {
            beat,
            track_id,
            instrument: None,
            tone,
            duration,
        }
    }

    /// Whether this note produces sound. NaN durations are treated as rests.
    pub fn is_audible(&self) -> bool {
        self.duration > 0.0
    }
}

/// A fixed-length measure: slot `i` holds the notes of beat `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    slots: Vec<Vec<Note>>,
}

/// What happened to a submitted note list during ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ingest {
    pub kept: usize,
    pub rests: usize,
    pub out_of_range: usize,
}

impl Score {
    /// An empty measure of `beats` slots.
    pub fn empty(beats: usize) -> Self {
        Score {
            slots: vec![Vec::new(); beats],
        }
    }

    /// Partition `notes` by beat, preserving input order within each slot.
    pub fn from_notes(notes: &[Note], beats: usize) -> (Self, Ingest) {
        let mut score = Score::empty(beats);
        let mut ingest = Ingest::default();

        for note in notes {
            if !note.is_audible() {
                ingest.rests += 1;
                continue;
            }
            let slot = usize::try_from(note.beat)
                .ok()
                .and_then(|b| b.checked_sub(1))
                .filter(|&idx| idx < beats);
            match slot {
                Some(idx) => {
                    score.slots[idx].push(note.clone());
                    ingest.kept += 1;
                }
                None => {
                    debug!(beat = note.beat, track_id = note.track_id, "dropping note outside measure");
                    ingest.out_of_range += 1;
                }
            }
        }

        (score, ingest)
    }

    pub fn beats(&self) -> usize {
        self.slots.len()
    }

    /// Notes of the slot at 0-based `index`; empty if out of range.
    pub fn slot(&self, index: usize) -> &[Note] {
        self.slots.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn note_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

/// The published pair the sequencer observes on every tick.
#[derive(Debug, Clone)]
pub struct ScoreState {
    pub playing: bool,
    pub score: Arc<Score>,
}

/// Single-writer / single-reader holder of the active score.
///
/// Submitters replace the whole [`ScoreState`] with one pointer swap, so a
/// tick that loads the state sees either the old or the new score, never
/// a mix of both.
#[derive(Debug)]
pub struct ScoreStore {
    beats: usize,
    state: ArcSwap<ScoreState>,
}

impl ScoreStore {
    /// A stopped store holding an empty measure.
    pub fn new(beats: usize) -> Self {
        ScoreStore {
            beats,
            state: ArcSwap::from_pointee(ScoreState {
                playing: false,
                score: Arc::new(Score::empty(beats)),
            }),
        }
    }

    pub fn beats(&self) -> usize {
        self.beats
    }

    /// Replace the active score.
    ///
    /// An empty list stops playback and keeps the previous score array
    /// untouched; anything else is partitioned and published with
    /// `playing = true`.
    pub fn submit(&self, notes: &[Note]) -> Ingest {
        if notes.is_empty() {
            self.state.rcu(|current| ScoreState {
                playing: false,
                score: Arc::clone(&current.score),
            });
            debug!("empty score submitted, playback stopped");
            return Ingest::default();
        }

        let (score, ingest) = Score::from_notes(notes, self.beats);
        self.state.store(Arc::new(ScoreState {
            playing: true,
            score: Arc::new(score),
        }));
        debug!(
            kept = ingest.kept,
            rests = ingest.rests,
            out_of_range = ingest.out_of_range,
            "score replaced"
        );
        ingest
    }

    /// Wait-free view of the current state, used once per tick.
    pub fn load(&self) -> Guard<Arc<ScoreState>> {
        self.state.load()
    }

    pub fn snapshot(&self) -> Arc<ScoreState> {
        self.state.load_full()
    }

    pub fn is_playing(&self) -> bool {
        self.state.load().playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(slot: &[Note]) -> Vec<u32> {
        slot.iter().map(|n| n.track_id).collect()
    }

    #[test]
    fn partitions_by_beat_and_drops_rests() {
        let notes = vec![
            Note::new(1, 0, 0, 1.0),
            Note::new(1, 1, 2, 1.0),
            Note::new(5, 0, 7, 0.0),
        ];
        let (score, ingest) = Score::from_notes(&notes, 8);

        assert_eq!(score.beats(), 8);
        assert_eq!(tracks(score.slot(0)), vec![0, 1]);
        assert!(score.slot(4).is_empty());
        assert_eq!(ingest, Ingest { kept: 2, rests: 1, out_of_range: 0 });
    }

    #[test]
    fn every_kept_note_lands_in_exactly_one_slot() {
        let notes: Vec<Note> = (0..40)
            .map(|i| Note::new(i % 10, (i % 3) as u32, i, if i % 4 == 0 { -1.0 } else { 0.5 }))
            .collect();
        let (score, _) = Score::from_notes(&notes, 8);

        let expected: Vec<&Note> = notes
            .iter()
            .filter(|n| n.duration > 0.0 && (1..=8).contains(&n.beat))
            .collect();
        assert_eq!(score.note_count(), expected.len());
        for (idx, beat) in (1..=8).enumerate() {
            let in_order: Vec<&Note> = expected.iter().copied().filter(|n| n.beat == beat).collect();
            let slot: Vec<&Note> = score.slot(idx).iter().collect();
            assert_eq!(slot, in_order, "slot {idx} must keep input order");
        }
    }

    #[test]
    fn drops_out_of_range_beats_without_aborting() {
        let notes = vec![
            Note::new(0, 0, 0, 1.0),
            Note::new(9, 0, 0, 1.0),
            Note::new(-3, 0, 0, 1.0),
            Note::new(8, 1, 3, 1.0),
        ];
        let (score, ingest) = Score::from_notes(&notes, 8);
        assert_eq!(ingest.out_of_range, 3);
        assert_eq!(tracks(score.slot(7)), vec![1]);
    }

    #[test]
    fn nan_duration_is_a_rest() {
        let (score, ingest) = Score::from_notes(&[Note::new(1, 0, 0, f64::NAN)], 8);
        assert_eq!(score.note_count(), 0);
        assert_eq!(ingest.rests, 1);
    }

    #[test]
    fn store_starts_stopped() {
        let store = ScoreStore::new(8);
        assert!(!store.is_playing());
        assert_eq!(store.load().score.beats(), 8);
    }

    #[test]
    fn empty_submit_stops_and_keeps_previous_score() {
        let store = ScoreStore::new(8);
        store.submit(&[Note::new(2, 0, 4, 1.0)]);
        assert!(store.is_playing());
        let before = store.snapshot();

        store.submit(&[]);
        let after = store.snapshot();
        assert!(!after.playing);
        assert!(Arc::ptr_eq(&before.score, &after.score));

        store.submit(&[]);
        assert!(!store.is_playing());
        assert!(Arc::ptr_eq(&before.score, &store.snapshot().score));
    }

    #[test]
    fn non_empty_submit_replaces_whole_score() {
        let store = ScoreStore::new(8);
        store.submit(&[Note::new(1, 0, 0, 1.0), Note::new(3, 1, 0, 1.0)]);
        store.submit(&[Note::new(4, 1, 2, 1.0)]);

        let state = store.snapshot();
        assert!(state.playing);
        assert!(state.score.slot(0).is_empty());
        assert!(state.score.slot(2).is_empty());
        assert_eq!(tracks(state.score.slot(3)), vec![1]);
    }

    #[test]
    fn concurrent_submits_publish_whole_scores_only() {
        use std::sync::atomic::{AtomicBool, Ordering};

        fn uniform_track(score: &Score) -> Option<u32> {
            let first = score.slot(0).first()?.track_id;
            let whole = (0..score.beats()).all(|i| {
                let slot = score.slot(i);
                slot.len() == 1 && slot[0].track_id == first
            });
            whole.then_some(first)
        }

        let on_track = |track_id: u32| -> Vec<Note> {
            (1..=8).map(|beat| Note::new(beat, track_id, 0, 1.0)).collect()
        };
        let (zero, one) = (on_track(0), on_track(1));
        let store = ScoreStore::new(8);
        store.submit(&zero);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut flip = false;
                while !done.load(Ordering::Relaxed) {
                    store.submit(if flip { &one } else { &zero });
                    flip = !flip;
                }
            });
            scope.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    store.submit(&[]);
                }
            });

            for _ in 0..20_000 {
                let state = store.snapshot();
                assert!(uniform_track(&state.score).is_some(), "torn score (playing = {})", state.playing);
            }
            done.store(true, Ordering::Relaxed);
        });

        store.submit(&[]);
        let state = store.snapshot();
        assert!(!state.playing);
        assert!(uniform_track(&state.score).is_some());
    }

    #[test]
    fn note_json_uses_camel_case() {
        let json = r#"[{"beat":1,"trackId":1,"tone":2,"duration":1},
                       {"beat":3,"trackId":0,"instrument":"marimba","tone":0,"duration":0.5}]"#;
        let notes: Vec<Note> = serde_json::from_str(json).unwrap();
        assert_eq!(notes[0], Note::new(1, 1, 2, 1.0));
        assert_eq!(notes[1].instrument.as_deref(), Some("marimba"));
    }
}
