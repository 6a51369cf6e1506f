//! Beat Sequencer: a self-rearming tick state machine.
//!
//! Each tick reads one slot of the published score, hands its notes to a
//! [`NotePlayer`], advances the beat cursor and arms the next tick at an
//! absolute time. The caller (the engine's render loop) only asks "fire
//! everything due before this horizon"; scheduling decisions live here.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::player::NotePlayer;
use crate::score::ScoreStore;

/// Whether ticks emit notes. The clock runs in both states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stopped,
    Running,
}

/// Outcome of one fired tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// 0-based beat slot that was processed.
    pub beat: usize,
    /// Absolute time (seconds on the audio clock) the tick was scheduled for.
    pub scheduled_at: f64,
    pub transport: Transport,
    pub played: usize,
    pub failed: usize,
}

/// Running totals across all ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub ticks: u64,
    pub notes_played: u64,
    pub notes_failed: u64,
}

#[derive(Debug)]
pub struct BeatSequencer {
    store: Arc<ScoreStore>,
    beats: usize,
    tick: f64,
    beat_cursor: usize,
    /// Time of tick 0. `None` until the clock is started.
    origin: Option<f64>,
    /// Index of the next tick to fire; its time is `origin + k * tick`.
    next_index: u64,
    stats: SequencerStats,
}

impl BeatSequencer {
    /// `bpm` must be positive; the engine validates it before construction.
    pub fn new(store: Arc<ScoreStore>, bpm: f64) -> Self {
        let beats = store.beats().max(1);
        BeatSequencer {
            store,
            beats,
            tick: 60.0 / bpm,
            beat_cursor: 0,
            origin: None,
            next_index: 0,
            stats: SequencerStats::default(),
        }
    }

    /// Seconds per beat.
    pub fn tick_seconds(&self) -> f64 {
        self.tick
    }

    pub fn beats(&self) -> usize {
        self.beats
    }

    pub fn beat_cursor(&self) -> usize {
        self.beat_cursor
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats
    }

    pub fn is_started(&self) -> bool {
        self.origin.is_some()
    }

    /// Arm the first tick at `at`. Later calls are ignored: the clock is
    /// started once and never torn down.
    pub fn start(&mut self, at: f64) {
        if self.origin.is_none() {
            debug!(at, tick = self.tick, beats = self.beats, "sequencer clock started");
            self.origin = Some(at);
        }
    }

    pub fn transport(&self) -> Transport {
        if self.store.is_playing() {
            Transport::Running
        } else {
            Transport::Stopped
        }
    }

    /// Absolute time of the armed tick.
    pub fn next_tick_time(&self) -> Option<f64> {
        self.origin.map(|origin| self.time_of(origin, self.next_index))
    }

    fn time_of(&self, origin: f64, index: u64) -> f64 {
        origin + index as f64 * self.tick
    }

    /// Fire the armed tick and re-arm the next one.
    ///
    /// Note failures are logged and counted; they never stop the remaining
    /// notes of the beat or the following ticks.
    pub fn tick<P: NotePlayer + ?Sized>(&mut self, player: &mut P) -> Option<TickReport> {
        let origin = self.origin?;
        let scheduled_at = self.time_of(origin, self.next_index);
        let beat = self.beat_cursor;

        let state = self.store.load();
        let transport = if state.playing {
            Transport::Running
        } else {
            Transport::Stopped
        };

        let mut played = 0;
        let mut failed = 0;
        if state.playing {
            for note in state.score.slot(beat) {
                match player.play_note(note, scheduled_at) {
                    Ok(()) => played += 1,
                    Err(error) => {
                        debug!(track_id = note.track_id, beat, %error, "note dropped");
                        failed += 1;
                    }
                }
            }
        }
        drop(state);

        self.beat_cursor = (self.beat_cursor + 1) % self.beats;
        self.next_index += 1;
        self.stats.ticks += 1;
        self.stats.notes_played += played as u64;
        self.stats.notes_failed += failed as u64;

        trace!(beat, scheduled_at, played, failed, "tick");
        Some(TickReport {
            beat,
            scheduled_at,
            transport,
            played,
            failed,
        })
    }

    /// Fire every tick scheduled strictly before `horizon`, in order.
    /// Returns the number of ticks fired.
    pub fn run_until<P: NotePlayer + ?Sized>(&mut self, horizon: f64, player: &mut P) -> usize {
        let mut fired = 0;
        while let Some(next) = self.next_tick_time() {
            if next >= horizon {
                break;
            }
            self.tick(player);
            fired += 1;
        }
        fired
    }
}
