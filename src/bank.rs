//! Instrument Bank: per-track wavetable instruments and their load state.
//!
//! Slots are keyed by track id and published through an `ArcSwap`, so the
//! render thread resolves instruments without locking while loads run on
//! any task. A note for a track whose instrument is not `Ready` is refused
//! at resolve time and never reaches the audio graph.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::TrackConfig;
use crate::decode::{decode, decode_base64, decode_inline_pcm};
use crate::dsp::sampler::{LoadedZone, SampleBuffer, Sampler};
use crate::error::{LoadError, ResolveError};
use crate::preset::{resolve_relative, AudioReference, PresetDescriptor, SampleZone};
use crate::source::AssetSource;

/// A decoded, playable instrument.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub id: String,
    pub name: String,
    pub sampler: Sampler,
}

impl Instrument {
    /// One zone spanning the whole keyboard, recorded at `root_note`.
    pub fn single_zone(name: impl Into<String>, buffer: SampleBuffer, root_note: u8) -> Self {
        let name = name.into();
        let zone = LoadedZone {
            key_range_low: 0,
            key_range_high: 127,
            root_note,
            fine_tune_cents: 0.0,
            loop_start: None,
            loop_end: None,
            buffer,
        };
        Instrument {
            id: name.clone(),
            name,
            sampler: Sampler::new(vec![zone], false),
        }
    }

    /// Build from a preset whose zones all carry their audio inline.
    pub fn from_inline_preset(preset: &PresetDescriptor) -> Result<Self, LoadError> {
        let config = preset.sampler();
        let zones = config
            .zones
            .iter()
            .map(|zone| -> Result<LoadedZone, LoadError> {
                Ok(LoadedZone::from_zone(zone, inline_zone_audio(zone)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::assemble(preset, zones)
    }

    /// Build from a preset fetched from `location`, fetching external zone
    /// audio relative to it.
    pub async fn from_preset<S: AssetSource>(
        preset: &PresetDescriptor,
        location: &str,
        source: &S,
    ) -> Result<Self, LoadError> {
        let mut zones = Vec::with_capacity(preset.sampler().zones.len());
        for zone in &preset.sampler().zones {
            let buffer = match &zone.audio {
                AudioReference::External { url, codec, sha256 } => {
                    let url = resolve_relative(location, url);
                    let bytes = source.fetch(&url).await?;
                    if let Some(expected) = sha256 {
                        verify_checksum(&url, &bytes, expected)?;
                    }
                    decode(&bytes, *codec)?.into_sample_buffer()
                }
                _ => inline_zone_audio(zone)?,
            };
            zones.push(LoadedZone::from_zone(zone, buffer));
        }
        Self::assemble(preset, zones)
    }

    fn assemble(preset: &PresetDescriptor, zones: Vec<LoadedZone>) -> Result<Self, LoadError> {
        if zones.is_empty() {
            return Err(LoadError::EmptyPreset(preset.id.clone()));
        }
        let config = preset.sampler();
        let mut sampler = Sampler::new(zones, config.is_drum_kit);
        sampler.envelope = config.envelope.clone();
        Ok(Instrument {
            id: preset.id.clone(),
            name: preset.name.clone(),
            sampler,
        })
    }

    fn answers_to(&self, name: &str) -> bool {
        self.id == name || self.name.eq_ignore_ascii_case(name)
    }
}

fn inline_zone_audio(zone: &SampleZone) -> Result<SampleBuffer, LoadError> {
    match &zone.audio {
        AudioReference::InlinePcm {
            data,
            bits_per_sample,
        } => Ok(decode_inline_pcm(data, *bits_per_sample, zone.sample_rate)?),
        AudioReference::InlineFile { data, codec } => {
            let bytes = decode_base64(data)?;
            Ok(decode(&bytes, *codec)?.into_sample_buffer())
        }
        AudioReference::External { url, .. } => Err(LoadError::ExternalAudio(url.clone())),
    }
}

fn verify_checksum(location: &str, bytes: &[u8], expected: &str) -> Result<(), LoadError> {
    let actual: String = Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(LoadError::Checksum {
            location: location.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[derive(Debug, Clone)]
pub enum SlotState {
    /// No preset location configured and nothing installed.
    Unconfigured,
    Pending,
    Loading,
    Ready(Arc<Instrument>),
    Failed(String),
}

impl SlotState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SlotState::Ready(_))
    }
}

#[derive(Debug, Clone)]
struct Slot {
    location: Option<String>,
    state: SlotState,
}

enum Claim {
    Start(String),
    Settled,
    Missing,
}

#[derive(Debug, Default)]
pub struct InstrumentBank {
    slots: ArcSwap<HashMap<u32, Slot>>,
}

impl InstrumentBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// One slot per configured track; tracks with a preset start `Pending`.
    pub fn from_tracks(tracks: &[TrackConfig]) -> Self {
        let slots = tracks
            .iter()
            .map(|track| {
                let state = if track.preset.is_some() {
                    SlotState::Pending
                } else {
                    SlotState::Unconfigured
                };
                (
                    track.id,
                    Slot {
                        location: track.preset.clone(),
                        state,
                    },
                )
            })
            .collect();
        InstrumentBank {
            slots: ArcSwap::from_pointee(slots),
        }
    }

    pub fn state(&self, track_id: u32) -> SlotState {
        self.slots
            .load()
            .get(&track_id)
            .map_or(SlotState::Unconfigured, |slot| slot.state.clone())
    }

    pub fn track_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.slots.load().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The ready instrument for `track_id`.
    pub fn resolve(&self, track_id: u32) -> Result<Arc<Instrument>, ResolveError> {
        match self.slots.load().get(&track_id).map(|slot| &slot.state) {
            Some(SlotState::Ready(instrument)) => Ok(Arc::clone(instrument)),
            Some(SlotState::Pending | SlotState::Loading) => Err(ResolveError::NotReady(track_id)),
            Some(SlotState::Failed(_)) => Err(ResolveError::Failed(track_id)),
            Some(SlotState::Unconfigured) | None => Err(ResolveError::Unknown(track_id)),
        }
    }

    /// A ready instrument by preset id or (case-insensitive) name. Slots are
    /// searched in ascending track id order.
    pub fn resolve_named(&self, name: &str) -> Result<Arc<Instrument>, ResolveError> {
        let slots = self.slots.load();
        let mut ids: Vec<&u32> = slots.keys().collect();
        ids.sort_unstable();
        ids.into_iter()
            .find_map(|id| match &slots[id].state {
                SlotState::Ready(instrument) if instrument.answers_to(name) => Some(Arc::clone(instrument)),
                _ => None,
            })
            .ok_or_else(|| ResolveError::UnknownPreset(name.to_string()))
    }

    pub fn install(&self, track_id: u32, instrument: Instrument) {
        let instrument = Arc::new(instrument);
        info!(track_id, instrument = %instrument.name, "instrument installed");
        self.set_state(track_id, SlotState::Ready(instrument));
    }

    /// Install a preset given as JSON. Only inline audio is accepted here;
    /// presets with external zones go through [`InstrumentBank::load`].
    pub fn install_preset_json(&self, track_id: u32, json: &str) -> Result<(), LoadError> {
        let preset = PresetDescriptor::from_json(json).map_err(|source| LoadError::Preset {
            location: format!("track {track_id}"),
            source,
        })?;
        self.install(track_id, Instrument::from_inline_preset(&preset)?);
        Ok(())
    }

    fn set_state(&self, track_id: u32, state: SlotState) {
        self.slots.rcu(|slots| {
            let mut next = (**slots).clone();
            next.entry(track_id)
                .and_modify(|slot| slot.state = state.clone())
                .or_insert_with(|| Slot {
                    location: None,
                    state: state.clone(),
                });
            next
        });
    }

    fn claim(&self, track_id: u32) -> Claim {
        let mut claim = Claim::Missing;
        self.slots.rcu(|slots| {
            let mut next = (**slots).clone();
            claim = match next.get_mut(&track_id) {
                Some(Slot {
                    state: SlotState::Ready(_) | SlotState::Loading,
                    ..
                }) => Claim::Settled,
                Some(Slot {
                    location: Some(location),
                    state: state @ (SlotState::Pending | SlotState::Failed(_)),
                }) => {
                    *state = SlotState::Loading;
                    Claim::Start(location.clone())
                }
                _ => Claim::Missing,
            };
            next
        });
        claim
    }

    /// Fetch and decode the configured preset for `track_id`.
    ///
    /// Idempotent: a ready or in-flight slot returns `Ok(())` without
    /// fetching again. A failed slot is retried.
    pub async fn load<S: AssetSource>(&self, track_id: u32, source: &S) -> Result<(), LoadError> {
        let location = match self.claim(track_id) {
            Claim::Start(location) => location,
            Claim::Settled => return Ok(()),
            Claim::Missing => return Err(LoadError::UnknownTrack(track_id)),
        };
        debug!(track_id, %location, "loading instrument");

        match fetch_instrument(&location, source).await {
            Ok(instrument) => {
                let name = instrument.name.clone();
                let zones = instrument.sampler.zones.len();
                if self.settle(track_id, SlotState::Ready(Arc::new(instrument))) {
                    info!(track_id, instrument = %name, zones, "instrument ready");
                } else {
                    debug!(track_id, instrument = %name, "instrument installed during load, discarding fetched one");
                }
                Ok(())
            }
            Err(error) => {
                if self.settle(track_id, SlotState::Failed(error.to_string())) {
                    warn!(track_id, %location, %error, "instrument failed to load");
                    Err(error)
                } else {
                    debug!(track_id, %location, %error, "load failed after an install, keeping installed instrument");
                    Ok(())
                }
            }
        }
    }

    /// Finish a load claimed by [`InstrumentBank::claim`]. The slot is only
    /// written while it is still `Loading`; returns whether it was.
    fn settle(&self, track_id: u32, state: SlotState) -> bool {
        let mut settled = false;
        self.slots.rcu(|slots| {
            let mut next = (**slots).clone();
            settled = match next.get_mut(&track_id) {
                Some(slot) if matches!(slot.state, SlotState::Loading) => {
                    slot.state = state.clone();
                    true
                }
                _ => false,
            };
            next
        });
        settled
    }
}

async fn fetch_instrument<S: AssetSource>(location: &str, source: &S) -> Result<Instrument, LoadError> {
    let bytes = source.fetch(location).await?;
    let preset: PresetDescriptor = serde_json::from_slice(&bytes).map_err(|source| LoadError::Preset {
        location: location.to_string(),
        source,
    })?;
    Instrument::from_preset(&preset, location, source).await
}
