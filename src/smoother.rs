// src/smoother.rs

use crate::lane_style::{LaneLabel, LaneStyleResult};

#[derive(Debug, Clone, Copy, Default)]
struct SlotTrack {
    last_label: Option<LaneLabel>,
    misses: u32,
}

/// Temporal hysteresis for lane style labels, one track per lane slot.
///
/// Created at stream start and owned by the pipeline of that stream. An
/// ambiguous decision inherits the previous solid/dashed label of the same
/// slot. A slot that decodes no lane for `reset_after_misses` consecutive
/// frames forgets its label.
pub struct LaneStyleTracker {
    tracks: Vec<SlotTrack>,
    reset_after_misses: u32,
}

impl LaneStyleTracker {
    pub fn new(num_lanes: usize, reset_after_misses: u32) -> Self {
        Self {
            tracks: vec![SlotTrack::default(); num_lanes],
            reset_after_misses: reset_after_misses.max(1),
        }
    }

    /// Apply hysteresis to the current decision for `slot`, in place.
    pub fn apply(&mut self, slot: usize, result: &mut LaneStyleResult) {
        let Some(track) = self.tracks.get_mut(slot) else {
            return;
        };
        track.misses = 0;

        match (result.label, track.last_label) {
            (LaneLabel::Ambiguous, Some(prev)) if prev.is_decided() => {
                result.label = prev;
            }
            (label, _) => track.last_label = Some(label),
        }
    }

    /// Close a frame. Slots not in `decoded` count a miss and are reset once
    /// they reach the limit.
    pub fn end_frame(&mut self, decoded: &[usize]) {
        let limit = self.reset_after_misses;
        for (slot, track) in self.tracks.iter_mut().enumerate() {
            if decoded.contains(&slot) {
                track.misses = 0;
                continue;
            }
            track.misses = track.misses.saturating_add(1);
            if track.misses >= limit {
                *track = SlotTrack::default();
            }
        }
    }

    pub fn reset_track(&mut self, slot: usize) {
        if let Some(track) = self.tracks.get_mut(slot) {
            *track = SlotTrack::default();
        }
    }

    /// Forget every slot (e.g. when the stream changes)
    pub fn reset(&mut self) {
        self.tracks.iter_mut().for_each(|t| *t = SlotTrack::default());
    }

    pub fn last_label(&self, slot: usize) -> Option<LaneLabel> {
        self.tracks.get(slot).and_then(|t| t.last_label)
    }
}
