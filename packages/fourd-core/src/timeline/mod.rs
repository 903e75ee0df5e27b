//! Timeline data model: authored events and the derived effects map.
//!
//! A timeline is the authored JSON artifact for one video: a list of
//! time-coded events. The loader sorts events by `t` and derives an
//! [`EffectsMap`] of continuous intervals by pairing `start`/`stop`
//! events with the same `(effect, mode)` key.

mod cache;
mod scheduler;

pub use cache::TimelineCache;
pub use scheduler::{
    CooldownTable, EffectSink, MappedBusSink, RecordingSink, SchedulerStats, TimelineScheduler,
};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FourdError, FourdResult};

// ─────────────────────────────────────────────────────────────────────────────
// Event Vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// The five effect channels a rig exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Vibration,
    Water,
    Wind,
    Flash,
    Color,
}

impl Effect {
    /// Stable lowercase name, matching the wire vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vibration => "vibration",
            Self::Water => "water",
            Self::Wind => "wind",
            Self::Flash => "flash",
            Self::Color => "color",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event does at its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Opens a continuous interval for `(effect, mode)`.
    Start,
    /// Closes the nearest earlier unmatched `start` with the same key.
    Stop,
    /// Instantaneous one-shot.
    Shot,
    /// Carries `text`; produces no bus output.
    Caption,
}

/// One authored timeline event.
///
/// `mode` is an open string validated by the effect mapper at emission
/// time; unknown modes yield no bus output. `effect` and `action` are
/// closed enums so a structurally malformed payload fails the load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Event time in seconds from video start.
    pub t: f64,
    /// Effect channel; absent only for captions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
    /// Per-effect mode (e.g. `burst`, `down_weak`, `red`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    pub action: EventAction,
    /// Caption text; only meaningful for `action = caption`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TimelineEvent {
    /// Interval identity for start/stop pairing and active-set diffing.
    pub fn key(&self) -> Option<EffectKey> {
        self.effect.map(|effect| EffectKey {
            effect,
            mode: self.mode.clone(),
        })
    }
}

/// `(effect, mode)` pair identifying a continuous interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectKey {
    pub effect: Effect,
    pub mode: String,
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.effect, self.mode)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeline Document
// ─────────────────────────────────────────────────────────────────────────────

/// The authored artifact as it appears on disk and in bulk frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineDoc {
    #[serde(default)]
    pub events: Vec<TimelineEvent>,
}

/// A validated, sorted timeline plus its derived effects map.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
    effects_map: EffectsMap,
}

impl Timeline {
    /// Validates and sorts authored events, then derives the effects map.
    ///
    /// Events are order-independent in the file; the loader sorts by `t`.
    /// A structurally malformed event (negative or non-finite `t`, a
    /// non-caption event without an effect) rejects the whole load.
    pub fn from_events(mut events: Vec<TimelineEvent>) -> FourdResult<Self> {
        for event in &events {
            if !event.t.is_finite() || event.t < 0.0 {
                return Err(FourdError::InvalidTimeline(format!(
                    "event time must be a non-negative finite number, got {}",
                    event.t
                )));
            }
            if event.effect.is_none() && event.action != EventAction::Caption {
                return Err(FourdError::InvalidTimeline(format!(
                    "non-caption event at t={} is missing an effect",
                    event.t
                )));
            }
        }

        // total_cmp: t values are validated finite above
        events.sort_by(|a, b| a.t.total_cmp(&b.t));
        let effects_map = EffectsMap::build(&events);

        Ok(Self {
            events,
            effects_map,
        })
    }

    /// Parses and validates a timeline document.
    pub fn from_doc(doc: TimelineDoc) -> FourdResult<Self> {
        Self::from_events(doc.events)
    }

    /// Sorted events.
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Derived continuous intervals.
    pub fn effects_map(&self) -> &EffectsMap {
        &self.effects_map
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Last event time, or 0 for an empty timeline.
    pub fn end_time(&self) -> f64 {
        self.events.last().map(|e| e.t).unwrap_or(0.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Effects Map
// ─────────────────────────────────────────────────────────────────────────────

/// One continuous interval: `(effect, mode)` active over `[start_t, end_t)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInterval {
    pub key: EffectKey,
    pub start_t: f64,
    /// `f64::INFINITY` when no matching stop exists: the interval
    /// persists until end of timeline or a global stop.
    pub end_t: f64,
}

impl EffectInterval {
    /// Half-open membership check.
    pub fn contains(&self, t: f64) -> bool {
        self.start_t <= t && t < self.end_t
    }
}

/// Ordered list of continuous intervals derived from a sorted timeline.
#[derive(Debug, Clone, Default)]
pub struct EffectsMap {
    intervals: Vec<EffectInterval>,
}

impl EffectsMap {
    /// Pairs each `start` with the nearest later `stop` of the same
    /// `(effect, mode)` key. Events must already be sorted by `t`.
    ///
    /// A second `start` of an already-open key is a no-op (the interval
    /// stays open until the first matching `stop`); a `stop` without an
    /// open `start` is ignored.
    fn build(sorted_events: &[TimelineEvent]) -> Self {
        let mut intervals: Vec<EffectInterval> = Vec::new();
        // key -> index of the currently open interval
        let mut open: std::collections::HashMap<EffectKey, usize> = std::collections::HashMap::new();

        for event in sorted_events {
            let Some(key) = event.key() else { continue };
            match event.action {
                EventAction::Start => {
                    if open.contains_key(&key) {
                        log::debug!(
                            "[Timeline] duplicate start for {} at t={}, already active",
                            key,
                            event.t
                        );
                        continue;
                    }
                    open.insert(key.clone(), intervals.len());
                    intervals.push(EffectInterval {
                        key,
                        start_t: event.t,
                        end_t: f64::INFINITY,
                    });
                }
                EventAction::Stop => {
                    if let Some(idx) = open.remove(&key) {
                        intervals[idx].end_t = event.t;
                    }
                }
                EventAction::Shot | EventAction::Caption => {}
            }
        }

        Self { intervals }
    }

    pub fn intervals(&self) -> &[EffectInterval] {
        &self.intervals
    }

    /// All non-color intervals active at `t` (half-open check).
    pub fn active_at(&self, t: f64) -> impl Iterator<Item = &EffectInterval> {
        self.intervals
            .iter()
            .filter(move |iv| iv.contains(t) && iv.key.effect != Effect::Color)
    }

    /// The color active at `t`, if any. Later starts win, so a color
    /// change without an intervening stop supersedes the prior color.
    pub fn active_color_at(&self, t: f64) -> Option<&EffectInterval> {
        self.intervals
            .iter()
            .filter(|iv| iv.key.effect == Effect::Color && iv.contains(t))
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(t: f64, effect: Effect, mode: &str, action: EventAction) -> TimelineEvent {
        TimelineEvent {
            t,
            effect: Some(effect),
            mode: mode.into(),
            action,
            text: None,
        }
    }

    #[test]
    fn loader_sorts_events_by_time() {
        let timeline = Timeline::from_events(vec![
            ev(5.0, Effect::Wind, "burst", EventAction::Start),
            ev(1.0, Effect::Water, "burst", EventAction::Shot),
        ])
        .unwrap();
        assert_eq!(timeline.events()[0].t, 1.0);
        assert_eq!(timeline.events()[1].t, 5.0);
    }

    #[test]
    fn negative_time_rejects_load() {
        let err = Timeline::from_events(vec![ev(-1.0, Effect::Wind, "burst", EventAction::Start)])
            .unwrap_err();
        assert_eq!(err.code(), "invalid_timeline");
    }

    #[test]
    fn non_caption_without_effect_rejects_load() {
        let err = Timeline::from_events(vec![TimelineEvent {
            t: 1.0,
            effect: None,
            mode: String::new(),
            action: EventAction::Shot,
            text: None,
        }])
        .unwrap_err();
        assert_eq!(err.code(), "invalid_timeline");
    }

    #[test]
    fn caption_without_effect_is_valid() {
        let timeline = Timeline::from_events(vec![TimelineEvent {
            t: 0.0,
            effect: None,
            mode: String::new(),
            action: EventAction::Caption,
            text: Some("opening".into()),
        }])
        .unwrap();
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn matched_pair_builds_closed_interval() {
        let timeline = Timeline::from_events(vec![
            ev(0.0, Effect::Wind, "burst", EventAction::Start),
            ev(2.0, Effect::Wind, "burst", EventAction::Stop),
        ])
        .unwrap();
        let ivs = timeline.effects_map().intervals();
        assert_eq!(ivs.len(), 1);
        assert_eq!(ivs[0].start_t, 0.0);
        assert_eq!(ivs[0].end_t, 2.0);
    }

    #[test]
    fn unmatched_start_stays_open_to_infinity() {
        let timeline = Timeline::from_events(vec![ev(
            3.0,
            Effect::Vibration,
            "up_down_strong",
            EventAction::Start,
        )])
        .unwrap();
        let ivs = timeline.effects_map().intervals();
        assert_eq!(ivs[0].end_t, f64::INFINITY);
        assert!(ivs[0].contains(1e9));
    }

    #[test]
    fn stop_pairs_with_nearest_later_start() {
        let timeline = Timeline::from_events(vec![
            ev(0.0, Effect::Wind, "burst", EventAction::Start),
            ev(2.0, Effect::Wind, "burst", EventAction::Stop),
            ev(4.0, Effect::Wind, "burst", EventAction::Start),
            ev(6.0, Effect::Wind, "burst", EventAction::Stop),
        ])
        .unwrap();
        let ivs = timeline.effects_map().intervals();
        assert_eq!(ivs.len(), 2);
        assert_eq!((ivs[0].start_t, ivs[0].end_t), (0.0, 2.0));
        assert_eq!((ivs[1].start_t, ivs[1].end_t), (4.0, 6.0));
    }

    #[test]
    fn duplicate_start_is_noop() {
        let timeline = Timeline::from_events(vec![
            ev(0.0, Effect::Wind, "burst", EventAction::Start),
            ev(1.0, Effect::Wind, "burst", EventAction::Start),
            ev(2.0, Effect::Wind, "burst", EventAction::Stop),
        ])
        .unwrap();
        assert_eq!(timeline.effects_map().intervals().len(), 1);
    }

    #[test]
    fn interval_membership_is_half_open() {
        let iv = EffectInterval {
            key: EffectKey {
                effect: Effect::Wind,
                mode: "burst".into(),
            },
            start_t: 0.0,
            end_t: 2.0,
        };
        assert!(iv.contains(0.0));
        assert!(iv.contains(1.999));
        assert!(!iv.contains(2.0));
    }

    #[test]
    fn later_color_start_wins() {
        let timeline = Timeline::from_events(vec![
            ev(0.0, Effect::Color, "red", EventAction::Start),
            ev(5.0, Effect::Color, "blue", EventAction::Start),
        ])
        .unwrap();
        let map = timeline.effects_map();
        assert_eq!(map.active_color_at(2.0).unwrap().key.mode, "red");
        assert_eq!(map.active_color_at(6.0).unwrap().key.mode, "blue");
    }

    #[test]
    fn doc_round_trip_preserves_events() {
        let doc: TimelineDoc = serde_json::from_str(
            r#"{"events":[
                {"t": 0, "action": "caption", "text": "..."},
                {"t": 5.0, "effect": "vibration", "mode": "down_weak", "action": "start"},
                {"t": 7.0, "effect": "vibration", "mode": "down_weak", "action": "stop"},
                {"t": 36.0, "effect": "water", "mode": "burst", "action": "shot"}
            ]}"#,
        )
        .unwrap();
        let timeline = Timeline::from_doc(doc).unwrap();
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.end_time(), 36.0);
        assert_eq!(timeline.effects_map().intervals().len(), 1);
    }

    #[test]
    fn unknown_action_fails_deserialization() {
        let result: Result<TimelineEvent, _> =
            serde_json::from_str(r#"{"t": 1.0, "effect": "water", "action": "explode"}"#);
        assert!(result.is_err());
    }
}
