//! Playhead-driven effect scheduler.
//!
//! Converts playhead advances into timed effect firings: continuous
//! interval diffing, a single active color, exactly-once one-shots,
//! and per-effect cooldowns. Emission goes through the narrow
//! [`EffectSink`] seam so the scheduler never holds a reference back
//! to the hub that drives it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::bus::BusDispatcher;
use crate::constants::{
    DEFAULT_COLOR_COOLDOWN_SECS, DEFAULT_FLASH_COOLDOWN_SECS, DEFAULT_VIBRATION_COOLDOWN_SECS,
    DEFAULT_WATER_COOLDOWN_SECS, DEFAULT_WIND_COOLDOWN_SECS,
};
use crate::effects::EffectMapper;
use crate::protocol::VideoState;
use crate::timeline::{Effect, EffectKey, EventAction, Timeline, TimelineEvent};

/// Seeking backward by more than this is a seek, not jitter (seconds).
const SEEK_BACKWARD_THRESHOLD: f64 = -1.0;

/// Advancing by more than this is a forward seek; intervening one-shots
/// are skipped rather than replayed (seconds).
const SEEK_FORWARD_THRESHOLD: f64 = 5.0;

// ─────────────────────────────────────────────────────────────────────────────
// Emission Seam
// ─────────────────────────────────────────────────────────────────────────────

/// Receives the events the scheduler decides to fire.
pub trait EffectSink: Send + Sync {
    fn emit(&self, event: &TimelineEvent);
}

/// Production sink: maps each event to bus commands and publishes them
/// in order.
pub struct MappedBusSink {
    dispatcher: Arc<BusDispatcher>,
}

impl MappedBusSink {
    pub fn new(dispatcher: Arc<BusDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl EffectSink for MappedBusSink {
    fn emit(&self, event: &TimelineEvent) {
        self.dispatcher.publish_all(&EffectMapper::map_event(event));
    }
}

/// Test sink that records every emitted event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TimelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<TimelineEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<TimelineEvent> {
        std::mem::take(&mut self.events.lock())
    }
}

impl EffectSink for RecordingSink {
    fn emit(&self, event: &TimelineEvent) {
        self.events.lock().push(event.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cooldowns
// ─────────────────────────────────────────────────────────────────────────────

/// Per-effect minimum interval between emissions.
///
/// Gates `start` and `shot` emissions only; `stop` is never suppressed
/// so an actuator can always be turned off.
#[derive(Debug, Clone)]
pub struct CooldownTable {
    durations: HashMap<Effect, f64>,
    last_emitted: HashMap<Effect, f64>,
}

impl Default for CooldownTable {
    fn default() -> Self {
        Self::new(HashMap::from([
            (Effect::Water, DEFAULT_WATER_COOLDOWN_SECS),
            (Effect::Wind, DEFAULT_WIND_COOLDOWN_SECS),
            (Effect::Vibration, DEFAULT_VIBRATION_COOLDOWN_SECS),
            (Effect::Color, DEFAULT_COLOR_COOLDOWN_SECS),
            (Effect::Flash, DEFAULT_FLASH_COOLDOWN_SECS),
        ]))
    }
}

impl CooldownTable {
    pub fn new(durations: HashMap<Effect, f64>) -> Self {
        Self {
            durations,
            last_emitted: HashMap::new(),
        }
    }

    /// Checks whether `effect` may fire at `now`, arming the cooldown
    /// when it may.
    ///
    /// A negative `since` means time went backward underneath us (seeks
    /// normally clear the table first); the stale entry is dropped and
    /// the emission allowed.
    fn check_and_arm(&mut self, effect: Effect, now: f64) -> bool {
        let duration = self.durations.get(&effect).copied().unwrap_or(0.0);

        if let Some(&last) = self.last_emitted.get(&effect) {
            let since = now - last;
            if since < 0.0 {
                self.last_emitted.remove(&effect);
            } else if since < duration {
                log::info!(
                    "[Scheduler] {} suppressed by cooldown ({:.2}s of {:.2}s)",
                    effect,
                    since,
                    duration
                );
                return false;
            }
        }

        self.last_emitted.insert(effect, now);
        true
    }

    fn clear(&mut self) {
        self.last_emitted.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Cursor and progress snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_events: usize,
    pub processed_events: usize,
    pub remaining_events: usize,
    pub current_time: f64,
    pub last_processed_time: f64,
    pub is_playing: bool,
}

struct SchedulerState {
    timeline: Timeline,
    current_time: f64,
    last_processed: f64,
    is_playing: bool,
    /// Continuous non-color intervals currently started, in start order.
    active: Vec<EffectKey>,
    active_color: Option<EffectKey>,
    cooldowns: CooldownTable,
}

impl SchedulerState {
    fn new(cooldowns: CooldownTable) -> Self {
        Self {
            timeline: Timeline::default(),
            current_time: 0.0,
            last_processed: -1.0,
            is_playing: false,
            active: Vec::new(),
            active_color: None,
            cooldowns,
        }
    }
}

/// Converts playhead advances into timed effect firings.
///
/// Strictly in-memory: a crash loses cursor state, and the host
/// recovers by reloading the cached timeline and waiting for the next
/// playhead tick. All mutation happens under one mutex; emission is
/// deferred until the lock is released.
pub struct TimelineScheduler {
    state: Mutex<SchedulerState>,
    sink: Arc<dyn EffectSink>,
}

impl TimelineScheduler {
    pub fn new(sink: Arc<dyn EffectSink>) -> Self {
        Self::with_cooldowns(sink, CooldownTable::default())
    }

    pub fn with_cooldowns(sink: Arc<dyn EffectSink>, cooldowns: CooldownTable) -> Self {
        Self {
            state: Mutex::new(SchedulerState::new(cooldowns)),
            sink,
        }
    }

    /// Installs a validated timeline, stopping whatever was running.
    ///
    /// Accepted in any state; always resets cursors and active effects.
    /// Validation happens in [`Timeline::from_events`], so a malformed
    /// document never reaches this point and the previous timeline
    /// survives a failed load.
    pub fn load_timeline(&self, timeline: Timeline) {
        let emissions = {
            let mut state = self.state.lock();
            let emissions = Self::drain_active(&mut state);
            log::info!(
                "[Scheduler] timeline loaded: {} events, end at {:.1}s",
                timeline.len(),
                timeline.end_time()
            );
            state.timeline = timeline;
            state.current_time = 0.0;
            emissions
        };
        self.emit_all(&emissions);
    }

    pub fn start_playback(&self) {
        let mut state = self.state.lock();
        if !state.is_playing {
            log::info!("[Scheduler] playback started at {:.2}s", state.current_time);
            state.is_playing = true;
        }
    }

    /// Stops playback and turns off every active effect.
    pub fn stop_playback(&self) {
        let emissions = {
            let mut state = self.state.lock();
            if !state.is_playing && state.active.is_empty() && state.active_color.is_none() {
                return;
            }
            log::info!("[Scheduler] playback stopped at {:.2}s", state.current_time);
            state.is_playing = false;
            Self::drain_active(&mut state)
        };
        self.emit_all(&emissions);
    }

    /// Stops playback and rewinds the cursor to zero.
    pub fn reset(&self) {
        let emissions = {
            let mut state = self.state.lock();
            log::info!("[Scheduler] reset");
            state.is_playing = false;
            state.current_time = 0.0;
            Self::drain_active(&mut state)
        };
        self.emit_all(&emissions);
    }

    /// Advances the playhead. The hot path.
    ///
    /// `state` carries the sender's player state when the tick came from
    /// a video_sync frame; `play` resumes, `pause`/`stop` halt and turn
    /// effects off, seek states are inferred from the time delta alone.
    pub fn update_time(&self, current_time: f64, video_state: Option<VideoState>) {
        let emissions = {
            let mut state = self.state.lock();

            match video_state {
                Some(VideoState::Play) => state.is_playing = true,
                Some(VideoState::Pause) | Some(VideoState::Stop) => {
                    if state.is_playing {
                        state.is_playing = false;
                        let emissions = Self::drain_active(&mut state);
                        state.current_time = current_time;
                        drop(state);
                        self.emit_all(&emissions);
                        return;
                    }
                }
                Some(VideoState::Seeking) | Some(VideoState::Seeked) | None => {}
            }

            let delta = current_time - state.current_time;
            if delta < SEEK_BACKWARD_THRESHOLD {
                log::debug!(
                    "[Scheduler] seek backward {:.2}s -> {:.2}s",
                    state.current_time,
                    current_time
                );
                state.cooldowns.clear();
                // Replay window: one second behind the new position
                state.last_processed = current_time - 1.0;
            } else if delta > SEEK_FORWARD_THRESHOLD {
                log::debug!(
                    "[Scheduler] seek forward {:.2}s -> {:.2}s",
                    state.current_time,
                    current_time
                );
                state.cooldowns.clear();
                // Skip intervening one-shots rather than replaying them
                state.last_processed = current_time;
            }

            state.current_time = current_time;
            if !state.is_playing {
                return;
            }

            let mut emissions = Vec::new();
            Self::diff_continuous(&mut state, current_time, &mut emissions);
            Self::diff_color(&mut state, current_time, &mut emissions);
            Self::fire_one_shots(&mut state, current_time, &mut emissions);
            state.last_processed = current_time;
            emissions
        };
        self.emit_all(&emissions);
    }

    /// Cursor and progress snapshot.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        let total = state.timeline.len();
        let processed = state
            .timeline
            .events()
            .iter()
            .filter(|e| e.t <= state.last_processed)
            .count();
        SchedulerStats {
            total_events: total,
            processed_events: processed,
            remaining_events: total - processed,
            current_time: state.current_time,
            last_processed_time: state.last_processed,
            is_playing: state.is_playing,
        }
    }

    /// Events due within `lookahead` seconds of the cursor.
    pub fn upcoming_events(&self, lookahead: f64) -> Vec<TimelineEvent> {
        let state = self.state.lock();
        let from = state.current_time;
        state
            .timeline
            .events()
            .iter()
            .filter(|e| e.t > from && e.t <= from + lookahead)
            .cloned()
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────

    /// Continuous-set diff: start what should be active and isn't, stop
    /// what is active and shouldn't be. Target order follows the
    /// effects map, so identical tick streams yield identical traces.
    fn diff_continuous(
        state: &mut SchedulerState,
        now: f64,
        emissions: &mut Vec<TimelineEvent>,
    ) {
        let target: Vec<EffectKey> = state
            .timeline
            .effects_map()
            .active_at(now)
            .map(|iv| iv.key.clone())
            .collect();

        for key in &target {
            if !state.active.contains(key) {
                if state.cooldowns.check_and_arm(key.effect, now) {
                    emissions.push(synthesized(now, key, EventAction::Start));
                    state.active.push(key.clone());
                }
                // Suppressed starts stay out of the active set and are
                // retried on the next tick
            }
        }

        let mut stopped = Vec::new();
        state.active.retain(|key| {
            if target.contains(key) {
                true
            } else {
                stopped.push(synthesized(now, key, EventAction::Stop));
                false
            }
        });
        emissions.append(&mut stopped);
    }

    /// At most one color is active; a change stops the old color before
    /// starting the new.
    fn diff_color(state: &mut SchedulerState, now: f64, emissions: &mut Vec<TimelineEvent>) {
        let target = state
            .timeline
            .effects_map()
            .active_color_at(now)
            .map(|iv| iv.key.clone());

        if target == state.active_color {
            return;
        }

        if let Some(old) = state.active_color.take() {
            emissions.push(synthesized(now, &old, EventAction::Stop));
        }
        if let Some(new) = target {
            if state.cooldowns.check_and_arm(Effect::Color, now) {
                emissions.push(synthesized(now, &new, EventAction::Start));
                state.active_color = Some(new);
            }
        }
    }

    /// Fires every `shot` with `last_processed < t <= now` exactly once.
    fn fire_one_shots(state: &mut SchedulerState, now: f64, emissions: &mut Vec<TimelineEvent>) {
        let window_start = state.last_processed;
        let mut fired = Vec::new();
        for event in state.timeline.events() {
            if event.action == EventAction::Shot
                && event.t > window_start
                && event.t <= now
            {
                fired.push(event.clone());
            }
        }
        for event in fired {
            if let Some(effect) = event.effect {
                if state.cooldowns.check_and_arm(effect, now) {
                    emissions.push(event);
                }
            }
        }
    }

    /// Synthesizes `stop` emissions for every active interval and color,
    /// then clears active sets, cooldowns, and the processed cursor.
    fn drain_active(state: &mut SchedulerState) -> Vec<TimelineEvent> {
        let now = state.current_time;
        let mut emissions: Vec<TimelineEvent> = state
            .active
            .drain(..)
            .map(|key| synthesized(now, &key, EventAction::Stop))
            .collect();
        if let Some(color) = state.active_color.take() {
            emissions.push(synthesized(now, &color, EventAction::Stop));
        }
        state.cooldowns.clear();
        state.last_processed = -1.0;
        emissions
    }

    fn emit_all(&self, emissions: &[TimelineEvent]) {
        for event in emissions {
            self.sink.emit(event);
        }
    }
}

fn synthesized(t: f64, key: &EffectKey, action: EventAction) -> TimelineEvent {
    TimelineEvent {
        t,
        effect: Some(key.effect),
        mode: key.mode.clone(),
        action,
        text: None,
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

    fn scheduler_with(events: Vec<TimelineEvent>) -> (TimelineScheduler, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = TimelineScheduler::new(sink.clone());
        scheduler.load_timeline(Timeline::from_events(events).unwrap());
        scheduler.start_playback();
        (scheduler, sink)
    }

    fn tick_range(scheduler: &TimelineScheduler, from: f64, to: f64, step: f64) {
        let mut t = from;
        while t <= to + 1e-9 {
            scheduler.update_time(t, None);
            t += step;
        }
    }

    fn trace(sink: &RecordingSink) -> Vec<(Effect, String, EventAction)> {
        sink.recorded()
            .into_iter()
            .map(|e| (e.effect.unwrap(), e.mode, e.action))
            .collect()
    }

    #[test]
    fn one_shot_fires_exactly_once() {
        let (scheduler, sink) =
            scheduler_with(vec![ev(1.0, Effect::Water, "burst", EventAction::Shot)]);
        for t in [0.0, 0.5, 1.0] {
            scheduler.update_time(t, None);
        }
        assert_eq!(
            trace(&sink),
            vec![(Effect::Water, "burst".into(), EventAction::Shot)]
        );
    }

    #[test]
    fn interval_starts_then_stops() {
        let (scheduler, sink) = scheduler_with(vec![
            ev(0.0, Effect::Wind, "burst", EventAction::Start),
            ev(2.0, Effect::Wind, "burst", EventAction::Stop),
        ]);
        tick_range(&scheduler, 0.0, 2.0, 0.5);
        assert_eq!(
            trace(&sink),
            vec![
                (Effect::Wind, "burst".into(), EventAction::Start),
                (Effect::Wind, "burst".into(), EventAction::Stop),
            ]
        );
    }

    #[test]
    fn cooldown_suppresses_rapid_shots() {
        let (scheduler, sink) = scheduler_with(vec![
            ev(1.0, Effect::Water, "burst", EventAction::Shot),
            ev(1.5, Effect::Water, "burst", EventAction::Shot),
            ev(5.0, Effect::Water, "burst", EventAction::Shot),
        ]);
        tick_range(&scheduler, 0.0, 5.0, 0.5);
        // 1.0 fires, 1.5 is inside the 3s water cooldown, 5.0 fires
        let shots: Vec<f64> = sink
            .recorded()
            .iter()
            .filter(|e| e.action == EventAction::Shot)
            .map(|e| e.t)
            .collect();
        assert_eq!(shots, vec![1.0, 5.0]);
    }

    #[test]
    fn seek_backward_replays_with_cleared_cooldowns() {
        let (scheduler, sink) = scheduler_with(vec![
            ev(10.0, Effect::Water, "burst", EventAction::Shot),
            ev(36.0, Effect::Water, "burst", EventAction::Shot),
        ]);
        tick_range(&scheduler, 0.0, 120.0, 0.5);
        assert_eq!(trace(&sink).len(), 2);

        // Jump back to 36.0: the shot at 36.0 is inside the one-second
        // replay window and the cooldown table was cleared by the seek
        scheduler.update_time(36.0, None);
        assert_eq!(trace(&sink).len(), 3);
    }

    #[test]
    fn seek_forward_skips_intervening_shots() {
        let (scheduler, sink) =
            scheduler_with(vec![ev(10.0, Effect::Water, "burst", EventAction::Shot)]);
        scheduler.update_time(0.0, None);
        scheduler.update_time(60.0, None);
        assert!(trace(&sink).is_empty());
    }

    #[test]
    fn stop_playback_turns_off_active_interval() {
        let (scheduler, sink) = scheduler_with(vec![ev(
            0.0,
            Effect::Vibration,
            "up_down_strong",
            EventAction::Start,
        )]);
        tick_range(&scheduler, 0.0, 5.0, 0.5);
        scheduler.stop_playback();

        let events = trace(&sink);
        assert_eq!(
            events.first(),
            Some(&(Effect::Vibration, "up_down_strong".into(), EventAction::Start))
        );
        assert_eq!(
            events.last(),
            Some(&(Effect::Vibration, "up_down_strong".into(), EventAction::Stop))
        );
        assert_eq!(events.len(), 2);
        assert!(!scheduler.stats().is_playing);
    }

    #[test]
    fn stop_playback_twice_is_idempotent() {
        let (scheduler, sink) =
            scheduler_with(vec![ev(0.0, Effect::Wind, "burst", EventAction::Start)]);
        scheduler.update_time(0.0, None);
        scheduler.stop_playback();
        let after_first = trace(&sink).len();
        scheduler.stop_playback();
        assert_eq!(trace(&sink).len(), after_first);
    }

    #[test]
    fn color_change_stops_old_before_starting_new() {
        let (scheduler, sink) = scheduler_with(vec![
            ev(0.0, Effect::Color, "red", EventAction::Start),
            ev(5.0, Effect::Color, "blue", EventAction::Start),
        ]);
        scheduler.update_time(0.0, None);
        scheduler.update_time(5.0, None);

        assert_eq!(
            trace(&sink),
            vec![
                (Effect::Color, "red".into(), EventAction::Start),
                (Effect::Color, "red".into(), EventAction::Stop),
                (Effect::Color, "blue".into(), EventAction::Start),
            ]
        );
    }

    #[test]
    fn no_emissions_while_stopped() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = TimelineScheduler::new(sink.clone());
        scheduler.load_timeline(
            Timeline::from_events(vec![ev(0.0, Effect::Wind, "burst", EventAction::Start)])
                .unwrap(),
        );
        // Never started
        tick_range(&scheduler, 0.0, 3.0, 0.5);
        assert!(sink.recorded().is_empty());
    }

    #[test]
    fn pause_state_halts_and_turns_off() {
        let (scheduler, sink) =
            scheduler_with(vec![ev(0.0, Effect::Wind, "burst", EventAction::Start)]);
        scheduler.update_time(0.0, Some(VideoState::Play));
        scheduler.update_time(1.0, Some(VideoState::Pause));

        assert_eq!(
            trace(&sink),
            vec![
                (Effect::Wind, "burst".into(), EventAction::Start),
                (Effect::Wind, "burst".into(), EventAction::Stop),
            ]
        );
        assert!(!scheduler.stats().is_playing);

        // Resuming restarts the still-active interval
        scheduler.update_time(1.5, Some(VideoState::Play));
        assert_eq!(trace(&sink).len(), 3);
    }

    #[test]
    fn load_replaces_timeline_and_resets_cursor() {
        let (scheduler, sink) =
            scheduler_with(vec![ev(0.0, Effect::Wind, "burst", EventAction::Start)]);
        scheduler.update_time(3.0, None);
        assert_eq!(trace(&sink).len(), 1);

        scheduler.load_timeline(
            Timeline::from_events(vec![ev(1.0, Effect::Water, "burst", EventAction::Shot)])
                .unwrap(),
        );
        // The wind interval from the old timeline is turned off on load
        assert_eq!(
            trace(&sink).last(),
            Some(&(Effect::Wind, "burst".into(), EventAction::Stop))
        );
        let stats = scheduler.stats();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.current_time, 0.0);
    }

    #[test]
    fn identical_tick_streams_yield_identical_traces() {
        let events = vec![
            ev(0.0, Effect::Wind, "burst", EventAction::Start),
            ev(0.0, Effect::Vibration, "down_weak", EventAction::Start),
            ev(2.0, Effect::Wind, "burst", EventAction::Stop),
            ev(3.0, Effect::Water, "burst", EventAction::Shot),
        ];
        let (a, sink_a) = scheduler_with(events.clone());
        let (b, sink_b) = scheduler_with(events);
        tick_range(&a, 0.0, 4.0, 0.5);
        tick_range(&b, 0.0, 4.0, 0.5);
        assert_eq!(trace(&sink_a), trace(&sink_b));
    }

    #[test]
    fn stats_track_progress() {
        let (scheduler, _sink) = scheduler_with(vec![
            ev(1.0, Effect::Water, "burst", EventAction::Shot),
            ev(10.0, Effect::Water, "burst", EventAction::Shot),
        ]);
        tick_range(&scheduler, 0.0, 5.0, 0.5);
        let stats = scheduler.stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.processed_events, 1);
        assert_eq!(stats.remaining_events, 1);
        assert!(stats.is_playing);
    }

    #[test]
    fn upcoming_events_respects_lookahead() {
        let (scheduler, _sink) = scheduler_with(vec![
            ev(1.0, Effect::Water, "burst", EventAction::Shot),
            ev(4.0, Effect::Wind, "burst", EventAction::Start),
            ev(30.0, Effect::Water, "burst", EventAction::Shot),
        ]);
        scheduler.update_time(0.5, None);
        let upcoming = scheduler.upcoming_events(5.0);
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].t, 1.0);
        assert_eq!(upcoming[1].t, 4.0);
    }
}
