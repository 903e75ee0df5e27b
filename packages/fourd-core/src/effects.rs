//! Effect → bus command mapping.
//!
//! Pure translation from `(effect, mode, action)` triples to ordered
//! lists of `(topic, payload)` bus commands. The mapping is a closed
//! set dictated by the actuator firmware; do not extend it without a
//! matching firmware change.

use crate::constants::{
    COLOR_BASELINE, TOPIC_COLOR, TOPIC_LIGHT, TOPIC_MOTOR1, TOPIC_MOTOR2, TOPIC_WATER, TOPIC_WIND,
};
use crate::timeline::{Effect, EventAction, TimelineEvent};

/// One command on the local bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusCommand {
    pub topic: &'static str,
    pub payload: &'static str,
}

impl BusCommand {
    const fn new(topic: &'static str, payload: &'static str) -> Self {
        Self { topic, payload }
    }
}

/// Stateless mapper from timeline events to bus commands.
pub struct EffectMapper;

impl EffectMapper {
    /// Maps a timeline event to its bus commands, in emission order.
    ///
    /// Captions are silently suppressed. Any other unmapped triple is
    /// not an error: it yields an empty list and a warn log.
    pub fn map_event(event: &TimelineEvent) -> Vec<BusCommand> {
        if event.action == EventAction::Caption {
            return Vec::new();
        }

        let Some(effect) = event.effect else {
            return Vec::new();
        };

        let commands = Self::map(effect, &event.mode, event.action);
        if commands.is_empty() {
            log::warn!(
                "[Mapper] unmapped event: effect={}, mode={}, action={:?}",
                effect,
                event.mode,
                event.action
            );
        }
        commands
    }

    /// Maps an `(effect, mode, action)` triple to bus commands.
    pub fn map(effect: Effect, mode: &str, action: EventAction) -> Vec<BusCommand> {
        match effect {
            Effect::Water => Self::map_water(action),
            Effect::Wind => Self::map_wind(action),
            Effect::Flash => Self::map_flash(mode, action),
            Effect::Color => Self::map_color(mode, action),
            Effect::Vibration => Self::map_vibration(mode, action),
        }
    }

    /// The canonical stop-all sequence, in fixed order.
    ///
    /// Returns every actuator to a known quiescent state. Color goes to
    /// the baseline rather than off so the LEDs keep a defined state.
    pub fn stop_all_commands() -> Vec<BusCommand> {
        vec![
            BusCommand::new(TOPIC_WIND, "OFF"),
            BusCommand::new(TOPIC_LIGHT, "OFF"),
            BusCommand::new(TOPIC_COLOR, COLOR_BASELINE),
            BusCommand::new(TOPIC_MOTOR1, "OFF"),
            BusCommand::new(TOPIC_MOTOR2, "OFF"),
        ]
    }

    // ─────────────────────────────────────────────────────────────────
    // Per-effect rules
    // ─────────────────────────────────────────────────────────────────

    /// Water fires on `shot` only, regardless of mode.
    fn map_water(action: EventAction) -> Vec<BusCommand> {
        match action {
            EventAction::Shot => vec![BusCommand::new(TOPIC_WATER, "trigger")],
            _ => Vec::new(),
        }
    }

    /// Wind is a plain on/off channel, regardless of mode.
    fn map_wind(action: EventAction) -> Vec<BusCommand> {
        match action {
            EventAction::Start => vec![BusCommand::new(TOPIC_WIND, "ON")],
            EventAction::Stop => vec![BusCommand::new(TOPIC_WIND, "OFF")],
            _ => Vec::new(),
        }
    }

    fn map_flash(mode: &str, action: EventAction) -> Vec<BusCommand> {
        if action == EventAction::Stop {
            return vec![BusCommand::new(TOPIC_LIGHT, "OFF")];
        }
        let payload = match mode {
            "steady" => "ON",
            "slow_blink" | "pulse" => "BLINK_SLOW",
            "fast_blink" | "burst" | "strobe" => "BLINK_FAST",
            _ => return Vec::new(),
        };
        vec![BusCommand::new(TOPIC_LIGHT, payload)]
    }

    fn map_color(mode: &str, action: EventAction) -> Vec<BusCommand> {
        if action == EventAction::Stop {
            // Back to baseline, never OFF
            return vec![BusCommand::new(TOPIC_COLOR, COLOR_BASELINE)];
        }
        let payload = match mode {
            "red" => "RED",
            "blue" => "BLUE",
            "green" => "GREEN",
            "yellow" => "YELLOW",
            "purple" => "PURPLE",
            "white" => "WHITE",
            "cyan" => "CYAN",
            _ => return Vec::new(),
        };
        vec![BusCommand::new(TOPIC_COLOR, payload)]
    }

    /// Vibration modes are region+intensity: `down_*` drives motor1,
    /// `up_*` motor2, `up_down_*` both. The special modes `heartbeat`,
    /// `long` and `strong` drive both motors.
    fn map_vibration(mode: &str, action: EventAction) -> Vec<BusCommand> {
        let Some((motor1, motor2, payload)) = Self::vibration_routing(mode) else {
            return Vec::new();
        };

        let payload = match action {
            EventAction::Start | EventAction::Shot => payload,
            // Stop turns off exactly the motors the start used
            EventAction::Stop => "OFF",
            EventAction::Caption => return Vec::new(),
        };

        let mut commands = Vec::with_capacity(2);
        if motor1 {
            commands.push(BusCommand::new(TOPIC_MOTOR1, payload));
        }
        if motor2 {
            commands.push(BusCommand::new(TOPIC_MOTOR2, payload));
        }
        commands
    }

    /// Resolves a vibration mode to `(motor1, motor2, payload)`.
    fn vibration_routing(mode: &str) -> Option<(bool, bool, &'static str)> {
        // Special whole-seat modes first
        match mode {
            "heartbeat" => return Some((true, true, "HEARTBEAT")),
            "long" => return Some((true, true, "RUMBLE_SLOW")),
            "strong" => return Some((true, true, "STRONG")),
            _ => {}
        }

        let (motor1, motor2, intensity) = if let Some(rest) = mode.strip_prefix("up_down_") {
            (true, true, rest)
        } else if let Some(rest) = mode.strip_prefix("down_") {
            (true, false, rest)
        } else if let Some(rest) = mode.strip_prefix("up_") {
            (false, true, rest)
        } else {
            return None;
        };

        let payload = match intensity {
            "weak" => "WEAK",
            "mid_weak" => "MEDIUM_WEAK",
            "mid_strong" => "MEDIUM_STRONG",
            "strong" => "STRONG",
            _ => return None,
        };

        Some((motor1, motor2, payload))
    }
}
