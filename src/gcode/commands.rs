// src/gcode/commands.rs - Command sequences behind the manual control buttons
use std::fmt;

/// Feedrate used for jogs when the speed field does not hold a whole number (mm/min).
pub const DEFAULT_JOG_FEEDRATE: u32 = 3000;
/// Filament length used when the amount field is not a positive number (mm).
pub const DEFAULT_EXTRUDE_MM: f64 = 5.0;
/// Extruder feedrate for manual extrude/retract (mm/min).
pub const EXTRUDE_FEEDRATE: u32 = 200;
pub const MAX_FAN_SPEED: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(letter)
    }
}

impl std::str::FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X" => Ok(Axis::X),
            "Y" => Ok(Axis::Y),
            "Z" => Ok(Axis::Z),
            other => Err(format!("unknown axis '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreheatProfile {
    pub name: &'static str,
    pub hotend: u32,
    pub bed: u32,
}

impl PreheatProfile {
    pub const PLA: PreheatProfile = PreheatProfile { name: "PLA", hotend: 200, bed: 60 };
    pub const ABS: PreheatProfile = PreheatProfile { name: "ABS", hotend: 230, bed: 100 };

    pub fn by_name(name: &str) -> Option<PreheatProfile> {
        [Self::PLA, Self::ABS]
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn commands(&self) -> Vec<String> {
        preheat(self.hotend, self.bed)
    }
}

/// Parse a feedrate field, falling back to [`DEFAULT_JOG_FEEDRATE`].
pub fn parse_feedrate(text: &str) -> u32 {
    match text.trim().parse::<u32>() {
        Ok(speed) => speed,
        Err(_) => {
            tracing::debug!("Invalid feedrate '{}', using {}", text, DEFAULT_JOG_FEEDRATE);
            DEFAULT_JOG_FEEDRATE
        }
    }
}

/// Parse an extrusion amount field, falling back to [`DEFAULT_EXTRUDE_MM`].
pub fn parse_extrude_amount(text: &str) -> f64 {
    match text.trim().parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount > 0.0 => amount,
        _ => {
            tracing::debug!("Invalid extrude amount '{}', using {}", text, DEFAULT_EXTRUDE_MM);
            DEFAULT_EXTRUDE_MM
        }
    }
}

/// Relative move of one axis, restoring absolute positioning afterwards.
pub fn jog(axis: Axis, distance: f64, speed_text: &str) -> Vec<String> {
    let speed = parse_feedrate(speed_text);
    relative(format!("G1 {}{} F{}", axis, distance, speed))
}

pub fn extrude(amount_text: &str) -> Vec<String> {
    let amount = parse_extrude_amount(amount_text);
    relative(format!("G1 E{} F{}", amount, EXTRUDE_FEEDRATE))
}

pub fn retract(amount_text: &str) -> Vec<String> {
    let amount = parse_extrude_amount(amount_text);
    relative(format!("G1 E-{} F{}", amount, EXTRUDE_FEEDRATE))
}

fn relative(mv: String) -> Vec<String> {
    vec!["G91".to_string(), mv, "G90".to_string()]
}

/// Set both targets without waiting, then block on the bed and the hotend.
pub fn preheat(hotend: u32, bed: u32) -> Vec<String> {
    vec![
        format!("M104 S{}", hotend),
        format!("M140 S{}", bed),
        format!("M190 S{}", bed),
        format!("M109 S{}", hotend),
    ]
}

pub fn fan_speed(value: i32) -> String {
    format!("M106 S{}", value.clamp(0, MAX_FAN_SPEED))
}

pub fn home_all() -> String {
    "G28".to_string()
}

pub fn reset() -> String {
    "M999".to_string()
}
