//! Canonical telemetry record.
//!
//! Decoded payloads arrive with either snake_case or camelCase field names
//! depending on how the schema was loaded. [`TelemetryRecord::from_dynamic`]
//! maps both onto one shape and applies unit conversions once.

use crate::schema::{DynamicRecord, DynamicValue};
use serde::{Deserialize, Serialize};

pub const MPS_TO_MPH: f64 = 2.23694;
pub const MPS_TO_KPH: f64 = 3.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum AutopilotState {
    #[default]
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "FSD")]
    Fsd,
    #[serde(rename = "AUTOSTEER")]
    Autosteer,
    #[serde(rename = "TACC")]
    Tacc,
}

impl AutopilotState {
    /// Unknown codes resolve to `Off`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => AutopilotState::Fsd,
            2 => AutopilotState::Autosteer,
            3 => AutopilotState::Tacc,
            _ => AutopilotState::Off,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AutopilotState::Off => "OFF",
            AutopilotState::Fsd => "FSD",
            AutopilotState::Autosteer => "AUTOSTEER",
            AutopilotState::Tacc => "TACC",
        }
    }

    pub fn is_engaged(&self) -> bool {
        *self != AutopilotState::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Gear {
    #[default]
    #[serde(rename = "P")]
    Park,
    #[serde(rename = "D")]
    Drive,
    #[serde(rename = "R")]
    Reverse,
    #[serde(rename = "N")]
    Neutral,
}

impl Gear {
    /// Unknown codes resolve to `Park`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Gear::Drive,
            2 => Gear::Reverse,
            3 => Gear::Neutral,
            _ => Gear::Park,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Gear::Park => "P",
            Gear::Drive => "D",
            Gear::Reverse => "R",
            Gear::Neutral => "N",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Speed {
    pub mps: f64,
    pub mph: f64,
    pub kph: f64,
}

impl Speed {
    pub fn from_mps(mps: f64) -> Self {
        Self {
            mps,
            mph: mps * MPS_TO_MPH,
            kph: mps * MPS_TO_KPH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GpsFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub heading: f64,
}

impl GpsFix {
    /// Both coordinates present, finite and inside geographic range.
    pub fn is_valid(&self) -> bool {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                lat.is_finite()
                    && lon.is_finite()
                    && (-90.0..=90.0).contains(&lat)
                    && (-180.0..=180.0).contains(&lon)
            }
            _ => false,
        }
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        if self.is_valid() {
            self.latitude.zip(self.longitude)
        } else {
            None
        }
    }
}

/// Linear acceleration in m/s^2; `x` is longitudinal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Thresholds for the per-record regenerative braking classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenThresholds {
    /// Longitudinal acceleration must be below this (m/s^2).
    pub max_longitudinal_accel: f64,
    /// Accelerator pedal must be below this (percent).
    pub max_accelerator_pct: f64,
    /// Speed must exceed this (m/s).
    pub min_speed_mps: f64,
}

impl Default for RegenThresholds {
    fn default() -> Self {
        Self {
            max_longitudinal_accel: -0.5,
            max_accelerator_pct: 5.0,
            min_speed_mps: 0.5,
        }
    }
}

impl RegenThresholds {
    /// Stateless: no hysteresis between consecutive records.
    pub fn classify(&self, r: &TelemetryRecord) -> bool {
        r.acceleration.x < self.max_longitudinal_accel
            && r.accelerator < self.max_accelerator_pct
            && !r.brake_applied
            && r.speed.mps > self.min_speed_mps
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TelemetryRecord {
    pub version: u32,
    /// Session-wide counter; not a position within the file.
    pub frame_seq_no: u64,
    pub speed: Speed,
    pub steering_angle: f64,
    /// Accelerator pedal position, clamped into 0..=100.
    pub accelerator: f64,
    pub brake_applied: bool,
    pub blinker_left: bool,
    pub blinker_right: bool,
    pub gear: Gear,
    pub autopilot: AutopilotState,
    pub gps: GpsFix,
    pub acceleration: Acceleration,
    /// Set by the indexer.
    pub regen_braking: bool,
}

fn field<'a>(rec: &'a DynamicRecord, camel: &str, snake: &str) -> Option<&'a DynamicValue> {
    rec.get_any(&[camel, snake])
}

fn number(rec: &DynamicRecord, camel: &str, snake: &str) -> f64 {
    field(rec, camel, snake)
        .and_then(DynamicValue::as_f64)
        .unwrap_or(0.0)
}

fn flag(rec: &DynamicRecord, camel: &str, snake: &str) -> bool {
    field(rec, camel, snake)
        .and_then(DynamicValue::as_bool)
        .unwrap_or(false)
}

fn code(rec: &DynamicRecord, camel: &str, snake: &str) -> i64 {
    field(rec, camel, snake)
        .and_then(DynamicValue::as_i64)
        .unwrap_or(0)
}

impl TelemetryRecord {
    pub fn from_dynamic(rec: &DynamicRecord) -> Self {
        let accelerator = number(rec, "acceleratorPedalPosition", "accelerator_pedal_position");
        let accelerator = if accelerator.is_nan() {
            0.0
        } else {
            accelerator.clamp(0.0, 100.0)
        };

        Self {
            version: code(rec, "version", "version").clamp(0, u32::MAX as i64) as u32,
            frame_seq_no: field(rec, "frameSeqNo", "frame_seq_no")
                .and_then(DynamicValue::as_u64)
                .unwrap_or(0),
            speed: Speed::from_mps(number(rec, "vehicleSpeedMps", "vehicle_speed_mps")),
            steering_angle: number(rec, "steeringWheelAngle", "steering_wheel_angle"),
            accelerator,
            brake_applied: flag(rec, "brakeApplied", "brake_applied"),
            blinker_left: flag(rec, "blinkerOnLeft", "blinker_on_left"),
            blinker_right: flag(rec, "blinkerOnRight", "blinker_on_right"),
            gear: Gear::from_code(code(rec, "gearState", "gear_state")),
            autopilot: AutopilotState::from_code(code(rec, "autopilotState", "autopilot_state")),
            gps: GpsFix {
                latitude: field(rec, "latitudeDeg", "latitude_deg").and_then(DynamicValue::as_f64),
                longitude: field(rec, "longitudeDeg", "longitude_deg")
                    .and_then(DynamicValue::as_f64),
                heading: number(rec, "headingDeg", "heading_deg"),
            },
            acceleration: Acceleration {
                x: number(rec, "linearAccelerationMps2X", "linear_acceleration_mps2_x"),
                y: number(rec, "linearAccelerationMps2Y", "linear_acceleration_mps2_y"),
                z: number(rec, "linearAccelerationMps2Z", "linear_acceleration_mps2_z"),
            },
            regen_braking: false,
        }
    }

    pub fn has_valid_gps(&self) -> bool {
        self.gps.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic(pairs: &[(&str, DynamicValue)]) -> DynamicRecord {
        let mut rec = DynamicRecord::default();
        for (name, value) in pairs {
            rec.insert(*name, value.clone());
        }
        rec
    }

    #[test]
    fn both_naming_conventions_normalize_alike() {
        let snake = dynamic(&[
            ("vehicle_speed_mps", DynamicValue::Double(10.0)),
            ("autopilot_state", DynamicValue::Enum { number: 2, name: None }),
            ("blinker_on_left", DynamicValue::Bool(true)),
        ]);
        let camel = dynamic(&[
            ("vehicleSpeedMps", DynamicValue::Double(10.0)),
            ("autopilotState", DynamicValue::Enum { number: 2, name: None }),
            ("blinkerOnLeft", DynamicValue::Bool(true)),
        ]);
        let a = TelemetryRecord::from_dynamic(&snake);
        let b = TelemetryRecord::from_dynamic(&camel);
        assert_eq!(a, b);
        assert_eq!(a.autopilot.name(), "AUTOSTEER");
        assert!(a.blinker_left);
    }

    #[test]
    fn speed_converts_once() {
        let r = TelemetryRecord::from_dynamic(&dynamic(&[("vehicleSpeedMps", DynamicValue::Double(10.0))]));
        assert!((r.speed.mph - 22.3694).abs() < 1e-9);
        assert!((r.speed.kph - 36.0).abs() < 1e-9);
    }

    #[test]
    fn accelerator_is_clamped() {
        let high = TelemetryRecord::from_dynamic(&dynamic(&[(
            "acceleratorPedalPosition",
            DynamicValue::Double(150.0),
        )]));
        let low = TelemetryRecord::from_dynamic(&dynamic(&[(
            "accelerator_pedal_position",
            DynamicValue::Double(-10.0),
        )]));
        assert_eq!(high.accelerator, 100.0);
        assert_eq!(low.accelerator, 0.0);
    }

    #[test]
    fn unknown_enum_codes_use_first_member() {
        let r = TelemetryRecord::from_dynamic(&dynamic(&[
            ("gearState", DynamicValue::Enum { number: 9, name: None }),
            ("autopilotState", DynamicValue::Enum { number: -1, name: None }),
        ]));
        assert_eq!(r.gear, Gear::Park);
        assert_eq!(r.autopilot, AutopilotState::Off);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let r = TelemetryRecord::from_dynamic(&DynamicRecord::default());
        assert_eq!(r, TelemetryRecord::default());
        assert!(!r.has_valid_gps());
    }

    #[test]
    fn gps_range_check() {
        let mut gps = GpsFix {
            latitude: Some(91.0),
            longitude: Some(10.0),
            heading: 0.0,
        };
        assert!(!gps.is_valid());
        gps.latitude = Some(37.4);
        assert_eq!(gps.position(), Some((37.4, 10.0)));
        gps.longitude = None;
        assert!(!gps.is_valid());
    }

    #[test]
    fn regen_needs_every_condition() {
        let mut r = TelemetryRecord {
            speed: Speed::from_mps(10.0),
            accelerator: 0.0,
            acceleration: Acceleration {
                x: -1.2,
                ..Default::default()
            },
            ..Default::default()
        };
        let t = RegenThresholds::default();
        assert!(t.classify(&r));
        r.brake_applied = true;
        assert!(!t.classify(&r));
        r.brake_applied = false;
        r.accelerator = 5.0;
        assert!(!t.classify(&r));
        r.accelerator = 0.0;
        r.speed = Speed::from_mps(0.4);
        assert!(!t.classify(&r));
    }
}
