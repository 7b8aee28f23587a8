//! Logical commands and the per-family dispatch table
//! Every command knows its opcode; whether it applies to a family, and what
//! its payload looks like there, is decided by `Command::payload_for`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::protocol::auth::SecretKey;
use crate::core::protocol::device_type::DeviceType;
use crate::error::ProtocolError;

/// Command bytes of the vendor protocol.
pub mod opcode {
    pub const GET_VERSION: u8 = 0x01;
    pub const RUN: u8 = 0x03;
    pub const STOP: u8 = 0x04;
    pub const SET_MODE: u8 = 0x05;
    pub const GET_STATUS: u8 = 0x06;
    pub const APPLY_SPEED: u8 = 0x09;
    pub const SET_TEMPERATURE: u8 = 0x0B;
    pub const SET_TIMER_COOKER: u8 = 0x0C;
    pub const SET_IONIZATION: u8 = 0x1B;
    pub const SET_COLOR: u8 = 0x32;
    pub const GET_COLOR: u8 = 0x33;
    pub const SET_BACKLIGHT: u8 = 0x37;
    pub const SET_SOUND: u8 = 0x3C;
    pub const GET_STATS_ENERGY: u8 = 0x47;
    pub const GET_STATS_STARTS: u8 = 0x50;
    pub const SET_TIME: u8 = 0x6E;
    pub const AUTH: u8 = 0xFF;
}

/// Random byte the vendor app places in every colour stop.
const COLOR_STOP_TAG: u8 = 0x5e;
const BOIL_LIGHT_SCALE: [u8; 3] = [0x28, 0x46, 0x64];
const NIGHTLIGHT_SCALE: [u8; 3] = [0x00, 0x32, 0x64];

/// Kettle operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KettleMode {
    Boil = 0x00,
    Heat = 0x01,
    Nightlight = 0x03,
}

/// Which LED set a colour command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightTarget {
    Boil = 0x00,
    Nightlight = 0x01,
}

impl LightTarget {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Boil),
            0x01 => Some(Self::Nightlight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Rgb {
    type Err = ProtocolError;

    /// Parses `rrggbb`, with or without a leading `#`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || ProtocolError::InvalidArgument(format!("invalid colour {s:?}"));
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Eight-byte multicooker program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookProgram {
    pub program: u8,
    pub subprogram: u8,
    pub temperature: u8,
    pub hours: u8,
    pub minutes: u8,
    pub delay_hours: u8,
    pub delay_minutes: u8,
    /// Keep warm once the program finishes.
    pub heat_after: bool,
}

impl CookProgram {
    pub fn to_bytes(&self) -> [u8; 8] {
        [
            self.program,
            self.subprogram,
            self.temperature,
            self.hours,
            self.minutes,
            self.delay_hours,
            self.delay_minutes,
            u8::from(self.heat_after),
        ]
    }

    /// Looks up one of the built-in programs by name.
    pub fn preset(name: &str) -> Option<Self> {
        COOKER_PROGRAMS
            .iter()
            .find(|(preset, _)| *preset == name)
            .map(|(_, program)| *program)
    }

    /// Name of the built-in program with this program byte, if any.
    pub fn preset_name(program: u8) -> Option<&'static str> {
        COOKER_PROGRAMS
            .iter()
            .find(|(_, preset)| preset.program == program)
            .map(|(name, _)| *name)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        let check = |ok: bool, what: &str, value: u8| {
            if ok {
                Ok(())
            } else {
                Err(ProtocolError::InvalidArgument(format!(
                    "cook program {what} out of range: {value}"
                )))
            }
        };
        check(self.program <= 12, "program", self.program)?;
        check(self.subprogram <= 3, "subprogram", self.subprogram)?;
        check(
            (30..=180).contains(&self.temperature),
            "temperature",
            self.temperature,
        )?;
        check(self.hours <= 23, "hours", self.hours)?;
        check(self.minutes <= 59, "minutes", self.minutes)?;
        check(self.delay_hours <= 23, "delay hours", self.delay_hours)?;
        check(self.delay_minutes <= 59, "delay minutes", self.delay_minutes)
    }
}

const fn program(
    program: u8,
    subprogram: u8,
    temperature: u8,
    hours: u8,
    minutes: u8,
    heat_after: bool,
) -> CookProgram {
    CookProgram {
        program,
        subprogram,
        temperature,
        hours,
        minutes,
        delay_hours: 0,
        delay_minutes: 0,
        heat_after,
    }
}

/// Built-in multicooker programs.
pub const COOKER_PROGRAMS: &[(&str, CookProgram)] = &[
    ("rice", program(0x01, 0x00, 0x64, 0x00, 0x23, true)),
    ("slow_cooking", program(0x02, 0x00, 0x61, 0x03, 0x00, true)),
    ("pilaf", program(0x03, 0x00, 0x6e, 0x01, 0x00, true)),
    ("frying_vegetables", program(0x04, 0x01, 0xb4, 0x00, 0x12, true)),
    ("frying_fish", program(0x04, 0x02, 0xb4, 0x00, 0x0c, true)),
    ("frying_meat", program(0x04, 0x03, 0xb4, 0x00, 0x0f, true)),
    ("stewing_vegetables", program(0x05, 0x01, 0x64, 0x00, 0x28, true)),
    ("stewing_fish", program(0x05, 0x02, 0x64, 0x00, 0x23, true)),
    ("stewing_meat", program(0x05, 0x03, 0x64, 0x01, 0x00, true)),
    ("pasta", program(0x06, 0x00, 0x64, 0x00, 0x08, true)),
    ("milk_porridge", program(0x07, 0x00, 0x5f, 0x00, 0x23, true)),
    ("soup", program(0x08, 0x00, 0x63, 0x01, 0x00, true)),
    ("yogurt", program(0x09, 0x00, 0x28, 0x08, 0x00, false)),
    ("baking", program(0x0a, 0x00, 0x91, 0x00, 0x2d, true)),
    ("steam_vegetables", program(0x0b, 0x01, 0x64, 0x00, 0x1e, true)),
    ("steam_fish", program(0x0b, 0x02, 0x64, 0x00, 0x19, true)),
    ("steam_meat", program(0x0b, 0x03, 0x64, 0x00, 0x28, true)),
    ("hot", program(0x0c, 0x00, 0x64, 0x00, 0x28, true)),
];

/// A single protocol request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Auth(SecretKey),
    GetVersion,
    Run,
    Stop,
    /// Kettle mode with a target temperature (0 means "default").
    SetMode { mode: KettleMode, temperature: u8 },
    SetCookProgram(CookProgram),
    GetStatus,
    SetTemperature(u8),
    SetFanSpeed(u8),
    /// Latches a new fan speed.
    ApplySpeed,
    SetCookerTimer { hours: u8, minutes: u8 },
    SetIonization(bool),
    SetColor { target: LightTarget, color: Rgb },
    GetColor(LightTarget),
    SetBacklight(bool),
    SetSound(bool),
    GetStatsEnergy,
    GetStatsStarts,
    /// Device clock: UNIX seconds and timezone offset in seconds.
    SetTime { epoch: u32, tz_offset_secs: i32 },
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Auth(_) => opcode::AUTH,
            Self::GetVersion => opcode::GET_VERSION,
            Self::Run => opcode::RUN,
            Self::Stop => opcode::STOP,
            Self::SetMode { .. } | Self::SetCookProgram(_) => opcode::SET_MODE,
            Self::GetStatus => opcode::GET_STATUS,
            Self::SetTemperature(_) | Self::SetFanSpeed(_) => opcode::SET_TEMPERATURE,
            Self::ApplySpeed => opcode::APPLY_SPEED,
            Self::SetCookerTimer { .. } => opcode::SET_TIMER_COOKER,
            Self::SetIonization(_) => opcode::SET_IONIZATION,
            Self::SetColor { .. } => opcode::SET_COLOR,
            Self::GetColor(_) => opcode::GET_COLOR,
            Self::SetBacklight(_) => opcode::SET_BACKLIGHT,
            Self::SetSound(_) => opcode::SET_SOUND,
            Self::GetStatsEnergy => opcode::GET_STATS_ENERGY,
            Self::GetStatsStarts => opcode::GET_STATS_STARTS,
            Self::SetTime { .. } => opcode::SET_TIME,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::GetVersion => "get_version",
            Self::Run => "run",
            Self::Stop => "stop",
            Self::SetMode { .. } => "set_mode",
            Self::SetCookProgram(_) => "set_cook_program",
            Self::GetStatus => "get_status",
            Self::SetTemperature(_) => "set_temperature",
            Self::SetFanSpeed(_) => "set_fan_speed",
            Self::ApplySpeed => "apply_speed",
            Self::SetCookerTimer { .. } => "set_cooker_timer",
            Self::SetIonization(_) => "set_ionization",
            Self::SetColor { .. } => "set_color",
            Self::GetColor(_) => "get_color",
            Self::SetBacklight(_) => "set_backlight",
            Self::SetSound(_) => "set_sound",
            Self::GetStatsEnergy => "get_stats_energy",
            Self::GetStatsStarts => "get_stats_starts",
            Self::SetTime { .. } => "set_time",
        }
    }

    /// Payload of this command for a device family, or `None` when the
    /// family does not implement it. Callers treat `None` as a successful
    /// no-op so composite operations read the same for every family.
    pub fn payload_for(&self, device_type: DeviceType) -> Option<Vec<u8>> {
        use DeviceType::*;

        match (self, device_type) {
            (Self::Auth(key), _) => Some(key.as_bytes().to_vec()),
            (Self::GetVersion | Self::Stop | Self::GetStatus, _) => Some(Vec::new()),

            (Self::Run, Kettle) => None,
            (Self::Run, BacklitKettle | BacklitKettleB | Fan | Heater | Multicooker) => {
                Some(Vec::new())
            }

            (Self::SetMode { mode: KettleMode::Nightlight, .. }, Kettle) => None,
            (Self::SetMode { mode, temperature }, Kettle) => {
                Some(vec![*mode as u8, 0x00, *temperature, 0x00])
            }
            (Self::SetMode { mode, temperature }, BacklitKettle | BacklitKettleB) => {
                let mut payload = vec![*mode as u8, 0x00, *temperature];
                payload.extend_from_slice(&[0x00; 10]);
                payload.extend_from_slice(&[0x80, 0x00, 0x00]);
                Some(payload)
            }
            (Self::SetMode { .. }, Fan | Heater | Multicooker) => None,

            (Self::SetCookProgram(program), Multicooker) => Some(program.to_bytes().to_vec()),
            (Self::SetCookProgram(_), _) => None,

            (Self::SetTemperature(temperature), Multicooker) => Some(vec![*temperature]),
            (Self::SetTemperature(_), _) => None,

            (Self::SetFanSpeed(speed), Fan) => Some(vec![*speed]),
            (Self::ApplySpeed, Fan) => Some(vec![0x00]),
            (Self::SetIonization(on), Fan) => Some(vec![u8::from(*on)]),
            (Self::SetFanSpeed(_) | Self::ApplySpeed | Self::SetIonization(_), _) => None,

            (Self::SetCookerTimer { hours, minutes }, Multicooker) => Some(vec![*hours, *minutes]),
            (Self::SetCookerTimer { .. }, _) => None,

            (Self::SetColor { target, color }, BacklitKettle | BacklitKettleB) => {
                let scale = match target {
                    LightTarget::Boil => BOIL_LIGHT_SCALE,
                    LightTarget::Nightlight => NIGHTLIGHT_SCALE,
                };
                let mut payload = vec![*target as u8];
                for stop in scale {
                    payload.extend_from_slice(&[stop, COLOR_STOP_TAG, color.r, color.g, color.b]);
                }
                Some(payload)
            }
            (Self::GetColor(target), BacklitKettle | BacklitKettleB) => Some(vec![*target as u8]),
            (Self::SetBacklight(on), BacklitKettle | BacklitKettleB) => {
                Some(vec![0xc8, 0xc8, u8::from(*on)])
            }
            (Self::SetSound(on), BacklitKettle | BacklitKettleB) => Some(vec![u8::from(*on)]),
            (Self::SetTime { epoch, tz_offset_secs }, BacklitKettle | BacklitKettleB) => {
                let mut payload = epoch.to_le_bytes().to_vec();
                payload.extend_from_slice(&tz_offset_secs.to_le_bytes());
                Some(payload)
            }
            (
                Self::SetColor { .. }
                | Self::GetColor(_)
                | Self::SetBacklight(_)
                | Self::SetSound(_)
                | Self::SetTime { .. },
                Kettle | Fan | Heater | Multicooker,
            ) => None,

            (Self::GetStatsEnergy | Self::GetStatsStarts, _) => Some(vec![0x00]),
        }
    }
}
