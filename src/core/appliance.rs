//! Appliance state model
//! Notifications are turned into a [`StateUpdate`] by [`parse_response`], a
//! pure function of device family and frame. The engine applies an update
//! to a copy of [`ApplianceState`] and publishes the copy as one snapshot.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::protocol::commands::{opcode, LightTarget, Rgb};
use crate::core::protocol::device_type::DeviceType;
use crate::core::protocol::frame::Frame;
use crate::error::ProtocolError;

/// Watts drawn by a kettle element; the energy counter divided by this
/// gives the reported work time in hours.
pub const NOMINAL_POWER_WATTS: f64 = 2200.0;

/// Appliance power state. Codes are family dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceStatus {
    Off,
    On,
    /// Cooker only: program selected, not started.
    Program,
    /// Cooker only.
    KeepWarm,
    /// Cooker only.
    DelayedStart,
    Unknown(u8),
}

impl ApplianceStatus {
    pub fn from_code(device_type: DeviceType, code: u8) -> Self {
        match (device_type, code) {
            (_, 0x00) => Self::Off,
            (_, 0x02) => Self::On,
            (DeviceType::Multicooker, 0x01) => Self::Program,
            (DeviceType::Multicooker, 0x04) => Self::KeepWarm,
            (DeviceType::Multicooker, 0x05) => Self::DelayedStart,
            (_, other) => Self::Unknown(other),
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn is_off(self) -> bool {
        self == Self::Off
    }
}

/// Operating mode. Codes are family dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceMode {
    Boil,
    /// Heat to the target temperature and keep it.
    Heat,
    Nightlight,
    FanSpeed(u8),
    /// Cooker: keep warm once the program ends.
    HeatAfterCook,
    /// Cooker: switch off once the program ends.
    OffAfterCook,
    Unknown(u8),
}

impl ApplianceMode {
    pub fn from_code(device_type: DeviceType, code: u8) -> Self {
        use DeviceType::*;

        match (device_type, code) {
            (Kettle | BacklitKettle | BacklitKettleB, 0x00) => Self::Boil,
            (Kettle | BacklitKettle | BacklitKettleB, 0x01) => Self::Heat,
            (BacklitKettle | BacklitKettleB, 0x03) => Self::Nightlight,
            (Fan, 0x00..=0x06) => Self::FanSpeed(code),
            (Multicooker, 0x00) => Self::HeatAfterCook,
            (Multicooker, 0x01) => Self::OffAfterCook,
            (_, other) => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClockTime {
    pub hours: u8,
    pub minutes: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

/// Everything known about one paired appliance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplianceState {
    pub device_type: DeviceType,
    pub name: String,
    pub current_temperature: u8,
    pub target_temperature: u8,
    pub status: ApplianceStatus,
    pub mode: ApplianceMode,
    pub program: u8,
    pub subprogram: u8,
    /// Program duration.
    pub program_time: ClockTime,
    /// Time left on the running program.
    pub timer: ClockTime,
    pub ionization: bool,
    pub nightlight_color: Rgb,
    pub boil_light_color: Rgb,
    pub sound_enabled: Option<bool>,
    /// Cumulative energy counter.
    pub energy_watt_seconds: u32,
    /// Energy counter converted to hours of work at nominal power.
    pub work_hours: f64,
    pub start_count: u32,
    pub firmware: Option<FirmwareVersion>,
    pub last_sync: Option<DateTime<Local>>,
    pub available: bool,
}

impl ApplianceState {
    pub fn new(device_type: DeviceType, name: impl Into<String>) -> Self {
        Self {
            device_type,
            name: name.into(),
            current_temperature: 0,
            target_temperature: device_type.default_target_temperature(),
            status: ApplianceStatus::Off,
            mode: ApplianceMode::from_code(device_type, 0x00),
            program: 0,
            subprogram: 0,
            program_time: ClockTime::default(),
            timer: ClockTime::default(),
            ionization: false,
            nightlight_color: Rgb::new(0x00, 0x00, 0xff),
            boil_light_color: Rgb::new(0xff, 0x00, 0x00),
            sound_enabled: None,
            energy_watt_seconds: 0,
            work_hours: 0.0,
            start_count: 0,
            firmware: None,
            last_sync: None,
            available: false,
        }
    }

    /// Name of the running cooker program, if it is a built-in one.
    pub fn program_name(&self) -> Option<&'static str> {
        if !self.device_type.is_cooker() || self.status.is_off() {
            return None;
        }
        crate::core::protocol::commands::CookProgram::preset_name(self.program)
    }

    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::Status(report) => {
                self.status = report.status;
                self.mode = report.mode;
                if let Some(temperature) = report.current_temperature {
                    self.current_temperature = temperature;
                }
                if let Some(target) = report.target_temperature {
                    self.target_temperature = target;
                }
                if let Some((program, subprogram)) = report.program {
                    self.program = program;
                    self.subprogram = subprogram;
                }
                if let Some(program_time) = report.program_time {
                    self.program_time = program_time;
                }
                if let Some(timer) = report.timer {
                    self.timer = timer;
                }
                if let Some(ionization) = report.ionization {
                    self.ionization = ionization;
                }
            }
            StateUpdate::Energy { watt_seconds } => {
                self.energy_watt_seconds = watt_seconds;
                self.work_hours = work_hours(watt_seconds);
            }
            StateUpdate::Starts { count } => self.start_count = count,
            StateUpdate::Version(version) => self.firmware = Some(version),
            StateUpdate::Color { target, color } => match target {
                LightTarget::Boil => self.boil_light_color = color,
                LightTarget::Nightlight => self.nightlight_color = color,
            },
            StateUpdate::Sound(enabled) => self.sound_enabled = Some(enabled),
        }
    }
}

/// Fields carried by a GET_STATUS response; `None` means the family's
/// layout has no such field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ApplianceStatus,
    pub mode: ApplianceMode,
    pub current_temperature: Option<u8>,
    pub target_temperature: Option<u8>,
    pub program: Option<(u8, u8)>,
    pub program_time: Option<ClockTime>,
    pub timer: Option<ClockTime>,
    pub ionization: Option<bool>,
}

impl StatusReport {
    fn new(device_type: DeviceType, status: u8, mode: u8) -> Self {
        Self {
            status: ApplianceStatus::from_code(device_type, status),
            mode: ApplianceMode::from_code(device_type, mode),
            current_temperature: None,
            target_temperature: None,
            program: None,
            program_time: None,
            timer: None,
            ionization: None,
        }
    }
}

/// State diff extracted from one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Status(StatusReport),
    Energy { watt_seconds: u32 },
    Starts { count: u32 },
    Version(FirmwareVersion),
    Color { target: LightTarget, color: Rgb },
    Sound(bool),
}

/// Energy counter to hours at nominal power, rounded to one decimal.
pub fn work_hours(watt_seconds: u32) -> f64 {
    (f64::from(watt_seconds) / NOMINAL_POWER_WATTS * 10.0).round() / 10.0
}

/// Interprets a notification for the given family. Frames that carry no
/// state (acks of set-commands) yield `Ok(None)`. Length is validated
/// before any field is read, so a short frame never produces a partial
/// update.
pub fn parse_response(
    device_type: DeviceType,
    frame: &Frame,
) -> Result<Option<StateUpdate>, ProtocolError> {
    let update = match frame.command {
        opcode::GET_STATUS => StateUpdate::Status(parse_status(device_type, frame)?),
        opcode::GET_STATS_ENERGY => StateUpdate::Energy {
            watt_seconds: frame.le_value(9..=11)?,
        },
        opcode::GET_STATS_STARTS => StateUpdate::Starts {
            count: frame.le_value(6..=7)?,
        },
        opcode::GET_VERSION => {
            frame.require_tokens(4)?;
            StateUpdate::Version(FirmwareVersion {
                major: frame.token(3)?,
                minor: frame.token(4)?,
            })
        }
        opcode::GET_COLOR => {
            frame.require_tokens(8)?;
            let target = LightTarget::from_code(frame.token(3)?).ok_or_else(|| {
                ProtocolError::MalformedFrame(format!(
                    "unknown light target 0x{:02x}",
                    frame.payload[0]
                ))
            })?;
            StateUpdate::Color {
                target,
                color: Rgb::new(frame.token(6)?, frame.token(7)?, frame.token(8)?),
            }
        }
        opcode::SET_SOUND => StateUpdate::Sound(frame.token(3)? != 0),
        _ => return Ok(None),
    };
    Ok(Some(update))
}

fn parse_status(device_type: DeviceType, frame: &Frame) -> Result<StatusReport, ProtocolError> {
    let t = |index| frame.token(index);

    let report = match device_type {
        DeviceType::Kettle | DeviceType::BacklitKettle | DeviceType::BacklitKettleB => {
            let temperature_token = if device_type == DeviceType::Kettle { 13 } else { 8 };
            frame.require_tokens(temperature_token.max(11))?;

            let mut report = StatusReport::new(device_type, t(11)?, t(3)?);
            report.current_temperature = Some(t(temperature_token)?);
            report.target_temperature = Some(match t(5)? {
                0x00 => device_type.default_target_temperature(),
                target => target,
            });
            report
        }
        DeviceType::Fan => {
            frame.require_tokens(14)?;
            let mut report = StatusReport::new(device_type, t(11)?, t(5)?);
            report.ionization = Some(t(14)? == 0x01);
            report
        }
        DeviceType::Heater => {
            frame.require_tokens(11)?;
            StatusReport::new(device_type, t(11)?, t(3)?)
        }
        DeviceType::Multicooker => {
            frame.require_tokens(11)?;
            let mut report = StatusReport::new(device_type, t(11)?, t(10)?);
            report.program = Some((t(3)?, t(4)?));
            report.current_temperature = Some(t(5)?);
            report.target_temperature = Some(t(5)?);
            report.program_time = Some(ClockTime {
                hours: t(6)?,
                minutes: t(7)?,
            });
            report.timer = Some(ClockTime {
                hours: t(8)?,
                minutes: t(9)?,
            });
            report
        }
    };
    Ok(report)
}
