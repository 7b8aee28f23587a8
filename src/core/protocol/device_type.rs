//! Appliance families and the advertised-name lookup table.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Closed set of supported appliance families. The discriminant is the
/// type code the vendor firmware families are known by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Boil-only kettle.
    Kettle = 0,
    /// Kettle with nightlight backlight, firmware variant A.
    BacklitKettle = 1,
    /// Kettle with nightlight backlight, firmware variant B.
    BacklitKettleB = 2,
    /// Humidifier / fan with ionizer.
    Fan = 3,
    /// Simple on/off heater or socket.
    Heater = 4,
    Multicooker = 5,
}

/// Advertised BLE names and the family they belong to.
pub const SUPPORTED_DEVICES: &[(&str, DeviceType)] = &[
    ("RK-M170S", DeviceType::Kettle),
    ("RK-M171S", DeviceType::Kettle),
    ("RK-M173S", DeviceType::Kettle),
    ("RK-G200S", DeviceType::BacklitKettleB),
    ("RK-G200S-E", DeviceType::BacklitKettleB),
    ("RK-G201S", DeviceType::BacklitKettle),
    ("RK-G202S", DeviceType::BacklitKettle),
    ("RK-G203S", DeviceType::BacklitKettle),
    ("RK-G210S", DeviceType::BacklitKettle),
    ("RK-G211S", DeviceType::BacklitKettle),
    ("RK-G212S", DeviceType::BacklitKettle),
    ("RK-G214S", DeviceType::BacklitKettle),
    ("RK-G240S", DeviceType::BacklitKettle),
    ("RK-M216S", DeviceType::BacklitKettleB),
    ("RK-M216S-E", DeviceType::BacklitKettleB),
    ("RAC-3706S", DeviceType::Fan),
    ("RFS-HPL001", DeviceType::Heater),
    ("RSP-103S", DeviceType::Heater),
    ("RCH-7001S", DeviceType::Heater),
    ("RMC-M800S", DeviceType::Multicooker),
    ("RMC-M223S", DeviceType::Multicooker),
    ("RMC-M92S", DeviceType::Multicooker),
    ("RMC-M92S-E", DeviceType::Multicooker),
    ("RMC-M40S", DeviceType::Multicooker),
    // generic names of the bluetooth modules fitted to some kettles
    ("RFS-KKL002", DeviceType::BacklitKettle),
    ("RFS-KKL003", DeviceType::BacklitKettle),
    ("RFS-KKL004", DeviceType::BacklitKettle),
];

impl DeviceType {
    /// Resolves the family from the advertised device name.
    pub fn from_model_name(name: &str) -> Result<Self, ProtocolError> {
        let name = name.trim();
        SUPPORTED_DEVICES
            .iter()
            .find(|(model, _)| *model == name)
            .map(|(_, device_type)| *device_type)
            .ok_or_else(|| ProtocolError::UnsupportedDevice(name.to_string()))
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Kettle),
            1 => Some(Self::BacklitKettle),
            2 => Some(Self::BacklitKettleB),
            3 => Some(Self::Fan),
            4 => Some(Self::Heater),
            5 => Some(Self::Multicooker),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_kettle(self) -> bool {
        matches!(
            self,
            Self::Kettle | Self::BacklitKettle | Self::BacklitKettleB
        )
    }

    pub fn has_backlight(self) -> bool {
        matches!(self, Self::BacklitKettle | Self::BacklitKettleB)
    }

    pub fn is_cooker(self) -> bool {
        matches!(self, Self::Multicooker)
    }

    /// Payload byte at token 3 of an AUTH response that means "accepted".
    /// Variant B kettles answer 0x02, every other family 0x01.
    pub fn auth_success_code(self) -> u8 {
        match self {
            Self::BacklitKettleB => 0x02,
            Self::Kettle
            | Self::BacklitKettle
            | Self::Fan
            | Self::Heater
            | Self::Multicooker => 0x01,
        }
    }

    /// Clock sync is sent only to backlit kettles with the backlight enabled.
    pub fn clock_sync_requires_backlight(self) -> bool {
        self.has_backlight()
    }

    /// Accepted target temperatures in °C, if the family has a thermostat.
    pub fn temperature_range(self) -> Option<RangeInclusive<u8>> {
        match self {
            Self::Kettle | Self::BacklitKettle | Self::BacklitKettleB => Some(40..=100),
            Self::Multicooker => Some(30..=180),
            Self::Fan | Self::Heater => None,
        }
    }

    /// Target reported when a status frame carries 0 as target.
    pub fn default_target_temperature(self) -> u8 {
        self.temperature_range().map(|r| *r.end()).unwrap_or(0)
    }

    /// Cookers need a STOP before reconfiguring in any status but OFF;
    /// other families only while ON.
    pub fn stop_required_unless_off(self) -> bool {
        self.is_cooker()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Kettle => "kettle",
            Self::BacklitKettle => "backlit kettle",
            Self::BacklitKettleB => "backlit kettle (variant B)",
            Self::Fan => "fan",
            Self::Heater => "heater",
            Self::Multicooker => "multicooker",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_models() {
        assert_eq!(
            DeviceType::from_model_name("RK-M173S").unwrap(),
            DeviceType::Kettle
        );
        assert_eq!(
            DeviceType::from_model_name("RK-G200S").unwrap(),
            DeviceType::BacklitKettleB
        );
        assert_eq!(
            DeviceType::from_model_name("RFS-KKL003").unwrap(),
            DeviceType::BacklitKettle
        );
        assert_eq!(
            DeviceType::from_model_name("RMC-M40S").unwrap(),
            DeviceType::Multicooker
        );
    }

    #[test]
    fn unknown_model_is_unsupported() {
        assert_eq!(
            DeviceType::from_model_name("RK-X999"),
            Err(ProtocolError::UnsupportedDevice("RK-X999".into()))
        );
    }

    #[test]
    fn codes_round_trip() {
        for code in 0..=5 {
            assert_eq!(DeviceType::from_code(code).unwrap().code(), code);
        }
        assert!(DeviceType::from_code(6).is_none());
    }

    #[test]
    fn only_variant_b_uses_auth_code_two() {
        assert_eq!(DeviceType::BacklitKettleB.auth_success_code(), 0x02);
        for code in [0, 1, 3, 4, 5] {
            let device_type = DeviceType::from_code(code).unwrap();
            assert_eq!(device_type.auth_success_code(), 0x01);
        }
    }

    #[test]
    fn kettle_default_target_is_max() {
        assert_eq!(DeviceType::Kettle.default_target_temperature(), 100);
        assert_eq!(DeviceType::Multicooker.default_target_temperature(), 180);
    }
}
