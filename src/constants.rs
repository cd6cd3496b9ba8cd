// MIT License - Copyright (c) 2026 Peter Wright
// GMS protocol constants

use serde::Serialize;

/// Telegram framing bytes.
pub const TELEGRAM_START: u8 = 0x68;
pub const TELEGRAM_END: u8 = 0x16;

/// Smallest possible frame: start, len, len, start, control, address, checksum, end.
pub const MIN_TELEGRAM_LEN: usize = 8;

/// Control field values.
pub const SEND_NORM: u8 = 0x40; // announce
pub const SEND_NDAT: u8 = 0x73; // data
pub const CONFIRM_ACK: u8 = 0x00;
pub const CONFIRM_NAK: u8 = 0x01;

/// Address byte used for announce and confirm telegrams.
pub const ADDR_CONTROL: u8 = 0x02;
/// Address byte used for outbound data telegrams.
pub const ADDR_DATA: u8 = 0x01;

/// Address extensions.
pub const ADDR_EXT_INPUTS: u8 = 0x01;
pub const ADDR_EXT_OUTPUTS: u8 = 0x02;
pub const ADDR_EXT_OCCUPIED_INPUTS: u8 = 0x71;
pub const ADDR_EXT_OCCUPIED_OUTPUTS: u8 = 0x72;
pub const ADDR_EXT_AREA_INFO: u8 = 0x73;

/// First area-status output. Area `n` owns the 8 addresses starting at
/// `AREA_STATUS_BASE + 8 * (n - 1)`.
pub const AREA_STATUS_BASE: u16 = 0x0530;
pub const AREA_STATUS_LAST: u16 = 0x056F;

/// Command bytes for area commands (StateChange-shaped).
pub const CMD_ARM_AWAY: u8 = 0x61;
pub const CMD_ARM_HOME: u8 = 0x62;
pub const CMD_DISARM: u8 = 0xE1;

/// Block type codes (Satztypen) carried inside a data telegram payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    StateChange,
    AreaInfo,
    Query,
    Error,
    BlockStatus,
    DateTime,
    Ascii,
    Identification,
    Other(u8),
}

impl MessageType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => Self::StateChange,
            0x0C => Self::AreaInfo,
            0x10 => Self::Query,
            0x11 => Self::Error,
            0x24 => Self::BlockStatus,
            0x50 => Self::DateTime,
            0x54 => Self::Ascii,
            0x56 => Self::Identification,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::StateChange => 0x02,
            Self::AreaInfo => 0x0C,
            Self::Query => 0x10,
            Self::Error => 0x11,
            Self::BlockStatus => 0x24,
            Self::DateTime => 0x50,
            Self::Ascii => 0x54,
            Self::Identification => 0x56,
            Self::Other(code) => *code,
        }
    }
}

/// Meldungsarten: the low 7 bits of a state-change message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// 0x00 - Meldung
    Message,
    /// 0x10 - Brandmeldung
    Fire,
    /// 0x21 - Überfall
    Panic,
    /// 0x22 - Einbruch
    Burglary,
    /// 0x23 - Sabotage
    Sabotage,
    /// 0x30 - Störung
    Trouble,
    /// 0x32 - Störung Netz
    PowerTrouble,
    /// 0x33 - Störung Akku
    BatteryTrouble,
    /// 0x34 - Störung Übertragungsweg
    CommTrouble,
    /// 0x40 - Technische Meldung
    Technical,
    /// 0x41 - Technikalarm
    TechnicalAlarm,
    /// 0x51 - Abschaltung
    Bypass,
    /// 0x52 - Rücksetzen
    Reset,
    /// 0x53 - Neustart
    Restart,
    /// 0x61 - Sicherungsbereich scharf
    ArmAway,
    /// 0x62 - Internbereich ein
    ArmHome,
    Unknown,
}

impl AlarmKind {
    /// Look up a 7-bit message code. Unmapped codes are `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code & 0x7F {
            0x00 => Self::Message,
            0x10 => Self::Fire,
            0x21 => Self::Panic,
            0x22 => Self::Burglary,
            0x23 => Self::Sabotage,
            0x30 => Self::Trouble,
            0x32 => Self::PowerTrouble,
            0x33 => Self::BatteryTrouble,
            0x34 => Self::CommTrouble,
            0x40 => Self::Technical,
            0x41 => Self::TechnicalAlarm,
            0x51 => Self::Bypass,
            0x52 => Self::Reset,
            0x53 => Self::Restart,
            0x61 => Self::ArmAway,
            0x62 => Self::ArmHome,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Fire => "fire",
            Self::Panic => "panic",
            Self::Burglary => "burglary",
            Self::Sabotage => "sabotage",
            Self::Trouble => "trouble",
            Self::PowerTrouble => "power_trouble",
            Self::BatteryTrouble => "battery_trouble",
            Self::CommTrouble => "comm_trouble",
            Self::Technical => "technical",
            Self::TechnicalAlarm => "technical_alarm",
            Self::Bypass => "bypass",
            Self::Reset => "reset",
            Self::Restart => "restart",
            Self::ArmAway => "arm_away",
            Self::ArmHome => "arm_home",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes() {
        for code in [0x02, 0x0C, 0x10, 0x11, 0x24, 0x50, 0x54, 0x56, 0x99] {
            assert_eq!(MessageType::from_code(code).code(), code);
        }
        assert_eq!(MessageType::from_code(0x24), MessageType::BlockStatus);
        assert_eq!(MessageType::from_code(0x99), MessageType::Other(0x99));
    }

    #[test]
    fn test_alarm_kind_ignores_restore_bit() {
        assert_eq!(AlarmKind::from_code(0x22), AlarmKind::Burglary);
        assert_eq!(AlarmKind::from_code(0xA2), AlarmKind::Burglary);
        assert_eq!(AlarmKind::from_code(0xE1), AlarmKind::ArmAway);
        assert_eq!(AlarmKind::from_code(0x7F), AlarmKind::Unknown);
    }
}
