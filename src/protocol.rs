// MIT License - Copyright (c) 2026 Peter Wright
// Outbound commands

use crate::config::ArmType;
use crate::constants::{
    MessageType, ADDR_CONTROL, ADDR_DATA, ADDR_EXT_AREA_INFO, ADDR_EXT_INPUTS, ADDR_EXT_OUTPUTS,
    AREA_STATUS_BASE, AREA_STATUS_LAST, CMD_ARM_AWAY, CMD_ARM_HOME, CMD_DISARM, CONFIRM_ACK,
    SEND_NDAT, SEND_NORM, TELEGRAM_END,
};
use crate::error::{GmsError, Result};
use crate::telegram;

/// Number of areas whose status outputs fit in `0x0530..=0x056F`.
pub const MAX_AREAS: u8 = ((AREA_STATUS_LAST - AREA_STATUS_BASE + 1) / 8) as u8;

/// Commands that can be sent to the panel.
///
/// # Exchanges
///
/// Area commands go through the two-phase handshake: an announce telegram
/// (`SEND_NORM`) that the panel must acknowledge, followed by a data
/// telegram (`SEND_NDAT`) carrying one message block, acknowledged again.
///
/// The contact-info and used-state queries are written as complete
/// pre-framed telegrams; the panel answers them with ordinary data
/// telegrams read by the listener or the discovery engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SEND_NORM` announce, address `0x02`, empty payload.
    Announce,
    /// `CONFIRM_ACK`, address `0x02`, empty payload. Sent after every
    /// announce or data telegram received from the panel.
    ConfirmAck,
    /// Sicherungsbereich scharf. Command byte `0x61`.
    ArmAway { area: u8 },
    /// Internbereich ein. Command byte `0x62`.
    ArmHome { area: u8 },
    /// Unscharf. Command byte `0xE1`.
    Disarm { area: u8 },
    /// Two query blocks (type `0x10`) asking for input and output block status.
    StatusQuery,
    /// Name query for one address.
    /// Template `68 09 09 68 73 02 05 10 00 AH AL 73 0C <cs> 16`.
    ContactInfo { address: u16 },
    /// Belegtstatus query for an occupied-inputs (`0x71`) or
    /// occupied-outputs (`0x72`) extension.
    /// Template `68 09 09 68 73 02 05 10 00 00 00 <ext> 24 <cs> 16`.
    UsedState { extension: u8 },
}

impl Command {
    /// Create an arm command from an ArmType.
    pub fn arm(area: u8, arm_type: ArmType) -> Self {
        match arm_type {
            ArmType::Away => Command::ArmAway { area },
            ArmType::Home => Command::ArmHome { area },
        }
    }

    /// The `(message type, content)` block sent in the data phase of a
    /// two-phase exchange, for commands that use one.
    pub fn message(&self) -> Result<Option<(MessageType, Vec<u8>)>> {
        match self.area_command() {
            Some((area, command)) => Ok(Some((
                MessageType::StateChange,
                area_command_content(area, command)?,
            ))),
            None => Ok(None),
        }
    }

    /// Whether this command needs the announce/data handshake.
    pub fn is_two_phase(&self) -> bool {
        self.area_command().is_some()
    }

    fn area_command(&self) -> Option<(u8, u8)> {
        match self {
            Command::ArmAway { area } => Some((*area, CMD_ARM_AWAY)),
            Command::ArmHome { area } => Some((*area, CMD_ARM_HOME)),
            Command::Disarm { area } => Some((*area, CMD_DISARM)),
            _ => None,
        }
    }

    /// The complete frame for this command.
    ///
    /// For two-phase commands this is the data-phase telegram.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let frame = match self {
            Command::Announce => telegram::encode(SEND_NORM, ADDR_CONTROL, &[]),
            Command::ConfirmAck => telegram::encode(CONFIRM_ACK, ADDR_CONTROL, &[]),
            Command::StatusQuery => telegram::encode(SEND_NDAT, ADDR_DATA, &status_query_payload()),
            Command::ContactInfo { address } => {
                let [hi, lo] = address.to_be_bytes();
                prefixed_query(&[0x05, 0x10, 0x00, hi, lo, ADDR_EXT_AREA_INFO, 0x0C])
            }
            Command::UsedState { extension } => {
                prefixed_query(&[0x05, 0x10, 0x00, 0x00, 0x00, *extension, 0x24])
            }
            Command::ArmAway { area } => area_frame(*area, CMD_ARM_AWAY)?,
            Command::ArmHome { area } => area_frame(*area, CMD_ARM_HOME)?,
            Command::Disarm { area } => area_frame(*area, CMD_DISARM)?,
        };
        Ok(frame)
    }
}

fn area_frame(area: u8, command: u8) -> Result<Vec<u8>> {
    let content = area_command_content(area, command)?;
    let payload = data_payload(MessageType::StateChange.code(), &content);
    Ok(telegram::encode(SEND_NDAT, ADDR_DATA, &payload))
}

/// Wrap one block as a data payload: `[content.len() + 1, type, content...]`.
pub fn data_payload(msg_type: u8, content: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(content.len() + 2);
    payload.push((content.len() + 1) as u8);
    payload.push(msg_type);
    payload.extend_from_slice(content);
    payload
}

/// StateChange-shaped content addressed at the area's status output:
/// `[device/area, addr_hi, addr_lo, ADDR_EXT_OUTPUTS, command]`.
pub fn area_command_content(area: u8, command: u8) -> Result<Vec<u8>> {
    if area == 0 || area > MAX_AREAS {
        return Err(GmsError::InvalidArea { area, max: MAX_AREAS });
    }
    let [hi, lo] = (AREA_STATUS_BASE + (area as u16 - 1)).to_be_bytes();
    Ok(vec![0x00, hi, lo, ADDR_EXT_OUTPUTS, command])
}

/// Query blocks for all inputs (from `0x0000`) and all outputs (from `0x0500`).
pub fn status_query_payload() -> Vec<u8> {
    let query = MessageType::Query.code();
    let mut payload = data_payload(query, &[0x00, 0x00, 0x00, ADDR_EXT_INPUTS]);
    payload.extend(data_payload(query, &[0x00, 0x05, 0x00, ADDR_EXT_OUTPUTS]));
    payload
}

/// Checksum of a pre-framed query: the sum of the `frame[1]` bytes that
/// start at offset 4, modulo 256.
pub fn query_checksum(frame: &[u8]) -> u8 {
    let Some(&declared) = frame.get(1) else {
        return 0;
    };
    let end = (4 + declared as usize).min(frame.len());
    frame
        .get(4..end)
        .unwrap_or_default()
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// `68 09 09 68 73 02 <body> <cs> 16` for a 7-byte query body.
fn prefixed_query(body: &[u8; 7]) -> Vec<u8> {
    let mut frame = vec![0x68, 0x09, 0x09, 0x68, SEND_NDAT, ADDR_CONTROL];
    frame.extend_from_slice(body);
    frame.push(query_checksum(&frame));
    frame.push(TELEGRAM_END);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(frame: &[u8]) -> String {
        frame.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_announce_and_ack_frames() {
        assert_eq!(hex(&Command::Announce.to_frame().unwrap()), "6802026840024216");
        assert_eq!(hex(&Command::ConfirmAck.to_frame().unwrap()), "6802026800020216");
    }

    #[test]
    fn test_arm_away_message() {
        let (msg_type, content) = Command::ArmAway { area: 1 }.message().unwrap().unwrap();
        assert_eq!(msg_type, MessageType::StateChange);
        assert_eq!(content, vec![0x00, 0x05, 0x30, ADDR_EXT_OUTPUTS, 0x61]);
    }

    #[test]
    fn test_area_command_bytes() {
        let content = |cmd: Command| cmd.message().unwrap().unwrap().1;
        assert_eq!(content(Command::arm(2, ArmType::Home)), vec![0x00, 0x05, 0x31, 0x02, 0x62]);
        assert_eq!(content(Command::Disarm { area: 8 }), vec![0x00, 0x05, 0x37, 0x02, 0xE1]);
    }

    #[test]
    fn test_invalid_area() {
        assert!(matches!(
            Command::ArmAway { area: 0 }.message(),
            Err(GmsError::InvalidArea { area: 0, max: 8 })
        ));
        assert!(Command::Disarm { area: 9 }.to_frame().is_err());
    }

    #[test]
    fn test_arm_away_data_frame() {
        let frame = Command::ArmAway { area: 1 }.to_frame().unwrap();
        let decoded = telegram::decode(&frame).unwrap();
        assert_eq!(decoded.control, SEND_NDAT);
        assert_eq!(decoded.address, ADDR_DATA);
        assert_eq!(decoded.payload, vec![0x06, 0x02, 0x00, 0x05, 0x30, 0x02, 0x61]);
    }

    #[test]
    fn test_contact_info_query() {
        let frame = Command::ContactInfo { address: 0x0001 }.to_frame().unwrap();
        assert_eq!(hex(&frame), "6809096873020510000001730c0a16");
    }

    #[test]
    fn test_two_phase_commands() {
        assert!(Command::ArmAway { area: 1 }.is_two_phase());
        assert!(Command::Disarm { area: 3 }.is_two_phase());
        assert!(!Command::ContactInfo { address: 1 }.is_two_phase());
        assert!(!Command::StatusQuery.is_two_phase());
        assert_eq!(Command::StatusQuery.message().unwrap(), None);
    }

    #[test]
    fn test_used_state_query_matches_known_frame() {
        let extension = crate::constants::ADDR_EXT_OCCUPIED_INPUTS;
        let frame = Command::UsedState { extension }.to_frame().unwrap();
        assert_eq!(hex(&frame), "680909687302051000000071241f16");
    }

    #[test]
    fn test_query_checksum_agrees_with_telegram_checksum() {
        for address in [0x0000u16, 0x0006, 0x00B2, 0x0530, 0xFFFF] {
            let frame = Command::ContactInfo { address }.to_frame().unwrap();
            assert!(telegram::decode(&frame).is_ok(), "address {:#06x}", address);
        }
    }

    #[test]
    fn test_query_checksum_short_input() {
        assert_eq!(query_checksum(&[]), 0);
        assert_eq!(query_checksum(&[0x68, 0x09, 0x09, 0x68, 0x01, 0x02]), 0x03);
    }

    #[test]
    fn test_status_query_payload() {
        assert_eq!(
            status_query_payload(),
            vec![0x05, 0x10, 0x00, 0x00, 0x00, 0x01, 0x05, 0x10, 0x00, 0x05, 0x00, 0x02]
        );
        let frame = Command::StatusQuery.to_frame().unwrap();
        assert_eq!(telegram::decode(&frame).unwrap().payload, status_query_payload());
    }
}
