// MIT License - Copyright (c) 2026 Peter Wright
// Message block decoding for data telegram payloads

use bitflags::bitflags;
use serde::Serialize;

use crate::constants::{AlarmKind, MessageType, ADDR_EXT_OUTPUTS, AREA_STATUS_BASE};
use crate::text::{decode_name, decode_text, DecodedText};

/// The undecoded form of one block: `LEN TYPE CONTENT[LEN-1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawBlock {
    pub msg_type: u8,
    /// Declared length; counts the type byte.
    pub length: u8,
    /// Content bytes following the type byte.
    pub data: Vec<u8>,
}

/// Meldung Zustandsänderung (0x02).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChangeFields {
    pub device_area: u8,
    pub address: u16,
    pub addr_extension: u8,
    /// Full message type byte, including the restore bit.
    pub raw_message_type: u8,
    /// True when the top bit of the message type is clear.
    pub is_alarm: bool,
    pub alarm_kind: AlarmKind,
}

impl StateChangeFields {
    /// The 7-bit message code without the restore bit.
    pub fn code(&self) -> u8 {
        self.raw_message_type & 0x7F
    }
}

bitflags! {
    /// The eight status outputs of one area, set when the output is active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct AreaStatusFlags: u8 {
        const DISARMED       = 0x01;
        const ARMED_HOME     = 0x02;
        const ARMED_AWAY     = 0x04;
        const ALARM          = 0x08;
        const TROUBLE        = 0x10;
        const HOME_READY     = 0x20;
        const AWAY_READY     = 0x40;
        const ALARM_BUZZER   = 0x80;
    }
}

/// Blockstatus (0x24): one bit per object, inverted logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStatusFields {
    pub device_area: u8,
    pub start_address: u16,
    pub addr_extension: u8,
    /// LSB-first per byte. `0` = active, `1` = inactive.
    pub status_bits: Vec<u8>,
    pub status_bytes: Vec<u8>,
}

impl BlockStatusFields {
    /// `(address, active)` for every bit in the block.
    pub fn states(&self) -> impl Iterator<Item = (u16, bool)> + '_ {
        self.status_bits
            .iter()
            .enumerate()
            .map(|(i, &bit)| (self.start_address.wrapping_add(i as u16), bit == 0))
    }

    /// Whether `address` is active, if the block covers it.
    pub fn is_active(&self, address: u16) -> Option<bool> {
        let offset = address.checked_sub(self.start_address)? as usize;
        self.status_bits.get(offset).map(|&bit| bit == 0)
    }

    /// Status outputs of `area` (1-based), if this is an output block that
    /// covers all eight of them.
    pub fn area_status(&self, area: u8) -> Option<AreaStatusFlags> {
        if self.addr_extension != ADDR_EXT_OUTPUTS || area == 0 {
            return None;
        }
        let base = AREA_STATUS_BASE.checked_add(8 * (area as u16 - 1))?;
        let mut flags = AreaStatusFlags::empty();
        for bit in 0..8u8 {
            if self.is_active(base + bit as u16)? {
                flags |= AreaStatusFlags::from_bits_retain(1 << bit);
            }
        }
        Some(flags)
    }
}

/// Datum und Uhrzeit (0x50), passed through without range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateTimeFields {
    pub year: u8,
    pub century_or_weekday: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Name record recovered from a contact-info reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRecord {
    pub state_length: u8,
    pub name_length: u8,
    pub name: DecodedText,
    /// Undecoded name bytes.
    pub raw: Vec<u8>,
}

/// One decoded message block.
///
/// Variants whose content is too short for their layout carry `None`
/// instead of failing the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBlock {
    StateChange {
        raw: RawBlock,
        fields: Option<StateChangeFields>,
    },
    BlockStatus {
        raw: RawBlock,
        fields: Option<BlockStatusFields>,
    },
    Identification {
        raw: RawBlock,
        identification: Option<String>,
    },
    DateTime {
        raw: RawBlock,
        fields: Option<DateTimeFields>,
    },
    AsciiText {
        raw: RawBlock,
        text: DecodedText,
    },
    ContactInfo(ContactRecord),
    Unknown {
        raw: RawBlock,
    },
}

impl MessageBlock {
    /// Raw block for variants decoded from a payload.
    pub fn raw(&self) -> Option<&RawBlock> {
        match self {
            Self::StateChange { raw, .. }
            | Self::BlockStatus { raw, .. }
            | Self::Identification { raw, .. }
            | Self::DateTime { raw, .. }
            | Self::AsciiText { raw, .. }
            | Self::Unknown { raw } => Some(raw),
            Self::ContactInfo(_) => None,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.raw().map(|raw| MessageType::from_code(raw.msg_type))
    }
}

/// Split a data telegram payload into message blocks.
///
/// Scanning stops at the first block whose declared length overruns the
/// payload; that tail is dropped.
pub fn decode_payload(payload: &[u8]) -> Vec<MessageBlock> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset + 2 <= payload.len() {
        let length = payload[offset];
        let msg_type = payload[offset + 1];
        let end = offset + length as usize + 1;
        if end > payload.len() {
            break;
        }

        let data = if length >= 1 {
            payload[offset + 2..end].to_vec()
        } else {
            Vec::new()
        };
        blocks.push(decode_block(RawBlock {
            msg_type,
            length,
            data,
        }));
        offset = end;
    }

    blocks
}

fn decode_block(raw: RawBlock) -> MessageBlock {
    match MessageType::from_code(raw.msg_type) {
        MessageType::StateChange => MessageBlock::StateChange {
            fields: decode_state_change(&raw.data),
            raw,
        },
        MessageType::BlockStatus => MessageBlock::BlockStatus {
            fields: decode_block_status(&raw.data),
            raw,
        },
        MessageType::Identification => MessageBlock::Identification {
            identification: decode_identification(&raw.data),
            raw,
        },
        MessageType::DateTime => MessageBlock::DateTime {
            fields: decode_datetime(&raw.data),
            raw,
        },
        MessageType::Ascii => MessageBlock::AsciiText {
            text: decode_text(&raw.data),
            raw,
        },
        _ => MessageBlock::Unknown { raw },
    }
}

fn decode_state_change(data: &[u8]) -> Option<StateChangeFields> {
    let &[device_area, addr_hi, addr_lo, addr_extension, raw_message_type, ..] = data else {
        return None;
    };
    Some(StateChangeFields {
        device_area,
        address: u16::from_be_bytes([addr_hi, addr_lo]),
        addr_extension,
        raw_message_type,
        is_alarm: raw_message_type & 0x80 == 0,
        alarm_kind: AlarmKind::from_code(raw_message_type),
    })
}

fn decode_block_status(data: &[u8]) -> Option<BlockStatusFields> {
    if data.len() < 5 {
        return None;
    }
    let status_bytes = data[4..].to_vec();
    let status_bits = status_bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| (byte >> bit) & 1))
        .collect();
    Some(BlockStatusFields {
        device_area: data[0],
        start_address: u16::from_be_bytes([data[1], data[2]]),
        addr_extension: data[3],
        status_bits,
        status_bytes,
    })
}

/// Packed BCD; a nibble of 0xF is filler.
fn decode_identification(data: &[u8]) -> Option<String> {
    if data.len() < 6 {
        return None;
    }
    let mut digits = String::with_capacity(data.len() * 2);
    for &byte in data {
        for nibble in [byte >> 4, byte & 0x0F] {
            if nibble != 0x0F {
                digits.push_str(&nibble.to_string());
            }
        }
    }
    Some(digits)
}

fn decode_datetime(data: &[u8]) -> Option<DateTimeFields> {
    let &[year, century_or_weekday, month, day, hour, minute, second, ..] = data else {
        return None;
    };
    Some(DateTimeFields {
        year,
        century_or_weekday,
        month,
        day,
        hour,
        minute,
        second,
    })
}

/// Recover the name from a contact-info reply frame.
///
/// Layout (byte offsets into the whole frame): the state message length is
/// at 6, the name length at `8 + state_len`, the name at `10 + state_len`.
pub fn decode_contact_record(frame: &[u8]) -> Option<MessageBlock> {
    if frame.len() < 12 {
        return None;
    }
    let state_length = frame[6];
    let name_len_pos = 8 + state_length as usize;
    if frame.len() <= name_len_pos + 1 {
        return None;
    }
    let name_length = frame[name_len_pos];
    let start = name_len_pos + 2;
    let end = start + name_length as usize;
    if name_length == 0 || frame.len() < end {
        return None;
    }

    let raw = frame[start..end].to_vec();
    let name = decode_name(&raw)?;
    Some(MessageBlock::ContactInfo(ContactRecord {
        state_length,
        name_length,
        name,
        raw,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ADDR_EXT_INPUTS;
    use crate::text::TextEncoding;

    #[test]
    fn test_state_change_alarm() {
        let blocks = decode_payload(&[0x06, 0x02, 0x01, 0x00, 0x01, 0x01, 0x22]);
        assert_eq!(blocks.len(), 1);
        let MessageBlock::StateChange { raw, fields: Some(fields) } = &blocks[0] else {
            panic!("expected state change, got {:?}", blocks[0]);
        };
        assert_eq!(raw.length, 6);
        assert_eq!(raw.data, vec![0x01, 0x00, 0x01, 0x01, 0x22]);
        assert_eq!(fields.device_area, 0x01);
        assert_eq!(fields.address, 0x0001);
        assert_eq!(fields.addr_extension, ADDR_EXT_INPUTS);
        assert!(fields.is_alarm);
        assert_eq!(fields.alarm_kind, AlarmKind::Burglary);
    }

    #[test]
    fn test_state_change_restore() {
        let blocks = decode_payload(&[0x06, 0x02, 0x00, 0x00, 0x10, 0x01, 0xA2]);
        let MessageBlock::StateChange { fields: Some(fields), .. } = &blocks[0] else {
            panic!("expected state change");
        };
        assert!(!fields.is_alarm);
        assert_eq!(fields.raw_message_type, 0xA2);
        assert_eq!(fields.code(), 0x22);
        assert_eq!(fields.alarm_kind, AlarmKind::from_code(0x22));
    }

    #[test]
    fn test_state_change_unknown_code() {
        let blocks = decode_payload(&[0x06, 0x02, 0x00, 0x00, 0x10, 0x01, 0x7E]);
        let MessageBlock::StateChange { fields: Some(fields), .. } = &blocks[0] else {
            panic!("expected state change");
        };
        assert_eq!(fields.alarm_kind, AlarmKind::Unknown);
    }

    #[test]
    fn test_short_state_change_has_no_fields() {
        let blocks = decode_payload(&[0x03, 0x02, 0x00, 0x00, 0x03, 0x54, 0x41, 0x42]);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], MessageBlock::StateChange { fields: None, .. }));
        assert!(matches!(&blocks[1], MessageBlock::AsciiText { text, .. } if text.text == "AB"));
    }

    #[test]
    fn test_block_status_inverted_bits() {
        let blocks = decode_payload(&[0x07, 0x24, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFE]);
        let MessageBlock::BlockStatus { fields: Some(fields), .. } = &blocks[0] else {
            panic!("expected block status");
        };
        assert_eq!(fields.start_address, 0);
        assert_eq!(fields.addr_extension, ADDR_EXT_INPUTS);
        assert_eq!(fields.status_bits.len(), 16);
        let active: Vec<u16> = fields.states().filter(|(_, a)| *a).map(|(addr, _)| addr).collect();
        assert_eq!(active, vec![8]);
        assert_eq!(fields.is_active(8), Some(true));
        assert_eq!(fields.is_active(0), Some(false));
        assert_eq!(fields.is_active(16), None);
    }

    #[test]
    fn test_block_status_lsb_first() {
        let blocks = decode_payload(&[0x06, 0x24, 0x00, 0x00, 0x20, 0x01, 0b1010_0110]);
        let MessageBlock::BlockStatus { fields: Some(fields), .. } = &blocks[0] else {
            panic!("expected block status");
        };
        assert_eq!(fields.status_bits, vec![0, 1, 1, 0, 0, 1, 0, 1]);
        assert_eq!(fields.is_active(0x20), Some(true));
        assert_eq!(fields.is_active(0x21), Some(false));
    }

    #[test]
    fn test_area_status_flags() {
        // Outputs 0x0530..0x0537: disarmed active, home-ready and away-ready active.
        let status = !(0x01u8 | 0x20 | 0x40);
        let blocks = decode_payload(&[0x06, 0x24, 0x00, 0x05, 0x30, ADDR_EXT_OUTPUTS, status]);
        let MessageBlock::BlockStatus { fields: Some(fields), .. } = &blocks[0] else {
            panic!("expected block status");
        };
        assert_eq!(
            fields.area_status(1),
            Some(AreaStatusFlags::DISARMED | AreaStatusFlags::HOME_READY | AreaStatusFlags::AWAY_READY)
        );
        assert_eq!(fields.area_status(2), None);
        assert_eq!(fields.area_status(0), None);
    }

    #[test]
    fn test_area_status_needs_output_extension() {
        let blocks = decode_payload(&[0x06, 0x24, 0x00, 0x05, 0x30, ADDR_EXT_INPUTS, 0x00]);
        let MessageBlock::BlockStatus { fields: Some(fields), .. } = &blocks[0] else {
            panic!("expected block status");
        };
        assert_eq!(fields.area_status(1), None);
    }

    #[test]
    fn test_identification_bcd() {
        let blocks = decode_payload(&[0x07, 0x56, 0x12, 0x34, 0x56, 0x78, 0x9F, 0xFF]);
        let MessageBlock::Identification { identification, .. } = &blocks[0] else {
            panic!("expected identification");
        };
        assert_eq!(identification.as_deref(), Some("123456789"));
    }

    #[test]
    fn test_identification_high_nibble_filler() {
        let blocks = decode_payload(&[0x07, 0x56, 0xF1, 0x23, 0x45, 0x67, 0x89, 0x01]);
        let MessageBlock::Identification { identification, .. } = &blocks[0] else {
            panic!("expected identification");
        };
        assert_eq!(identification.as_deref(), Some("12345678901"));
    }

    #[test]
    fn test_datetime_passthrough() {
        let blocks = decode_payload(&[0x08, 0x50, 0x25, 0x14, 0x07, 0x16, 0x17, 0x63, 0x08]);
        let MessageBlock::DateTime { fields: Some(dt), .. } = &blocks[0] else {
            panic!("expected date/time");
        };
        assert_eq!(dt.year, 0x25);
        assert_eq!(dt.century_or_weekday, 0x14);
        assert_eq!(dt.month, 0x07);
        assert_eq!(dt.day, 0x16);
        assert_eq!(dt.hour, 0x17);
        // Out of range, passed through
        assert_eq!(dt.minute, 0x63);
        assert_eq!(dt.second, 0x08);
    }

    #[test]
    fn test_ascii_windows_1252() {
        let blocks = decode_payload(&[0x05, 0x54, b'T', 0xFC, b'r', 0x00]);
        let MessageBlock::AsciiText { text, .. } = &blocks[0] else {
            panic!("expected ascii text");
        };
        assert_eq!(text.text, "Tür");
        assert_eq!(text.encoding, TextEncoding::Windows1252);
    }

    #[test]
    fn test_unknown_type_keeps_bytes() {
        let blocks = decode_payload(&[0x03, 0x0C, 0xAB, 0xCD]);
        assert_eq!(
            blocks,
            vec![MessageBlock::Unknown {
                raw: RawBlock { msg_type: 0x0C, length: 3, data: vec![0xAB, 0xCD] }
            }]
        );
        assert_eq!(blocks[0].message_type(), Some(MessageType::AreaInfo));
    }

    #[test]
    fn test_multiple_blocks() {
        let payload = [
            0x06, 0x02, 0x00, 0x00, 0x01, 0x01, 0x22, // state change
            0x03, 0x54, b'O', b'K', // text
            0x06, 0x24, 0x00, 0x00, 0x00, 0x01, 0xFF, // block status
        ];
        let blocks = decode_payload(&payload);
        let types: Vec<_> = blocks.iter().filter_map(MessageBlock::message_type).collect();
        assert_eq!(
            types,
            vec![MessageType::StateChange, MessageType::Ascii, MessageType::BlockStatus]
        );
        let consumed: usize = blocks.iter().filter_map(MessageBlock::raw).map(|r| r.length as usize + 1).sum();
        assert_eq!(consumed, payload.len());
    }

    #[test]
    fn test_truncated_block_is_dropped() {
        let blocks = decode_payload(&[0x03, 0x54, b'O', b'K', 0x06, 0x02, 0x00, 0x00]);
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], MessageBlock::AsciiText { .. }));
    }

    #[test]
    fn test_trailing_single_byte_is_ignored() {
        assert!(decode_payload(&[0x05]).is_empty());
        assert!(decode_payload(&[]).is_empty());
    }

    #[test]
    fn test_zero_length_block() {
        let blocks = decode_payload(&[0x00, 0x02, 0x54, b'X']);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].raw().unwrap().data, Vec::<u8>::new());
        assert!(matches!(&blocks[1], MessageBlock::AsciiText { text, .. } if text.text == "X"));
    }

    #[test]
    fn test_contact_record() {
        // state block of 5 bytes, then name "Flur" at 10 + 5
        let mut frame = vec![0x68, 0x14, 0x14, 0x68, 0x73, 0x02, 0x05, 0x02, 0x00, 0x00, 0x01, 0x01];
        frame.extend_from_slice(&[0x00, 0x04, 0x54, b'F', b'l', b'u', b'r', 0x00, 0x16]);
        let Some(MessageBlock::ContactInfo(record)) = decode_contact_record(&frame) else {
            panic!("expected contact record");
        };
        assert_eq!(record.state_length, 5);
        assert_eq!(record.name_length, 4);
        assert_eq!(record.name.text, "Flur");
        assert_eq!(record.raw, b"Flur".to_vec());
    }

    #[test]
    fn test_contact_record_too_short() {
        assert_eq!(decode_contact_record(&[0x68, 0x02, 0x02, 0x68, 0x00, 0x02, 0x02, 0x16]), None);
        // name length points past the end
        let frame = [0x68, 0x08, 0x08, 0x68, 0x73, 0x02, 0x00, 0x00, 0x09, 0x00, b'A', 0x16];
        assert_eq!(decode_contact_record(&frame), None);
    }

    #[test]
    fn test_contact_record_blank_name() {
        let frame = [0x68, 0x08, 0x08, 0x68, 0x73, 0x02, 0x00, 0x00, 0x02, 0x00, b' ', 0x00, 0x16];
        assert_eq!(decode_contact_record(&frame), None);
    }
}
