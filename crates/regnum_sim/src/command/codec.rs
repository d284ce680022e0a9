//! # Command Wire Codec
//!
//! Fixed-layout, little-endian, versioned. Field order and widths never
//! change within a version.
//!
//! ```text
//! offset size field
//!      0    1 version (= 1)
//!      1    1 command type
//!      2    2 player id
//!      4    2 entity id
//!      6    2 arg 0
//!      8    2 arg 1
//!     10    2 reserved (0)
//!     12    8 target tick
//!     20    8 sequence
//!     28      total
//! ```

use regnum_core::EntityId;

use super::{Command, CommandEnvelope, CommandKind, CommandType};
use crate::error::CodecError;

/// Current envelope version.
pub const WIRE_VERSION: u8 = 1;

/// Encoded envelope size in bytes.
pub const ENVELOPE_SIZE: usize = 28;

/// Encodes one envelope.
#[must_use]
pub fn encode_envelope(envelope: &CommandEnvelope) -> [u8; ENVELOPE_SIZE] {
    let command = &envelope.command;
    let [arg0, arg1] = command.kind.args();

    let mut bytes = [0u8; ENVELOPE_SIZE];
    bytes[0] = WIRE_VERSION;
    bytes[1] = command.kind.command_type() as u8;
    bytes[2..4].copy_from_slice(&command.player_id.to_le_bytes());
    bytes[4..6].copy_from_slice(&command.kind.entity().raw().to_le_bytes());
    bytes[6..8].copy_from_slice(&arg0.to_le_bytes());
    bytes[8..10].copy_from_slice(&arg1.to_le_bytes());
    bytes[12..20].copy_from_slice(&command.target_tick.to_le_bytes());
    bytes[20..28].copy_from_slice(&envelope.sequence.to_le_bytes());
    bytes
}

/// Decodes one envelope from the front of `bytes`. Trailing bytes are ignored.
///
/// # Errors
///
/// [`CodecError`] on short input, unknown version or unknown type.
pub fn decode_envelope(bytes: &[u8]) -> Result<CommandEnvelope, CodecError> {
    if bytes.len() < ENVELOPE_SIZE {
        return Err(CodecError::Truncated {
            expected: ENVELOPE_SIZE,
            actual: bytes.len(),
        });
    }
    if bytes[0] != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(bytes[0]));
    }
    let command_type = CommandType::try_from(bytes[1])?;

    let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let u64_at = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(raw)
    };

    let kind = CommandKind::from_parts(command_type, EntityId(u16_at(4)), [u16_at(6), u16_at(8)]);
    Ok(CommandEnvelope::new(
        u64_at(20),
        Command::new(u64_at(12), u16_at(2), kind),
    ))
}

/// An ordered run of envelopes, for replay and transport.
///
/// Encoded as a little-endian `u32` count followed by the envelopes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandLog {
    envelopes: Vec<CommandEnvelope>,
}

impl CommandLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an envelope.
    pub fn push(&mut self, envelope: CommandEnvelope) {
        self.envelopes.push(envelope);
    }

    /// Number of envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// The envelopes in log order.
    #[must_use]
    pub fn envelopes(&self) -> &[CommandEnvelope] {
        &self.envelopes
    }

    /// Encodes the log.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.envelopes.len() * ENVELOPE_SIZE);
        bytes.extend_from_slice(&(self.envelopes.len() as u32).to_le_bytes());
        for envelope in &self.envelopes {
            bytes.extend_from_slice(&encode_envelope(envelope));
        }
        bytes
    }

    /// Decodes a log.
    ///
    /// # Errors
    ///
    /// [`CodecError`] on short input or a bad envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let header: [u8; 4] = bytes
            .get(..4)
            .and_then(|head| head.try_into().ok())
            .ok_or(CodecError::Truncated {
                expected: 4,
                actual: bytes.len(),
            })?;
        let count = u32::from_le_bytes(header) as usize;
        let body = &bytes[4..];
        let expected = count.saturating_mul(ENVELOPE_SIZE);
        if body.len() < expected {
            return Err(CodecError::Truncated {
                expected: expected + 4,
                actual: bytes.len(),
            });
        }

        let envelopes = body
            .chunks_exact(ENVELOPE_SIZE)
            .take(count)
            .map(decode_envelope)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { envelopes })
    }
}

impl FromIterator<CommandEnvelope> for CommandLog {
    fn from_iter<I: IntoIterator<Item = CommandEnvelope>>(iter: I) -> Self {
        Self {
            envelopes: iter.into_iter().collect(),
        }
    }
}

impl Extend<CommandEnvelope> for CommandLog {
    fn extend<I: IntoIterator<Item = CommandEnvelope>>(&mut self, iter: I) {
        self.envelopes.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(sequence: u64) -> CommandEnvelope {
        CommandEnvelope::new(
            sequence,
            Command::new(
                0x0102_0304_0506_0708,
                0xBEEF,
                CommandKind::TransferOwnership { entity: EntityId(0x1234), to: 9 },
            ),
        )
    }

    #[test]
    fn test_layout_is_pinned() {
        let bytes = encode_envelope(&transfer(42));
        assert_eq!(bytes[0], WIRE_VERSION);
        assert_eq!(bytes[1], CommandType::TransferOwnership as u8);
        assert_eq!(&bytes[2..4], &[0xEF, 0xBE]);
        assert_eq!(&bytes[4..6], &[0x34, 0x12]);
        assert_eq!(&bytes[6..8], &[9, 0]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
        assert_eq!(&bytes[12..20], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[20..28], &42u64.to_le_bytes());
        assert_eq!(decode_envelope(&bytes), Ok(transfer(42)));
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut bytes = encode_envelope(&transfer(1));
        assert_eq!(
            decode_envelope(&bytes[..20]),
            Err(CodecError::Truncated { expected: ENVELOPE_SIZE, actual: 20 })
        );
        bytes[0] = 2;
        assert_eq!(decode_envelope(&bytes), Err(CodecError::UnsupportedVersion(2)));
        bytes[0] = WIRE_VERSION;
        bytes[1] = 200;
        assert_eq!(decode_envelope(&bytes), Err(CodecError::UnknownCommandType(200)));
    }

    #[test]
    fn test_log_encoding() {
        let log: CommandLog = (1..=3).map(transfer).collect();
        let bytes = log.encode();
        assert_eq!(bytes.len(), 4 + 3 * ENVELOPE_SIZE);
        assert_eq!(CommandLog::decode(&bytes), Ok(log));
        assert!(matches!(
            CommandLog::decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(CommandLog::decode(&[0, 0, 0, 0]).unwrap().is_empty());
    }
}
