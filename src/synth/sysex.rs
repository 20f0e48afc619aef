//! Sysex patch format.
//!
//! ```text
//! 0        0xF0
//! 1        0x7D               manufacturer (non-commercial id)
//! 2        0x46               format tag
//! 3        0x01               format version
//! 4        N                  operator count, 1..=6
//! 5        carrier mask       bit i: operator i is heard
//! 6..16    name               10 printable ASCII bytes, space padded
//! 16..     N * 11 bytes       per operator: waveform, coarse, fine, detune,
//!                             level, feedback, attack, decay, sustain,
//!                             release, modulator mask
//! 16+11N   checksum           two's complement of the sum of bytes 4..16+11N
//! 17+11N   0xF7
//! ```

use super::algorithm::{Algorithm, MAX_OPERATORS};
use super::envelope::{EnvelopeParams, MAX_LEVEL, MAX_RATE};
use super::operator::{OperatorParams, MAX_COARSE, MAX_DETUNE, MAX_FEEDBACK, MAX_FINE};
use super::patch::{Patch, NAME_LENGTH};
use super::waveform::Waveform;
use crate::error::{MalformedSysexError, SysexErrorKind};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const MANUFACTURER_ID: u8 = 0x7D;
pub const FORMAT_TAG: u8 = 0x46;
pub const FORMAT_VERSION: u8 = 0x01;

const OP_COUNT_OFFSET: usize = 4;
const CARRIER_OFFSET: usize = 5;
const NAME_OFFSET: usize = 6;
const OPERATORS_OFFSET: usize = NAME_OFFSET + NAME_LENGTH;
const OPERATOR_BLOCK: usize = 11;
/// Bytes outside the operator blocks: header, counts, name, checksum, end.
const FRAME_OVERHEAD: usize = OPERATORS_OFFSET + 2;
const MIN_LENGTH: usize = FRAME_OVERHEAD + OPERATOR_BLOCK;

/// Byte positions inside an operator block.
const WAVEFORM: usize = 0;
const COARSE: usize = 1;
const FINE: usize = 2;
const DETUNE: usize = 3;
const LEVEL: usize = 4;
const FEEDBACK: usize = 5;
const ATTACK: usize = 6;
const DECAY: usize = 7;
const SUSTAIN: usize = 8;
const RELEASE: usize = 9;
const MODULATORS: usize = 10;

/// Total message length for a patch with `num_operators` operators.
pub fn message_length(num_operators: usize) -> usize {
    FRAME_OVERHEAD + num_operators * OPERATOR_BLOCK
}

fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg() & 0x7F
}

fn fail<T>(offset: usize, kind: SysexErrorKind) -> Result<T, MalformedSysexError> {
    Err(MalformedSysexError::new(offset, kind))
}

fn param(
    bytes: &[u8],
    offset: usize,
    parameter: &'static str,
    max: u8,
) -> Result<u8, MalformedSysexError> {
    let value = bytes[offset];
    if value > max {
        return fail(
            offset,
            SysexErrorKind::OutOfRange {
                parameter,
                value,
                max,
            },
        );
    }
    Ok(value)
}

/// Decodes a complete sysex message (including the 0xF0/0xF7 framing) into a patch.
pub fn decode(bytes: &[u8]) -> Result<Patch, MalformedSysexError> {
    let len = bytes.len();
    if len < MIN_LENGTH {
        return fail(
            len,
            SysexErrorKind::TooShort {
                length: len,
                minimum: MIN_LENGTH,
            },
        );
    }
    if bytes[0] != SYSEX_START {
        return fail(0, SysexErrorKind::MissingStart(bytes[0]));
    }
    if bytes[1] != MANUFACTURER_ID {
        return fail(1, SysexErrorKind::WrongManufacturer(bytes[1]));
    }
    if bytes[2] != FORMAT_TAG {
        return fail(2, SysexErrorKind::WrongFormat(bytes[2]));
    }
    if bytes[3] != FORMAT_VERSION {
        return fail(3, SysexErrorKind::UnsupportedVersion(bytes[3]));
    }
    if let Some(pos) = bytes[1..len - 1].iter().position(|&b| b & 0x80 != 0) {
        return fail(pos + 1, SysexErrorKind::NotDataByte(bytes[pos + 1]));
    }

    let num_ops = bytes[OP_COUNT_OFFSET];
    if num_ops == 0 || num_ops as usize > MAX_OPERATORS {
        return fail(OP_COUNT_OFFSET, SysexErrorKind::OperatorCount(num_ops));
    }
    let num_ops = num_ops as usize;
    let expected = message_length(num_ops);
    if len != expected {
        return fail(
            len.min(expected) - 1,
            SysexErrorKind::LengthMismatch {
                expected,
                actual: len,
            },
        );
    }
    if bytes[len - 1] != SYSEX_END {
        return fail(len - 1, SysexErrorKind::MissingEnd(bytes[len - 1]));
    }

    let checksum_offset = len - 2;
    let expected_sum = checksum(&bytes[OP_COUNT_OFFSET..checksum_offset]);
    if bytes[checksum_offset] != expected_sum {
        return fail(
            checksum_offset,
            SysexErrorKind::Checksum {
                expected: expected_sum,
                actual: bytes[checksum_offset],
            },
        );
    }

    let carrier_mask = bytes[CARRIER_OFFSET];
    if carrier_mask == 0 || carrier_mask >> num_ops != 0 {
        return fail(CARRIER_OFFSET, SysexErrorKind::CarrierMask(carrier_mask));
    }

    let name_bytes = &bytes[NAME_OFFSET..OPERATORS_OFFSET];
    if let Some(pos) = name_bytes.iter().position(|c| !(0x20..=0x7E).contains(c)) {
        return fail(
            NAME_OFFSET + pos,
            SysexErrorKind::NameCharacter(name_bytes[pos]),
        );
    }
    // Every byte is printable ASCII at this point
    let name: String = name_bytes.iter().map(|&c| c as char).collect();

    let mut operators = Vec::with_capacity(num_ops);
    let mut modulator_masks = Vec::with_capacity(num_ops);
    for op in 0..num_ops {
        let base = OPERATORS_OFFSET + op * OPERATOR_BLOCK;
        let waveform_byte = bytes[base + WAVEFORM];
        let waveform = Waveform::from_index(waveform_byte).ok_or_else(|| {
            MalformedSysexError::new(
                base + WAVEFORM,
                SysexErrorKind::OutOfRange {
                    parameter: "waveform",
                    value: waveform_byte,
                    max: Waveform::ALL.len() as u8 - 1,
                },
            )
        })?;
        operators.push(OperatorParams {
            waveform,
            coarse: param(bytes, base + COARSE, "coarse", MAX_COARSE)?,
            fine: param(bytes, base + FINE, "fine", MAX_FINE)?,
            detune: param(bytes, base + DETUNE, "detune", MAX_DETUNE)?,
            level: param(bytes, base + LEVEL, "level", MAX_LEVEL)?,
            feedback: param(bytes, base + FEEDBACK, "feedback", MAX_FEEDBACK)?,
            envelope: EnvelopeParams {
                attack: param(bytes, base + ATTACK, "attack rate", MAX_RATE)?,
                decay: param(bytes, base + DECAY, "decay rate", MAX_RATE)?,
                sustain: param(bytes, base + SUSTAIN, "sustain level", MAX_LEVEL)?,
                release: param(bytes, base + RELEASE, "release rate", MAX_RATE)?,
            },
        });

        let mask = bytes[base + MODULATORS];
        if mask >> num_ops != 0 || mask & (1u8 << op) != 0 {
            return fail(base + MODULATORS, SysexErrorKind::ModulatorMask(mask));
        }
        modulator_masks.push(mask);
    }

    let algorithm = Algorithm::from_masks(carrier_mask, &modulator_masks)
        .map_err(|_| MalformedSysexError::new(CARRIER_OFFSET, SysexErrorKind::CarrierMask(carrier_mask)))?;
    Patch::new(&name, operators, algorithm).map_err(|_| {
        MalformedSysexError::new(OP_COUNT_OFFSET, SysexErrorKind::OperatorCount(num_ops as u8))
    })
}

/// Encodes a patch into a framed sysex message that `decode` accepts.
pub fn encode(patch: &Patch) -> Vec<u8> {
    let num_ops = patch.operators().len();
    let mut bytes = Vec::with_capacity(message_length(num_ops));
    bytes.extend_from_slice(&[SYSEX_START, MANUFACTURER_ID, FORMAT_TAG, FORMAT_VERSION]);
    bytes.push(num_ops as u8);
    bytes.push(patch.algorithm().carrier_mask());

    let mut name = [b' '; NAME_LENGTH];
    for (slot, c) in name.iter_mut().zip(patch.name().bytes()) {
        *slot = c;
    }
    bytes.extend_from_slice(&name);

    for (i, op) in patch.operators().iter().enumerate() {
        bytes.extend_from_slice(&[
            op.waveform.index(),
            op.coarse,
            op.fine,
            op.detune,
            op.level,
            op.feedback,
            op.envelope.attack,
            op.envelope.decay,
            op.envelope.sustain,
            op.envelope.release,
            patch.algorithm().modulator_mask(i),
        ]);
    }

    let sum = checksum(&bytes[OP_COUNT_OFFSET..]);
    bytes.push(sum);
    bytes.push(SYSEX_END);
    bytes
}
