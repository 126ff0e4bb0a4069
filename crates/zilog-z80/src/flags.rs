//! Flag register bits and the common flag builders.

/// Sign (bit 7 of the result).
pub const SF: u8 = 0b1000_0000;
/// Zero.
pub const ZF: u8 = 0b0100_0000;
/// Undocumented copy of result bit 5.
pub const YF: u8 = 0b0010_0000;
/// Half carry.
pub const HF: u8 = 0b0001_0000;
/// Undocumented copy of result bit 3.
pub const XF: u8 = 0b0000_1000;
/// Parity / overflow.
pub const PF: u8 = 0b0000_0100;
/// Subtract.
pub const NF: u8 = 0b0000_0010;
/// Carry.
pub const CF: u8 = 0b0000_0001;

/// Even parity.
#[must_use]
pub const fn parity(value: u8) -> bool {
    value.count_ones().is_multiple_of(2)
}

/// S, Z and the undocumented X/Y bits for a result.
#[must_use]
pub const fn sz53(value: u8) -> u8 {
    let z = if value == 0 { ZF } else { 0 };
    (value & (SF | YF | XF)) | z
}

/// `sz53` plus parity.
#[must_use]
pub const fn sz53p(value: u8) -> u8 {
    sz53(value) | if parity(value) { PF } else { 0 }
}
