//! Keyboard matrix.
//!
//! Eight half-rows of five keys, scanned through port `$FE`. Each cleared
//! bit of the port's high byte (A8-A15) selects one half-row; a pressed key
//! reads as 0 in bits 0-4.
//!
//! | Addr bit | Keys (bit 0-4)            |
//! |----------|---------------------------|
//! | A8       | Caps Shift, Z, X, C, V    |
//! | A9       | A, S, D, F, G             |
//! | A10      | Q, W, E, R, T             |
//! | A11      | 1, 2, 3, 4, 5             |
//! | A12      | 0, 9, 8, 7, 6             |
//! | A13      | P, O, I, U, Y             |
//! | A14      | Enter, L, K, J, H         |
//! | A15      | Space, Sym Shift, M, N, B |

use serde::{Deserialize, Serialize};

/// A key of the 40-key matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectrumKey {
    CapsShift,
    Z,
    X,
    C,
    V,
    A,
    S,
    D,
    F,
    G,
    Q,
    W,
    E,
    R,
    T,
    N1,
    N2,
    N3,
    N4,
    N5,
    N0,
    N9,
    N8,
    N7,
    N6,
    P,
    O,
    I,
    U,
    Y,
    Enter,
    L,
    K,
    J,
    H,
    Space,
    SymShift,
    M,
    N,
    B,
}

impl SpectrumKey {
    /// Half-row (0-7) and bit (0-4) of the key. Variants are declared in
    /// matrix order, five per half-row.
    #[must_use]
    pub const fn matrix(self) -> (usize, u8) {
        let index = self as usize;
        (index / 5, (index % 5) as u8)
    }
}

/// Pressed keys, one byte per half-row (1 = pressed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardState {
    rows: [u8; 8],
}

impl KeyboardState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: SpectrumKey, pressed: bool) {
        let (row, bit) = key.matrix();
        if pressed {
            self.rows[row] |= 1 << bit;
        } else {
            self.rows[row] &= !(1 << bit);
        }
    }

    #[must_use]
    pub fn is_pressed(&self, key: SpectrumKey) -> bool {
        let (row, bit) = key.matrix();
        self.rows[row] & (1 << bit) != 0
    }

    pub fn release_all(&mut self) {
        self.rows = [0; 8];
    }

    /// Columns pulled low by the half-rows in `selected` (bit n = row n).
    fn columns(&self, selected: u8) -> u8 {
        self.rows
            .iter()
            .enumerate()
            .filter(|(row, _)| selected & (1 << row) != 0)
            .fold(0, |cols, (_, keys)| cols | keys)
    }

    /// Bits 0-4 for a scan with high address byte `addr_high`, active low.
    ///
    /// The matrix is passive, so three pressed keys on the corners of a
    /// rectangle make the fourth corner read as pressed too. Rows sharing a
    /// pressed column with a selected row join the scan until nothing
    /// changes.
    #[must_use]
    pub fn read(&self, addr_high: u8) -> u8 {
        let mut selected = !addr_high;
        loop {
            let cols = self.columns(selected);
            let reached = self
                .rows
                .iter()
                .enumerate()
                .filter(|(_, keys)| *keys & cols != 0)
                .fold(selected, |rows, (row, _)| rows | (1 << row));
            if reached == selected {
                return !cols & 0x1F;
            }
            selected = reached;
        }
    }
}
