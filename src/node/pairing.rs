//! Manual pairing code generation.
//!
//! The short manual pairing code is an 11-digit decimal string built from the
//! upper discriminator bits and the passcode, followed by a Verhoeff check
//! digit (Matter core specification 5.1.4.1).

/// Verhoeff multiplication table.
const D: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

/// Verhoeff permutation table.
const P: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 6, 8, 7, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const INV: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Build the manual pairing code for a discriminator/passcode pair.
pub fn generate_pairing_code(discriminator: u16, passcode: u32) -> String {
    let leading = (discriminator >> 10) & 0x03;
    let middle = ((((discriminator >> 8) & 0x03) as u32) << 14) | (passcode & 0x3FFF);
    let trailing = (passcode >> 14) & 0x1FFF;

    let payload = format!("{}{:05}{:04}", leading, middle, trailing);
    let check = verhoeff_check_digit(payload.bytes().map(|b| b - b'0'));
    format!("{}{}", payload, check)
}

/// Verhoeff check digit over `digits` (most significant first).
fn verhoeff_check_digit(digits: impl DoubleEndedIterator<Item = u8>) -> u8 {
    let c = digits
        .rev()
        .enumerate()
        .fold(0u8, |c, (i, d)| D[c as usize][P[(i + 1) % 8][d as usize] as usize]);
    INV[c as usize]
}
