//! DNI checksum validation.
//!
//! A DNI is eight digits followed by one uppercase check letter. The letter is
//! derived from the numeric part modulo 23, indexed into a fixed alphabet.

/// Check letters indexed by `number % 23`.
const CHECK_LETTERS: &[u8; 23] = b"TRWAGMYFPDXBNJZSQVHLCKE";

/// Validates a DNI string against the checksum-letter scheme.
///
/// Returns `false` for anything that is not exactly eight ASCII digits followed
/// by one uppercase ASCII letter, or whose letter does not match the checksum.
/// Pure and total over all input strings.
pub fn validate(dni: &str) -> bool {
    let bytes = dni.as_bytes();
    if bytes.len() != 9 {
        return false;
    }

    let (digits, letter) = bytes.split_at(8);
    if !digits.iter().all(u8::is_ascii_digit) || !letter[0].is_ascii_uppercase() {
        return false;
    }

    // The digit check above guarantees this parse succeeds.
    let number: u32 = match dni[..8].parse() {
        Ok(n) => n,
        Err(_) => return false,
    };

    CHECK_LETTERS[(number % 23) as usize] == letter[0]
}
