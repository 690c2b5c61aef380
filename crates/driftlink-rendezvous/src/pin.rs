//! PIN generation and validation.
//!
//! PINs are 6 characters drawn from a 32-symbol alphabet that excludes
//! visually ambiguous characters (`I`, `O`, `0`, `1`). Generation must be
//! unbiased — `rand`'s `gen_range` over a power-of-two bound (32) already
//! draws uniformly, so no rejection loop is needed at the per-symbol level;
//! the collision-retry loop in session creation is the rejection sampling
//! that matters at the PIN-allocation level.

use rand::Rng;
use unicode_normalization::UnicodeNormalization;

use crate::error::RegistryError;

/// The 32-symbol alphabet PINs are drawn from. Excludes `0`, `1`, `I`, `O`.
pub const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a PIN.
pub const PIN_LENGTH: usize = 6;

/// Generate a random PIN using the given RNG.
pub fn generate(rng: &mut impl Rng) -> String {
    (0..PIN_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Normalize and validate a client-supplied PIN.
///
/// Trims surrounding whitespace and applies Unicode NFKC normalization, then
/// requires exactly [`PIN_LENGTH`] characters, each drawn from [`ALPHABET`].
/// Case is **not** folded: `ALPHABET` is already upper-case only, and a
/// lower-case input is rejected rather than silently accepted, so a PIN
/// round-trips exactly as displayed.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidPin`] if normalization, length, or
/// alphabet membership checks fail.
pub fn validate(input: &str) -> Result<String, RegistryError> {
    let normalized: String = input.trim().nfkc().collect();

    if normalized.chars().count() != PIN_LENGTH {
        return Err(RegistryError::InvalidPin(format!(
            "expected {PIN_LENGTH} characters, got {}",
            normalized.chars().count()
        )));
    }

    for ch in normalized.chars() {
        if !ch.is_ascii() || ch.is_ascii_whitespace() || ch.is_ascii_control() {
            return Err(RegistryError::InvalidPin(
                "PIN must contain only printable ASCII".into(),
            ));
        }
        let byte = ch as u8;
        if !ALPHABET.contains(&byte) {
            return Err(RegistryError::InvalidPin(format!(
                "'{ch}' is not in the PIN alphabet"
            )));
        }
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn generated_pins_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let pin = generate(&mut rng);
            assert_eq!(pin.chars().count(), PIN_LENGTH);
            assert!(pin.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn validate_accepts_well_formed_pin() {
        let mut rng = StdRng::seed_from_u64(7);
        let pin = generate(&mut rng);
        assert_eq!(validate(&pin).unwrap(), pin);
    }

    #[test]
    fn validate_trims_whitespace() {
        let mut rng = StdRng::seed_from_u64(7);
        let pin = generate(&mut rng);
        assert_eq!(validate(&format!("  {pin}\n")).unwrap(), pin);
    }

    #[test]
    fn validate_rejects_lowercase() {
        assert!(validate("abcdef").is_err());
    }

    #[test]
    fn validate_rejects_excluded_characters() {
        assert!(validate("AAAAI0").is_err());
        assert!(validate("AAAAO1").is_err());
    }

    #[test]
    fn validate_rejects_wrong_length() {
        assert!(validate("ABCDE").is_err());
        assert!(validate("ABCDEFG").is_err());
    }
}
