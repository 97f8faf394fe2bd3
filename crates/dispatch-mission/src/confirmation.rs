use dispatch_common::Rng;
use subtle::ConstantTimeEq;

/// Generates a 6-digit decimal confirmation code from a cryptographic
/// source (spec.md §4.5/§8). Stable for the waypoint's lifetime; the
/// caller is responsible for never logging it.
pub fn generate_confirmation_code(rng: &dyn Rng) -> String {
    rng.confirmation_code()
}

/// Constant-time comparison, required by spec.md §4.5/§8 to avoid timing
/// side channels on the confirmation-code exchange.
pub fn codes_match(stored: &str, presented: &str) -> bool {
    if stored.len() != presented.len() {
        return false;
    }
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_common::SeededRng;

    #[test]
    fn generated_code_is_six_digits() {
        let rng = SeededRng::new(1);
        let code = generate_confirmation_code(&rng);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn matching_codes_compare_equal() {
        assert!(codes_match("123456", "123456"));
    }

    #[test]
    fn mismatched_codes_compare_unequal() {
        assert!(!codes_match("123456", "654321"));
        assert!(!codes_match("123456", "12345"));
    }
}
