use rand::Rng;

/// Room code alphabet, with visually ambiguous symbols (I, O, 0, 1) removed.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of generated codes. The validator is more lenient, see
/// [`is_valid_code`].
pub const CODE_LENGTH: usize = 4;

/// How many times room creation retries against the code index before
/// giving up with a code-exhaustion error.
pub const CODE_GENERATION_ATTEMPTS: u32 = 10;

/// Generate a random room code from the confusion-free alphabet.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Accepts 4-8 uppercase characters from the code alphabet.
pub fn is_valid_code(code: &str) -> bool {
    (4..=8).contains(&code.len()) && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
