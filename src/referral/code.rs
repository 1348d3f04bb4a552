use rand::RngCore;
use uuid::Uuid;

pub const CODE_LEN: usize = 8;

/// Candidate referral code: the tail of the owner's id followed by random
/// hex, uppercased and cut to `CODE_LEN` characters.
pub fn candidate(user_id: Uuid) -> String {
    let id = user_id.simple().to_string();
    let fragment = &id[id.len() - 4..];

    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    let random: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

    normalize(&format!("{fragment}{random}"))
}

/// Exactly `CODE_LEN` uppercase ASCII letters or digits.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

/// Uppercase alphanumeric, at most `CODE_LEN` characters.
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(CODE_LEN)
        .collect()
}
