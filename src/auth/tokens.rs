use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use time::Duration;

pub const VERIFICATION_TOKEN_TTL: Duration = Duration::hours(24);
pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

/// 32 random bytes, base64url without padding (43 chars).
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
