use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use rand::Rng;

/// Number of digits in a one-time code.
pub const OTP_DIGITS: usize = 6;

/// Uniform code in `000000..=999999`, zero-padded.
pub fn generate_otp() -> String {
    let n: u32 = rand::rng().random_range(0..=999_999);
    format!("{:06}", n)
}

/// Opaque staging key: 32 random bytes, URL-safe base64.
pub fn generate_registration_token() -> String {
    let bytes: [u8; 32] = rand::random();
    B64.encode(bytes)
}

/// Exact comparison; `" 123456"` does not match `"123456"`.
pub fn otp_matches(expected: &str, submitted: &str) -> bool {
    !submitted.is_empty() && expected == submitted
}
