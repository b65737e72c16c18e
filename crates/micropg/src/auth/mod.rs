//! Password authentication methods.
//!
//! Cleartext and MD5 are single-message answers; SCRAM-SHA-256 is a
//! multi-round exchange driven by [`ScramClient`].

pub mod scram;

pub use scram::{ScramClient, pbkdf2_hmac_sha256};

/// Compute MD5 password hash as per PostgreSQL protocol.
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = format!("{}{}", password, user);
    let inner_hash = md5::compute(inner.as_bytes());

    let mut outer_input = format!("{:x}", inner_hash).into_bytes();
    outer_input.extend_from_slice(&salt);
    let outer_hash = md5::compute(&outer_input);

    format!("md5{:x}", outer_hash)
}
