//! SCRAM-SHA-256 Authentication implementation (RFC 5802 / RFC 7677).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::{Rng, thread_rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use micropg_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// SASL mechanism name.
pub const MECHANISM: &str = "SCRAM-SHA-256";

const NONCE_LEN: usize = 24;

/// Upper bound on the server's PBKDF2 iteration count. PostgreSQL defaults
/// to 4096; far larger values would stall the handshake for hours.
pub const MAX_ITERATIONS: u32 = 1_000_000;
const NONCE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Client side of one SCRAM-SHA-256 exchange.
///
/// Lives only for the duration of the handshake.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,

    // Derived during process_server_first
    salted_password: Option<[u8; 32]>,
    auth_message: Option<String>,
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce.
    ///
    /// PostgreSQL takes the user from the startup packet, so `username` is
    /// normally empty.
    pub fn new(username: &str, password: &str) -> Self {
        let mut rng = thread_rng();
        let client_nonce: String = (0..NONCE_LEN)
            .map(|_| char::from(NONCE_CHARSET[rng.gen_range(0..NONCE_CHARSET.len())]))
            .collect();
        Self::with_nonce(username, password, client_nonce)
    }

    /// Start an exchange with a caller-chosen nonce.
    pub fn with_nonce(username: &str, password: &str, client_nonce: impl Into<String>) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: client_nonce.into(),
            salted_password: None,
            auth_message: None,
        }
    }

    pub fn client_nonce(&self) -> &str {
        &self.client_nonce
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.username), self.client_nonce)
    }

    /// Generate client-first message
    pub fn client_first(&self) -> Vec<u8> {
        // gs2-header "n,," : no channel binding, no authzid
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    /// Process server-first message and generate client-final
    #[allow(clippy::result_large_err)]
    pub fn process_server_first(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| Error::auth(format!("Invalid UTF-8 in SASL continue: {}", e)))?;

        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|e| Error::auth(format!("Invalid base64 salt: {}", e)))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|e| Error::auth(format!("Invalid iteration count: {}", e)))?,
                );
            }
        }

        let combined_nonce = combined_nonce.ok_or_else(|| Error::auth("Missing server nonce"))?;
        let salt = salt.ok_or_else(|| Error::auth("Missing salt"))?;
        let iterations = iterations
            .filter(|&i| i > 0)
            .ok_or_else(|| Error::auth("Missing or zero iteration count"))?;
        if iterations > MAX_ITERATIONS {
            return Err(Error::auth(format!(
                "Iteration count {} exceeds the limit of {}",
                iterations, MAX_ITERATIONS
            )));
        }

        // The server must extend our nonce, never replace it.
        if combined_nonce.len() <= self.client_nonce.len()
            || !combined_nonce.starts_with(&self.client_nonce)
        {
            return Err(Error::auth("Server nonce does not extend the client nonce"));
        }

        let salted_password = pbkdf2_hmac_sha256(self.password.as_bytes(), &salt, iterations)?;

        let client_final_without_proof = format!("c=biws,r={}", combined_nonce); // biws = base64("n,,")
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            msg,
            client_final_without_proof
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        let mut client_proof = client_key;
        for (p, s) in client_proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        );

        Ok(client_final.into_bytes())
    }

    /// Verify server-final message
    #[allow(clippy::result_large_err)]
    pub fn verify_server_final(&self, data: &[u8]) -> Result<()> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| Error::auth(format!("Invalid UTF-8 in SASL final: {}", e)))?;

        if let Some(reason) = msg.strip_prefix("e=") {
            return Err(Error::auth(format!("Server rejected SCRAM exchange: {}", reason)));
        }

        let server_signature_b64 = msg
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| Error::auth("Invalid server-final format"))?;

        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| Error::auth(format!("Invalid base64 server signature: {}", e)))?;

        let (Some(salted_password), Some(auth_message)) =
            (self.salted_password.as_ref(), self.auth_message.as_ref())
        else {
            return Err(Error::auth("Server-final received before server-first"));
        };

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if !bool::from(server_signature.as_slice().ct_eq(&expected_signature)) {
            return Err(Error::auth("Server signature mismatch"));
        }

        Ok(())
    }
}

/// PBKDF2-HMAC-SHA256 with a single 32-byte output block.
///
/// `T = U1 ^ U2 ^ ... ^ Ui` where `U1 = HMAC(password, salt || INT(1))` and
/// `Uj = HMAC(password, Uj-1)`.
#[allow(clippy::result_large_err)]
pub fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32]> {
    let prf = HmacSha256::new_from_slice(password)
        .map_err(|e| Error::auth(format!("HMAC init failed: {}", e)))?;

    let mut mac = prf.clone();
    mac.update(salt);
    mac.update(&1_u32.to_be_bytes());
    let mut u: [u8; 32] = mac.finalize().into_bytes().into();
    let mut t = u;

    for _ in 1..iterations {
        let mut mac = prf.clone();
        mac.update(&u);
        u = mac.finalize().into_bytes().into();
        for (acc, byte) in t.iter_mut().zip(u.iter()) {
            *acc ^= byte;
        }
    }

    Ok(t)
}

/// RFC 5802 saslname escaping.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

#[allow(clippy::result_large_err)]
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::auth(format!("HMAC init failed: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
