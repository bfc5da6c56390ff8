//! Write-only credential material for provisioned users.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;

/// Random bytes behind each generated password.
pub const PASSWORD_BYTES: usize = 64;

/// Generates a password from the thread-local CSPRNG.
///
/// The value is sent once and never stored.
pub fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
