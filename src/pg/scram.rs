//! SCRAM-SHA-256 client (RFC 5802, RFC 7677) as used by PostgreSQL.
//!
//! Channel binding is not supported; the client always sends the `n,,` GS2
//! header.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use super::error::PgError;

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Client side of one SCRAM exchange.
pub struct ScramClient {
    password: String,
    client_first_bare: String,
    client_nonce: String,
    /// Server signature expected in the final message
    expected_server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        let nonce: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(password, &BASE64.encode(nonce))
    }

    fn with_nonce(password: &str, nonce: &str) -> Self {
        // PostgreSQL ignores the SCRAM user name and uses the startup user
        Self {
            password: password.to_string(),
            client_first_bare: format!("n=,r={}", nonce),
            client_nonce: nonce.to_string(),
            expected_server_signature: None,
        }
    }

    /// `client-first-message`
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Consume `server-first-message` and produce `client-final-message`.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, PgError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| auth_error("server-first-message is not UTF-8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            match part.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => {
                    salt = Some(BASE64.decode(v).map_err(|_| auth_error("invalid salt"))?)
                }
                Some(("i", v)) => {
                    iterations = Some(
                        v.parse::<u32>()
                            .map_err(|_| auth_error("invalid iteration count"))?,
                    )
                }
                _ => {}
            }
        }
        let nonce = nonce.ok_or_else(|| auth_error("missing nonce"))?;
        let salt = salt.ok_or_else(|| auth_error("missing salt"))?;
        let iterations = iterations.ok_or_else(|| auth_error("missing iteration count"))?;
        if !nonce.starts_with(&self.client_nonce) {
            return Err(auth_error("server nonce does not extend client nonce"));
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|e| auth_error(&e.to_string()))?;

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac(&salted_password, b"Server Key")?;
        self.expected_server_signature = Some(hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    /// Check the server signature in `server-final-message`.
    pub fn verify(&self, server_final: &[u8]) -> Result<(), PgError> {
        let expected = self
            .expected_server_signature
            .ok_or_else(|| auth_error("server-final-message before server-first-message"))?;
        let text = std::str::from_utf8(server_final)
            .map_err(|_| auth_error("server-final-message is not UTF-8"))?;
        if let Some(err) = text.strip_prefix("e=") {
            return Err(auth_error(err));
        }
        let signature = text
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or_else(|| auth_error("malformed server signature"))?;
        if signature != expected {
            return Err(auth_error("server signature mismatch"));
        }
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], PgError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| auth_error(&e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn auth_error(msg: &str) -> PgError {
    PgError::Auth(format!("SCRAM: {}", msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exchange from RFC 7677 section 3, with the empty user name PostgreSQL sends.
    #[test]
    fn test_full_exchange() {
        let mut client = ScramClient::with_nonce("pencil", "rOprNGfwEbeRWgbNEkqO");
        assert_eq!(client.client_first(), b"n,,n=,r=rOprNGfwEbeRWgbNEkqO".to_vec());

        let server_first = format!(
            "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s={},i=4096",
            "W22ZaJ0SNY7soEsUEjb6gQ=="
        );
        let last = String::from_utf8(client.client_final(server_first.as_bytes()).unwrap()).unwrap();
        assert!(last.starts_with("c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p="));

        assert!(client.verify(b"v=bm90IHRoZSByaWdodCBzaWduYXR1cmU=").is_err());
        let expected = BASE64.encode(client.expected_server_signature.unwrap());
        client.verify(format!("v={}", expected).as_bytes()).unwrap();
    }

    #[test]
    fn test_rejects_foreign_nonce() {
        let mut client = ScramClient::with_nonce("pencil", "abc");
        let err = client.client_final(b"r=xyz,s=c2FsdA==,i=4096").unwrap_err();
        assert!(matches!(err, PgError::Auth(_)));
    }

    #[test]
    fn test_server_error_is_reported() {
        let mut client = ScramClient::with_nonce("pencil", "abc");
        client.client_final(b"r=abcdef,s=c2FsdA==,i=16").unwrap();
        let err = client.verify(b"e=invalid-proof").unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
    }
}
