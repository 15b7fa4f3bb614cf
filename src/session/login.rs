// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Challenge/response login
//!
//! Both sides prove the knowledge of the password by answering the other
//! side's random challenge with `HMAC-SHA256(SHA256(password), challenge)`.

use std::{borrow::Cow, fmt};

use hmac::{Hmac, Mac as _};
use sha2::{Digest as _, Sha256};

use super::Worker;
use crate::{
    frame::{bytes_to_words, words_to_bytes},
    Address, Error, Quantity, Result, Word,
};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_CHALLENGE: Word = 1;
const SUBMIT: Word = 2;

const CHALLENGE_LEN: usize = 16;
const MAC_LEN: usize = 32;
const MAX_USERNAME_LEN: usize = 32;

const CHALLENGE_WORDS: Quantity = (CHALLENGE_LEN / 2) as Quantity;
const RESULT_WORDS: Quantity = 1 + (MAC_LEN / 2) as Quantity;

const STATUS_ACCEPTED: Word = 0;

/// Registers dedicated to the login exchange.
///
/// 1. `[REQUEST_CHALLENGE]` is written to `command`,
/// 2. the device challenge (8 words) is read from `challenge`,
/// 3. `[SUBMIT, client challenge (8), username length, username (16), MAC (16)]`
///    is written to `command`,
/// 4. `[status, device MAC (16)]` is read from `result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginWindow {
    pub command: Address,
    pub challenge: Address,
    pub result: Address,
}

impl Default for LoginWindow {
    fn default() -> Self {
        Self {
            command: 49_100,
            challenge: 49_000,
            result: 49_010,
        }
    }
}

/// User name and password for privileged access.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The installer account that exists on every device.
    pub fn installer(password: impl Into<String>) -> Self {
        Self::new("installer", password)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn mac(password: &str) -> Result<HmacSha256> {
    let key = Sha256::digest(password.as_bytes());
    HmacSha256::new_from_slice(&key).map_err(|err| Error::OutOfRange {
        name: Cow::Borrowed("password"),
        reason: err.to_string(),
    })
}

pub(crate) fn digest(password: &str, challenge: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = mac(password)?;
    mac.update(challenge);
    let mut digest = [0; MAC_LEN];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}

fn malformed(reason: String) -> Error {
    Error::Malformed {
        name: Cow::Borrowed("login"),
        reason,
    }
}

pub(crate) fn device_challenge(words: &[Word]) -> Result<[u8; CHALLENGE_LEN]> {
    words_to_bytes(words)
        .try_into()
        .map_err(|bytes: Vec<u8>| malformed(format!("challenge of {} bytes", bytes.len())))
}

pub(crate) fn submit_request(
    credentials: &Credentials,
    client_challenge: &[u8; CHALLENGE_LEN],
    device_challenge: &[u8; CHALLENGE_LEN],
) -> Result<Vec<Word>> {
    let username = credentials.username.as_bytes();
    if username.len() > MAX_USERNAME_LEN {
        return Err(Error::OutOfRange {
            name: Cow::Borrowed("username"),
            reason: format!("at most {MAX_USERNAME_LEN} bytes"),
        });
    }
    let mut padded = [0; MAX_USERNAME_LEN];
    padded[..username.len()].copy_from_slice(username);

    let mut request = vec![SUBMIT];
    request.extend(bytes_to_words(client_challenge));
    request.push(username.len() as Word);
    request.extend(bytes_to_words(&padded));
    request.extend(bytes_to_words(&digest(&credentials.password, device_challenge)?));
    Ok(request)
}

pub(crate) fn check_result(
    credentials: &Credentials,
    client_challenge: &[u8; CHALLENGE_LEN],
    words: &[Word],
) -> Result<()> {
    let Some((&status, device_mac)) = words.split_first() else {
        return Err(malformed("empty login result".into()));
    };
    if status != STATUS_ACCEPTED {
        log::debug!("Login of {} rejected with status {status}", credentials.username);
        return Err(Error::AuthRejected);
    }
    if device_mac.len() != MAC_LEN / 2 {
        return Err(malformed(format!("device MAC of {} words", device_mac.len())));
    }
    let mut mac = mac(&credentials.password)?;
    mac.update(client_challenge);
    if mac.verify_slice(&words_to_bytes(device_mac)).is_err() {
        log::error!("Device answered the login challenge with an invalid MAC");
        return Err(Error::AuthRejected);
    }
    Ok(())
}

impl Worker {
    /// Run the challenge/response exchange on the current link.
    pub(super) async fn login_exchange(&mut self, credentials: &Credentials) -> Result<()> {
        let window = self.config.login;
        self.write_once(window.command, &[REQUEST_CHALLENGE]).await?;
        let words = self
            .read_once(window.challenge, CHALLENGE_WORDS, None)
            .await?;
        let device_challenge = device_challenge(&words)?;
        let client_challenge: [u8; CHALLENGE_LEN] = rand::random();
        let request = submit_request(credentials, &client_challenge, &device_challenge)?;
        self.write_once(window.command, &request).await?;
        let words = self.read_once(window.result, RESULT_WORDS, None).await?;
        check_result(credentials, &client_challenge, &words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> [u8; CHALLENGE_LEN] {
        core::array::from_fn(|i| i as u8)
    }

    #[test]
    fn digest_of_known_challenge() {
        let digest = digest("00000a", &challenge()).unwrap();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(
            "e53e898f42478c564818689b929ac641b7828eb3808c0170e158e6fea8aee999",
            hex
        );
    }

    #[test]
    fn submit_request_layout() {
        let credentials = Credentials::installer("00000a");
        let client = [0xAA; CHALLENGE_LEN];
        let request = submit_request(&credentials, &client, &challenge()).unwrap();
        assert_eq!(42, request.len());
        assert_eq!(SUBMIT, request[0]);
        assert_eq!(&[0xAAAA; 8], &request[1..9]);
        assert_eq!(9, request[9]);
        assert_eq!(b"installer\0".to_vec(), words_to_bytes(&request[10..15]));
        assert_eq!(
            digest("00000a", &challenge()).unwrap().to_vec(),
            words_to_bytes(&request[26..])
        );
    }

    #[test]
    fn reject_long_username() {
        let credentials = Credentials::new("x".repeat(33), "secret");
        let err = submit_request(&credentials, &challenge(), &challenge()).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
    }

    #[test]
    fn verify_device_answer() {
        let credentials = Credentials::installer("00000a");
        let client = challenge();
        let mut result = vec![STATUS_ACCEPTED];
        result.extend(bytes_to_words(&digest("00000a", &client).unwrap()));
        assert!(check_result(&credentials, &client, &result).is_ok());

        // device does not know the password
        let mut forged = vec![STATUS_ACCEPTED];
        forged.extend(bytes_to_words(&digest("guess", &client).unwrap()));
        assert!(matches!(
            check_result(&credentials, &client, &forged),
            Err(Error::AuthRejected)
        ));

        let mut rejected = result.clone();
        rejected[0] = 1;
        assert!(matches!(
            check_result(&credentials, &client, &rejected),
            Err(Error::AuthRejected)
        ));

        assert!(matches!(
            check_result(&credentials, &client, &result[..5]),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn password_is_not_printed() {
        let credentials = Credentials::installer("00000a");
        assert!(!format!("{credentials:?}").contains("00000a"));
    }
}
