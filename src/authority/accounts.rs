use chrono::Utc;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{AuthPayload, Registration, User};

const MIN_PASSWORD_LEN: usize = 6;

/// Issues and checks bearer tokens of the form `<user_id>.<nonce>.<hex hmac>`.
pub struct TokenSigner {
    key: Vec<u8>,
    epoch: i64,
    issued: u64,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            epoch: Utc::now().timestamp_millis(),
            issued: 0,
        }
    }

    pub fn issue(&mut self, user_id: &str) -> String {
        self.issued += 1;
        let payload = format!("{}.{:x}{:04x}", user_id, self.epoch, self.issued);
        let sig = hex::encode(self.sign(&payload));
        format!("{}.{}", payload, sig)
    }

    /// Returns the user id the token was issued to, if the signature holds.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (payload, sig_hex) = token.rsplit_once('.')?;
        let (user_id, _nonce) = payload.split_once('.')?;
        let expected = hex::decode(sig_hex).ok()?;
        let computed = self.sign(payload);
        (expected.len() == computed.len() && constant_time_eq(&computed, &expected))
            .then(|| user_id.to_string())
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        // HMAC takes keys of any length
        let mut mac = match Hmac::<Sha256>::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

struct Account {
    user: User,
    salt: String,
    digest: Vec<u8>,
}

fn password_digest(salt: &str, password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

/// Registered users, their credentials and the revoked tokens.
pub struct Accounts {
    signer: TokenSigner,
    by_id: HashMap<String, Account>,
    by_email: HashMap<String, String>,
    revoked: HashSet<String>,
    next_id: u64,
}

impl Accounts {
    pub fn new(secret: &str) -> Self {
        Self {
            signer: TokenSigner::new(secret),
            by_id: HashMap::new(),
            by_email: HashMap::new(),
            revoked: HashSet::new(),
            next_id: 1,
        }
    }

    pub fn register(&mut self, form: &Registration) -> Result<AuthPayload> {
        let username = form.username.trim();
        let email = form.email.trim().to_lowercase();
        if username.is_empty() {
            return Err(Error::invalid("Username is required"));
        }
        if !email.contains('@') {
            return Err(Error::invalid("A valid email is required"));
        }
        if form.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::invalid(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let taken = self.by_email.contains_key(&email)
            || self
                .by_id
                .values()
                .any(|a| a.user.username.eq_ignore_ascii_case(username));
        if taken {
            return Err(Error::Rejected {
                status: 409,
                message: "User already exists".to_string(),
            });
        }

        let id = format!("u{:05}", self.next_id);
        self.next_id += 1;
        let salt = format!("{}:{}", id, Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let name = form.name.trim();
        let user = User {
            id: id.clone(),
            username: username.to_string(),
            email: email.clone(),
            name: (!name.is_empty()).then(|| name.to_string()),
            profile_pic: None,
        };
        let digest = password_digest(&salt, &form.password);
        self.by_email.insert(email, id.clone());
        self.by_id.insert(
            id.clone(),
            Account {
                user: user.clone(),
                salt,
                digest,
            },
        );
        info!("Registered {} as {}", user.username, id);

        let token = self.signer.issue(&id);
        Ok(AuthPayload { token, user })
    }

    pub fn login(&mut self, email: &str, password: &str) -> Result<AuthPayload> {
        let invalid = || Error::Rejected {
            status: 401,
            message: "Invalid credentials".to_string(),
        };
        let email = email.trim().to_lowercase();
        let account = self
            .by_email
            .get(&email)
            .and_then(|id| self.by_id.get(id))
            .ok_or_else(invalid)?;
        let digest = password_digest(&account.salt, password);
        if !constant_time_eq(&digest, &account.digest) {
            warn!("Failed login for {}", email);
            return Err(invalid());
        }
        let user = account.user.clone();
        let token = self.signer.issue(&user.id);
        debug!(user_id = %user.id, "Issued token");
        Ok(AuthPayload { token, user })
    }

    pub fn authenticate(&self, token: &str) -> Result<User> {
        if self.revoked.contains(token) {
            return Err(Error::SessionExpired);
        }
        self.signer
            .verify(token)
            .and_then(|id| self.by_id.get(&id))
            .map(|a| a.user.clone())
            .ok_or(Error::SessionExpired)
    }

    pub fn logout(&mut self, token: &str) -> Result<()> {
        let user = self.authenticate(token)?;
        self.revoked.insert(token.to_string());
        info!("Revoked a token of {}", user.username);
        Ok(())
    }
}
