//! Local-first account shim.
//!
//! Registration commits to the local user cache and mirrors to the remote
//! endpoint through the retry queue. Login checks the cache first and only
//! falls back to the remote `login` action when there is no local match; a
//! remote success back-fills the cache. Password resets are queued.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::db::DbState;
use crate::queue::{QueueAction, SyncQueue};
use crate::remote::{ApiResponse, RemoteClient};
use crate::remote::CONFIG_NOT_SET;
use crate::users::{find_user, insert_user_if_absent, LocalUser};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const EMAIL_IN_USE: &str = "Email already in use";
pub const REGISTRATION_SUCCESSFUL: &str = "Registration successful";
pub const LOGIN_SUCCESSFUL: &str = "Login successful";
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const RESET_QUEUED: &str = "Password reset queued";

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A new account. Also the payload of a queued `register` mirror.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Registration {
    pub fn new(name: &str, email: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            security_question: None,
            security_answer: None,
            hint: None,
        }
    }

    pub fn with_security(mut self, question: Option<String>, answer: Option<String>) -> Self {
        self.security_question = question;
        self.security_answer = answer;
        self
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    /// Trimmed copy with a lower-cased email.
    fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            password: self.password.trim().to_string(),
            security_question: self.security_question.clone(),
            security_answer: self.security_answer.clone(),
            hint: self.hint.clone(),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("hint", &self.hint)
            .finish_non_exhaustive()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.password.zeroize();
        if let Some(answer) = self.security_answer.as_mut() {
            answer.zeroize();
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hash_password(password: &str) -> Result<String, String> {
    bcrypt::hash(password, HASH_COST).map_err(|e| format!("hash password: {e}"))
}

fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

fn profile_json(name: &str, email: &str) -> serde_json::Value {
    serde_json::json!({ "name": name, "email": email })
}

/// Add a remotely verified account unless the email is already cached.
fn backfill_user(db: &DbState, name: &str, email: &str, password: &str) -> Result<(), String> {
    let user = LocalUser {
        name: name.to_string(),
        email: email.to_lowercase(),
        password_hash: hash_password(password)?,
        hint: None,
    };
    if insert_user_if_absent(db, user)? {
        info!(email = %email, "Cached remotely verified account");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Public operations
// ---------------------------------------------------------------------------

/// Register locally, then queue the remote mirror when an endpoint is set.
pub fn register_user(db: &DbState, queue: &SyncQueue, registration: &Registration) -> ApiResponse {
    let registration = registration.normalized();

    // Hash outside the store lock; the duplicate check and insert share it.
    let password_hash = match hash_password(&registration.password) {
        Ok(hash) => hash,
        Err(e) => return ApiResponse::failure(format!("Registration failed: {e}")),
    };
    let user = LocalUser {
        name: registration.name.clone(),
        email: registration.email.clone(),
        password_hash,
        hint: registration.hint.clone(),
    };
    match insert_user_if_absent(db, user) {
        Ok(true) => info!(email = %registration.email, "User registered locally"),
        Ok(false) => {
            info!(email = %registration.email, "Registration rejected, email already cached");
            return ApiResponse::failure(EMAIL_IN_USE);
        }
        Err(e) => {
            warn!("Failed to save user cache: {e}");
            return ApiResponse::failure(format!("Registration failed: {e}"));
        }
    }

    if queue.remote().is_configured() {
        let email = registration.email.clone();
        if let Err(e) = queue.enqueue(QueueAction::Register(registration)) {
            warn!(email = %email, "Failed to queue registration mirror: {e}");
        }
    } else {
        debug!("Remote endpoint not configured, registration kept local");
    }

    ApiResponse::ok(REGISTRATION_SUCCESSFUL)
}

/// Verify against the local cache, falling back to the remote endpoint.
pub async fn login_user(
    db: &DbState,
    remote: &RemoteClient,
    email: &str,
    password: &str,
) -> ApiResponse {
    let email = email.trim().to_lowercase();
    let password = Zeroizing::new(password.trim().to_string());

    match find_user(db, &email) {
        Ok(Some(user)) if verify_password(&password, &user.password_hash) => {
            info!(email = %email, "Local login successful");
            let mut response = ApiResponse::ok(LOGIN_SUCCESSFUL);
            response.user = Some(profile_json(&user.name, &user.email));
            return response;
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to read user cache: {e}"),
    }

    if !remote.is_configured() {
        debug!(email = %email, "No local match and no remote endpoint");
        return ApiResponse::failure(INVALID_CREDENTIALS);
    }

    match remote.login(&email, &password).await {
        Ok(response) if response.success => {
            info!(email = %email, "Remote login successful");
            let name = response
                .user_profile()
                .map(|profile| profile.name)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| email.clone());
            if let Err(e) = backfill_user(db, &name, &email, &password) {
                warn!(email = %email, "Failed to cache remote account: {e}");
            }
            response
        }
        Ok(response) => {
            info!(email = %email, reason = response.message(), "Remote login rejected");
            response
        }
        Err(e) => {
            warn!(email = %email, error = %e, "Remote login unavailable");
            ApiResponse::failure(INVALID_CREDENTIALS)
        }
    }
}

/// Queue a password reset for background delivery. Refused without an
/// endpoint, since the queue never drains then.
pub fn request_password_reset(queue: &SyncQueue, email: &str, new_password: &str) -> ApiResponse {
    if !queue.remote().is_configured() {
        warn!("Password reset refused, remote endpoint not configured");
        return ApiResponse::failure(CONFIG_NOT_SET);
    }
    let action = QueueAction::ResetPassword {
        email: email.trim().to_lowercase(),
        new_password: new_password.trim().to_string(),
    };
    match queue.enqueue(action) {
        Ok(()) => ApiResponse::ok(RESET_QUEUED),
        Err(e) => {
            warn!("Failed to queue password reset: {e}");
            ApiResponse::failure(format!("Password reset failed: {e}"))
        }
    }
}
