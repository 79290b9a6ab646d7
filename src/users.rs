//! Local user cache.
//!
//! A JSON array of accounts stored under the `users` key. Email is the
//! case-insensitive unique key; entries are created on registration or on a
//! remote-login back-fill and never modified afterwards. The credential is a
//! bcrypt hash.

use serde::{Deserialize, Serialize};

use crate::data_helpers::{read_local_vec, update_local_vec};
use crate::db::DbState;

pub(crate) const USERS_KEY: &str = "users";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl LocalUser {
    pub fn has_email(&self, email: &str) -> bool {
        self.email.to_lowercase() == email.to_lowercase()
    }
}

pub fn load_users(db: &DbState) -> Result<Vec<LocalUser>, String> {
    read_local_vec(db, USERS_KEY)
}

/// Add `user` unless an entry with the same email exists. The check and
/// the write happen under one lock. Returns whether the user was added.
pub(crate) fn insert_user_if_absent(db: &DbState, user: LocalUser) -> Result<bool, String> {
    update_local_vec(db, USERS_KEY, |users: &mut Vec<LocalUser>| {
        if users.iter().any(|u| u.has_email(&user.email)) {
            return false;
        }
        users.push(user);
        true
    })
}

pub fn find_user(db: &DbState, email: &str) -> Result<Option<LocalUser>, String> {
    Ok(load_users(db)?.into_iter().find(|u| u.has_email(email)))
}
