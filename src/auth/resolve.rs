//! Account-alias resolution and identity checks.
//!
//! An alias account forwards authentication to another account id.
//! Resolution walks the chain to the terminal principal; a missing link
//! or a cycle means the whole visited chain is garbage — every visited
//! account is removed from the store on the spot and the caller gets
//! the uniform invalid-credentials rejection. Login verifies the
//! submitted password against the *terminal* account's digest, so an
//! old aliased id with its original password authenticates as the new
//! terminal account and receives that account's rotating code.
//!
//! The last-administrator guard lives here too: any mutation that could
//! strand the system with zero administrators re-checks the admin count
//! under the users write lock immediately before committing.

use crate::auth::code;
use crate::error::RequestError;
use crate::model::{Table, User};
use crate::store::{Blob, Store};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Hop bound for alias chains. Cycle detection already terminates the
/// walk; the bound caps pathological long (acyclic) chains.
const MAX_ALIAS_HOPS: usize = 32;

/// Successful login: terminal account id plus its current access code.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoginReply {
    pub user_id: String,
    pub access_code: String,
}

/// Resolve `id` through its alias chain and authenticate with `password`.
pub fn login(store: &Arc<Store>, id: &str, password: &str) -> Result<LoginReply, RequestError> {
    let mut visited: Vec<String> = vec![id.to_string()];

    loop {
        let current = visited
            .last()
            .cloned()
            .unwrap_or_default();
        let Some(user) = store.get_user(&current) else {
            if visited.len() > 1 {
                collect_broken_chain(store, &visited);
            } else {
                // Dummy digest keeps unknown-id timing close to the
                // wrong-password path.
                let _ = code::digest_password(password, "");
            }
            return Err(RequestError::InvalidCredentials);
        };

        match user.alias {
            Some(next) => {
                if visited.iter().any(|v| v == &next) {
                    collect_broken_chain(store, &visited);
                    return Err(RequestError::InvalidCredentials);
                }
                if visited.len() >= MAX_ALIAS_HOPS {
                    warn!(start = %id, hops = visited.len(), "alias chain exceeds hop bound");
                    return Err(RequestError::InvalidCredentials);
                }
                visited.push(next);
            }
            None => {
                let attempt = code::digest_password(password, &user.creation_date);
                if !code::constant_time_eq(attempt.as_bytes(), user.password_hashed.as_bytes()) {
                    return Err(RequestError::InvalidCredentials);
                }
                return Ok(LoginReply {
                    user_id: current,
                    access_code: code::derive(&user.password_hashed, Utc::now().date_naive()),
                });
            }
        }
    }
}

/// Remove every account on a broken or cyclic alias chain.
fn collect_broken_chain(store: &Arc<Store>, visited: &[String]) {
    {
        let mut users = store.users_mut();
        for id in visited {
            users.remove(id);
        }
    }
    info!(chain = ?visited, "removed broken alias chain");
    store.request_save(Blob::Users);
}

/// Check an id + daily access code for a user. Alias accounts are not
/// directly authenticatable with a code; they must log in through
/// [`login`] first.
pub fn validate_user(store: &Store, id: &str, access_code: &str) -> Result<User, RequestError> {
    let user = store.get_user(id).ok_or(RequestError::InvalidCredentials)?;
    if user.is_alias() || !code::verify(&user.password_hashed, access_code, Utc::now()) {
        return Err(RequestError::InvalidCredentials);
    }
    Ok(user)
}

/// Check an id + daily access code for a table.
pub fn validate_table(store: &Store, id: &str, access_code: &str) -> Result<Table, RequestError> {
    let table = store.get_table(id).ok_or(RequestError::InvalidCredentials)?;
    if !code::verify(&table.base_access_code, access_code, Utc::now()) {
        return Err(RequestError::InvalidCredentials);
    }
    Ok(table)
}

/// Check an id + daily code and require the administrator role.
pub fn validate_admin(store: &Store, id: &str, access_code: &str) -> Result<User, RequestError> {
    let user = validate_user(store, id, access_code)?;
    if !user.administrator {
        return Err(RequestError::Unauthorized);
    }
    Ok(user)
}

/// Whether `id` is an administrator and the only one in `users`.
fn sole_admin(users: &HashMap<String, User>, id: &str) -> bool {
    users.get(id).is_some_and(|u| u.administrator)
        && users.values().filter(|u| u.administrator).count() == 1
}

/// Delete a user, refusing to remove the last administrator.
/// The admin count is re-checked under the write lock at commit time.
pub fn delete_user_guarded(store: &Arc<Store>, id: &str) -> Result<User, RequestError> {
    let removed = {
        let mut users = store.users_mut();
        if !users.contains_key(id) {
            return Err(RequestError::bad_request("User does not exist"));
        }
        if sole_admin(&users, id) {
            return Err(RequestError::rejected("Cannot delete the last administrator"));
        }
        users.remove(id)
    };
    store.request_save(Blob::Users);
    removed.ok_or(RequestError::bad_request("User does not exist"))
}

/// Create or replace a user, refusing a write that would downgrade or
/// redirect the last administrator.
pub fn upsert_user_guarded(store: &Arc<Store>, id: &str, user: User) -> Result<(), RequestError> {
    {
        let mut users = store.users_mut();
        let strips_admin = !user.administrator || user.is_alias();
        if strips_admin && sole_admin(&users, id) {
            return Err(RequestError::rejected("Cannot edit the last administrator"));
        }
        users.insert(id.to_string(), user);
    }
    store.request_save(Blob::Users);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewUser, UserPreferences};
    use crate::store::tests::memory_store;

    fn new_user(password: &str, admin: bool) -> User {
        NewUser {
            password: password.into(),
            alias: None,
            administrator: admin,
            allowed_personalization: true,
            allowed_self_deletion: true,
            preferences: Some(UserPreferences {
                name: "Test".into(),
                height_presets: vec![],
            }),
        }
        .into()
    }

    fn alias_to(target: &str) -> User {
        NewUser {
            password: "ignored".into(),
            alias: Some(target.into()),
            administrator: false,
            allowed_personalization: true,
            allowed_self_deletion: true,
            preferences: None,
        }
        .into()
    }

    #[test]
    fn login_with_terminal_password_resolves_chain() {
        let store = memory_store();
        store.insert_user("c", new_user("secret-c", false));
        store.insert_user("b", alias_to("c"));
        store.insert_user("a", alias_to("b"));

        let reply = login(&store, "a", "secret-c").unwrap();
        assert_eq!(reply.user_id, "c");

        let terminal = store.get_user("c").unwrap();
        assert!(code::verify(&terminal.password_hashed, &reply.access_code, Utc::now()));
    }

    #[test]
    fn login_rejects_wrong_password_at_terminal() {
        let store = memory_store();
        store.insert_user("c", new_user("secret-c", false));
        store.insert_user("a", alias_to("c"));

        assert_eq!(login(&store, "a", "wrong"), Err(RequestError::InvalidCredentials));
        // A failed password is not a broken chain; nothing is removed.
        assert!(store.get_user("a").is_some());
        assert!(store.get_user("c").is_some());
    }

    #[test]
    fn cyclic_chain_is_collected() {
        let store = memory_store();
        store.insert_user("a", alias_to("b"));
        store.insert_user("b", alias_to("a"));

        assert_eq!(login(&store, "a", "pw"), Err(RequestError::InvalidCredentials));
        assert!(store.get_user("a").is_none());
        assert!(store.get_user("b").is_none());
    }

    #[test]
    fn dangling_chain_is_collected() {
        let store = memory_store();
        store.insert_user("a", alias_to("ghost"));

        assert_eq!(login(&store, "a", "pw"), Err(RequestError::InvalidCredentials));
        assert!(store.get_user("a").is_none());
    }

    #[test]
    fn unknown_id_is_not_a_chain() {
        let store = memory_store();
        store.insert_user("real", new_user("pw", true));

        assert_eq!(login(&store, "ghost", "pw"), Err(RequestError::InvalidCredentials));
        assert!(store.get_user("real").is_some());
    }

    #[test]
    fn validate_user_rejects_alias_accounts() {
        let store = memory_store();
        store.insert_user("c", new_user("pw", false));
        store.insert_user("a", alias_to("c"));

        let alias = store.get_user("a").unwrap();
        let todays = code::derive(&alias.password_hashed, Utc::now().date_naive());
        assert!(validate_user(&store, "a", &todays).is_err());
    }

    #[test]
    fn validate_user_accepts_current_code() {
        let store = memory_store();
        store.insert_user("u", new_user("pw", false));
        let user = store.get_user("u").unwrap();
        let todays = code::derive(&user.password_hashed, Utc::now().date_naive());
        assert!(validate_user(&store, "u", &todays).is_ok());
        assert!(validate_user(&store, "u", "bogus").is_err());
    }

    #[test]
    fn validate_admin_distinguishes_role_from_identity() {
        let store = memory_store();
        store.insert_user("u", new_user("pw", false));
        let user = store.get_user("u").unwrap();
        let todays = code::derive(&user.password_hashed, Utc::now().date_naive());
        assert_eq!(validate_admin(&store, "u", &todays), Err(RequestError::Unauthorized));
        assert_eq!(validate_admin(&store, "u", "bogus"), Err(RequestError::InvalidCredentials));
    }

    #[test]
    fn last_admin_cannot_be_deleted() {
        let store = memory_store();
        store.insert_user("boss", new_user("pw", true));
        store.insert_user("peon", new_user("pw", false));

        assert!(matches!(
            delete_user_guarded(&store, "boss"),
            Err(RequestError::Rejected(_))
        ));
        assert!(store.get_user("boss").is_some());

        // A non-admin deletes fine.
        assert!(delete_user_guarded(&store, "peon").is_ok());
    }

    #[test]
    fn second_admin_unlocks_deletion() {
        let store = memory_store();
        store.insert_user("boss", new_user("pw", true));
        store.insert_user("boss2", new_user("pw", true));

        assert!(delete_user_guarded(&store, "boss").is_ok());
        // Now boss2 is the last one standing.
        assert!(matches!(
            delete_user_guarded(&store, "boss2"),
            Err(RequestError::Rejected(_))
        ));
    }

    #[test]
    fn last_admin_cannot_be_downgraded_or_aliased() {
        let store = memory_store();
        store.insert_user("boss", new_user("pw", true));

        assert!(matches!(
            upsert_user_guarded(&store, "boss", new_user("pw", false)),
            Err(RequestError::Rejected(_))
        ));
        assert!(matches!(
            upsert_user_guarded(&store, "boss", alias_to("elsewhere")),
            Err(RequestError::Rejected(_))
        ));
        // Replacing with another admin record is fine.
        assert!(upsert_user_guarded(&store, "boss", new_user("new-pw", true)).is_ok());
        // So is creating unrelated accounts.
        assert!(upsert_user_guarded(&store, "peon", new_user("pw", false)).is_ok());
    }

    #[test]
    fn hop_bound_caps_long_chains() {
        let store = memory_store();
        store.insert_user("end", new_user("pw", false));
        for i in 0..40 {
            let next = if i == 39 { "end".to_string() } else { format!("hop{}", i + 1) };
            store.insert_user(&format!("hop{i}"), alias_to(&next));
        }
        assert_eq!(login(&store, "hop0", "pw"), Err(RequestError::InvalidCredentials));
        // Bound hit, not a broken chain: accounts stay.
        assert!(store.get_user("hop0").is_some());
    }
}
