use rusqlite::params;
use tracing::info;

use crate::commands::{new_id, require_text};
use crate::db::{self, get_user_by_id};
use crate::error::{map_unique_violation, Result};
use crate::models::User;
use crate::store::Store;

impl Store {
    pub fn create_user(&mut self, username: &str, email: &str) -> Result<User> {
        let user = User {
            id: new_id(),
            username: require_text("username", username)?,
            email: email.trim().to_string(),
            created_at: db::now(),
        };

        self.conn
            .execute(
                "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id,
                    user.username,
                    user.email,
                    user.created_at.timestamp_millis()
                ],
            )
            .map_err(|err| map_unique_violation(err, "username is already taken"))?;

        info!(user = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub fn get_user(&self, user_id: &str) -> Result<User> {
        get_user_by_id(&self.conn, user_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::store::Store;

    #[test]
    fn duplicate_username_conflicts() {
        let mut store = Store::open_in_memory().expect("store");
        store.create_user("ann", "ann@example.com").expect("first");
        let err = store.create_user("ann", "other@example.com").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn get_user_round_trips() {
        let mut store = Store::open_in_memory().expect("store");
        let user = store.create_user(" bob ", "bob@example.com").expect("create");
        assert_eq!(user.username, "bob");
        assert_eq!(store.get_user(&user.id).expect("get"), user);
    }
}
