use sqlx::{QueryBuilder, Sqlite};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::{Database, StorageError};
use crate::error::field_errors;
use crate::users::dto::{NewUser, UserChanges};
use crate::users::repo_types::User;

const USER_COLUMNS: &str =
    "id, email, full_name, is_active, hashed_password, created_at, updated_at";

/// The only component that talks to the `users` table.
///
/// Every method opens its own session and releases it before returning;
/// mutations are committed first.
#[derive(Clone, Debug)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new user with a generated id.
    #[instrument(skip(self, draft, hashed_password), fields(email = %draft.email))]
    pub async fn create(&self, draft: &NewUser, hashed_password: &str) -> Result<User, StorageError> {
        let mut session = self.db.session().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, full_name, is_active, hashed_password, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(draft.email.as_str())
        .bind(draft.full_name.as_deref())
        .bind(true)
        .bind(hashed_password)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(session.conn())
        .await?;
        session.commit().await?;

        debug!(user_id = %user.id, "user row inserted");
        Ok(user)
    }

    /// Find a user by id.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        let mut session = self.db.session().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(session.conn())
        .await?;
        session.rollback().await?;
        Ok(user)
    }

    /// Find a user by email (exact, case-sensitive match).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let mut session = self.db.session().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(session.conn())
        .await?;
        session.rollback().await?;
        Ok(user)
    }

    /// One page of users, oldest first. Ties on `created_at` break on `id`
    /// so that pages never overlap. Timestamps are stored as RFC 3339 text
    /// with a variable-width fraction, so they are compared as julian days
    /// rather than as strings.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>, StorageError> {
        let mut session = self.db.session().await?;
        let rows = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY julianday(created_at) ASC, id ASC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(session.conn())
        .await?;
        session.rollback().await?;
        Ok(rows)
    }

    /// Apply the fields present in `changes` and return the refreshed row.
    ///
    /// An empty change set is a read; `updated_at` is only touched when
    /// something is written.
    #[instrument(skip(self, user, changes), fields(user_id = %user.id))]
    pub async fn update(&self, user: &User, changes: &UserChanges) -> Result<User, StorageError> {
        changes
            .validate()
            .map_err(|e| StorageError::InvalidInput(field_errors(&e)))?;
        if changes.is_empty() {
            return self.get_by_id(user.id).await?.ok_or(StorageError::NotFound);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(email) = &changes.email {
                set.push("email = ").push_bind_unseparated(email.clone());
            }
            if let Some(full_name) = &changes.full_name {
                set.push("full_name = ").push_bind_unseparated(full_name.clone());
            }
            if let Some(is_active) = changes.is_active {
                set.push("is_active = ").push_bind_unseparated(is_active);
            }
            if let Some(hash) = &changes.hashed_password {
                set.push("hashed_password = ").push_bind_unseparated(hash.clone());
            }
            set.push("updated_at = ")
                .push_bind_unseparated(OffsetDateTime::now_utc());
        }
        qb.push(" WHERE id = ").push_bind(user.id);
        qb.push(" RETURNING ").push(USER_COLUMNS);

        let mut session = self.db.session().await?;
        let updated = qb
            .build_query_as::<User>()
            .fetch_optional(session.conn())
            .await?
            .ok_or(StorageError::NotFound)?;
        session.commit().await?;

        debug!("user row updated");
        Ok(updated)
    }

    /// Remove the user's row. A row that is already gone is `NotFound`.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn delete(&self, user: &User) -> Result<(), StorageError> {
        let mut session = self.db.session().await?;
        let done = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user.id)
            .execute(session.conn())
            .await?;
        if done.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        session.commit().await?;

        debug!("user row deleted");
        Ok(())
    }

    /// Number of stored users with this exact email.
    #[cfg(test)]
    pub(crate) async fn count_by_email(&self, email: &str) -> Result<i64, StorageError> {
        let mut session = self.db.session().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(session.conn())
            .await?;
        session.rollback().await?;
        Ok(count)
    }
}
