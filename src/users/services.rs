use axum::extract::FromRef;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::StorageError;
use crate::error::{ApiError, FieldError};
use crate::state::AppState;
use crate::users::dto::{NewUser, UserChanges};
use crate::users::password::hash_password_async;
use crate::users::repo::UserRepository;
use crate::users::repo_types::User;

pub const EMAIL_TAKEN: &str = "Email already registered";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Conflict(String),

    #[error("user not found")]
    NotFound,

    #[error("invalid input")]
    Validation(Vec<FieldError>),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            // The unique index is the authoritative duplicate check.
            StorageError::UniqueViolation(_) => ServiceError::Conflict(EMAIL_TAKEN.into()),
            StorageError::NotFound => ServiceError::NotFound,
            StorageError::InvalidInput(fields) => ServiceError::Validation(fields),
            other => ServiceError::Storage(other),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::NotFound => ApiError::NotFound("User not found".into()),
            ServiceError::Validation(fields) => ApiError::Validation(fields),
            ServiceError::Hashing(msg) => ApiError::Internal(msg),
            ServiceError::Storage(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// User business rules. Holds no state beyond its repository, so a fresh
/// instance is built for every request.
#[derive(Clone, Debug)]
pub struct UserService {
    repo: UserRepository,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        UserService::new(UserRepository::new(state.db.clone()))
    }
}

impl UserService {
    pub fn new(repo: UserRepository) -> Self {
        Self { repo }
    }

    /// Register a new user. Fails with `Conflict` if the email is taken,
    /// either at the pre-check or when the insert hits the unique index.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: NewUser) -> Result<User, ServiceError> {
        if self.repo.get_by_email(&input.email).await?.is_some() {
            warn!("email already registered");
            return Err(ServiceError::Conflict(EMAIL_TAKEN.into()));
        }

        let hash = hash_password_async(input.password.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "hash_password failed");
                ServiceError::Hashing(e.to_string())
            })?;

        let user = self.repo.create(&input, &hash).await.map_err(|e| {
            if matches!(e, StorageError::UniqueViolation(_)) {
                warn!("email registered concurrently");
            }
            ServiceError::from(e)
        })?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, ServiceError> {
        Ok(self.repo.list(limit, offset).await?)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, ServiceError> {
        self.repo.get_by_id(id).await?.ok_or(ServiceError::NotFound)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User, ServiceError> {
        let user = self.get_user(id).await?;
        let updated = self.repo.update(&user, &changes).await?;
        info!("user updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: Uuid) -> Result<(), ServiceError> {
        let user = self.get_user(id).await?;
        self.repo.delete(&user).await?;
        info!("user deleted");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn count_by_email(&self, email: &str) -> Result<i64, ServiceError> {
        Ok(self.repo.count_by_email(email).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::users::password::verify_password;

    async fn service() -> UserService {
        let db = Database::open("sqlite::memory:", false).await.unwrap();
        db.create_schema().await.unwrap();
        UserService::new(UserRepository::new(db))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: "pass-0001".into(),
            full_name: Some("Test user".into()),
        }
    }

    #[tokio::test]
    async fn register_hashes_password() {
        let svc = service().await;
        let user = svc.register(new_user("a@b.co")).await.unwrap();
        assert_ne!(user.hashed_password, "pass-0001");
        assert!(verify_password("pass-0001", &user.hashed_password).unwrap());
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn second_registration_conflicts() {
        let svc = service().await;
        svc.register(new_user("dup@b.co")).await.unwrap();
        let err = svc.register(new_user("dup@b.co")).await.unwrap_err();
        match err {
            ServiceError::Conflict(msg) => assert_eq!(msg, EMAIL_TAKEN),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(svc.count_by_email("dup@b.co").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_registrations_store_one_row() {
        let svc = service().await;
        let (a, b) = tokio::join!(
            svc.register(new_user("race@b.co")),
            svc.register(new_user("race@b.co")),
        );
        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::Conflict(_))))
            .count();
        assert_eq!(conflicts, 1);
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(svc.count_by_email("race@b.co").await.unwrap(), 1);
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = ServiceError::from(StorageError::UniqueViolation("UNIQUE constraint failed".into()));
        assert!(matches!(err, ServiceError::Conflict(ref m) if m == EMAIL_TAKEN));
    }

    #[tokio::test]
    async fn update_and_delete_through_service() {
        let svc = service().await;
        let user = svc.register(new_user("life@b.co")).await.unwrap();

        let updated = svc
            .update_user(user.id, UserChanges::default().full_name(Some("New Name".into())))
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("New Name"));

        svc.delete_user(user.id).await.unwrap();
        assert!(matches!(svc.get_user(user.id).await, Err(ServiceError::NotFound)));
        assert!(matches!(svc.delete_user(user.id).await, Err(ServiceError::NotFound)));
    }

    #[tokio::test]
    async fn invalid_changes_are_validation_errors() {
        let svc = service().await;
        let user = svc.register(new_user("val@b.co")).await.unwrap();
        let err = svc
            .update_user(user.id, UserChanges::default().email("not-an-email"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn closed_database_is_storage_error() {
        let db = Database::open("sqlite::memory:", false).await.unwrap();
        db.create_schema().await.unwrap();
        let svc = UserService::new(UserRepository::new(db.clone()));
        db.close().await;

        let err = svc.list_users(10, 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::Closed)));
        assert_eq!(ApiError::from(err).status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
