use fake::{
    faker::{internet::en::SafeEmail, name::en::Name},
    Fake,
};
use tracing::{info, warn};

use crate::config::{AppConfig, Environment};
use crate::state::AppState;
use crate::users::{
    dto::{NewUser, MIN_FULL_NAME_LEN},
    ServiceError, User, UserService,
};

pub const DEFAULT_SEED_COUNT: usize = 30;
pub const SEED_PASSWORD: &str = "password123";

/// The `n`th fake registration of a run. The counter goes into the local
/// part of the email so addresses within one run never collide.
pub fn fake_user(n: usize) -> NewUser {
    let email: String = SafeEmail().fake();
    let (local, domain) = email.split_once('@').unwrap_or(("user", "example.com"));
    let name: String = Name().fake();
    NewUser {
        email: format!("{local}.{n}@{domain}"),
        password: SEED_PASSWORD.into(),
        full_name: (name.chars().count() >= MIN_FULL_NAME_LEN).then_some(name),
    }
}

/// Register `count` fake users through the service so they get real
/// password hashes. Duplicates are skipped.
pub async fn seed_users(service: &UserService, count: usize) -> anyhow::Result<Vec<User>> {
    info!(count, "seeding users");
    let mut users = Vec::with_capacity(count);
    for i in 0..count {
        match service.register(fake_user(i)).await {
            Ok(u) => users.push(u),
            Err(ServiceError::Conflict(_)) => {
                warn!(index = i, "generated email already taken; skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        if (i + 1) % 10 == 0 {
            info!("... {}/{} users created", i + 1, count);
        }
    }
    info!(created = users.len(), example = ?users.first().map(|u| &u.email), "seeding done");
    Ok(users)
}

/// Seed entry point. Refuses to touch a production database.
pub async fn run(config: AppConfig, count: usize) -> anyhow::Result<usize> {
    if config.env == Environment::Production {
        warn!("seed cannot be run in production");
        return Ok(0);
    }
    info!(env = %config.env, "starting seed process");

    let state = AppState::init(config).await?;
    let service = UserService::new(crate::users::UserRepository::new(state.db.clone()));
    let created = seed_users(&service, count).await;
    state.db.close().await;
    Ok(created?.len())
}
