use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tracing::instrument;

use crate::{
    error::ApiResult,
    state::AppState,
    users::{
        dto::{NewUser, Pagination, PublicUser},
        extractors::{ValidatedJson, ValidatedQuery},
        services::UserService,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/users", get(list_users).post(register))
}

#[instrument(skip(service, payload))]
pub async fn register(
    State(service): State<UserService>,
    ValidatedJson(payload): ValidatedJson<NewUser>,
) -> ApiResult<(StatusCode, Json<PublicUser>)> {
    let user = service.register(payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(service))]
pub async fn list_users(
    State(service): State<UserService>,
    ValidatedQuery(p): ValidatedQuery<Pagination>,
) -> ApiResult<Json<Vec<PublicUser>>> {
    let users = service.list_users(p.limit, p.offset).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{app::build_app, state::AppState, users::dto::PublicUser};

    async fn test_app() -> (Router, AppState) {
        let state = AppState::for_tests().await.expect("test state");
        (build_app(state.clone()), state)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn post_user(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/users")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn stored(state: &AppState, email: &str) -> i64 {
        use crate::users::services::UserService;
        use axum::extract::FromRef;
        UserService::from_ref(state).count_by_email(email).await.unwrap()
    }

    #[tokio::test]
    async fn register_returns_public_projection() {
        let (app, _) = test_app().await;
        let (status, body) = send(
            &app,
            post_user(json!({
                "email": "testuser@mail.com",
                "password": "pass-0001",
                "full_name": "Test user",
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "testuser@mail.com");
        assert_eq!(body["full_name"], "Test user");
        assert_eq!(body["is_active"], true);
        assert!(body["id"].is_string());

        let text = body.to_string();
        assert!(!text.contains("pass-0001"));
        assert!(!text.contains("argon2"));
        assert!(body.get("hashed_password").is_none());
        assert!(body.get("created_at").is_none());
        assert!(body.get("updated_at").is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_409() {
        let (app, state) = test_app().await;
        let payload = json!({"email": "dup@mail.com", "password": "pass-0001"});

        let (first, _) = send(&app, post_user(payload.clone())).await;
        assert_eq!(first, StatusCode::CREATED);
        let (second, body) = send(&app, post_user(payload)).await;
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Email already registered");
        assert_eq!(stored(&state, "dup@mail.com").await, 1);
    }

    #[tokio::test]
    async fn short_password_is_422() {
        let (app, state) = test_app().await;
        let (status, body) = send(
            &app,
            post_user(json!({"email": "short@mail.com", "password": "1234567"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["details"][0]["field"], "password");
        assert_eq!(stored(&state, "short@mail.com").await, 0);
    }

    #[tokio::test]
    async fn short_full_name_is_422() {
        let (app, state) = test_app().await;
        for name in ["A", "Ab", "Abc"] {
            let (status, _) = send(
                &app,
                post_user(json!({"email": "name@mail.com", "password": "pass-0001", "full_name": name})),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "full_name {name:?}");
        }
        assert_eq!(stored(&state, "name@mail.com").await, 0);
    }

    #[tokio::test]
    async fn absent_full_name_is_stored_as_null() {
        let (app, _) = test_app().await;
        let (status, body) = send(
            &app,
            post_user(json!({"email": "noname@mail.com", "password": "pass-0001"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["full_name"].is_null());
    }

    #[tokio::test]
    async fn invalid_email_is_422() {
        let (app, _) = test_app().await;
        let (status, body) = send(
            &app,
            post_user(json!({"email": "testuser", "password": "pass-0001"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["details"][0]["field"], "email");
    }

    #[tokio::test]
    async fn malformed_domains_are_422() {
        let (app, state) = test_app().await;
        for email in ["a@b..co", "a@.b.co", "a@b.co."] {
            let (status, body) = send(
                &app,
                post_user(json!({"email": email, "password": "pass-0001"})),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{email}");
            assert_eq!(body["details"][0]["field"], "email");
            assert_eq!(stored(&state, email).await, 0);
        }
    }

    #[tokio::test]
    async fn unknown_fields_are_422() {
        let (app, state) = test_app().await;
        let (status, _) = send(
            &app,
            post_user(json!({
                "email": "extra@mail.com",
                "password": "pass-0001",
                "extra_info": "More info",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(stored(&state, "extra@mail.com").await, 0);
    }

    #[tokio::test]
    async fn malformed_json_is_422() {
        let (app, _) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/users")
            .header("content-type", "application/json")
            .body(Body::from("{\"email\": "))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn list_rejects_out_of_range_params() {
        let (app, _) = test_app().await;
        for uri in [
            "/users?limit=0",
            "/users?limit=101",
            "/users?offset=-1",
            "/users?limit=ten",
        ] {
            let (status, _) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        }
    }

    #[tokio::test]
    async fn list_limit_one_returns_at_most_one() {
        let (app, _) = test_app().await;
        for i in 0..3 {
            send(
                &app,
                post_user(json!({"email": format!("u{i}@mail.com"), "password": "pass-0001"})),
            )
            .await;
        }
        let (status, body) = send(&app, get("/users?limit=1&offset=0")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, all) = send(&app, get("/users")).await;
        assert_eq!(all.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn created_user_round_trips_through_listing() {
        let (app, _) = test_app().await;
        let (_, created) = send(
            &app,
            post_user(json!({
                "email": "round@mail.com",
                "password": "pass-0001",
                "full_name": "Round Trip",
            })),
        )
        .await;
        let created: PublicUser = serde_json::from_value(created).unwrap();

        let (status, listed) = send(&app, get("/users?limit=100")).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<PublicUser> = serde_json::from_value(listed).unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn concurrent_registration_yields_one_row() {
        let (app, state) = test_app().await;
        let payload = json!({"email": "race@mail.com", "password": "pass-0001"});
        let (a, b) = tokio::join!(
            send(&app, post_user(payload.clone())),
            send(&app, post_user(payload.clone())),
        );
        let statuses = [a.0, b.0];
        assert!(statuses.contains(&StatusCode::CONFLICT), "{statuses:?}");
        assert!(statuses.contains(&StatusCode::CREATED), "{statuses:?}");
        assert_eq!(stored(&state, "race@mail.com").await, 1);
    }
}
