use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muster_db::entities::admin_users;
use muster_db::sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::http::json_error;
use crate::state::AppState;

pub const SESSION_COOKIE_NAME: &str = "muster_session";
/// Admin sessions carry a different audience than agent tokens; the agent
/// gateway rejects them as wrong-audience even though the signature checks.
const ADMIN_AUDIENCE: &str = "muster-web";
const SESSION_HOURS: i64 = 8;

#[derive(Debug, Clone, Serialize)]
pub struct AdminIdentity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    username: String,
    exp: usize,
    iat: usize,
    iss: String,
    aud: String,
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let argon2 = argon2::Argon2::default();
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

fn verify_password(hash: &str, password: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    argon2::Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn make_session_jwt(secret: &[u8], user: &admin_users::Model) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        exp: (now + chrono::Duration::hours(SESSION_HOURS)).timestamp() as usize,
        iat: now.timestamp() as usize,
        iss: muster_core::vault::ISSUER.to_string(),
        aud: ADMIN_AUDIENCE.to_string(),
    };

    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret),
    )?)
}

pub fn validate_session_jwt(secret: &[u8], token: &str) -> Option<AdminIdentity> {
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_audience(&[ADMIN_AUDIENCE]);
    validation.set_issuer(&[muster_core::vault::ISSUER]);

    let data = jsonwebtoken::decode::<SessionClaims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )
    .ok()?;

    Some(AdminIdentity {
        user_id: data.claims.sub,
        username: data.claims.username,
    })
}

fn session_cookie(jwt: String) -> Cookie<'static> {
    let mut c = Cookie::new(SESSION_COOKIE_NAME, jwt);
    c.set_http_only(true);
    c.set_same_site(SameSite::Lax);
    c.set_path("/");
    c
}

fn clear_session_cookie() -> Cookie<'static> {
    let mut c = Cookie::new(SESSION_COOKIE_NAME, "");
    c.set_path("/");
    c.make_removal();
    c
}

/// Bootstraps the admin account from env on first login. Idempotent.
async fn ensure_admin_user(db: &DatabaseConnection) -> Result<(), String> {
    let username = std::env::var("MUSTER_ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = std::env::var("MUSTER_ADMIN_PASS").unwrap_or_else(|_| "admin".to_string());

    let existing = admin_users::Entity::find()
        .filter(admin_users::Column::Username.eq(username.clone()))
        .one(db)
        .await
        .map_err(|e| format!("db error: {e}"))?;
    if existing.is_some() {
        return Ok(());
    }

    let ph = hash_password(&password).map_err(|e| format!("hash error: {e}"))?;
    admin_users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(username),
        password_hash: Set(ph),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .map_err(|e| format!("db error: {e}"))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<LoginRequest>,
) -> Response {
    let db = &*state.db;
    if let Err(e) = ensure_admin_user(db).await {
        tracing::error!(error = e, "admin bootstrap failed");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error");
    }

    let user = match admin_users::Entity::find()
        .filter(admin_users::Column::Username.eq(input.username.clone()))
        .one(db)
        .await
    {
        Ok(Some(u)) => u,
        Ok(None) => {
            return json_error(StatusCode::UNAUTHORIZED, "invalid_credentials", "invalid credentials");
        }
        Err(e) => {
            tracing::error!(error = %e, "login lookup failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error");
        }
    };

    if !verify_password(&user.password_hash, &input.password) {
        return json_error(StatusCode::UNAUTHORIZED, "invalid_credentials", "invalid credentials");
    }

    let jwt = match make_session_jwt(&state.config.jwt_secret, &user) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "session jwt failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error");
        }
    };

    let identity = AdminIdentity {
        user_id: user.id.to_string(),
        username: user.username,
    };
    (jar.add(session_cookie(jwt)), Json(identity)).into_response()
}

pub async fn logout(jar: CookieJar) -> Response {
    (jar.remove(clear_session_cookie()), StatusCode::NO_CONTENT).into_response()
}

pub async fn whoami(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
        return json_error(StatusCode::UNAUTHORIZED, "missing_session", "missing session");
    };

    match validate_session_jwt(&state.config.jwt_secret, cookie.value()) {
        Some(me) => Json(me).into_response(),
        None => json_error(StatusCode::UNAUTHORIZED, "invalid_session", "invalid session"),
    }
}

/// Middleware for every admin route past login.
pub async fn admin_guard(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
        return json_error(StatusCode::UNAUTHORIZED, "missing_session", "missing session");
    };

    match validate_session_jwt(&state.config.jwt_secret, cookie.value()) {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => json_error(StatusCode::UNAUTHORIZED, "invalid_session", "invalid session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
        assert!(!verify_password("not-a-phc-string", "hunter2"));
    }

    #[test]
    fn session_jwt_roundtrip_and_audience_isolation() {
        let secret = b"test-secret";
        let user = admin_users::Model {
            id: Uuid::new_v4(),
            username: "admin".to_string(),
            password_hash: String::new(),
            created_at: Utc::now().into(),
        };
        let jwt = make_session_jwt(secret, &user).unwrap();

        let me = validate_session_jwt(secret, &jwt).unwrap();
        assert_eq!(me.username, "admin");

        // The same session token must never authenticate as an agent.
        let vault =
            muster_core::vault::TokenVault::new(secret.to_vec(), chrono::Duration::days(1));
        assert_eq!(
            vault.verify(&jwt),
            Err(muster_core::vault::VaultError::WrongAudience)
        );

        // And an agent token is not a valid admin session.
        let agent = vault.issue(1, Uuid::new_v4(), "host").unwrap();
        assert!(validate_session_jwt(secret, &agent.token).is_none());
    }
}
