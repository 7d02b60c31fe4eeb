//! Account registration, login and session-token verification.
//!
//! Passwords are bcrypt-hashed; session tokens are HS256 JWTs whose `jti`
//! references a persisted session row, so tokens die with their session and
//! an expiry sweep keeps the table bounded.

use crate::application::next_id;
use crate::domain::entities::principal::Principal;
use crate::domain::errors::PlatformError;
use crate::persistence::models::{SessionRow, UserRow};
use crate::persistence::{repository, Store};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const SESSION_TTL_HOURS: i64 = 24;
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    jti: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    jwt_secret: String,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

fn principal_from(user: &UserRow) -> Principal {
    Principal {
        id: user.id.clone(),
        email: user.email.clone(),
        username: user.username.clone(),
        role: user.role.clone(),
        created_at: user.created_at,
        last_login: user.last_login,
    }
}

impl AuthService {
    pub fn new(store: Store, jwt_secret: &str) -> Self {
        Self {
            store,
            jwt_secret: jwt_secret.to_string(),
        }
    }

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<(Principal, String), PlatformError> {
        if !email.contains('@') {
            return Err(PlatformError::BadInput("email".to_string()));
        }
        if username.trim().len() < 2 {
            return Err(PlatformError::BadInput("username".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(PlatformError::BadInput("password".to_string()));
        }

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|_| PlatformError::Cryptographic)?;
        let user = UserRow {
            id: next_id("usr"),
            email: email.to_string(),
            username: username.trim().to_string(),
            password_hash,
            role: "user".to_string(),
            created_at: Utc::now(),
            last_login: None,
        };

        let mut conn = self.store.acquire().await?;
        repository::insert_user(&mut conn, &user).await?;
        info!(user_id = %user.id, username = %user.username, "registered account");

        let token = self.open_session(&mut conn, &user.id).await?;
        Ok((principal_from(&user), token))
    }

    pub async fn login(
        &self,
        email_or_username: &str,
        password: &str,
    ) -> Result<(Principal, String), PlatformError> {
        let mut conn = self.store.acquire().await?;
        let user = repository::find_user_by_identity(&mut conn, email_or_username)
            .await?
            .ok_or(PlatformError::InvalidCredentials)?;

        let verified = bcrypt::verify(password, &user.password_hash)
            .map_err(|_| PlatformError::Cryptographic)?;
        if !verified {
            return Err(PlatformError::InvalidCredentials);
        }

        let now = Utc::now();
        repository::touch_last_login(&mut conn, &user.id, now).await?;
        let token = self.open_session(&mut conn, &user.id).await?;

        let mut principal = principal_from(&user);
        principal.last_login = Some(now);
        info!(user_id = %user.id, "login");
        Ok((principal, token))
    }

    async fn open_session(
        &self,
        conn: &mut sqlx::SqliteConnection,
        user_id: &str,
    ) -> Result<String, PlatformError> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
        let session = SessionRow {
            token_id: next_id("sess"),
            user_id: user_id.to_string(),
            expires_at,
            created_at: now,
        };
        repository::insert_session(conn, &session).await?;

        let claims = SessionClaims {
            sub: user_id.to_string(),
            jti: session.token_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|_| PlatformError::Cryptographic)
    }

    /// Resolve a bearer token to its principal. Fails on bad signatures,
    /// expired tokens and revoked sessions alike.
    pub async fn verify(&self, token: &str) -> Result<Principal, PlatformError> {
        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| PlatformError::AuthRequired)?;

        let mut conn = self.store.acquire().await?;
        let session = repository::get_session(&mut conn, &data.claims.jti)
            .await?
            .ok_or(PlatformError::AuthRequired)?;
        if session.expires_at < Utc::now() || session.user_id != data.claims.sub {
            return Err(PlatformError::AuthRequired);
        }

        let user = repository::find_user_by_id(&mut conn, &session.user_id)
            .await?
            .ok_or(PlatformError::AuthRequired)?;
        Ok(principal_from(&user))
    }

    pub async fn logout(&self, token: &str) -> Result<(), PlatformError> {
        if let Ok(data) = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        ) {
            let mut conn = self.store.acquire().await?;
            repository::delete_session(&mut conn, &data.claims.jti).await?;
        }
        Ok(())
    }

    /// Drop expired sessions; called periodically by the server.
    pub async fn sweep_sessions(&self) -> Result<u64, PlatformError> {
        let mut conn = self.store.acquire().await?;
        let dropped = repository::sweep_sessions(&mut conn, Utc::now()).await?;
        if dropped > 0 {
            debug!(dropped, "swept expired sessions");
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        let store = Store::open("sqlite::memory:").await.unwrap();
        AuthService::new(store, "unit-test-jwt-secret")
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let auth = service().await;
        let (principal, token) = auth.register("a@a", "a", "abcdef").await.unwrap();
        assert_eq!(principal.email, "a@a");
        assert_eq!(principal.role, "user");
        assert!(!token.is_empty());

        let (principal, token) = auth.login("a@a", "abcdef").await.unwrap();
        assert!(principal.last_login.is_some());
        let verified = auth.verify(&token).await.unwrap();
        assert_eq!(verified.id, principal.id);
    }

    #[tokio::test]
    async fn test_login_by_username() {
        let auth = service().await;
        auth.register("a@a", "alice", "abcdef").await.unwrap();
        assert!(auth.login("alice", "abcdef").await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let auth = service().await;
        auth.register("a@a", "a", "abcdef").await.unwrap();
        let err = auth.login("a@a", "wrong!").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_unknown_identity_rejected() {
        let auth = service().await;
        let err = auth.login("ghost", "abcdef").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let auth = service().await;
        auth.register("a@a", "a", "abcdef").await.unwrap();
        let err = auth.register("a@a", "b", "abcdef").await.unwrap_err();
        assert!(matches!(err, PlatformError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_input_validation() {
        let auth = service().await;
        assert!(auth.register("no-at-sign", "a", "abcdef").await.is_err());
        assert!(auth.register("a@a", "", "abcdef").await.is_err());
        assert!(auth.register("a@a", "a", "short").await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let auth = service().await;
        let err = auth.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, PlatformError::AuthRequired));
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let auth = service().await;
        let (_, token) = auth.register("a@a", "a", "abcdef").await.unwrap();
        assert!(auth.verify(&token).await.is_ok());
        auth.logout(&token).await.unwrap();
        assert!(auth.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_token_signed_with_other_secret_rejected() {
        let auth = service().await;
        auth.register("a@a", "a", "abcdef").await.unwrap();

        let other = AuthService::new(auth.store.clone(), "different-secret");
        let (_, forged) = other.register("b@b", "b", "abcdef").await.unwrap();
        assert!(auth.verify(&forged).await.is_err());
    }
}
