use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, AppResult};

const TOKEN_EXPIRY_HOURS: i64 = 8;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    pub exp: usize, // expiry timestamp
    pub iat: usize, // issued at
}

/// Verified identity attached to the request by [`require_auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }
}

pub fn issue_token(secret: &str, user_id: &str, email: &str, role: &str) -> AppResult<String> {
    let now = chrono::Utc::now();
    let exp = now + chrono::Duration::hours(TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role: role.to_string(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(secret: &str, token: &str) -> Option<AuthUser> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.into())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
}

/// Admin login - validates configured credentials and returns an admin JWT
pub async fn login(
    State(state): State<Arc<crate::AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let Some(admin) = state.admin.as_ref() else {
        return Err(AppError::Unauthenticated);
    };

    if req.username != admin.username || req.password != admin.password {
        tracing::warn!("rejected admin login for {}", req.username);
        return Err(AppError::Unauthenticated);
    }

    let subject = format!("admin:{}", admin.username);
    let token = issue_token(&state.jwt_secret, &subject, "", ADMIN_ROLE)?;

    Ok(Json(LoginResponse {
        token,
        expires_in: TOKEN_EXPIRY_HOURS * 3600,
    }))
}

/// Middleware that verifies the bearer token and attaches an [`AuthUser`]
pub async fn require_auth(
    State(state): State<Arc<crate::AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token.trim(),
        None => return AppError::Unauthenticated.into_response(),
    };

    match verify_token(&state.jwt_secret, token) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => AppError::Unauthenticated.into_response(),
    }
}

/// Middleware for admin routes; must run after [`require_auth`]
pub async fn require_admin(user: AuthUser, request: Request, next: Next) -> Response {
    if !user.is_admin() {
        tracing::warn!("user {} denied admin access", user.id);
        return AppError::Forbidden.into_response();
    }
    next.run(request).await
}
