//! Caller identity from a bearer JWT
//!
//! Tokens are issued elsewhere; this service only verifies them (HS256) and
//! reads the `{ id, nombre, rol, exp }` claims.

use super::handlers::AppError;
use super::AppState;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub nombre: String,
    pub rol: String,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Advisor,
    Admin,
}

impl Role {
    fn from_claim(rol: &str) -> Self {
        match rol {
            "asesor" => Role::Advisor,
            "admin" => Role::Admin,
            _ => Role::Client,
        }
    }

    /// Advisors and admins may act on any session
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Advisor | Role::Admin)
    }
}

/// Verification half of the token scheme
pub struct JwtKeys {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }
}

/// Authenticated user behind a request
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: i64,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "No tienes permiso para acceder a este recurso.".to_string(),
            ))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("Token de acceso requerido.".to_string()))?;

        let claims = state.jwt.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            AppError::Forbidden("Token inválido o expirado.".to_string())
        })?;

        Ok(Caller {
            user_id: claims.id,
            role: Role::from_claim(&claims.rol),
            name: claims.nombre,
        })
    }
}
