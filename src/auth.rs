// src/auth.rs

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{parse_enum_or_default, ApiResponse, LoginRequest, RegisterRequest, Role, User};
use crate::store::Store;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

// JWT Creation
pub fn create_jwt(user: &User, config: &Config, now: DateTime<Utc>) -> AppResult<String> {
    let expiration = now + Duration::hours(config.jwt_expiration_hours);
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )
    .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub async fn register_user(
    store: &dyn Store,
    mut request: RegisterRequest,
    bcrypt_cost: u32,
    now: DateTime<Utc>,
) -> AppResult<User> {
    request.name = request.name.trim().to_string();
    request.email = request.email.trim().to_lowercase();
    request.validate()?;

    let password_hash = hash(&request.password, bcrypt_cost)
        .map_err(|e| AppError::Internal(format!("Error hashing password: {}", e)))?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        email: request.email,
        password_hash,
        role: parse_enum_or_default(request.role.as_deref(), Role::Employee),
        created_at: now,
    };
    let user = store.insert_user(user).await?;
    info!("Registered user {} as {}", user.id, user.role.as_str());
    Ok(user)
}

pub async fn authenticate(store: &dyn Store, request: &LoginRequest) -> AppResult<User> {
    let user = store
        .find_user_by_email(&request.email.trim().to_lowercase())
        .await?
        .ok_or_else(|| AppError::unauthorized(INVALID_CREDENTIALS))?;
    if verify(&request.password, &user.password_hash).unwrap_or(false) {
        Ok(user)
    } else {
        warn!("Failed login for user {}", user.id);
        Err(AppError::unauthorized(INVALID_CREDENTIALS))
    }
}

/// Resolves the acting user from the claims the `Authentication` middleware stored.
pub async fn current_user(req: &HttpRequest, data: &AppState) -> AppResult<User> {
    let user_id = req
        .extensions()
        .get::<Claims>()
        .map(|claims| claims.sub.clone())
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;
    data.store
        .find_user(&user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("User no longer exists"))
}

/// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    debug!("Received register request for {}", body.email);
    let user = register_user(
        data.store.as_ref(),
        body.into_inner(),
        data.config.bcrypt_cost,
        Utc::now(),
    )
    .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(
        "User registered successfully",
        json!({ "userId": user.id }),
    )))
}

/// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let user = authenticate(data.store.as_ref(), &body).await?;
    let token = create_jwt(&user, &data.config, Utc::now())?;
    info!("User {} logged in", user.id);
    Ok(HttpResponse::Ok().json(ApiResponse::ok(
        "Login successful",
        json!({
            "token": token,
            "userId": user.id,
            "name": user.name,
            "role": user.role,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const TEST_COST: u32 = 4;

    fn register_request(email: &str, password: &str, role: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            name: "Dana".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: role.map(str::to_string),
        }
    }

    #[actix_web::test]
    async fn register_then_login() {
        let store = MemoryStore::new();
        let user = register_user(
            &store,
            register_request("Dana@Example.com", "hunter22", None),
            TEST_COST,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(user.email, "dana@example.com");
        assert_eq!(user.role, Role::Employee);

        let login = LoginRequest {
            email: "dana@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        assert_eq!(authenticate(&store, &login).await.unwrap().id, user.id);

        let wrong = LoginRequest {
            email: "dana@example.com".to_string(),
            password: "hunter23".to_string(),
        };
        assert!(matches!(
            authenticate(&store, &wrong).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[actix_web::test]
    async fn register_validates_fields_and_rejects_duplicates() {
        let store = MemoryStore::new();
        match register_user(&store, register_request("not-an-email", "123", None), TEST_COST, Utc::now()).await {
            Err(AppError::Validation(fields)) => {
                assert!(fields.contains_key("email"));
                assert!(fields.contains_key("password"));
            }
            other => panic!("unexpected {:?}", other),
        }

        register_user(&store, register_request("m@example.com", "secret1", Some("manager")), TEST_COST, Utc::now())
            .await
            .unwrap();
        let duplicate =
            register_user(&store, register_request("M@example.com", "secret1", None), TEST_COST, Utc::now()).await;
        assert!(matches!(duplicate, Err(AppError::BadRequest(message)) if message == "Email is already in use"));
    }

    #[test]
    fn token_round_trips_claims() {
        let user = User {
            id: "u-1".to_string(),
            name: "Max".to_string(),
            email: "max@example.com".to_string(),
            password_hash: String::new(),
            role: Role::Manager,
            created_at: Utc::now(),
        };
        let config = Config::new("test-secret");
        let token = create_jwt(&user, &config, Utc::now()).unwrap();
        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.role, Role::Manager);
        assert!(validate_jwt(&token, "other-secret").is_err());
    }
}
