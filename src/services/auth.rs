use std::sync::Arc;

use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{AccessToken, NewOrganization, NewUser, Organization, User, UserRole},
    store::{Constraint, EntityStore, StoreError},
};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,    // user_id
    pub org: String,    // organization_id
    pub role: UserRole, // role at issue time
    pub iss: String,    // issuer
    pub exp: i64,       // expiry
    pub iat: i64,       // issued at
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub organization_name: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct InviteInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

pub struct AuthService {
    store: Arc<dyn EntityStore>,
    config: Arc<Config>,
}

impl AuthService {
    pub fn new(store: Arc<dyn EntityStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Creates an organization together with its owning admin.
    pub async fn signup(&self, input: SignupInput) -> AppResult<(Organization, User, AccessToken)> {
        let organization_name = input.organization_name.trim();
        if organization_name.is_empty() {
            return Err(AppError::Validation("organization name is required".to_string()));
        }
        let name = required_name(&input.name)?;
        let email = normalize_email(&input.email)?;
        let password_hash = self.hash_password(&input.password)?;

        let organization_id = Uuid::new_v4();
        let (organization, user) = self
            .store
            .create_organization(
                NewOrganization {
                    id: organization_id,
                    name: organization_name.to_string(),
                },
                NewUser {
                    organization_id,
                    name,
                    email,
                    password_hash,
                    role: UserRole::Admin,
                },
            )
            .await
            .map_err(user_conflict)?;

        tracing::info!("Organization {} created by {}", organization.id, user.id);

        let token = self.issue_token(&user)?;
        Ok((organization, user, token))
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<(User, AccessToken)> {
        let email = email.trim().to_lowercase();

        let credentials = self
            .store
            .find_user_credentials(&email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let matches = verify(password, &credentials.password_hash)
            .map_err(|e| anyhow::anyhow!("Verify error: {}", e))?;
        if !matches {
            return Err(AppError::InvalidCredentials);
        }

        let now = Utc::now();
        self.store.record_login(credentials.user.id, now).await?;

        let mut user = credentials.user;
        user.last_login_at = Some(now);

        let token = self.issue_token(&user)?;
        Ok((user, token))
    }

    /// Adds a staff member to an existing organization.
    pub async fn invite_user(&self, organization_id: Uuid, input: InviteInput) -> AppResult<User> {
        let name = required_name(&input.name)?;
        let email = normalize_email(&input.email)?;
        let password_hash = self.hash_password(&input.password)?;

        let user = self
            .store
            .insert_user(NewUser {
                organization_id,
                name,
                email,
                password_hash,
                role: input.role,
            })
            .await
            .map_err(user_conflict)?;

        Ok(user)
    }

    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let key = DecodingKey::from_secret(self.config.jwt.secret.as_bytes());
        let mut validation = Validation::default();
        validation.set_issuer(&[self.config.jwt.issuer.as_str()]);

        let token_data = decode::<Claims>(token, &key, &validation)?;
        Ok(token_data.claims)
    }

    pub fn issue_token(&self, user: &User) -> AppResult<AccessToken> {
        let now = Utc::now();
        let expires_at =
            now + Duration::seconds(self.config.jwt.access_token_ttl.as_secs() as i64);

        let claims = Claims {
            sub: user.id.to_string(),
            org: user.organization_id.to_string(),
            role: user.role,
            iss: self.config.jwt.issuer.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let key = EncodingKey::from_secret(self.config.jwt.secret.as_bytes());
        let access_token = encode(&Header::default(), &claims, &key)?;

        Ok(AccessToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_at,
        })
    }

    fn hash_password(&self, password: &str) -> AppResult<String> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let hashed = hash(password, self.config.auth.bcrypt_cost)
            .map_err(|e| anyhow::anyhow!("Hash error: {}", e))?;
        Ok(hashed)
    }
}

fn user_conflict(err: StoreError) -> AppError {
    match err.conflict() {
        Some(Constraint::UserEmail) => AppError::UserAlreadyExists,
        _ => err.into(),
    }
}

fn required_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    Ok(name.to_string())
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    Ok(email)
}
