use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn parse(role: &str) -> Role {
        if role.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// Authenticated identity attached to each request. The wallet is threaded
/// explicitly into every core call; nothing below the handlers reads it from
/// ambient state.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub wallet: String,
    pub role: Role,
}

pub fn create_token(
    wallet: &str,
    role: Role,
    jwt_secret: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let expiration = SystemTime::now()
        .duration_since(UNIX_EPOCH)?
        .as_secs() as usize
        + 24 * 60 * 60; // 24 hours
    let claims = Claims {
        sub: wallet.to_string(),
        role: role.as_str().to_string(),
        exp: expiration,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<AuthUser, Box<dyn std::error::Error>> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(AuthUser {
        wallet: token_data.claims.sub,
        role: Role::parse(&token_data.claims.role),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_preserves_wallet_and_role() {
        let token = create_token("0xAbC123", Role::Admin, "secret").unwrap();
        let user = validate_token(&token, "secret").unwrap();
        assert_eq!(user.wallet, "0xAbC123");
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token("0xAbC123", Role::User, "secret").unwrap();
        assert!(validate_token(&token, "other").is_err());
    }
}
