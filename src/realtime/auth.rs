use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Bearer credential for the driver channel. Minting lives with the
/// identity service; this side only verifies.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub driver_id: Uuid,
    pub exp: usize,
}

pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|err| AppError::Unauthorized(format!("invalid channel token: {err}")))?;
    Ok(data.claims.driver_id)
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    use super::{verify_token, Claims};

    fn sign(driver_id: Uuid, secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            driver_id,
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves_the_driver() {
        let driver_id = Uuid::new_v4();
        let token = sign(driver_id, "dev-secret", 3600);
        assert_eq!(verify_token(&token, "dev-secret").unwrap(), driver_id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign(Uuid::new_v4(), "dev-secret", 3600);
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign(Uuid::new_v4(), "dev-secret", -3600);
        assert!(verify_token(&token, "dev-secret").is_err());
    }
}
