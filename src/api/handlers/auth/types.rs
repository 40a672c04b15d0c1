//! Request/response types for auth endpoints.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    #[schema(value_type = String)]
    pub password: SecretString,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub name: Option<String>,
    /// Absent until the user has a profile.
    pub profile_id: Option<String>,
    pub profile_locked: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendOtpRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordResponse {
    pub message: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[schema(value_type = String)]
    pub new_password: SecretString,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn login_request_deserializes_secret() -> Result<()> {
        let request: LoginRequest = serde_json::from_value(json!({
            "email": "alice@example.edu",
            "password": "hunter2-plus",
        }))?;
        assert_eq!(request.email, "alice@example.edu");
        assert_eq!(request.password.expose_secret(), "hunter2-plus");
        Ok(())
    }

    #[test]
    fn login_request_debug_redacts_password() -> Result<()> {
        let request: LoginRequest = serde_json::from_value(json!({
            "email": "alice@example.edu",
            "password": "hunter2-plus",
        }))?;
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2-plus"));
        Ok(())
    }

    #[test]
    fn verify_otp_request_round_trips() -> Result<()> {
        let request = VerifyOtpRequest {
            email: "bob@example.edu".to_string(),
            code: "123456".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: VerifyOtpRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.code, "123456");
        Ok(())
    }

    #[test]
    fn reset_password_request_deserializes() -> Result<()> {
        let request: ResetPasswordRequest = serde_json::from_value(json!({
            "token": "raw-token",
            "new_password": "next-secret",
        }))?;
        assert_eq!(request.token, "raw-token");
        assert_eq!(request.new_password.expose_secret(), "next-secret");
        Ok(())
    }
}
