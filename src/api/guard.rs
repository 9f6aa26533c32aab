//! Admin-surface access checks: basic credentials compared in constant
//! time, plus the optional client-address allow-list.

use crate::api::errors::ApiError;
use crate::{config, utils};
use base64::Engine as _;
use ntex::web;
use subtle::ConstantTimeEq;

/// Constant-time comparison of both credential halves.
pub fn credentials_match(user: &str, pass: &str, expected_user: &str, expected_pass: &str) -> bool {
    if expected_user.is_empty() || expected_pass.is_empty() {
        return false;
    }

    let user_ok: bool = user.as_bytes().ct_eq(expected_user.as_bytes()).into();
    let pass_ok: bool = pass.as_bytes().ct_eq(expected_pass.as_bytes()).into();
    user_ok && pass_ok
}

/// Extracts `Basic` credentials from the Authorization header.
pub fn basic_credentials(req: &web::HttpRequest) -> Option<(String, String)> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Client address as reported by the reverse proxy in front of the
/// gateway.
pub fn client_ip(req: &web::HttpRequest) -> Option<String> {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    forwarded.or_else(|| {
        req.headers()
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Gate every admin handler: allow-listed address (when configured) and
/// valid credentials.
pub fn require_admin(req: &web::HttpRequest) -> Result<(), ApiError> {
    let allowed_ips = config::APP_CONFIG.allowed_ip_list();
    if !allowed_ips.is_empty() {
        let ip = client_ip(req).unwrap_or_default();
        if !utils::ip_allowed(&ip, &allowed_ips) {
            return Err(ApiError::Forbidden);
        }
    }

    let (user, pass) = basic_credentials(req).ok_or(ApiError::Unauthorized)?;
    if !credentials_match(
        &user,
        &pass,
        &config::APP_CONFIG.admin_username,
        &config::APP_CONFIG.admin_password,
    ) {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
