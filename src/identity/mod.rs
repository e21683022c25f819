//! Anonymous visitor identity carried in a long-lived cookie

use axum::http::{header, HeaderMap, HeaderValue};
use base64::prelude::*;
use chrono::{TimeDelta, Utc};
use tracing::{debug, warn};

use crate::config::CookieConfig;

/// Result of resolving a request's visitor identity
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub visitor_id: String,
    /// `Set-Cookie` value to attach when the identity was just issued
    pub set_cookie: Option<HeaderValue>,
}

/// 16 random bytes (128 bits), URL-safe base64 without padding
pub fn generate_visitor_id() -> String {
    let bytes: [u8; 16] = rand::random();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Find a cookie by name in the request headers
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().trim_matches('"'))
        })
        .next()
}

fn build_set_cookie(config: &CookieConfig, visitor_id: &str) -> Option<HeaderValue> {
    let max_age = config.max_age_secs;
    let mut cookie = format!("{}={}; Path=/; Max-Age={}", config.name, visitor_id, max_age);

    // Expires only when the date is representable
    let expires = i64::try_from(max_age)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl));
    match expires {
        Some(expires) => {
            cookie.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        None => warn!(max_age, "cookie max-age out of range, omitting Expires"),
    }

    HeaderValue::from_str(&cookie).ok()
}

/// Resolve the visitor identity for a request.
///
/// A present, non-empty cookie is trusted as-is. Otherwise a fresh id is
/// issued along with the cookie that binds it to the client. Never fails.
pub fn resolve(headers: &HeaderMap, config: &CookieConfig) -> ResolvedIdentity {
    if let Some(existing) = cookie_value(headers, &config.name).filter(|v| !v.is_empty()) {
        return ResolvedIdentity {
            visitor_id: existing.to_string(),
            set_cookie: None,
        };
    }

    let visitor_id = generate_visitor_id();
    let set_cookie = build_set_cookie(config, &visitor_id);
    debug!(visitor_id = %visitor_id, "issuing new visitor cookie");

    ResolvedIdentity {
        visitor_id,
        set_cookie,
    }
}
