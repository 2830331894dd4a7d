use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

use crate::config::RefreshConfig;

/// `HttpOnly; SameSite=Strict` cookie scoped to the refresh path.
pub fn refresh_cookie(
    cfg: &RefreshConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = cfg.ttl_days * 24 * 60 * 60;
    build(cfg, token, max_age)
}

/// Same attributes as `refresh_cookie` so the browser drops the original.
pub fn clear_refresh_cookie(cfg: &RefreshConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    build(cfg, "", 0)
}

fn build(cfg: &RefreshConfig, value: &str, max_age: i64) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}={}; Path={}; HttpOnly; SameSite=Strict; Max-Age={}",
        cfg.cookie_name, value, cfg.cookie_path, max_age
    );
    if cfg.cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read a cookie by name from every `Cookie` header on the request.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
}
