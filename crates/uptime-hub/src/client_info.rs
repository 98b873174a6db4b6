//! Validator origin resolution
//!
//! Validators report an origin hint in their signup frame, but browser
//! runtimes just send `"browser"`. When the hint is not an address the hub
//! falls back to proxy headers and then to the socket peer.

use axum::http::HeaderMap;
use reqwest::Client;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::debug;

const LOOPBACK: &str = "127.0.0.1";

/// Best address we can attribute to a connection from its HTTP upgrade
pub fn origin_from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(xff) = header("x-forwarded-for") {
        if let Some(first) = xff.split(',').next().map(str::trim).filter(|s| !s.is_empty()) {
            return Some(normalize(first));
        }
    }
    if let Some(fwd) = header("forwarded") {
        if let Some(addr) = parse_forwarded_for(fwd) {
            return Some(normalize(&addr));
        }
    }
    if let Some(real) = header("x-real-ip").map(str::trim).filter(|s| !s.is_empty()) {
        return Some(normalize(real));
    }
    peer.map(|p| normalize(&p.ip().to_string()))
}

/// Pick the origin to store for a validator
pub fn resolve_origin(hint: &str, request_origin: Option<&str>) -> String {
    if hint.trim().parse::<IpAddr>().is_ok() {
        return normalize(hint.trim());
    }
    request_origin
        .map(normalize)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Collapse loopback spellings to one value
pub fn normalize(addr: &str) -> String {
    match addr.parse::<IpAddr>() {
        Ok(ip) if ip.is_loopback() => LOOPBACK.to_string(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) if v4 == Ipv4Addr::LOCALHOST => LOOPBACK.to_string(),
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(ip) => ip.to_string(),
        Err(_) if addr == "unknown" || addr.is_empty() => LOOPBACK.to_string(),
        Err(_) => addr.to_string(),
    }
}

// RFC 7239: `Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"`
fn parse_forwarded_for(value: &str) -> Option<String> {
    let first = value.split(',').next()?;
    let raw = first.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        k.eq_ignore_ascii_case("for").then_some(v)
    })?;
    let raw = raw.trim_matches('"');

    if let Some(rest) = raw.strip_prefix('[') {
        return rest.split(']').next().map(str::to_string);
    }
    if raw.parse::<IpAddr>().is_ok() {
        return Some(raw.to_string());
    }
    raw.parse::<SocketAddr>()
        .map(|s| s.ip().to_string())
        .ok()
        .or_else(|| Some(raw.to_string()))
}

/// Whether an origin names a concrete non-loopback address worth locating
pub fn is_routable(origin: &str) -> bool {
    match origin.parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback() && !ip.is_unspecified(),
        Err(_) => false,
    }
}

/// Look up "City, Country" for an address via an ipapi-style JSON service.
/// Any failure, or an address that is not routable, yields `None`.
pub async fn lookup_location(client: &Client, endpoint: &str, ip: &str) -> Option<String> {
    // Without a concrete address the service would locate the hub itself
    if !is_routable(ip) {
        return None;
    }
    let url = format!("{}/{}/json/", endpoint.trim_end_matches('/'), ip);

    let resp = match client.get(&url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            debug!("Geolocation for {} returned {}", ip, r.status());
            return None;
        }
        Err(e) => {
            debug!("Geolocation for {} failed: {}", ip, e);
            return None;
        }
    };
    let body: Value = resp.json().await.ok()?;
    location_from_json(&body)
}

pub fn location_from_json(body: &Value) -> Option<String> {
    let field = |k: &str| body.get(k).and_then(Value::as_str).filter(|s| !s.is_empty());

    match (field("city"), field("country")) {
        (Some(city), Some(country)) => Some(format!("{}, {}", city, country)),
        _ => field("country_name").map(str::to_string),
    }
}
