// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client address resolution.
//!
//! Priority: first hop of `X-Forwarded-For`, then `X-Real-IP`, then the
//! transport peer. Header values are only accepted when they parse as an IP
//! address, and are returned in canonical form so that spelling variants of
//! one address share a single reputation record.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// Header carrying the proxy chain.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Header carrying the proxy-observed client address.
pub const REAL_IP: &str = "x-real-ip";

/// Address used when nothing else is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the client address for a request.
///
/// # Arguments
///
/// * `headers` - Request headers
/// * `peer` - Transport peer, if the listener recorded one
/// * `trust_proxy_headers` - Whether forwarding headers are honoured
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        let forwarded = header_str(headers, FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .and_then(parse_ip);
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        if let Some(ip) = header_str(headers, REAL_IP).and_then(parse_ip) {
            return ip.to_string();
        }
    }

    match peer {
        Some(addr) => canonical(addr.ip()).to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse::<IpAddr>().ok().map(canonical)
}

/// Fold IPv4-mapped IPv6 addresses onto their IPv4 form.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}
