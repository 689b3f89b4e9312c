//! ---
//! anvil_section: "05-networking-external-interfaces"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Network address discovery helpers."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::net::{IpAddr, TcpStream};

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Resolve the local IP address that routes towards the overlord.
///
/// If we cannot reach the overlord there is no point starting up; the error
/// propagates, the process exits, and the process manager restarts us in a
/// sane fashion.
pub fn resolve_api_facing_ip(api_url: &str) -> Result<IpAddr> {
    let url = Url::parse(api_url).with_context(|| format!("invalid overlord url '{api_url}'"))?;
    let port = match url.scheme() {
        "http" => url.port().unwrap_or(80),
        "https" => url.port().unwrap_or(443),
        other => return Err(anyhow!("overlord url scheme must be http or https, got '{other}'")),
    };
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("overlord url '{api_url}' has no host"))?;

    let stream = TcpStream::connect((host, port))
        .with_context(|| format!("cannot open probe connection to {host}:{port}"))?;
    let local = stream
        .local_addr()
        .context("probe connection has no local address")?;
    Ok(local.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn resolves_loopback_for_local_overlord() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let ip = resolve_api_facing_ip(&url).unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = resolve_api_facing_ip("ftp://overlord.deploy.local").unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn unreachable_overlord_is_an_error() {
        // Port 1 on loopback refuses immediately on any sane host.
        let result = resolve_api_facing_ip("http://127.0.0.1:1");
        assert!(result.is_err());
    }
}
