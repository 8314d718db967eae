use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use quarry_core::AppError;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use url::{Host, Url};

/// Redirect hops followed per request before giving up.
pub const MAX_REDIRECTS: usize = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raised inside reqwest when a redirect hop or a resolved address points
/// somewhere private.
#[derive(Debug, thiserror::Error)]
#[error("SSRF blocked: {0}")]
pub struct SsrfBlocked(pub String);

/// Reject targets that resolve to private or reserved addresses.
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
///
/// A blocked target is the caller's problem, so it surfaces as
/// `invalid_input`; DNS failures are `connection`.
pub async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::InvalidInput(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::InvalidInput(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidInput("URL has no host".to_string()))?;

    // IP literals are checked directly; brackets come off IPv6 hosts.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::InvalidInput(format!(
                "SSRF blocked: {host} is a private/reserved address"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::InvalidInput(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }

    Ok(())
}

/// Synchronous check for one redirect hop.
///
/// Redirect policies cannot await, so only the scheme and IP-literal or
/// `localhost` hosts are checked here. Hostnames are covered by
/// [`PublicOnlyResolver`] when the connection is made.
pub fn check_redirect(url: &Url) -> Result<(), SsrfBlocked> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(SsrfBlocked(format!("redirect to scheme '{scheme}'"))),
    }
    let private = match url.host() {
        None => return Err(SsrfBlocked(format!("redirect to {url} has no host"))),
        Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
    };
    if private {
        return Err(SsrfBlocked(format!(
            "redirect to {url} targets a private/reserved address"
        )));
    }
    Ok(())
}

/// Redirect policy shared by the HTTP strategies: at most
/// [`MAX_REDIRECTS`] hops, each checked with [`check_redirect`] when
/// `guarded`.
pub(crate) fn redirect_policy(guarded: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (limit {MAX_REDIRECTS})"));
        }
        if guarded && let Err(blocked) = check_redirect(attempt.url()) {
            tracing::warn!(url = %attempt.url(), "Refusing redirect");
            return attempt.error(blocked);
        }
        attempt.follow()
    })
}

/// DNS resolver that refuses hostnames resolving to private addresses.
/// Applies to every connection, redirects included.
#[derive(Debug, Default)]
pub(crate) struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
                let err: BoxError = Box::new(SsrfBlocked(format!(
                    "{host} resolves to private/reserved IP {}",
                    blocked.ip()
                )));
                return Err(err);
            }
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<Addrs, BoxError>(addrs)
        })
    }
}

/// Build the guarded and unguarded variants of one client configuration.
pub(crate) fn build_clients(
    configure: impl Fn() -> ClientBuilder,
) -> Result<(Client, Client), AppError> {
    let config_error = |e: reqwest::Error| AppError::ConfigError(format!("HTTP client: {e}"));
    let guarded = configure()
        .redirect(redirect_policy(true))
        .dns_resolver(Arc::new(PublicOnlyResolver))
        .build()
        .map_err(config_error)?;
    let open = configure()
        .redirect(redirect_policy(false))
        .build()
        .map_err(config_error)?;
    Ok((guarded, open))
}

/// Find an [`SsrfBlocked`] anywhere in an error's source chain.
pub fn blocked_cause<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a SsrfBlocked> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(blocked) = e.downcast_ref::<SsrfBlocked>() {
            return Some(blocked);
        }
        current = e.source();
    }
    None
}

/// Check if an IP address is in a private/reserved/link-local range.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // includes cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // CGN
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // link-local
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // unique local
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use quarry_core::ErrorCategory;

    use super::*;

    #[test]
    fn private_ipv4() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn public_ipv4() {
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn private_ipv6() {
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("fc00::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:169.254.169.254".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_private_literal() {
        let err = validate_url("http://127.0.0.1/admin").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
        assert_eq!(err.category(), ErrorCategory::InvalidInput);

        let err = validate_url("http://[::1]:8080/").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn rejects_bad_scheme() {
        let err = validate_url("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn redirect_hops_to_private_hosts_are_refused() {
        for target in [
            "http://169.254.169.254/latest/meta-data/",
            "http://127.0.0.1:8080/admin",
            "http://[::1]/",
            "http://localhost/",
            "http://api.localhost/",
            "file:///etc/passwd",
        ] {
            let url = Url::parse(target).unwrap();
            assert!(check_redirect(&url).is_err(), "{target}");
        }
        for target in ["https://example.com/next", "http://93.184.216.34/"] {
            assert!(check_redirect(&Url::parse(target).unwrap()).is_ok(), "{target}");
        }
    }

    #[test]
    fn blocked_cause_walks_the_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] SsrfBlocked);

        let err = Outer(SsrfBlocked("10.0.0.1".into()));
        let found = blocked_cause(&err).unwrap();
        assert_eq!(found.to_string(), "SSRF blocked: 10.0.0.1");

        let plain = std::io::Error::other("refused");
        assert!(blocked_cause(&plain).is_none());
    }

    #[tokio::test]
    async fn resolver_refuses_localhost() {
        let name: Name = "localhost".parse().unwrap();
        let err = PublicOnlyResolver.resolve(name).await.err().unwrap();
        assert!(blocked_cause(&*err).is_some());
    }

    #[tokio::test]
    async fn accepts_public_literal() {
        assert!(validate_url("https://1.1.1.1/").await.is_ok());
    }
}
