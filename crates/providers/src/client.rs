use replayscan_core::Error;
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;
use tracing::{info, warn};

enum ProxyResolution {
    UseProxy(String),
    /// The provider set `proxy = ""`; environment proxies are ignored too.
    ForceDirectConnect,
    /// Nothing configured; reqwest reads HTTPS_PROXY / HTTP_PROXY itself.
    None,
}

/// Match `host` against no-proxy rules: exact host, `*.example.com`
/// (subdomains only) or `.example.com` (the domain and its subdomains).
fn is_no_proxy(host: &str, no_proxy_list: &[String]) -> bool {
    let host = host.to_lowercase();
    no_proxy_list.iter().any(|rule| {
        let rule = rule.trim().to_lowercase();
        if rule.is_empty() {
            false
        } else if let Some(suffix) = rule.strip_prefix("*.") {
            host.ends_with(&format!(".{}", suffix))
        } else if let Some(suffix) = rule.strip_prefix('.') {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == rule
        }
    })
}

fn extract_host(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split('/').next()?.rsplit('@').next()?;
    let host = if let Some(v6) = authority.strip_prefix('[') {
        v6.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    Some(host.to_string())
}

/// Provider proxy wins, then the global proxy unless `api_base` is exempt,
/// then the environment.
fn resolve_proxy(
    provider_proxy: Option<&str>,
    global_proxy: Option<&str>,
    no_proxy: &[String],
    api_base: &str,
) -> ProxyResolution {
    match provider_proxy {
        Some("") => return ProxyResolution::ForceDirectConnect,
        Some(p) => return ProxyResolution::UseProxy(p.to_string()),
        None => {}
    }

    match global_proxy {
        Some(global) if !global.is_empty() => {
            let exempt = extract_host(api_base)
                .map(|host| is_no_proxy(&host, no_proxy))
                .unwrap_or(false);
            if exempt {
                ProxyResolution::ForceDirectConnect
            } else {
                ProxyResolution::UseProxy(global.to_string())
            }
        }
        _ => ProxyResolution::None,
    }
}

pub fn build_http_client(
    provider_proxy: Option<&str>,
    global_proxy: Option<&str>,
    no_proxy: &[String],
    api_base: &str,
    timeout: Duration,
) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match resolve_proxy(provider_proxy, global_proxy, no_proxy, api_base) {
        ProxyResolution::UseProxy(proxy_url) => match Proxy::all(&proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, api_base = %api_base, "LLM provider using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, falling back to direct connect");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            info!(api_base = %api_base, "LLM provider forced to direct connect (proxy disabled)");
            builder = builder.no_proxy();
        }
        ProxyResolution::None => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with proxy, using default");
        Client::new()
    })
}

/// Map a non-success HTTP reply onto the error taxonomy.
pub(crate) fn classify_http_error(provider: &str, status: StatusCode, body: &str) -> Error {
    let lower = body.to_lowercase();
    let message = format!("{} API error {}: {}", provider, status, crate::preview(body));
    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("insufficient_quota")
        || lower.contains("rate_limit")
        || lower.contains("overloaded_error")
    {
        Error::RateLimited(message)
    } else if lower.contains("content_filter")
        || lower.contains("content_policy")
        || lower.contains("responsibleaipolicyviolation")
    {
        Error::ContentFiltered(message)
    } else {
        Error::Provider(message)
    }
}
