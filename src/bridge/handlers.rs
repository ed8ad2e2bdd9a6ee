//! HTTP handlers for the bridge endpoints.
//!
//! # Endpoints
//!
//! | Method | Path                    | Description                                   |
//! |--------|-------------------------|-----------------------------------------------|
//! | `GET`  | `/`                     | Landing page                                  |
//! | `GET`  | `/health`               | Liveness and challenge-store reachability     |
//! | `GET`  | `/authorize`            | Capture the challenge, redirect to provider   |
//! | `GET`  | `/code`                 | Bind code to challenge, redirect to client    |
//! | `POST` | `/access_token`         | Verify the verifier, exchange code upstream   |
//! | `POST` | `/refresh_access_token` | Relay a refresh request with the real secret  |

use std::sync::Arc;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::{Url, form_urlencoded};

use crate::store::ChallengeStore;
use crate::upstream::{Forwarder, Relayed};
use crate::{Error, Result, cookies, pkce};

/// Query parameters consumed by `/authorize` itself. They are dropped from
/// the forwarded query; `redirect_uri` is re-added pointing at `/code`.
const AUTHORIZE_BRIDGE_PARAMS: &[&str] = &["x_authorize_url", "code_challenge", "redirect_uri"];

/// Form fields `/access_token` owns on the outbound side. Every inbound
/// occurrence is stripped; the handler re-appends `client_secret` and the
/// verified `code` exactly once.
const ACCESS_TOKEN_BRIDGE_FIELDS: &[&str] = &[
    "code_verifier",
    "x_client_secret",
    "x_access_token_uri",
    "client_secret",
    "code",
];

/// Form fields `/refresh_access_token` consumes. `code_verifier` is not
/// among them: refresh requests carry no PKCE material to begin with.
const REFRESH_BRIDGE_FIELDS: &[&str] = &["x_client_secret", "x_access_token_uri", "client_secret"];

/// Shared state handed to every handler.
pub struct AppState {
    /// Pending `code -> code_challenge` bindings.
    pub store: Arc<dyn ChallengeStore>,
    /// Outbound HTTP client for provider token endpoints.
    pub forwarder: Forwarder,
    /// Whether issued cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
    /// External base URL of this bridge, when it cannot be derived from
    /// forwarding headers.
    pub public_url: Option<Url>,
}

/// Build the bridge router with tracing and panic-recovery layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/authorize", get(authorize_handler))
        .route("/code", get(code_handler))
        .route("/access_token", post(access_token_handler))
        .route("/refresh_access_token", post(refresh_access_token_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Landing page and health ─────────────────────────────────────────────────

const INDEX_HTML: &str = r"<!DOCTYPE html>
<html>
<head><title>pkce-bridge</title></head>
<body>
<h1>pkce-bridge</h1>
<p>An OAuth2 authorization-code intermediary that speaks PKCE to clients
and a plain client secret to the provider. Point your client's authorize
step at <code>/authorize</code> and its token step at
<code>/access_token</code>; the provider's real secret never reaches the
client.</p>
<ul>
<li><code>GET /authorize</code></li>
<li><code>GET /code</code></li>
<li><code>POST /access_token</code></li>
<li><code>POST /refresh_access_token</code></li>
<li><code>GET /health</code></li>
</ul>
</body>
</html>
";

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Health check failed: challenge store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "version": env!("CARGO_PKG_VERSION"),
                    "store": "unreachable",
                })),
            )
                .into_response()
        }
    }
}

// ── Authorization leg ───────────────────────────────────────────────────────

/// `GET /authorize` — swallow the PKCE challenge, park it in a cookie, and
/// bounce the browser to the provider with `redirect_uri` rewritten to
/// this bridge's `/code` endpoint.
async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let query = query.unwrap_or_default();
    let params = parse_pairs(&query);

    let code_challenge = require_query(&params, "code_challenge")?.to_string();
    let x_authorize_url = require_query(&params, "x_authorize_url")?;
    let original_redirect_uri = require_query(&params, "redirect_uri")?.to_string();

    // Both values come back via the Cookie header; a `;` or control
    // character would be truncated away by the browser.
    if !cookies::value_round_trips(&code_challenge) {
        return Err(Error::InvalidCookieValue("code_challenge query parameter"));
    }
    if !cookies::value_round_trips(&original_redirect_uri) {
        return Err(Error::InvalidCookieValue("redirect_uri query parameter"));
    }

    let mut authorize_url = Url::parse(x_authorize_url)
        .map_err(|_| Error::InvalidUrl("x_authorize_url query parameter"))?;
    if authorize_url.cannot_be_a_base() {
        return Err(Error::InvalidUrl("x_authorize_url query parameter"));
    }

    let code_url = derive_code_url(state.public_url.as_ref(), &headers)?;

    // Everything else the client sent travels on to the provider untouched.
    let mut forwarded: Vec<(String, String)> = params
        .iter()
        .filter(|(name, _)| !AUTHORIZE_BRIDGE_PARAMS.contains(&name.as_str()))
        .cloned()
        .collect();
    forwarded.push(("redirect_uri".to_string(), code_url.to_string()));

    authorize_url
        .query_pairs_mut()
        .clear()
        .extend_pairs(&forwarded);

    debug!(
        provider = authorize_url.host_str().unwrap_or("?"),
        "Redirecting to provider authorize endpoint"
    );

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::LOCATION,
        HeaderValue::from_str(authorize_url.as_str())?,
    );
    response_headers.append(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookies::set_cookie_header(
            "original_redirect_uri",
            &original_redirect_uri,
            state.cookie_secure,
        ))?,
    );
    response_headers.append(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookies::set_cookie_header(
            "code_challenge",
            &code_challenge,
            state.cookie_secure,
        ))?,
    );

    Ok((StatusCode::FOUND, response_headers).into_response())
}

/// `GET /code` — the provider redirected back here. Bind the authorization
/// code to the challenge parked in the cookie, then send the browser on to
/// wherever the client originally wanted it.
async fn code_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let query = query.unwrap_or_default();
    let params = parse_pairs(&query);

    let code = require_query(&params, "code")?;
    let client_state = require_query(&params, "state")?;

    let code_challenge = cookies::single_value(&headers, "code_challenge")?;
    let original_redirect_uri = cookies::single_value(&headers, "original_redirect_uri")?;

    let mut redirect_to = Url::parse(&original_redirect_uri)
        .map_err(|_| Error::InvalidUrl("original_redirect_uri cookie"))?;
    if redirect_to.cannot_be_a_base() {
        return Err(Error::InvalidUrl("original_redirect_uri cookie"));
    }

    state.store.set(code, &code_challenge).await?;
    info!("Bound authorization code to its challenge");

    // Append, never replace: query pairs already present on the client's
    // redirect URI survive untouched.
    redirect_to
        .query_pairs_mut()
        .append_pair("code", code)
        .append_pair("state", client_state);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::LOCATION,
        HeaderValue::from_str(redirect_to.as_str())?,
    );
    Ok((StatusCode::FOUND, response_headers).into_response())
}

// ── Token leg ───────────────────────────────────────────────────────────────

/// `POST /access_token` — verify the client's `code_verifier` against the
/// stored challenge, then replay the exchange against the provider with
/// the real `client_secret` swapped in.
async fn access_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let form = parse_form(&headers, &body)?;

    let code_verifier = require_form(&form, "code_verifier")?;
    let code = require_form(&form, "code")?;
    let x_client_secret = require_form(&form, "x_client_secret")?.to_string();
    let x_access_token_uri = require_form(&form, "x_access_token_uri")?;

    let token_uri = Url::parse(x_access_token_uri)
        .map_err(|_| Error::InvalidUrl("x_access_token_uri form parameter"))?;

    let challenge = state.store.get(code).await?.ok_or(Error::UnknownCode)?;
    pkce::verify(code_verifier, &challenge)?;

    let mut outbound = build_outbound(&form, ACCESS_TOKEN_BRIDGE_FIELDS, x_client_secret);
    // Only the code that passed verification goes upstream; duplicate
    // occurrences are dropped, never relayed unverified.
    outbound.push(("code".to_string(), code.to_string()));
    if outbound.iter().any(|(name, _)| name == "redirect_uri") {
        // The provider validates redirect_uri against what it saw during
        // authorization, and that was this bridge's /code URL.
        let code_url = derive_code_url(state.public_url.as_ref(), &headers)?;
        outbound.retain(|(name, _)| name != "redirect_uri");
        outbound.push(("redirect_uri".to_string(), code_url.to_string()));
    }

    let relayed = state.forwarder.post_form(&token_uri, &outbound).await?;

    if relayed.status == 200 {
        state.store.delete(code).await?;
        debug!("Token exchange succeeded; challenge binding deleted");
    } else {
        warn!(
            status = relayed.status,
            "Provider token endpoint returned an error"
        );
    }

    Ok(relay_response(relayed))
}

/// `POST /refresh_access_token` — relay a refresh-token request with the
/// real `client_secret` swapped in. No PKCE state is involved.
async fn refresh_access_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let form = parse_form(&headers, &body)?;

    let x_client_secret = require_form(&form, "x_client_secret")?.to_string();
    let x_access_token_uri = require_form(&form, "x_access_token_uri")?;

    let token_uri = Url::parse(x_access_token_uri)
        .map_err(|_| Error::InvalidUrl("x_access_token_uri form parameter"))?;

    let outbound = build_outbound(&form, REFRESH_BRIDGE_FIELDS, x_client_secret);

    let relayed = state.forwarder.post_form(&token_uri, &outbound).await?;
    Ok(relay_response(relayed))
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Decode a urlencoded query or form body into ordered pairs, duplicates
/// preserved.
fn parse_pairs(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes())
        .into_owned()
        .collect()
}

/// First occurrence of `name` among `pairs`. An empty value counts as
/// missing, so `?code=` and no `code` at all report identically.
fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn require_query<'a>(pairs: &'a [(String, String)], name: &'static str) -> Result<&'a str> {
    first_value(pairs, name).ok_or(Error::MissingQueryParam(name))
}

fn require_form<'a>(pairs: &'a [(String, String)], name: &'static str) -> Result<&'a str> {
    first_value(pairs, name).ok_or(Error::MissingFormParam(name))
}

/// Decode a request body as `application/x-www-form-urlencoded`. Anything
/// else, including an empty body, reports as a missing form.
fn parse_form(headers: &HeaderMap, body: &str) -> Result<Vec<(String, String)>> {
    let essence = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim();

    if !essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        return Err(Error::MissingForm);
    }

    let pairs = parse_pairs(body);
    if pairs.is_empty() {
        return Err(Error::MissingForm);
    }
    Ok(pairs)
}

/// The bridge's own `/code` URL as the outside world reaches it: the
/// configured `public_url` when set, otherwise reconstructed from
/// `X-Forwarded-*` headers with the `Host` header as a last resort.
fn derive_code_url(public_url: Option<&Url>, headers: &HeaderMap) -> Result<Url> {
    if let Some(public) = public_url {
        let base = public.as_str().trim_end_matches('/');
        return Url::parse(&format!("{base}/code"))
            .map_err(|_| Error::InvalidUrl("configured public_url"));
    }

    let scheme = first_forwarded(headers, "x-forwarded-proto").unwrap_or("http");
    let host = first_forwarded(headers, "x-forwarded-host")
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .ok_or(Error::MissingHost)?;

    Url::parse(&format!("{scheme}://{host}/code"))
        .map_err(|_| Error::InvalidUrl("forwarded request URL"))
}

/// First element of a comma-separated forwarding header, trimmed. Proxies
/// append their hop, so the first entry is the client-facing one.
fn first_forwarded<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Copy `inbound` minus the `strip` fields, then append the provider's
/// real `client_secret`. Everything not stripped passes through verbatim,
/// duplicates included.
fn build_outbound(
    inbound: &[(String, String)],
    strip: &[&str],
    client_secret: String,
) -> Vec<(String, String)> {
    let mut outbound: Vec<(String, String)> = inbound
        .iter()
        .filter(|(name, _)| !strip.contains(&name.as_str()))
        .cloned()
        .collect();
    outbound.push(("client_secret".to_string(), client_secret));
    outbound
}

/// Turn a relayed upstream reply into our own response, body and status
/// verbatim. Token endpoints answer JSON, so that is the Content-Type
/// fallback when the provider omits one.
fn relay_response(relayed: Relayed) -> Response {
    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let content_type = relayed
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut response = (status, relayed.body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(n, v)| ((*n).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_first_value_picks_first_occurrence() {
        // GIVEN a duplicated field
        let form = pairs(&[("code", "first"), ("code", "second")]);

        // THEN the first occurrence wins
        assert_eq!(first_value(&form, "code"), Some("first"));
    }

    #[test]
    fn test_first_value_treats_empty_as_missing() {
        let form = pairs(&[("code", "")]);

        assert_eq!(first_value(&form, "code"), None);
        assert!(matches!(
            require_query(&form, "code"),
            Err(Error::MissingQueryParam("code"))
        ));
    }

    #[test]
    fn test_parse_pairs_preserves_order_and_duplicates() {
        let decoded = parse_pairs("a=1&b=2&a=3");

        assert_eq!(decoded, pairs(&[("a", "1"), ("b", "2"), ("a", "3")]));
    }

    #[test]
    fn test_parse_pairs_decodes_percent_escapes() {
        let decoded = parse_pairs("redirect_uri=https%3A%2F%2Fapp.example%2Fcb&scope=a+b");

        assert_eq!(
            decoded,
            pairs(&[("redirect_uri", "https://app.example/cb"), ("scope", "a b")])
        );
    }

    #[test]
    fn test_parse_form_rejects_wrong_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        assert!(matches!(
            parse_form(&headers, "a=1"),
            Err(Error::MissingForm)
        ));
    }

    #[test]
    fn test_parse_form_rejects_empty_body() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        assert!(matches!(parse_form(&headers, ""), Err(Error::MissingForm)));
    }

    #[test]
    fn test_parse_form_accepts_charset_parameter() {
        // GIVEN a Content-Type with a charset suffix
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );

        // THEN the media-type essence still matches
        let form = parse_form(&headers, "a=1").unwrap();
        assert_eq!(form, pairs(&[("a", "1")]));
    }

    #[test]
    fn test_build_outbound_strips_and_injects() {
        // GIVEN a token-exchange form with bridge fields and a spoofed secret
        let form = pairs(&[
            ("code_verifier", "v"),
            ("code", "c"),
            ("x_client_secret", "real-secret"),
            ("x_access_token_uri", "https://idp.example/token"),
            ("client_secret", "spoofed"),
            ("grant_type", "authorization_code"),
        ]);

        // WHEN the outbound form is built
        let outbound = build_outbound(&form, ACCESS_TOKEN_BRIDGE_FIELDS, "real-secret".into());

        // THEN only passthrough fields survive, with the real secret in;
        // the handler re-appends the verified code itself
        assert_eq!(
            outbound,
            pairs(&[
                ("grant_type", "authorization_code"),
                ("client_secret", "real-secret"),
            ])
        );
    }

    #[test]
    fn test_build_outbound_strips_every_code_occurrence() {
        // GIVEN a form smuggling a second code behind the verified one
        let form = pairs(&[
            ("code", "verified"),
            ("code", "smuggled"),
            ("grant_type", "authorization_code"),
        ]);

        let outbound = build_outbound(&form, ACCESS_TOKEN_BRIDGE_FIELDS, "s".into());

        // THEN no code occurrence survives the strip
        assert!(outbound.iter().all(|(name, _)| name != "code"));
    }

    #[test]
    fn test_build_outbound_keeps_refresh_passthrough() {
        let form = pairs(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", "r-1"),
            ("x_client_secret", "real-secret"),
            ("x_access_token_uri", "https://idp.example/token"),
        ]);

        let outbound = build_outbound(&form, REFRESH_BRIDGE_FIELDS, "real-secret".into());

        assert_eq!(
            outbound,
            pairs(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", "r-1"),
                ("client_secret", "real-secret"),
            ])
        );
    }

    #[test]
    fn test_derive_code_url_prefers_public_url() {
        // GIVEN a configured public URL with a trailing slash
        let public = Url::parse("https://bridge.example/").unwrap();

        // THEN forwarding headers are ignored
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-host", HeaderValue::from_static("evil.example"));
        let url = derive_code_url(Some(&public), &headers).unwrap();

        assert_eq!(url.as_str(), "https://bridge.example/code");
    }

    #[test]
    fn test_derive_code_url_uses_forwarding_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("bridge.example"),
        );

        let url = derive_code_url(None, &headers).unwrap();

        assert_eq!(url.as_str(), "https://bridge.example/code");
    }

    #[test]
    fn test_derive_code_url_takes_first_forwarded_hop() {
        // GIVEN a chain of proxies appending to the forwarding headers
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("bridge.example, inner.local"),
        );

        let url = derive_code_url(None, &headers).unwrap();

        assert_eq!(url.as_str(), "https://bridge.example/code");
    }

    #[test]
    fn test_derive_code_url_falls_back_to_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8000"));

        let url = derive_code_url(None, &headers).unwrap();

        assert_eq!(url.as_str(), "http://localhost:8000/code");
    }

    #[test]
    fn test_derive_code_url_without_any_host_fails() {
        let headers = HeaderMap::new();

        assert!(matches!(
            derive_code_url(None, &headers),
            Err(Error::MissingHost)
        ));
    }

    #[test]
    fn test_relay_response_defaults_to_json() {
        let relayed = Relayed {
            status: 200,
            content_type: None,
            body: "{}".to_string(),
        };

        let response = relay_response(relayed);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_relay_response_keeps_upstream_content_type() {
        let relayed = Relayed {
            status: 400,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: "nope".to_string(),
        };

        let response = relay_response(relayed);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
