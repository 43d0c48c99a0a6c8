//! Installed-app authorization with a loopback redirect.
//!
//! The browser is sent to Google's consent page and Google redirects it back
//! to a callback server on 127.0.0.1. The authorization code is exchanged
//! for tokens using PKCE (S256).

use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret as OAuthClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tiny_http::{Header, ListenAddr, Request, Response, Server};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::google_auth::{ClientSecret, OAuthTokenResponse};

/// Path Google redirects to, as in `http://127.0.0.1:{port}/`.
const CALLBACK_PATH: &str = "/";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_PAGE: &str = "<html><body><h2>task-gmail-sync is authorized.</h2>\
<p>You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h2>Authorization failed.</h2>\
<p>Check the terminal for details.</p></body></html>";

type GoogleClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Runs the browser flow and returns the token endpoint response.
pub(crate) fn authorize(
    secret: &ClientSecret,
    auth_url: &str,
    token_url: &str,
    scopes: &[String],
) -> Result<OAuthTokenResponse, AuthError> {
    let server = Server::http("127.0.0.1:0")
        .map_err(|e| AuthError::AuthorizationFailed(format!("callback server: {}", e)))?;
    let redirect_uri = redirect_uri(&server)?;

    let client = google_client(secret, auth_url, token_url, &redirect_uri)?;
    let (url, csrf_token, pkce_verifier) = authorization_request(&client, scopes);

    debug!("Waiting for authorization on {}", redirect_uri);
    if let Err(err) = open::that(url.as_str()) {
        warn!("Could not open a browser: {}", err);
        info!("Please visit this URL to authorize task-gmail-sync: {}", url);
    }

    let code = wait_for_code(&server, csrf_token.secret(), CALLBACK_TIMEOUT)?;
    exchange_code(&client, code, pkce_verifier)
}

fn redirect_uri(server: &Server) -> Result<String, AuthError> {
    match server.server_addr() {
        ListenAddr::IP(addr) => Ok(format!("http://{}{}", addr, CALLBACK_PATH)),
        #[allow(unreachable_patterns)]
        _ => Err(AuthError::AuthorizationFailed(
            "unable to determine callback address".to_string(),
        )),
    }
}

fn google_client(
    secret: &ClientSecret,
    auth_url: &str,
    token_url: &str,
    redirect_uri: &str,
) -> Result<GoogleClient, AuthError> {
    let invalid = |what: &str, err: oauth2::url::ParseError| {
        AuthError::AuthorizationFailed(format!("invalid {}: {}", what, err))
    };
    Ok(BasicClient::new(ClientId::new(secret.client_id.clone()))
        .set_client_secret(OAuthClientSecret::new(secret.client_secret.clone()))
        .set_auth_type(AuthType::RequestBody)
        .set_auth_uri(AuthUrl::new(auth_url.to_string()).map_err(|e| invalid("auth url", e))?)
        .set_token_uri(TokenUrl::new(token_url.to_string()).map_err(|e| invalid("token url", e))?)
        .set_redirect_uri(
            RedirectUrl::new(redirect_uri.to_string()).map_err(|e| invalid("redirect uri", e))?,
        ))
}

/// Consent URL with a fresh PKCE challenge and state.
///
/// `access_type=offline` with `prompt=consent` makes Google issue a refresh
/// token even when the account already granted access.
fn authorization_request(
    client: &GoogleClient,
    scopes: &[String],
) -> (Url, CsrfToken, PkceCodeVerifier) {
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, csrf_token) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().cloned().map(Scope::new))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();
    (url, csrf_token, pkce_verifier)
}

#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    Code { code: String, state: String },
    Denied(String),
    /// Not the redirect, e.g. a favicon fetch or a preconnect.
    Ignored,
}

fn parse_callback(url: &str) -> CallbackOutcome {
    let (route, query) = url.split_once('?').unwrap_or((url, ""));
    if route != CALLBACK_PATH || query.is_empty() {
        return CallbackOutcome::Ignored;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let Ok(value) = urlencoding::decode(&value.replace('+', " ")).map(|v| v.into_owned())
        else {
            continue;
        };
        match key {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            _ => {}
        }
    }

    match (code, state, error) {
        (_, _, Some(error)) => CallbackOutcome::Denied(error),
        (Some(code), Some(state), None) if !code.is_empty() => CallbackOutcome::Code { code, state },
        _ => CallbackOutcome::Ignored,
    }
}

/// Serves callback requests until the redirect carrying the code arrives.
fn wait_for_code(
    server: &Server,
    expected_state: &str,
    timeout: Duration,
) -> Result<String, AuthError> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let request = match server.recv_timeout(remaining) {
            Ok(Some(request)) => request,
            Ok(None) => {
                return Err(AuthError::AuthorizationFailed(format!(
                    "no authorization received within {} seconds",
                    timeout.as_secs()
                )))
            }
            Err(e) => {
                return Err(AuthError::AuthorizationFailed(format!("callback server: {}", e)))
            }
        };

        match parse_callback(request.url()) {
            CallbackOutcome::Code { code, state } if state == expected_state => {
                respond(request, 200, SUCCESS_PAGE);
                return Ok(code);
            }
            CallbackOutcome::Code { .. } => {
                respond(request, 400, FAILURE_PAGE);
                return Err(AuthError::AuthorizationFailed(
                    "state mismatch in redirect".to_string(),
                ));
            }
            CallbackOutcome::Denied(error) => {
                respond(request, 400, FAILURE_PAGE);
                return Err(AuthError::AuthorizationFailed(format!(
                    "consent denied: {}",
                    error
                )));
            }
            CallbackOutcome::Ignored => {
                debug!("ignoring callback request {}", request.url());
                respond(request, 404, "");
            }
        }
    }
}

fn respond(request: Request, status: u16, body: &str) {
    let mut response: Response<Cursor<Vec<u8>>> =
        Response::from_string(body).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        response = response.with_header(header);
    }
    if let Err(err) = request.respond(response) {
        debug!("failed to answer callback request: {}", err);
    }
}

fn exchange_code(
    client: &GoogleClient,
    code: String,
    pkce_verifier: PkceCodeVerifier,
) -> Result<OAuthTokenResponse, AuthError> {
    let http_client = oauth2::reqwest::blocking::ClientBuilder::new()
        .redirect(oauth2::reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::AuthorizationFailed(e.to_string()))?;

    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request(&http_client)
        .map_err(|e| AuthError::AuthorizationFailed(format!("code exchange: {}", e)))?;

    Ok(OAuthTokenResponse {
        access_token: token.access_token().secret().clone(),
        expires_in: token
            .expires_in()
            .map(|expires_in| expires_in.as_secs() as i64),
        refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        scope: token.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|scope| scope.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
        token_type: Some(token.token_type().as_ref().to_string()),
    })
}
