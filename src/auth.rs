//! Gmail API hub construction from a caller-supplied access token
//!
//! Token acquisition and refresh happen outside this crate. The token is
//! handed to the hub as-is and sent as a bearer credential on every call.

use google_gmail1::{hyper_rustls, hyper_util, Gmail};

use crate::error::{GmailError, Result};

/// Read messages and add labels
pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// List and create labels
pub const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Validate and clean an access token. Accepts an optional "Bearer " prefix.
pub fn normalize_access_token(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let token = match trimmed.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if trimmed.eq_ignore_ascii_case("bearer") => "",
        _ => trimmed,
    };

    if token.is_empty() {
        return Err(GmailError::AuthError("Access token is required".to_string()));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(GmailError::AuthError(
            "Access token must not contain whitespace".to_string(),
        ));
    }

    Ok(token.to_string())
}

/// Build a Gmail hub that authenticates every request with `access_token`
pub fn hub_from_access_token(access_token: &str) -> Result<GmailHub> {
    let token = normalize_access_token(access_token)?;

    // HTTP/1 only; google-gmail1 behaves better without h2
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, token))
}
