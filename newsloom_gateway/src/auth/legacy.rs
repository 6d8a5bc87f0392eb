use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use newsloom_core::{AppError, CsrfTokenRecord, Role, UserContext};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::LegacyAuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Legacy CSRF tokens are prefixed so routing between backends is a format
/// decision, not a validity probe.
pub const LEGACY_CSRF_PREFIX: &str = "lg1:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyCsrfCheck {
  Valid,
  Malformed,
  Expired,
  WrongSession,
}

const LEGACY_ISSUER: &str = "newsloom-backend";

#[derive(Debug, Serialize, Deserialize)]
struct LegacyClaims {
  sub: String,
  exp: i64,
  iss: String,
  email: String,
  role: String,
  #[serde(default)]
  tenant_id: Option<String>,
  /// Session id minted when the legacy session was created.
  sid: String,
}

/// The pre-gateway authentication mechanism, kept alive through the
/// migration window: HS256 session tokens verified in-process and
/// HMAC-bound CSRF tokens. Nothing here talks to the network.
pub struct LegacyAuthBackend {
  session_key: DecodingKey,
  csrf_key: Vec<u8>,
  csrf_ttl: Duration,
}

impl LegacyAuthBackend {
  pub fn new(config: &LegacyAuthConfig) -> Self {
    Self {
      session_key: DecodingKey::from_secret(config.session_secret.as_bytes()),
      csrf_key: config.csrf_secret.as_bytes().to_vec(),
      csrf_ttl: Duration::seconds(config.csrf_ttl_seconds),
    }
  }

  pub fn validate_session_token(&self, token: &str) -> Result<UserContext, AppError> {
    let claims = self.decode_claims(token)?;
    let role = claims.role.parse::<Role>()?;
    Ok(UserContext {
      user_id: claims.sub,
      email: claims.email,
      role,
      tenant_id: claims.tenant_id,
      expires_at: Utc.timestamp_opt(claims.exp, 0).single(),
    })
  }

  /// Verified session id claim, for CSRF binding.
  pub fn session_id_of(&self, token: &str) -> Result<String, AppError> {
    Ok(self.decode_claims(token)?.sid)
  }

  fn decode_claims(&self, token: &str) -> Result<LegacyClaims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[LEGACY_ISSUER]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    decode::<LegacyClaims>(token, &self.session_key, &validation)
      .map(|data| data.claims)
      .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
          AppError::token_expired("legacy session token expired")
        }
        _ => AppError::unauthorized(format!("legacy session token rejected: {e}")),
      })
  }

  /// Mint a CSRF token bound to `session_id`:
  /// `lg1:` + base64url(nonce[16] || expiry_unix_be || mac).
  pub fn generate_csrf(&self, session_id: &str) -> Result<CsrfTokenRecord, AppError> {
    let expires_at = Utc::now() + self.csrf_ttl;
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut payload = Vec::with_capacity(16 + 8 + 32);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&expires_at.timestamp().to_be_bytes());
    payload.extend_from_slice(&self.mac(session_id, &nonce, expires_at.timestamp()));

    Ok(CsrfTokenRecord {
      token: format!("{LEGACY_CSRF_PREFIX}{}", BASE64URL.encode(payload)),
      session_id: session_id.to_string(),
      expires_at,
    })
  }

  /// Classified check. Callers log the class; the response side collapses
  /// every non-valid outcome into the same rejection.
  pub fn check_csrf(&self, token: &str, session_id: &str) -> LegacyCsrfCheck {
    let Some(encoded) = token.strip_prefix(LEGACY_CSRF_PREFIX) else {
      return LegacyCsrfCheck::Malformed;
    };
    let Ok(payload) = BASE64URL.decode(encoded) else {
      return LegacyCsrfCheck::Malformed;
    };
    if payload.len() != 16 + 8 + 32 {
      return LegacyCsrfCheck::Malformed;
    }
    let nonce = &payload[..16];
    let expiry = i64::from_be_bytes(payload[16..24].try_into().expect("sliced to 8 bytes"));
    let mac = &payload[24..];

    if Utc::now().timestamp() >= expiry {
      return LegacyCsrfCheck::Expired;
    }
    let mut verifier =
      HmacSha256::new_from_slice(&self.csrf_key).expect("hmac accepts any key length");
    verifier.update(Self::mac_input(session_id, nonce, expiry).as_slice());
    if verifier.verify_slice(mac).is_ok() {
      LegacyCsrfCheck::Valid
    } else {
      // A well-formed, unexpired token that fails the session binding was
      // minted for some other session.
      LegacyCsrfCheck::WrongSession
    }
  }

  pub fn validate_csrf(&self, token: &str, session_id: &str) -> bool {
    self.check_csrf(token, session_id) == LegacyCsrfCheck::Valid
  }

  fn mac(&self, session_id: &str, nonce: &[u8], expiry: i64) -> [u8; 32] {
    let mut mac =
      HmacSha256::new_from_slice(&self.csrf_key).expect("hmac accepts any key length");
    mac.update(Self::mac_input(session_id, nonce, expiry).as_slice());
    mac.finalize().into_bytes().into()
  }

  fn mac_input(session_id: &str, nonce: &[u8], expiry: i64) -> Vec<u8> {
    let mut input = Vec::with_capacity(session_id.len() + nonce.len() + 8);
    input.extend_from_slice(session_id.as_bytes());
    input.extend_from_slice(nonce);
    input.extend_from_slice(&expiry.to_be_bytes());
    input
  }
}

/// Helper for fixtures and the legacy token issuer that still runs in the
/// old backend: encode a legacy session token.
pub fn encode_legacy_session_token(
  config: &LegacyAuthConfig,
  user_id: &str,
  email: &str,
  role: Role,
  session_id: &str,
  expires_at: DateTime<Utc>,
) -> Result<String, AppError> {
  let claims = LegacyClaims {
    sub: user_id.to_string(),
    exp: expires_at.timestamp(),
    iss: LEGACY_ISSUER.to_string(),
    email: email.to_string(),
    role: role.to_string(),
    tenant_id: None,
    sid: session_id.to_string(),
  };
  jsonwebtoken::encode(
    &jsonwebtoken::Header::new(Algorithm::HS256),
    &claims,
    &jsonwebtoken::EncodingKey::from_secret(config.session_secret.as_bytes()),
  )
  .map_err(|e| AppError::wrap(newsloom_core::ErrorKind::Internal, "legacy token encoding", e))
}
