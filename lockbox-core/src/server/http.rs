//! HTTP implementation of the login server client.
//!
//! A thin blocking wrapper over the auth server's JSON protocol. Every
//! response carries `{"status_code": <int>, "results": ..., "message": ...}`;
//! anything but a zero status code maps into the error taxonomy. Transport
//! failures and 429/5xx replies surface as the retryable `Server` variant.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{LoginError, LoginResult};
use crate::package::{CarePackage, LoginPackage};

use super::{AuthJson, LoginServer, OtpStatus, RepoInfo, V2LoginReply};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// Server protocol status codes.
const STATUS_OK: i64 = 0;
const STATUS_ACCOUNT_EXISTS: i64 = 2;
const STATUS_NO_ACCOUNT: i64 = 3;
const STATUS_INVALID_PASSWORD: i64 = 4;
const STATUS_INVALID_ANSWERS: i64 = 5;
const STATUS_INVALID_OTP: i64 = 8;

#[derive(Deserialize)]
struct ServerReply {
    status_code: i64,
    #[serde(default)]
    results: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Login server client over HTTP.
pub struct HttpLoginServer {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpLoginServer {
    /// Creates a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Url`] if `base_url` is not a valid URL, or
    /// [`LoginError::Server`] if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> LoginResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|_| LoginError::Url {
            url: base_url.clone(),
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("lockbox-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoginError::server(format!("building HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> LoginResult<reqwest::Url> {
        let text = format!("{}{path}", self.base_url);
        reqwest::Url::parse(&text).map_err(|_| LoginError::Url { url: text })
    }

    fn post(&self, path: &str, body: &Value) -> LoginResult<Value> {
        log::debug!("POST {path}");
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .map_err(transport_error)?;
        handle_response(response)
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> LoginResult<Value> {
        log::debug!("GET {path}");
        let response = self
            .client
            .get(self.url(path)?)
            .query(query)
            .send()
            .map_err(transport_error)?;
        handle_response(response)
    }
}

fn transport_error(err: reqwest::Error) -> LoginError {
    LoginError::server(format!("request failed: {err}"))
}

fn handle_response(response: reqwest::blocking::Response) -> LoginResult<Value> {
    let status = response.status();
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(LoginError::server(format!("HTTP {status}")));
    }

    let reply: ServerReply = response
        .json()
        .map_err(|e| LoginError::server(format!("malformed server reply: {e}")))?;
    map_reply(reply)
}

/// Maps the protocol status code into the error taxonomy.
fn map_reply(reply: ServerReply) -> LoginResult<Value> {
    let results = reply.results.unwrap_or(Value::Null);
    match reply.status_code {
        STATUS_OK => Ok(results),
        STATUS_ACCOUNT_EXISTS => Err(LoginError::AccountAlreadyExists),
        STATUS_NO_ACCOUNT => Err(LoginError::AccountDoesNotExist),
        STATUS_INVALID_PASSWORD => {
            match results.get("wait_seconds").and_then(Value::as_u64) {
                Some(seconds) if seconds > 0 => Err(LoginError::InvalidPinWait { seconds }),
                _ => Err(LoginError::BadPassword),
            }
        }
        STATUS_INVALID_ANSWERS => Err(LoginError::BadPassword),
        STATUS_INVALID_OTP => Err(LoginError::InvalidOtp {
            otp_date: results
                .get("otp_timeout_date")
                .and_then(Value::as_str)
                .map(String::from),
            otp_token: results
                .get("otp_reset_token")
                .and_then(Value::as_str)
                .map(String::from),
        }),
        code => Err(LoginError::server(format!(
            "status {code}: {}",
            reply.message.unwrap_or_default()
        ))),
    }
}

fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn b64_opt(bytes: Option<&[u8]>) -> Value {
    bytes.map_or(Value::Null, |b| Value::String(b64(b)))
}

fn results_str(results: &Value, key: &str) -> LoginResult<String> {
    results
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| LoginError::parse(format!("server reply missing '{key}'")))
}

impl LoginServer for HttpLoginServer {
    fn create(
        &self,
        l1: &[u8],
        lp1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
        sync_key_hex: &str,
    ) -> LoginResult<()> {
        self.post(
            "/account/create",
            &json!({
                "l1": b64(l1),
                "lp1": b64(lp1),
                "care_package": care_package.serialize()?,
                "login_package": login_package.serialize()?,
                "repo_account_key": sync_key_hex,
            }),
        )?;
        Ok(())
    }

    fn activate(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        self.post(
            "/account/activate",
            &json!({ "l1": b64(l1), "lp1": b64(lp1) }),
        )?;
        Ok(())
    }

    fn available(&self, l1: &[u8]) -> LoginResult<bool> {
        match self.post("/account/available", &json!({ "l1": b64(l1) })) {
            Ok(_) => Ok(true),
            Err(LoginError::AccountAlreadyExists) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn get_care_package(&self, l1: &[u8]) -> LoginResult<CarePackage> {
        let results = self.get("/account/carepackage/get", &[("l1", b64(l1))])?;
        CarePackage::parse(&results_str(&results, "care_package")?)
    }

    fn get_login_package(
        &self,
        l1: &[u8],
        lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
    ) -> LoginResult<LoginPackage> {
        let results = self.post(
            "/account/loginpackage/get",
            &json!({
                "l1": b64(l1),
                "lp1": b64_opt(lp1),
                "lra1": b64_opt(lra1),
            }),
        )?;
        LoginPackage::parse(&results_str(&results, "login_package")?)
    }

    fn set_recovery(
        &self,
        l1: &[u8],
        lp1: &[u8],
        lra1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        self.post(
            "/account/recovery/set",
            &json!({
                "l1": b64(l1),
                "lp1": b64(lp1),
                "lra1": b64(lra1),
                "care_package": care_package.serialize()?,
                "login_package": login_package.serialize()?,
            }),
        )?;
        Ok(())
    }

    fn change_password(
        &self,
        l1: &[u8],
        old_lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
        new_lp1: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        self.post(
            "/account/password/update",
            &json!({
                "l1": b64(l1),
                "lp1": b64_opt(old_lp1),
                "lra1": b64_opt(lra1),
                "new_lp1": b64(new_lp1),
                "login_package": login_package.serialize()?,
            }),
        )?;
        Ok(())
    }

    fn wallet_create(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()> {
        self.post(
            "/account/wallet/create",
            &json!({
                "l1": b64(l1),
                "lp1": b64(lp1),
                "repo_wallet_key": sync_key_hex,
            }),
        )?;
        Ok(())
    }

    fn wallet_activate(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()> {
        self.post(
            "/account/wallet/activate",
            &json!({
                "l1": b64(l1),
                "lp1": b64(lp1),
                "repo_wallet_key": sync_key_hex,
            }),
        )?;
        Ok(())
    }

    fn pin_get(&self, did: &[u8], lpin1: &[u8]) -> LoginResult<String> {
        let results = self.post(
            "/account/pin/get",
            &json!({ "did": b64(did), "lpin1": b64(lpin1) }),
        )?;
        results_str(&results, "pin_package")
    }

    fn pin_update(
        &self,
        l1: &[u8],
        lp1: &[u8],
        did: &[u8],
        lpin1: &[u8],
        pin_package: &str,
        auto_logout_secs: u64,
    ) -> LoginResult<()> {
        self.post(
            "/account/pin/update",
            &json!({
                "l1": b64(l1),
                "lp1": b64(lp1),
                "did": b64(did),
                "lpin1": b64(lpin1),
                "pin_package": pin_package,
                "ali": auto_logout_secs,
            }),
        )?;
        Ok(())
    }

    fn otp_enable(
        &self,
        l1: &[u8],
        lp1: &[u8],
        otp_secret: &str,
        timeout_secs: u64,
    ) -> LoginResult<()> {
        self.post(
            "/account/otp/on",
            &json!({
                "l1": b64(l1),
                "lp1": b64(lp1),
                "otp": otp_secret,
                "otp_timeout": timeout_secs,
            }),
        )?;
        Ok(())
    }

    fn otp_disable(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        self.post(
            "/account/otp/off",
            &json!({ "l1": b64(l1), "lp1": b64(lp1) }),
        )?;
        Ok(())
    }

    fn otp_status(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<OtpStatus> {
        let results = self.post(
            "/account/otp/status",
            &json!({ "l1": b64(l1), "lp1": b64(lp1) }),
        )?;
        Ok(OtpStatus {
            enabled: results.get("on").and_then(Value::as_bool).unwrap_or(false),
            timeout_secs: results.get("otp_timeout").and_then(Value::as_u64),
        })
    }

    fn otp_reset(&self, l1: &[u8], reset_token: &str) -> LoginResult<()> {
        self.post(
            "/account/otp/reset",
            &json!({ "l1": b64(l1), "otp_reset_auth": reset_token }),
        )?;
        Ok(())
    }

    fn otp_pending(&self, l1s: &[Vec<u8>]) -> LoginResult<Vec<bool>> {
        let handles: Vec<String> = l1s.iter().map(|l1| b64(l1)).collect();
        let results = self.post("/account/otp/pending", &json!({ "l1s": handles }))?;
        results
            .get("pending")
            .and_then(Value::as_array)
            .map(|flags| flags.iter().map(|v| v.as_bool().unwrap_or(false)).collect())
            .ok_or_else(|| LoginError::parse("server reply missing 'pending'"))
    }

    fn otp_reset_cancel(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        self.post(
            "/account/otp/reset/cancel",
            &json!({ "l1": b64(l1), "lp1": b64(lp1) }),
        )?;
        Ok(())
    }

    fn v2_login(&self, auth: &AuthJson) -> LoginResult<V2LoginReply> {
        let results = self.post("/v2/login", &serde_json::to_value(auth)?)?;
        Ok(V2LoginReply {
            care_package: CarePackage::parse(&results_str(&results, "carePackage")?)?,
            login_package: LoginPackage::parse(&results_str(&results, "loginPackage")?)?,
        })
    }

    fn v2_password_set(
        &self,
        auth: &AuthJson,
        new_password_auth: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        let mut body = serde_json::to_value(auth)?;
        body["newPasswordAuth"] = Value::String(b64(new_password_auth));
        body["loginPackage"] = Value::String(login_package.serialize()?);
        self.post("/v2/password", &body)?;
        Ok(())
    }

    fn v2_recovery_set(
        &self,
        auth: &AuthJson,
        recovery_auth: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        let mut body = serde_json::to_value(auth)?;
        body["newRecoveryAuth"] = Value::String(b64(recovery_auth));
        body["carePackage"] = Value::String(care_package.serialize()?);
        body["loginPackage"] = Value::String(login_package.serialize()?);
        self.post("/v2/recovery2", &body)?;
        Ok(())
    }

    fn v2_recovery_delete(&self, auth: &AuthJson) -> LoginResult<()> {
        let mut body = serde_json::to_value(auth)?;
        body["delete"] = Value::Bool(true);
        self.post("/v2/recovery2", &body)?;
        Ok(())
    }

    fn v2_repos_add(&self, auth: &AuthJson, repo: &RepoInfo) -> LoginResult<()> {
        let mut body = serde_json::to_value(auth)?;
        body["repo"] = serde_json::to_value(repo)?;
        self.post("/v2/repos", &body)?;
        Ok(())
    }
}
