//! Login server client.
//!
//! A stateless request/response client over a fixed set of auth-server
//! endpoints. The v1 surface authenticates with raw `L1` plus one of
//! `LP1`/`LRA1`; the v2 surface shares the [`AuthJson`] envelope across
//! every operation. Both are carried by the same [`LoginServer`] trait so
//! the orchestrator can stay implementation-agnostic, with
//! [`HttpLoginServer`] talking to a real server and [`MemoryLoginServer`]
//! standing in for tests.
//!
//! Auth failures that carry protocol detail (PIN retry wait, OTP reset
//! date and token) surface through the corresponding [`LoginError`]
//! variants rather than a side channel.

mod http;
mod memory;

pub use http::HttpLoginServer;
pub use memory::MemoryLoginServer;

use serde::{Deserialize, Serialize};

use crate::error::LoginResult;
use crate::package::{CarePackage, LoginPackage};

/// Authentication envelope shared by every v2 operation.
///
/// All fields are optional; an operation fails server-side if the tokens
/// it needs are absent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthJson {
    /// `L1`, the server-side username handle.
    #[serde(
        rename = "userId",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt"
    )]
    pub user_id: Option<Vec<u8>>,
    /// `LP1`, the password auth token.
    #[serde(
        rename = "passwordAuth",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt"
    )]
    pub password_auth: Option<Vec<u8>>,
    /// `LRA1`, the recovery auth token.
    #[serde(
        rename = "recoveryAuth",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt"
    )]
    pub recovery_auth: Option<Vec<u8>>,
    /// Current 2-factor token, when the account has OTP enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

impl AuthJson {
    /// Builds an envelope authenticating with the password token.
    #[must_use]
    pub fn with_password(l1: &[u8], lp1: &[u8]) -> Self {
        Self {
            user_id: Some(l1.to_vec()),
            password_auth: Some(lp1.to_vec()),
            ..Self::default()
        }
    }

    /// Builds an envelope authenticating with the recovery token.
    #[must_use]
    pub fn with_recovery(l1: &[u8], lra1: &[u8]) -> Self {
        Self {
            user_id: Some(l1.to_vec()),
            recovery_auth: Some(lra1.to_vec()),
            ..Self::default()
        }
    }

    /// Attaches a 2-factor token to the envelope.
    #[must_use]
    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }
}

/// Reply from the v2 login endpoint: both account packages.
#[derive(Clone, Debug)]
pub struct V2LoginReply {
    /// The account's CarePackage.
    pub care_package: CarePackage,
    /// The account's LoginPackage.
    pub login_package: LoginPackage,
}

/// A repository attachment for the v2 repos endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repository type tag, e.g. `"wallet:repo:bitcoin:bip32"`.
    #[serde(rename = "type")]
    pub repo_type: String,
    /// Hex-encoded repo access key.
    #[serde(rename = "syncKey")]
    pub sync_key_hex: String,
}

/// 2-factor authentication state for an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpStatus {
    /// Whether OTP is required for this account.
    pub enabled: bool,
    /// Reset timeout in seconds, when enabled.
    pub timeout_secs: Option<u64>,
}

/// The fixed endpoint set of the auth server.
///
/// Idempotency contract: `activate`, `wallet_create`, `wallet_activate`,
/// and `v2_repos_add` may be retried on [`LoginError::Server`];
/// `create` is not idempotent (it reports "already exists" thereafter);
/// `otp_reset` is rate-limited server-side and must never be retried on
/// [`LoginError::InvalidOtp`].
///
/// [`LoginError::Server`]: crate::error::LoginError::Server
/// [`LoginError::InvalidOtp`]: crate::error::LoginError::InvalidOtp
pub trait LoginServer: Send + Sync {
    /// Creates an account plus its sync repository on the server.
    fn create(
        &self,
        l1: &[u8],
        lp1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
        sync_key_hex: &str,
    ) -> LoginResult<()>;

    /// Marks the account live once the initial sync has completed.
    fn activate(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()>;

    /// Queries whether a username handle is still unclaimed.
    fn available(&self, l1: &[u8]) -> LoginResult<bool>;

    /// Fetches the public CarePackage for a username handle.
    fn get_care_package(&self, l1: &[u8]) -> LoginResult<CarePackage>;

    /// Fetches the LoginPackage; proves `lp1` or `lra1` correct as a side
    /// effect, failing with `BadPassword` otherwise.
    fn get_login_package(
        &self,
        l1: &[u8],
        lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
    ) -> LoginResult<LoginPackage>;

    /// Installs recovery questions: new CarePackage, new LoginPackage, and
    /// the `LRA1` recovery auth token.
    fn set_recovery(
        &self,
        l1: &[u8],
        lp1: &[u8],
        lra1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()>;

    /// Replaces the password auth token and LoginPackage, authenticating
    /// with either the old `lp1` or the recovery `lra1`.
    fn change_password(
        &self,
        l1: &[u8],
        old_lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
        new_lp1: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()>;

    /// Creates a wallet repository on the server.
    fn wallet_create(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()>;

    /// Locks a wallet repository so it is not garbage-collected.
    fn wallet_activate(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()>;

    /// Fetches the PIN package for a device.
    fn pin_get(&self, did: &[u8], lpin1: &[u8]) -> LoginResult<String>;

    /// Uploads a PIN package for a device.
    fn pin_update(
        &self,
        l1: &[u8],
        lp1: &[u8],
        did: &[u8],
        lpin1: &[u8],
        pin_package: &str,
        auto_logout_secs: u64,
    ) -> LoginResult<()>;

    /// Enables 2-factor authentication.
    fn otp_enable(&self, l1: &[u8], lp1: &[u8], otp_secret: &str, timeout_secs: u64)
        -> LoginResult<()>;

    /// Disables 2-factor authentication.
    fn otp_disable(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()>;

    /// Reports the account's 2-factor state.
    fn otp_status(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<OtpStatus>;

    /// Requests a timed 2-factor reset. Never retried on `InvalidOtp`.
    fn otp_reset(&self, l1: &[u8], reset_token: &str) -> LoginResult<()>;

    /// Reports which of the given username handles have pending resets.
    fn otp_pending(&self, l1s: &[Vec<u8>]) -> LoginResult<Vec<bool>>;

    /// Cancels a pending 2-factor reset.
    fn otp_reset_cancel(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()>;

    /// v2 login: authenticates and returns both packages.
    fn v2_login(&self, auth: &AuthJson) -> LoginResult<V2LoginReply>;

    /// v2 password change.
    fn v2_password_set(
        &self,
        auth: &AuthJson,
        new_password_auth: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()>;

    /// v2 recovery setup.
    fn v2_recovery_set(
        &self,
        auth: &AuthJson,
        recovery_auth: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()>;

    /// v2 recovery removal.
    fn v2_recovery_delete(&self, auth: &AuthJson) -> LoginResult<()>;

    /// v2 repository attachment.
    fn v2_repos_add(&self, auth: &AuthJson, repo: &RepoInfo) -> LoginResult<()>;
}

/// Forwarding impl so several devices (or a context and a test) can share
/// one server behind an `Arc`.
impl<T: LoginServer + ?Sized> LoginServer for std::sync::Arc<T> {
    fn create(
        &self,
        l1: &[u8],
        lp1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
        sync_key_hex: &str,
    ) -> LoginResult<()> {
        (**self).create(l1, lp1, care_package, login_package, sync_key_hex)
    }

    fn activate(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        (**self).activate(l1, lp1)
    }

    fn available(&self, l1: &[u8]) -> LoginResult<bool> {
        (**self).available(l1)
    }

    fn get_care_package(&self, l1: &[u8]) -> LoginResult<CarePackage> {
        (**self).get_care_package(l1)
    }

    fn get_login_package(
        &self,
        l1: &[u8],
        lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
    ) -> LoginResult<LoginPackage> {
        (**self).get_login_package(l1, lp1, lra1)
    }

    fn set_recovery(
        &self,
        l1: &[u8],
        lp1: &[u8],
        lra1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        (**self).set_recovery(l1, lp1, lra1, care_package, login_package)
    }

    fn change_password(
        &self,
        l1: &[u8],
        old_lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
        new_lp1: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        (**self).change_password(l1, old_lp1, lra1, new_lp1, login_package)
    }

    fn wallet_create(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()> {
        (**self).wallet_create(l1, lp1, sync_key_hex)
    }

    fn wallet_activate(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()> {
        (**self).wallet_activate(l1, lp1, sync_key_hex)
    }

    fn pin_get(&self, did: &[u8], lpin1: &[u8]) -> LoginResult<String> {
        (**self).pin_get(did, lpin1)
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
        (**self).pin_update(l1, lp1, did, lpin1, pin_package, auto_logout_secs)
    }

    fn otp_enable(
        &self,
        l1: &[u8],
        lp1: &[u8],
        otp_secret: &str,
        timeout_secs: u64,
    ) -> LoginResult<()> {
        (**self).otp_enable(l1, lp1, otp_secret, timeout_secs)
    }

    fn otp_disable(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        (**self).otp_disable(l1, lp1)
    }

    fn otp_status(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<OtpStatus> {
        (**self).otp_status(l1, lp1)
    }

    fn otp_reset(&self, l1: &[u8], reset_token: &str) -> LoginResult<()> {
        (**self).otp_reset(l1, reset_token)
    }

    fn otp_pending(&self, l1s: &[Vec<u8>]) -> LoginResult<Vec<bool>> {
        (**self).otp_pending(l1s)
    }

    fn otp_reset_cancel(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        (**self).otp_reset_cancel(l1, lp1)
    }

    fn v2_login(&self, auth: &AuthJson) -> LoginResult<V2LoginReply> {
        (**self).v2_login(auth)
    }

    fn v2_password_set(
        &self,
        auth: &AuthJson,
        new_password_auth: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        (**self).v2_password_set(auth, new_password_auth, login_package)
    }

    fn v2_recovery_set(
        &self,
        auth: &AuthJson,
        recovery_auth: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        (**self).v2_recovery_set(auth, recovery_auth, care_package, login_package)
    }

    fn v2_recovery_delete(&self, auth: &AuthJson) -> LoginResult<()> {
        (**self).v2_recovery_delete(auth)
    }

    fn v2_repos_add(&self, auth: &AuthJson, repo: &RepoInfo) -> LoginResult<()> {
        (**self).v2_repos_add(auth, repo)
    }
}

pub(crate) mod base64_opt {
    //! Serde adapter for optional base64-encoded byte fields.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
