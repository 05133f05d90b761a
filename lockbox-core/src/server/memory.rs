//! In-memory implementation of the login server for testing.
//!
//! **FOR TESTING ONLY** — keeps every account in a `Mutex`-guarded map and
//! mirrors the real server's auth rules: `create` is not idempotent,
//! `activate`/`wallet_create`/`wallet_activate` are, auth failures report
//! `BadPassword`, and OTP-protected accounts reject v2 logins without the
//! right token.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{LoginError, LoginResult};
use crate::package::{CarePackage, LoginPackage};

use super::{AuthJson, LoginServer, OtpStatus, RepoInfo, V2LoginReply};

#[derive(Clone)]
struct OtpRecord {
    secret: String,
    timeout_secs: u64,
    reset_pending: bool,
}

#[derive(Clone)]
struct ServerAccount {
    lp1: Vec<u8>,
    lra1: Option<Vec<u8>>,
    care_package: String,
    login_package: String,
    sync_keys: Vec<String>,
    activated: bool,
    otp: Option<OtpRecord>,
    repos: Vec<RepoInfo>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Vec<u8>, ServerAccount>,
    pins: HashMap<Vec<u8>, String>,
    offline: bool,
}

/// In-memory login server backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryLoginServer {
    state: Mutex<State>,
}

impl MemoryLoginServer {
    /// Creates an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the server being unreachable: while set, every operation
    /// fails with the retryable `Server` error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Returns the number of accounts on the server.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.state.lock().unwrap().accounts.len()
    }

    /// Returns whether the account has been activated.
    #[must_use]
    pub fn is_activated(&self, l1: &[u8]) -> bool {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(l1)
            .is_some_and(|a| a.activated)
    }

    /// Returns the most recently uploaded LoginPackage text for an account.
    #[must_use]
    pub fn uploaded_login_package(&self, l1: &[u8]) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(l1)
            .map(|a| a.login_package.clone())
    }

    /// Returns the most recently uploaded CarePackage text for an account.
    #[must_use]
    pub fn uploaded_care_package(&self, l1: &[u8]) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(l1)
            .map(|a| a.care_package.clone())
    }

    /// Returns the sync keys registered for an account.
    #[must_use]
    pub fn sync_keys(&self, l1: &[u8]) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(l1)
            .map(|a| a.sync_keys.clone())
            .unwrap_or_default()
    }

    /// Returns the repos attached through the v2 endpoint.
    #[must_use]
    pub fn repos(&self, l1: &[u8]) -> Vec<RepoInfo> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(l1)
            .map(|a| a.repos.clone())
            .unwrap_or_default()
    }

    fn check_online(state: &State) -> LoginResult<()> {
        if state.offline {
            return Err(LoginError::server("connection refused"));
        }
        Ok(())
    }
}

fn account<'a>(state: &'a State, l1: &[u8]) -> LoginResult<&'a ServerAccount> {
    state
        .accounts
        .get(l1)
        .ok_or(LoginError::AccountDoesNotExist)
}

fn account_mut<'a>(state: &'a mut State, l1: &[u8]) -> LoginResult<&'a mut ServerAccount> {
    state
        .accounts
        .get_mut(l1)
        .ok_or(LoginError::AccountDoesNotExist)
}

fn check_password(account: &ServerAccount, lp1: &[u8]) -> LoginResult<()> {
    if account.lp1 == lp1 {
        Ok(())
    } else {
        Err(LoginError::BadPassword)
    }
}

/// Accepts either the password token or the recovery token.
fn check_either(
    account: &ServerAccount,
    lp1: Option<&[u8]>,
    lra1: Option<&[u8]>,
) -> LoginResult<()> {
    if lp1.is_some_and(|lp1| account.lp1 == lp1) {
        return Ok(());
    }
    if lra1.is_some_and(|lra1| account.lra1.as_deref() == Some(lra1)) {
        return Ok(());
    }
    Err(LoginError::BadPassword)
}

fn check_otp(account: &ServerAccount, otp: Option<&str>) -> LoginResult<()> {
    match &account.otp {
        Some(record) if otp != Some(record.secret.as_str()) => Err(LoginError::InvalidOtp {
            otp_date: record
                .reset_pending
                .then(|| "1970-01-08T00:00:00Z".to_string()),
            otp_token: Some(record.secret.clone()),
        }),
        _ => Ok(()),
    }
}

impl LoginServer for MemoryLoginServer {
    fn create(
        &self,
        l1: &[u8],
        lp1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
        sync_key_hex: &str,
    ) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.accounts.contains_key(l1) {
            return Err(LoginError::AccountAlreadyExists);
        }
        state.accounts.insert(
            l1.to_vec(),
            ServerAccount {
                lp1: lp1.to_vec(),
                lra1: None,
                care_package: care_package.serialize()?,
                login_package: login_package.serialize()?,
                sync_keys: vec![sync_key_hex.to_string()],
                activated: false,
                otp: None,
                repos: Vec::new(),
            },
        );
        Ok(())
    }

    fn activate(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_password(account, lp1)?;
        account.activated = true;
        Ok(())
    }

    fn available(&self, l1: &[u8]) -> LoginResult<bool> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        Ok(!state.accounts.contains_key(l1))
    }

    fn get_care_package(&self, l1: &[u8]) -> LoginResult<CarePackage> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        CarePackage::parse(&account(&state, l1)?.care_package)
    }

    fn get_login_package(
        &self,
        l1: &[u8],
        lp1: Option<&[u8]>,
        lra1: Option<&[u8]>,
    ) -> LoginResult<LoginPackage> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account(&state, l1)?;
        check_either(account, lp1, lra1)?;
        LoginPackage::parse(&account.login_package)
    }

    fn set_recovery(
        &self,
        l1: &[u8],
        lp1: &[u8],
        lra1: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        let care_text = care_package.serialize()?;
        let login_text = login_package.serialize()?;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_password(account, lp1)?;
        account.lra1 = Some(lra1.to_vec());
        account.care_package = care_text;
        account.login_package = login_text;
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
        let login_text = login_package.serialize()?;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_either(account, old_lp1, lra1)?;
        account.lp1 = new_lp1.to_vec();
        account.login_package = login_text;
        Ok(())
    }

    fn wallet_create(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_password(account, lp1)?;
        if !account.sync_keys.iter().any(|k| k == sync_key_hex) {
            account.sync_keys.push(sync_key_hex.to_string());
        }
        Ok(())
    }

    fn wallet_activate(&self, l1: &[u8], lp1: &[u8], sync_key_hex: &str) -> LoginResult<()> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account(&state, l1)?;
        check_password(account, lp1)?;
        if account.sync_keys.iter().any(|k| k == sync_key_hex) {
            Ok(())
        } else {
            Err(LoginError::server("unknown wallet repo"))
        }
    }

    fn pin_get(&self, did: &[u8], lpin1: &[u8]) -> LoginResult<String> {
        let _ = lpin1;
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state
            .pins
            .get(did)
            .cloned()
            .ok_or(LoginError::AccountDoesNotExist)
    }

    fn pin_update(
        &self,
        l1: &[u8],
        lp1: &[u8],
        did: &[u8],
        _lpin1: &[u8],
        pin_package: &str,
        _auto_logout_secs: u64,
    ) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        check_password(account(&state, l1)?, lp1)?;
        state.pins.insert(did.to_vec(), pin_package.to_string());
        Ok(())
    }

    fn otp_enable(
        &self,
        l1: &[u8],
        lp1: &[u8],
        otp_secret: &str,
        timeout_secs: u64,
    ) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_password(account, lp1)?;
        account.otp = Some(OtpRecord {
            secret: otp_secret.to_string(),
            timeout_secs,
            reset_pending: false,
        });
        Ok(())
    }

    fn otp_disable(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_password(account, lp1)?;
        account.otp = None;
        Ok(())
    }

    fn otp_status(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<OtpStatus> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account(&state, l1)?;
        check_password(account, lp1)?;
        Ok(OtpStatus {
            enabled: account.otp.is_some(),
            timeout_secs: account.otp.as_ref().map(|o| o.timeout_secs),
        })
    }

    fn otp_reset(&self, l1: &[u8], reset_token: &str) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        let Some(record) = account.otp.as_mut() else {
            return Ok(()); // nothing to reset
        };
        if reset_token != record.secret {
            return Err(LoginError::InvalidOtp {
                otp_date: None,
                otp_token: None,
            });
        }
        record.reset_pending = true;
        Ok(())
    }

    fn otp_pending(&self, l1s: &[Vec<u8>]) -> LoginResult<Vec<bool>> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        Ok(l1s
            .iter()
            .map(|l1| {
                state
                    .accounts
                    .get(l1)
                    .and_then(|a| a.otp.as_ref())
                    .is_some_and(|o| o.reset_pending)
            })
            .collect())
    }

    fn otp_reset_cancel(&self, l1: &[u8], lp1: &[u8]) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let account = account_mut(&mut state, l1)?;
        check_password(account, lp1)?;
        if let Some(record) = account.otp.as_mut() {
            record.reset_pending = false;
        }
        Ok(())
    }

    fn v2_login(&self, auth: &AuthJson) -> LoginResult<V2LoginReply> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let l1 = auth
            .user_id
            .as_deref()
            .ok_or_else(|| LoginError::server("missing userId"))?;
        let account = account(&state, l1)?;
        check_otp(account, auth.otp.as_deref())?;
        check_either(
            account,
            auth.password_auth.as_deref(),
            auth.recovery_auth.as_deref(),
        )?;
        Ok(V2LoginReply {
            care_package: CarePackage::parse(&account.care_package)?,
            login_package: LoginPackage::parse(&account.login_package)?,
        })
    }

    fn v2_password_set(
        &self,
        auth: &AuthJson,
        new_password_auth: &[u8],
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        let login_text = login_package.serialize()?;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let l1 = auth
            .user_id
            .as_deref()
            .ok_or_else(|| LoginError::server("missing userId"))?
            .to_vec();
        let account = account_mut(&mut state, &l1)?;
        check_otp(account, auth.otp.as_deref())?;
        check_either(
            account,
            auth.password_auth.as_deref(),
            auth.recovery_auth.as_deref(),
        )?;
        account.lp1 = new_password_auth.to_vec();
        account.login_package = login_text;
        Ok(())
    }

    fn v2_recovery_set(
        &self,
        auth: &AuthJson,
        recovery_auth: &[u8],
        care_package: &CarePackage,
        login_package: &LoginPackage,
    ) -> LoginResult<()> {
        let care_text = care_package.serialize()?;
        let login_text = login_package.serialize()?;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let l1 = auth
            .user_id
            .as_deref()
            .ok_or_else(|| LoginError::server("missing userId"))?
            .to_vec();
        let account = account_mut(&mut state, &l1)?;
        check_otp(account, auth.otp.as_deref())?;
        check_either(account, auth.password_auth.as_deref(), None)?;
        account.lra1 = Some(recovery_auth.to_vec());
        account.care_package = care_text;
        account.login_package = login_text;
        Ok(())
    }

    fn v2_recovery_delete(&self, auth: &AuthJson) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let l1 = auth
            .user_id
            .as_deref()
            .ok_or_else(|| LoginError::server("missing userId"))?
            .to_vec();
        let account = account_mut(&mut state, &l1)?;
        check_otp(account, auth.otp.as_deref())?;
        check_either(account, auth.password_auth.as_deref(), None)?;
        account.lra1 = None;
        Ok(())
    }

    fn v2_repos_add(&self, auth: &AuthJson, repo: &RepoInfo) -> LoginResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let l1 = auth
            .user_id
            .as_deref()
            .ok_or_else(|| LoginError::server("missing userId"))?
            .to_vec();
        let account = account_mut(&mut state, &l1)?;
        check_otp(account, auth.otp.as_deref())?;
        check_either(account, auth.password_auth.as_deref(), None)?;
        if !account.repos.contains(repo) {
            account.repos.push(repo.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{fast_snrp, EncryptedEnvelope, SecretBytes};

    fn packages() -> (CarePackage, LoginPackage) {
        let key = SecretBytes::new(vec![0x55; 32]);
        (
            CarePackage {
                erq: None,
                snrp2: fast_snrp(),
                snrp3: fast_snrp(),
                snrp4: fast_snrp(),
            },
            LoginPackage {
                emk: EncryptedEnvelope::seal(b"mk", &key).unwrap(),
                esync_key: EncryptedEnvelope::seal(b"sk", &key).unwrap(),
                elp2: None,
                elra3: None,
            },
        )
    }

    #[test]
    fn test_create_then_duplicate() {
        let server = MemoryLoginServer::new();
        let (care, login) = packages();
        server.create(b"l1", b"lp1", &care, &login, "aabb").unwrap();
        let result = server.create(b"l1", b"lp1", &care, &login, "aabb");
        assert!(matches!(result, Err(LoginError::AccountAlreadyExists)));
        assert!(!server.available(b"l1").unwrap());
        assert!(server.available(b"other").unwrap());
    }

    #[test]
    fn test_activate_is_idempotent() {
        let server = MemoryLoginServer::new();
        let (care, login) = packages();
        server.create(b"l1", b"lp1", &care, &login, "aabb").unwrap();
        server.activate(b"l1", b"lp1").unwrap();
        server.activate(b"l1", b"lp1").unwrap();
        assert!(server.is_activated(b"l1"));
    }

    #[test]
    fn test_login_package_auth() {
        let server = MemoryLoginServer::new();
        let (care, login) = packages();
        server.create(b"l1", b"lp1", &care, &login, "aabb").unwrap();

        assert!(server.get_login_package(b"l1", Some(b"lp1"), None).is_ok());
        assert!(matches!(
            server.get_login_package(b"l1", Some(b"wrong"), None),
            Err(LoginError::BadPassword)
        ));
        assert!(matches!(
            server.get_login_package(b"nobody", Some(b"lp1"), None),
            Err(LoginError::AccountDoesNotExist)
        ));
    }

    #[test]
    fn test_offline_mode() {
        let server = MemoryLoginServer::new();
        server.set_offline(true);
        let result = server.available(b"l1");
        assert!(matches!(result, Err(LoginError::Server { .. })));
        assert!(result.unwrap_err().is_retryable());
    }

    #[test]
    fn test_v2_login_with_otp() {
        let server = MemoryLoginServer::new();
        let (care, login) = packages();
        server.create(b"l1", b"lp1", &care, &login, "aabb").unwrap();
        server.otp_enable(b"l1", b"lp1", "SECRET", 7 * 86400).unwrap();

        let no_otp = AuthJson::with_password(b"l1", b"lp1");
        assert!(matches!(
            server.v2_login(&no_otp),
            Err(LoginError::InvalidOtp { .. })
        ));

        let with_otp = AuthJson::with_password(b"l1", b"lp1").with_otp("SECRET");
        assert!(server.v2_login(&with_otp).is_ok());
    }

    #[test]
    fn test_otp_reset_flow() {
        let server = MemoryLoginServer::new();
        let (care, login) = packages();
        server.create(b"l1", b"lp1", &care, &login, "aabb").unwrap();
        server.otp_enable(b"l1", b"lp1", "SECRET", 7 * 86400).unwrap();

        assert!(matches!(
            server.otp_reset(b"l1", "bogus"),
            Err(LoginError::InvalidOtp { .. })
        ));

        server.otp_reset(b"l1", "SECRET").unwrap();
        assert_eq!(server.otp_pending(&[b"l1".to_vec()]).unwrap(), vec![true]);

        server.otp_reset_cancel(b"l1", b"lp1").unwrap();
        assert_eq!(server.otp_pending(&[b"l1".to_vec()]).unwrap(), vec![false]);
    }
}
