//! Login orchestrator.
//!
//! [`LoginContext`] is the public surface of the crate. It owns the
//! account store, the server client, the sync-engine seam, and the key
//! cache, and sequences every multi-step credential operation across
//! them, compensating on partial failure (a failed create or
//! server-fetch never leaves a half-built local slot behind).
//!
//! Methods take `&mut self`, so the "one operation at a time per process"
//! contract is enforced by ownership rather than a process-wide lock.

use std::path::PathBuf;

use crate::cache::KeyCache;
use crate::crypto::{random_bytes, scrypt_snrp, EncryptedEnvelope, SecretBytes, Snrp};
use crate::error::{LoginError, LoginResult};
use crate::package::{CarePackage, LoginPackage};
use crate::server::{AuthJson, LoginServer, OtpStatus, RepoInfo};
use crate::store::{AccountStore, PackageKind, SlotId};
use crate::sync::SyncEngine;

/// Master data key length in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Repo access key length in bytes (hex-encoded everywhere outside RNG).
pub const SYNC_KEY_LEN: usize = 20;

/// Everything the external sync engine needs to work an account's data:
/// directory, repo key, and the master key for file contents.
pub struct SyncKeys {
    /// The account's sync directory.
    pub sync_dir: PathBuf,
    /// Hex-encoded repo access key.
    pub sync_key_hex: String,
    /// The master data key.
    pub master_key: SecretBytes,
}

/// A CarePackage fetched for recovery on a device with no local account,
/// carried between `recovery_questions` and `check_recovery_answers`.
struct PendingRecovery {
    username: String,
    care: CarePackage,
}

/// Called after a successful password change so the wallet layer can drop
/// caches keyed by the old credentials.
type PasswordChangeHook = Box<dyn FnMut(&str) + Send>;

/// The login engine: owns all credential state for one process.
pub struct LoginContext<S: LoginServer, E: SyncEngine> {
    store: AccountStore,
    server: S,
    sync: E,
    cache: KeyCache,
    pending_recovery: Option<PendingRecovery>,
    password_change_hook: Option<PasswordChangeHook>,
}

/// Retries an idempotent server call once after a transport failure.
fn retry_once<T>(mut op: impl FnMut() -> LoginResult<T>) -> LoginResult<T> {
    match op() {
        Err(e) if e.is_retryable() => {
            log::warn!("retrying idempotent server call: {e}");
            op()
        }
        other => other,
    }
}

impl<S: LoginServer, E: SyncEngine> LoginContext<S, E> {
    /// Creates a context over the given store, server client, and sync
    /// engine.
    #[must_use]
    pub fn new(store: AccountStore, server: S, sync: E) -> Self {
        Self {
            store,
            server,
            sync,
            cache: KeyCache::new(),
            pending_recovery: None,
            password_change_hook: None,
        }
    }

    /// Registers the wallet-layer notification for password changes.
    pub fn set_password_change_hook(&mut self, hook: PasswordChangeHook) {
        self.password_change_hook = Some(hook);
    }

    /// The server client (mainly useful to test doubles).
    #[must_use]
    pub const fn server(&self) -> &S {
        &self.server
    }

    /// The sync engine.
    #[must_use]
    pub const fn sync_engine(&self) -> &E {
        &self.sync
    }

    /// The account store.
    #[must_use]
    pub const fn store(&self) -> &AccountStore {
        &self.store
    }

    // Account creation

    /// Creates a new account locally and on the server.
    ///
    /// The remote account is created before any local file becomes
    /// durable, so a crash mid-create leaves no orphan local slot; any
    /// failure after slot allocation deletes the slot again.
    pub fn create(&mut self, username: &str, password: &str) -> LoginResult<()> {
        log::info!("creating account");
        if self.store.slot_for_username(username)?.is_some() {
            return Err(LoginError::AccountAlreadyExists);
        }
        self.cache.evict(username);

        let care = CarePackage {
            erq: None,
            snrp2: Snrp::generate_client(),
            snrp3: Snrp::generate_client(),
            snrp4: Snrp::generate_client(),
        };
        let mk = SecretBytes::new(random_bytes(MASTER_KEY_LEN));
        let sync_key_hex = hex::encode(random_bytes(SYNC_KEY_LEN));

        let result = self.create_inner(username, password, &care, &mk, &sync_key_hex);
        if result.is_err() {
            self.cache.evict(username);
        }
        result
    }

    fn create_inner(
        &mut self,
        username: &str,
        password: &str,
        care: &CarePackage,
        mk: &SecretBytes,
        sync_key_hex: &str,
    ) -> LoginResult<()> {
        let (l1, lp1, login) = {
            let entry = self.cache.entry(username);
            entry.set_care_package(care.clone());
            entry.supply_password(password)?;
            let l1 = entry.require_l1()?;
            let lp1 = entry.require_lp1()?;
            let l4 = entry.require_l4()?;
            let lp2 = entry.require_lp2()?;

            let login = LoginPackage {
                emk: EncryptedEnvelope::seal(mk.as_bytes(), &lp2)?,
                esync_key: EncryptedEnvelope::seal(sync_key_hex.as_bytes(), &l4)?,
                elp2: None,
                elra3: None,
            };
            entry.set_login_package(login.clone());
            entry.set_master_key(mk.clone())?;
            entry.set_sync_key(sync_key_hex)?;
            (l1, lp1, login)
        };

        self.server
            .create(l1.as_bytes(), lp1.as_bytes(), care, &login, sync_key_hex)?;

        let slot = self.store.allocate_slot(username)?;
        let result = self.finish_create(slot, care, &login, sync_key_hex, &l1, &lp1);
        if let Err(e) = result {
            let _ = self.store.delete_slot(slot);
            return Err(e);
        }
        self.cache.entry(username).set_slot(slot);
        log::info!("account created in slot {slot}");
        Ok(())
    }

    fn finish_create(
        &mut self,
        slot: SlotId,
        care: &CarePackage,
        login: &LoginPackage,
        sync_key_hex: &str,
        l1: &SecretBytes,
        lp1: &SecretBytes,
    ) -> LoginResult<()> {
        self.store
            .write_package(slot, PackageKind::Care, &care.serialize()?)?;
        self.store
            .write_package(slot, PackageKind::Login, &login.serialize()?)?;

        let sync_dir = self.store.create_sync_dir(slot)?;
        self.sync.make_repo(&sync_dir)?;
        self.sync.sync(&sync_dir, sync_key_hex)?;

        retry_once(|| self.server.activate(l1.as_bytes(), lp1.as_bytes()))
    }

    // Sign-in

    /// Signs into an account, caching its keys.
    ///
    /// With no local slot the packages are fetched from the server first
    /// (which also proves the password). With a local slot the login
    /// package is refreshed best-effort: a `BadPassword` reply means the
    /// password changed on another device and is terminal, while
    /// transport failures fall back to the offline path.
    pub fn sign_in(&mut self, username: &str, password: &str) -> LoginResult<()> {
        log::info!("signing in");
        self.cache.evict(username);
        let result = self.sign_in_inner(username, password);
        if result.is_err() {
            self.cache.evict(username);
        }
        result
    }

    fn sign_in_inner(&mut self, username: &str, password: &str) -> LoginResult<()> {
        if self.store.slot_for_username(username)?.is_none() {
            self.fetch_from_server(username, password)?;
        }

        self.load_entry(username, None)?;
        let (l1, lp1, slot) = {
            let entry = self.entry_mut(username)?;
            entry.supply_password(password)?;
            let l1 = entry.require_l1()?;
            let lp1 = entry.require_lp1()?;
            let slot = entry
                .slot()
                .ok_or_else(|| LoginError::internal("loaded entry has no slot"))?;
            (l1, lp1, slot)
        };

        // Best-effort refresh; also detects a password changed elsewhere.
        match self
            .server
            .get_login_package(l1.as_bytes(), Some(lp1.as_bytes()), None)
        {
            Ok(fresh) => {
                self.store
                    .write_package(slot, PackageKind::Login, &fresh.serialize()?)?;
                self.entry_mut(username)?.set_login_package(fresh);
            }
            Err(LoginError::BadPassword) => return Err(LoginError::BadPassword),
            Err(e) => log::warn!("offline sign-in; could not refresh login package: {e}"),
        }

        let entry = self.entry_mut(username)?;
        entry.require_sync_key()?;
        entry.require_master_key()?;
        Ok(())
    }

    /// Fetches both packages from the server and builds the local slot.
    /// Only used by `sign_in` on a device with no local account.
    fn fetch_from_server(&mut self, username: &str, password: &str) -> LoginResult<()> {
        log::info!("no local slot; fetching account from server");
        let (l1, lp1) = {
            let entry = self.cache.entry(username);
            entry.supply_password(password)?;
            (entry.require_l1()?, entry.require_lp1()?)
        };

        let care = self.server.get_care_package(l1.as_bytes())?;
        let login = self
            .server
            .get_login_package(l1.as_bytes(), Some(lp1.as_bytes()), None)?;

        self.install_fetched(username, &care, &login)
    }

    /// Writes fetched packages into a fresh slot and initializes sync.
    /// Deletes the slot again on any failure.
    fn install_fetched(
        &mut self,
        username: &str,
        care: &CarePackage,
        login: &LoginPackage,
    ) -> LoginResult<()> {
        let slot = self.store.allocate_slot(username)?;
        let result: LoginResult<()> = (|| {
            self.store
                .write_package(slot, PackageKind::Care, &care.serialize()?)?;
            self.store
                .write_package(slot, PackageKind::Login, &login.serialize()?)?;

            let entry = self.cache.entry(username);
            entry.set_slot(slot);
            entry.set_packages(care.clone(), login.clone());
            let sync_key_hex = entry.require_sync_key()?;

            let sync_dir = self.store.create_sync_dir(slot)?;
            self.sync.make_repo(&sync_dir)?;
            self.sync.sync(&sync_dir, &sync_key_hex)?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = self.store.delete_slot(slot);
            return Err(e);
        }
        Ok(())
    }

    /// Validates a username/password pair against the local account,
    /// warming the key cache on success.
    pub fn check_credentials(&mut self, username: &str, password: &str) -> LoginResult<()> {
        if self.store.slot_for_username(username)?.is_none() {
            return Err(LoginError::AccountDoesNotExist);
        }
        let result = self.load_entry(username, Some(password));
        if let Err(LoginError::BadPassword) = &result {
            self.cache.evict(username);
        }
        result
    }

    /// Evicts one account's keys from the cache.
    pub fn sign_out(&mut self, username: &str) {
        self.cache.evict(username);
    }

    /// Evicts every cached account.
    pub fn sign_out_all(&mut self) {
        self.cache.clear();
    }

    // Recovery

    /// Installs recovery questions and answers for an account.
    pub fn set_recovery(
        &mut self,
        username: &str,
        password: &str,
        questions: &str,
        answers: &str,
    ) -> LoginResult<()> {
        log::info!("setting recovery questions");
        let slot = self
            .store
            .slot_for_username(username)?
            .ok_or(LoginError::AccountDoesNotExist)?;
        self.load_entry(username, Some(password))?;

        let (l1, lp1, lra1, care, login) = {
            let entry = self.entry_mut(username)?;
            entry.reset_recovery();

            let l1 = entry.require_l1()?;
            let lp1 = entry.require_lp1()?;
            let lra1 = entry.require_lra1(Some(answers))?;
            let lra3 = entry.require_lra3(Some(answers))?;
            let lp2 = entry.require_lp2()?;
            let l4 = entry.require_l4()?;

            // The stored questions carry a trailing NUL, which fetches
            // reproduce byte-for-byte.
            let mut rq = questions.as_bytes().to_vec();
            rq.push(0);

            let old_care = entry
                .care_package()
                .cloned()
                .ok_or_else(|| LoginError::internal("care package missing from cache"))?;
            let care = CarePackage {
                erq: Some(EncryptedEnvelope::seal(&rq, &l4)?),
                snrp2: old_care.snrp2,
                snrp3: old_care.snrp3,
                snrp4: old_care.snrp4,
            };

            let old_login = entry
                .login_package()
                .cloned()
                .ok_or_else(|| LoginError::internal("login package missing from cache"))?;
            let login = LoginPackage {
                emk: old_login.emk,
                esync_key: old_login.esync_key,
                elp2: Some(EncryptedEnvelope::seal(lp2.as_bytes(), &lra3)?),
                elra3: Some(EncryptedEnvelope::seal(lra3.as_bytes(), &lp2)?),
            };
            (l1, lp1, lra1, care, login)
        };

        self.server.set_recovery(
            l1.as_bytes(),
            lp1.as_bytes(),
            lra1.as_bytes(),
            &care,
            &login,
        )?;

        self.store
            .write_package(slot, PackageKind::Care, &care.serialize()?)?;
        self.store
            .write_package(slot, PackageKind::Login, &login.serialize()?)?;
        self.entry_mut(username)?.set_packages(care, login);

        self.sync_data(username, password)?;
        Ok(())
    }

    /// Checks recovery answers for an account.
    ///
    /// On a device with a local slot the check is purely local (an `ELP2`
    /// decryption). On a new device it consumes the CarePackage carried
    /// over from [`LoginContext::recovery_questions`], proves the answers
    /// against the server, and initializes the local slot from the
    /// fetched packages.
    pub fn check_recovery_answers(&mut self, username: &str, answers: &str) -> LoginResult<bool> {
        let pending = match &self.pending_recovery {
            Some(p) if p.username == username => self.pending_recovery.take(),
            _ => None,
        };

        if let Some(pending) = pending {
            return match self.recover_on_new_device(username, answers, pending.care.clone()) {
                Ok(()) => Ok(true),
                Err(LoginError::BadPassword) => {
                    // Wrong answers; keep the fetched CarePackage so the
                    // user can retry.
                    self.pending_recovery = Some(pending);
                    Ok(false)
                }
                Err(e) => {
                    self.pending_recovery = Some(pending);
                    Err(e)
                }
            };
        }

        if self.store.slot_for_username(username)?.is_none() {
            return Err(LoginError::AccountDoesNotExist);
        }
        self.load_entry(username, None)?;
        self.entry_mut(username)?.check_answers(answers)
    }

    /// Proves answers remotely and sets up the local account from the
    /// server's packages.
    fn recover_on_new_device(
        &mut self,
        username: &str,
        answers: &str,
        care: CarePackage,
    ) -> LoginResult<()> {
        self.cache.evict(username);
        let (l1, lra1) = {
            let entry = self.cache.entry(username);
            entry.set_care_package(care);
            (entry.require_l1()?, entry.require_lra1(Some(answers))?)
        };

        // Success here is the proof that the answers are right.
        let login = self
            .server
            .get_login_package(l1.as_bytes(), None, Some(lra1.as_bytes()))?;

        let care = self
            .entry_mut(username)?
            .care_package()
            .cloned()
            .ok_or_else(|| LoginError::internal("care package missing from cache"))?;
        self.install_fetched(username, &care, &login)?;

        // The answers are proven; memoize the recovery keys for the
        // change-password call that usually follows.
        self.entry_mut(username)?.require_lra3(Some(answers))?;
        Ok(())
    }

    /// Returns the account's recovery questions.
    ///
    /// With a local slot this decrypts the local `ERQ`. Without one it
    /// fetches the CarePackage from the server, keeps it as the pending
    /// recovery state for [`LoginContext::check_recovery_answers`], and
    /// decrypts the questions from the fetched copy. An account with no
    /// recovery configured yields `NoRecoveryQuestions` locally and an
    /// empty string remotely.
    pub fn recovery_questions(&mut self, username: &str) -> LoginResult<String> {
        self.pending_recovery = None;

        if self.store.slot_for_username(username)?.is_some() {
            self.load_entry(username, None)?;
            return self.entry_mut(username)?.require_recovery_questions();
        }

        let l1 = scrypt_snrp(username.as_bytes(), &Snrp::server())?;
        let care = self.server.get_care_package(l1.as_bytes())?;

        let questions = match &care.erq {
            Some(erq) => {
                let l4 = scrypt_snrp(username.as_bytes(), &care.snrp4)?;
                let rq = erq.open(&l4).map_err(|e| match e {
                    LoginError::DecryptFailure { .. } => {
                        LoginError::internal("could not decrypt fetched ERQ")
                    }
                    other => other,
                })?;
                String::from_utf8(rq.as_bytes().to_vec())
                    .map_err(|_| LoginError::internal("recovery questions are not valid UTF-8"))?
            }
            None => String::new(),
        };

        self.pending_recovery = Some(PendingRecovery {
            username: username.to_string(),
            care,
        });
        Ok(questions)
    }

    // Password change

    /// Changes the account password, authenticating with either the old
    /// password or the recovery answers.
    ///
    /// The master key is never replaced: only the keys wrapping it
    /// (`LP2`, and therefore `EMK`/`ELP2`/`ELRA3`) are re-derived and
    /// re-uploaded.
    pub fn change_password(
        &mut self,
        username: &str,
        old_password: Option<&str>,
        recovery_answers: Option<&str>,
        new_password: &str,
    ) -> LoginResult<()> {
        log::info!("changing password");
        let result =
            self.change_password_inner(username, old_password, recovery_answers, new_password);
        if result.is_err() {
            self.cache.evict(username);
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    fn change_password_inner(
        &mut self,
        username: &str,
        old_password: Option<&str>,
        recovery_answers: Option<&str>,
        new_password: &str,
    ) -> LoginResult<()> {
        let slot = self
            .store
            .slot_for_username(username)?
            .ok_or(LoginError::AccountDoesNotExist)?;
        self.load_entry(username, old_password)?;

        // Gather the old credentials: MK, server auth, and LRA3 when
        // recovery is configured.
        let (mk, old_lp1, lra1, lra3, l1) = {
            let entry = self.entry_mut(username)?;
            let l1 = entry.require_l1()?;

            if old_password.is_some() {
                let mk = entry.require_master_key()?;
                let old_lp1 = entry.require_lp1()?;
                let lra3 = entry.lra3_cached();
                (mk, Some(old_lp1), None, lra3, l1)
            } else {
                let answers = recovery_answers.ok_or_else(|| {
                    LoginError::internal("either the old password or recovery answers are required")
                })?;
                let lra3 = entry.require_lra3(Some(answers))?;
                let login = entry
                    .login_package()
                    .cloned()
                    .ok_or_else(|| LoginError::internal("login package missing from cache"))?;
                let elp2 = login.elp2.ok_or(LoginError::NoRecoveryQuestions)?;

                let old_lp2 = elp2.open(&lra3).map_err(|e| match e {
                    LoginError::DecryptFailure { .. } => LoginError::BadPassword,
                    other => other,
                })?;
                let mk = login.emk.open(&old_lp2).map_err(|e| match e {
                    LoginError::DecryptFailure { .. } => LoginError::BadPassword,
                    other => other,
                })?;
                entry.set_master_key(mk.clone())?;
                let lra1 = entry.require_lra1(Some(answers))?;
                (mk, None, Some(lra1), Some(lra3), l1)
            }
        };

        // Install the new password and rebuild everything derived from it.
        let (new_lp1, login) = {
            let entry = self.entry_mut(username)?;
            entry.replace_password(new_password);
            let new_lp1 = entry.require_lp1()?;
            let new_lp2 = entry.require_lp2()?;

            let old_login = entry
                .login_package()
                .cloned()
                .ok_or_else(|| LoginError::internal("login package missing from cache"))?;
            let (elp2, elra3) = match &lra3 {
                Some(lra3) => (
                    Some(EncryptedEnvelope::seal(new_lp2.as_bytes(), lra3)?),
                    Some(EncryptedEnvelope::seal(lra3.as_bytes(), &new_lp2)?),
                ),
                None => (None, None),
            };
            let login = LoginPackage {
                emk: EncryptedEnvelope::seal(mk.as_bytes(), &new_lp2)?,
                esync_key: old_login.esync_key,
                elp2,
                elra3,
            };
            (new_lp1, login)
        };

        self.server.change_password(
            l1.as_bytes(),
            old_lp1.as_ref().map(SecretBytes::as_bytes),
            lra1.as_ref().map(SecretBytes::as_bytes),
            new_lp1.as_bytes(),
            &login,
        )?;

        self.store
            .write_package(slot, PackageKind::Login, &login.serialize()?)?;
        self.entry_mut(username)?.set_login_package(login);

        if let Some(hook) = &mut self.password_change_hook {
            hook(username);
        }

        self.sync_data(username, new_password)?;
        Ok(())
    }

    // Sync access

    /// Returns the keys the external sync engine needs for an account.
    pub fn sync_keys(&mut self, username: &str, password: &str) -> LoginResult<SyncKeys> {
        let slot = self
            .store
            .slot_for_username(username)?
            .ok_or(LoginError::AccountDoesNotExist)?;
        self.load_entry(username, Some(password))?;

        let (sync_key_hex, master_key) = {
            let entry = self.entry_mut(username)?;
            (entry.require_sync_key()?, entry.require_master_key()?)
        };
        Ok(SyncKeys {
            sync_dir: self.store.sync_dir(slot),
            sync_key_hex,
            master_key,
        })
    }

    /// Synchronizes the account's data directory. Returns `true` if local
    /// files changed.
    pub fn sync_data(&mut self, username: &str, password: &str) -> LoginResult<bool> {
        let keys = self.sync_keys(username, password)?;
        self.sync.sync(&keys.sync_dir, &keys.sync_key_hex)
    }

    // Server access for sibling subsystems

    /// Returns `(L1, LP1)`, the server auth handles for this account.
    pub fn server_keys(
        &mut self,
        username: &str,
        password: &str,
    ) -> LoginResult<(SecretBytes, SecretBytes)> {
        self.load_entry(username, Some(password))?;
        let entry = self.entry_mut(username)?;
        Ok((entry.require_l1()?, entry.require_lp1()?))
    }

    /// Re-fetches the LoginPackage from the server and persists it.
    pub fn update_login_package(&mut self, username: &str, password: &str) -> LoginResult<()> {
        let slot = self
            .store
            .slot_for_username(username)?
            .ok_or(LoginError::AccountDoesNotExist)?;
        let (l1, lp1) = self.server_keys(username, password)?;

        let fresh = self
            .server
            .get_login_package(l1.as_bytes(), Some(lp1.as_bytes()), None)?;
        self.store
            .write_package(slot, PackageKind::Login, &fresh.serialize()?)?;
        self.entry_mut(username)?.set_login_package(fresh);
        Ok(())
    }

    /// Asks the server whether a username is still unclaimed.
    pub fn is_username_available(&mut self, username: &str) -> LoginResult<bool> {
        let l1 = scrypt_snrp(username.as_bytes(), &Snrp::server())?;
        self.server.available(l1.as_bytes())
    }

    // 2-factor authentication

    /// Enables OTP for the account.
    pub fn otp_enable(
        &mut self,
        username: &str,
        password: &str,
        otp_secret: &str,
        timeout_secs: u64,
    ) -> LoginResult<()> {
        let (l1, lp1) = self.server_keys(username, password)?;
        self.server
            .otp_enable(l1.as_bytes(), lp1.as_bytes(), otp_secret, timeout_secs)
    }

    /// Disables OTP for the account.
    pub fn otp_disable(&mut self, username: &str, password: &str) -> LoginResult<()> {
        let (l1, lp1) = self.server_keys(username, password)?;
        self.server.otp_disable(l1.as_bytes(), lp1.as_bytes())
    }

    /// Reports the account's OTP state.
    pub fn otp_status(&mut self, username: &str, password: &str) -> LoginResult<OtpStatus> {
        let (l1, lp1) = self.server_keys(username, password)?;
        self.server.otp_status(l1.as_bytes(), lp1.as_bytes())
    }

    /// Requests a timed OTP reset. Rate-limited server-side; never
    /// retried on `InvalidOtp`.
    pub fn otp_reset(&mut self, username: &str, reset_token: &str) -> LoginResult<()> {
        let l1 = scrypt_snrp(username.as_bytes(), &Snrp::server())?;
        self.server.otp_reset(l1.as_bytes(), reset_token)
    }

    /// Cancels a pending OTP reset.
    pub fn otp_reset_cancel(&mut self, username: &str, password: &str) -> LoginResult<()> {
        let (l1, lp1) = self.server_keys(username, password)?;
        self.server.otp_reset_cancel(l1.as_bytes(), lp1.as_bytes())
    }

    // Wallet repositories

    /// Creates a wallet repository on the server. Idempotent.
    pub fn wallet_create(
        &mut self,
        username: &str,
        password: &str,
        sync_key_hex: &str,
    ) -> LoginResult<()> {
        let (l1, lp1) = self.server_keys(username, password)?;
        retry_once(|| {
            self.server
                .wallet_create(l1.as_bytes(), lp1.as_bytes(), sync_key_hex)
        })
    }

    /// Locks a wallet repository on the server. Idempotent.
    pub fn wallet_activate(
        &mut self,
        username: &str,
        password: &str,
        sync_key_hex: &str,
    ) -> LoginResult<()> {
        let (l1, lp1) = self.server_keys(username, password)?;
        retry_once(|| {
            self.server
                .wallet_activate(l1.as_bytes(), lp1.as_bytes(), sync_key_hex)
        })
    }

    /// Attaches a repository to the account through the v2 endpoint.
    /// Idempotent.
    pub fn repos_add(
        &mut self,
        username: &str,
        password: &str,
        repo: &RepoInfo,
    ) -> LoginResult<()> {
        let (l1, lp1) = self.server_keys(username, password)?;
        let auth = AuthJson::with_password(l1.as_bytes(), lp1.as_bytes());
        retry_once(|| self.server.v2_repos_add(&auth, repo))
    }

    // Internal plumbing

    fn entry_mut(&mut self, username: &str) -> LoginResult<&mut crate::cache::CacheEntry> {
        self.cache
            .get_mut(username)
            .ok_or_else(|| LoginError::internal("cache entry missing"))
    }

    /// Loads the cache entry for a local account: slot, packages, and the
    /// sync key (whose decryption must always succeed). With a password,
    /// also proves it by decrypting `EMK`, and adopts `LRA3` from
    /// `ELRA3` when recovery is configured.
    fn load_entry(&mut self, username: &str, password: Option<&str>) -> LoginResult<()> {
        let slot = self
            .store
            .slot_for_username(username)?
            .ok_or(LoginError::AccountDoesNotExist)?;

        let needs_packages = self
            .cache
            .get(username)
            .is_none_or(|e| e.care_package().is_none() || e.login_package().is_none());

        let packages = if needs_packages {
            let care_text = self
                .store
                .read_package(slot, PackageKind::Care)?
                .ok_or_else(|| LoginError::parse("account slot is missing CarePackage.json"))?;
            let login_text = self
                .store
                .read_package(slot, PackageKind::Login)?
                .ok_or_else(|| LoginError::parse("account slot is missing LoginPackage.json"))?;
            Some((
                CarePackage::parse(&care_text)?,
                LoginPackage::parse(&login_text)?,
            ))
        } else {
            None
        };

        let entry = self.cache.entry(username);
        entry.set_slot(slot);
        if let Some((care, login)) = packages {
            entry.set_packages(care, login);
        }
        entry.require_sync_key()?;

        if let Some(password) = password {
            entry.supply_password(password)?;
            entry.require_master_key()?;

            if entry.lra3_cached().is_none() {
                if let Some(elra3) = entry.login_package().and_then(|l| l.elra3.clone()) {
                    let lp2 = entry.require_lp2()?;
                    let lra3 = elra3.open(&lp2).map_err(|e| match e {
                        LoginError::DecryptFailure { .. } => {
                            LoginError::internal("could not decrypt ELRA3 with a proven LP2")
                        }
                        other => other,
                    })?;
                    entry.adopt_lra3(lra3)?;
                }
            }
        }
        Ok(())
    }
}
