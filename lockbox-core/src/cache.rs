//! Key cache and derivation engine.
//!
//! The cache owns every in-memory secret for the accounts a process has
//! touched. Each [`CacheEntry`] is populated piecewise — username only,
//! username plus password, username plus recovery answers — and every
//! derived key is computed lazily from its inputs the first time it is
//! required, then memoized.
//!
//! The derivation table (inputs → output) is:
//!
//! | Field | Rule |
//! |-------|------|
//! | `L`    | username bytes |
//! | `P`    | password bytes |
//! | `LP`   | `L \|\| P` |
//! | `LRA`  | `L \|\| RA` |
//! | `L1`   | `scrypt(L, SNRP1)` |
//! | `L4`   | `scrypt(L, SNRP4)` |
//! | `LP1`  | `scrypt(LP, SNRP1)` |
//! | `LP2`  | `scrypt(LP, SNRP2)` |
//! | `LRA1` | `scrypt(LRA, SNRP1)` |
//! | `LRA3` | `scrypt(LRA, SNRP3)` |
//! | `MK`   | `decrypt(EMK, LP2)` |
//! | sync key | `decrypt(ESyncKey, L4)` |
//! | `RQ`   | `decrypt(ERQ, L4)` |
//!
//! Recomputing a memoized field to a different value is a programmer bug
//! and fails loudly rather than silently overwriting.

use std::collections::HashMap;

use crate::crypto::{scrypt_snrp, SecretBytes, Snrp};
use crate::error::{LoginError, LoginResult};
use crate::package::{CarePackage, LoginPackage};
use crate::store::SlotId;

/// Memoizes `value` into `slot`, failing if a different value is already
/// present.
fn memoize(
    slot: &mut Option<SecretBytes>,
    value: SecretBytes,
    name: &str,
) -> LoginResult<SecretBytes> {
    match slot {
        Some(existing) if *existing != value => Err(LoginError::internal(format!(
            "{name} recomputed to a different value"
        ))),
        Some(existing) => Ok(existing.clone()),
        None => {
            *slot = Some(value.clone());
            Ok(value)
        }
    }
}

/// Per-username secret state, populated lazily.
///
/// Dropping an entry (eviction, process exit) zeroizes every secret field
/// it holds, including any partially-derived state left by a failed
/// operation.
pub struct CacheEntry {
    username: String,
    slot: Option<SlotId>,
    password: Option<SecretBytes>,
    care: Option<CarePackage>,
    login: Option<LoginPackage>,
    snrp1: Snrp,
    l: Option<SecretBytes>,
    p: Option<SecretBytes>,
    lp: Option<SecretBytes>,
    lra: Option<SecretBytes>,
    mk: Option<SecretBytes>,
    l1: Option<SecretBytes>,
    lp1: Option<SecretBytes>,
    lra1: Option<SecretBytes>,
    l4: Option<SecretBytes>,
    lp2: Option<SecretBytes>,
    lra3: Option<SecretBytes>,
    rq: Option<SecretBytes>,
    sync_key_hex: Option<SecretBytes>,
}

impl CacheEntry {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            slot: None,
            password: None,
            care: None,
            login: None,
            snrp1: Snrp::server(),
            l: None,
            p: None,
            lp: None,
            lra: None,
            mk: None,
            l1: None,
            lp1: None,
            lra1: None,
            l4: None,
            lp2: None,
            lra3: None,
            rq: None,
            sync_key_hex: None,
        }
    }

    /// The username this entry belongs to.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The local slot, once known.
    #[must_use]
    pub const fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    pub fn set_slot(&mut self, slot: SlotId) {
        self.slot = Some(slot);
    }

    /// Installs the account's packages (from disk or from the server).
    pub fn set_packages(&mut self, care: CarePackage, login: LoginPackage) {
        self.care = Some(care);
        self.login = Some(login);
    }

    /// Replaces the CarePackage (recovery setup re-uploads it).
    pub fn set_care_package(&mut self, care: CarePackage) {
        self.care = Some(care);
    }

    /// Replaces the LoginPackage (server refresh, password change).
    pub fn set_login_package(&mut self, login: LoginPackage) {
        self.login = Some(login);
    }

    #[must_use]
    pub const fn care_package(&self) -> Option<&CarePackage> {
        self.care.as_ref()
    }

    #[must_use]
    pub const fn login_package(&self) -> Option<&LoginPackage> {
        self.login.as_ref()
    }

    #[must_use]
    pub const fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Supplies the password for this entry.
    ///
    /// A password re-supplied to an entry that already holds one must
    /// byte-equal the held value; otherwise the caller is wrong and gets
    /// `BadPassword` without any scrypt work.
    ///
    /// A password supplied to an entry that held none discards any
    /// password-derived memos: those can only have come from the recovery
    /// path, and keeping them would let an unproven password piggyback on
    /// an `LP2` it never derived.
    pub fn supply_password(&mut self, password: &str) -> LoginResult<()> {
        let candidate = SecretBytes::from_slice(password.as_bytes());
        match &self.password {
            Some(existing) if *existing != candidate => Err(LoginError::BadPassword),
            Some(_) => Ok(()),
            None => {
                self.password = Some(candidate);
                self.p = None;
                self.lp = None;
                self.lp1 = None;
                self.lp2 = None;
                Ok(())
            }
        }
    }

    /// Installs a new password, discarding every value derived from the
    /// old one. `MK` is kept: a password change re-wraps the master key,
    /// it never replaces it.
    pub fn replace_password(&mut self, password: &str) {
        self.password = Some(SecretBytes::from_slice(password.as_bytes()));
        self.p = None;
        self.lp = None;
        self.lp1 = None;
        self.lp2 = None;
    }

    /// Discards the recovery-derived values so `set_recovery` can install
    /// fresh answers.
    pub fn reset_recovery(&mut self) {
        self.lra = None;
        self.lra1 = None;
        self.lra3 = None;
        self.rq = None;
    }

    // Derivations, in dependency order.

    /// `L` — the username bytes.
    pub fn require_l(&mut self) -> LoginResult<SecretBytes> {
        let l = SecretBytes::from_slice(self.username.as_bytes());
        memoize(&mut self.l, l, "L")
    }

    /// `P` — the password bytes; fails if no password was supplied.
    pub fn require_p(&mut self) -> LoginResult<SecretBytes> {
        let p = match &self.password {
            Some(password) => SecretBytes::from_slice(password.as_bytes()),
            None => return Err(LoginError::BadPassword),
        };
        memoize(&mut self.p, p, "P")
    }

    /// `LP = L || P`.
    pub fn require_lp(&mut self) -> LoginResult<SecretBytes> {
        let l = self.require_l()?;
        let p = self.require_p()?;
        let lp = SecretBytes::concat(l.as_bytes(), p.as_bytes());
        memoize(&mut self.lp, lp, "LP")
    }

    /// `LRA = L || RA`; `answers` is required unless already memoized.
    pub fn require_lra(&mut self, answers: Option<&str>) -> LoginResult<SecretBytes> {
        if let Some(lra) = &self.lra {
            return Ok(lra.clone());
        }
        let answers = answers
            .ok_or_else(|| LoginError::internal("recovery answers required but not supplied"))?;
        let l = self.require_l()?;
        let lra = SecretBytes::concat(l.as_bytes(), answers.as_bytes());
        memoize(&mut self.lra, lra, "LRA")
    }

    fn snrp2(&self) -> LoginResult<Snrp> {
        self.care
            .as_ref()
            .map(|c| c.snrp2.clone())
            .ok_or_else(|| LoginError::parse("care package not loaded; SNRP2 unavailable"))
    }

    fn snrp3(&self) -> LoginResult<Snrp> {
        self.care
            .as_ref()
            .map(|c| c.snrp3.clone())
            .ok_or_else(|| LoginError::parse("care package not loaded; SNRP3 unavailable"))
    }

    fn snrp4(&self) -> LoginResult<Snrp> {
        self.care
            .as_ref()
            .map(|c| c.snrp4.clone())
            .ok_or_else(|| LoginError::parse("care package not loaded; SNRP4 unavailable"))
    }

    /// `L1 = scrypt(L, SNRP1)` — the server-side username handle.
    pub fn require_l1(&mut self) -> LoginResult<SecretBytes> {
        if let Some(l1) = &self.l1 {
            return Ok(l1.clone());
        }
        let l = self.require_l()?;
        let l1 = scrypt_snrp(l.as_bytes(), &self.snrp1)?;
        memoize(&mut self.l1, l1, "L1")
    }

    /// `L4 = scrypt(L, SNRP4)` — local key for `ERQ` and `ESyncKey`.
    pub fn require_l4(&mut self) -> LoginResult<SecretBytes> {
        if let Some(l4) = &self.l4 {
            return Ok(l4.clone());
        }
        let l = self.require_l()?;
        let l4 = scrypt_snrp(l.as_bytes(), &self.snrp4()?)?;
        memoize(&mut self.l4, l4, "L4")
    }

    /// `LP1 = scrypt(LP, SNRP1)` — the password server-auth token.
    pub fn require_lp1(&mut self) -> LoginResult<SecretBytes> {
        if let Some(lp1) = &self.lp1 {
            return Ok(lp1.clone());
        }
        let lp = self.require_lp()?;
        let lp1 = scrypt_snrp(lp.as_bytes(), &self.snrp1)?;
        memoize(&mut self.lp1, lp1, "LP1")
    }

    /// `LP2 = scrypt(LP, SNRP2)` — local key for `EMK` and `ELRA3`.
    pub fn require_lp2(&mut self) -> LoginResult<SecretBytes> {
        if let Some(lp2) = &self.lp2 {
            return Ok(lp2.clone());
        }
        let lp = self.require_lp()?;
        let lp2 = scrypt_snrp(lp.as_bytes(), &self.snrp2()?)?;
        memoize(&mut self.lp2, lp2, "LP2")
    }

    /// `LRA1 = scrypt(LRA, SNRP1)` — the recovery server-auth token.
    pub fn require_lra1(&mut self, answers: Option<&str>) -> LoginResult<SecretBytes> {
        if let Some(lra1) = &self.lra1 {
            return Ok(lra1.clone());
        }
        let lra = self.require_lra(answers)?;
        let lra1 = scrypt_snrp(lra.as_bytes(), &self.snrp1)?;
        memoize(&mut self.lra1, lra1, "LRA1")
    }

    /// `LRA3 = scrypt(LRA, SNRP3)` — local key for `ELP2`.
    pub fn require_lra3(&mut self, answers: Option<&str>) -> LoginResult<SecretBytes> {
        if let Some(lra3) = &self.lra3 {
            return Ok(lra3.clone());
        }
        let lra = self.require_lra(answers)?;
        let lra3 = scrypt_snrp(lra.as_bytes(), &self.snrp3()?)?;
        memoize(&mut self.lra3, lra3, "LRA3")
    }

    /// `MK` — decrypts `EMK` with `LP2`.
    ///
    /// A decryption failure here means the password-derived key is wrong,
    /// so it surfaces as `BadPassword`.
    pub fn require_master_key(&mut self) -> LoginResult<SecretBytes> {
        if let Some(mk) = &self.mk {
            return Ok(mk.clone());
        }
        let lp2 = self.require_lp2()?;
        let emk = self
            .login
            .as_ref()
            .ok_or_else(|| LoginError::parse("login package not loaded; EMK unavailable"))?
            .emk
            .clone();
        let mk = emk.open(&lp2).map_err(|e| match e {
            LoginError::DecryptFailure { .. } => LoginError::BadPassword,
            other => other,
        })?;
        memoize(&mut self.mk, mk, "MK")
    }

    /// Pre-populates `MK` at account creation, when it is freshly random
    /// rather than decrypted.
    pub fn set_master_key(&mut self, mk: SecretBytes) -> LoginResult<()> {
        memoize(&mut self.mk, mk, "MK").map(|_| ())
    }

    /// The hex-encoded sync key — decrypts `ESyncKey` with `L4`.
    ///
    /// `L4` is username-derived, so this decryption must succeed for any
    /// well-formed local account; failure means local corruption and is an
    /// internal error, never `BadPassword`.
    pub fn require_sync_key(&mut self) -> LoginResult<String> {
        if let Some(hex) = &self.sync_key_hex {
            return sync_key_string(hex);
        }
        let l4 = self.require_l4()?;
        let esync_key = self
            .login
            .as_ref()
            .ok_or_else(|| LoginError::parse("login package not loaded; ESyncKey unavailable"))?
            .esync_key
            .clone();
        let sync_key = esync_key.open(&l4).map_err(|e| match e {
            LoginError::DecryptFailure { .. } => {
                LoginError::internal("could not decrypt ESyncKey; local account is corrupt")
            }
            other => other,
        })?;
        let sync_key = memoize(&mut self.sync_key_hex, sync_key, "SyncKey")?;
        sync_key_string(&sync_key)
    }

    /// Pre-populates the sync key at account creation.
    pub fn set_sync_key(&mut self, sync_key_hex: &str) -> LoginResult<()> {
        memoize(
            &mut self.sync_key_hex,
            SecretBytes::from_slice(sync_key_hex.as_bytes()),
            "SyncKey",
        )
        .map(|_| ())
    }

    /// `RQ` — decrypts `ERQ` with `L4`, or `NoRecoveryQuestions` if the
    /// CarePackage has no `ERQ`.
    pub fn require_recovery_questions(&mut self) -> LoginResult<String> {
        if let Some(rq) = &self.rq {
            return rq_string(rq);
        }
        let erq = self
            .care
            .as_ref()
            .ok_or_else(|| LoginError::parse("care package not loaded; ERQ unavailable"))?
            .erq
            .clone()
            .ok_or(LoginError::NoRecoveryQuestions)?;
        let l4 = self.require_l4()?;
        let rq = erq.open(&l4).map_err(|e| match e {
            LoginError::DecryptFailure { .. } => {
                LoginError::internal("could not decrypt ERQ; local account is corrupt")
            }
            other => other,
        })?;
        let rq = memoize(&mut self.rq, rq, "RQ")?;
        rq_string(&rq)
    }

    /// `LRA3`, if it has been derived or adopted already.
    #[must_use]
    pub fn lra3_cached(&self) -> Option<SecretBytes> {
        self.lra3.clone()
    }

    /// Adopts an `LRA3` recovered by decrypting `ELRA3` with `LP2`, so a
    /// password login can re-wrap the recovery envelopes without knowing
    /// the answers.
    pub fn adopt_lra3(&mut self, lra3: SecretBytes) -> LoginResult<()> {
        memoize(&mut self.lra3, lra3, "LRA3").map(|_| ())
    }

    /// Checks recovery answers against the local `ELP2` envelope.
    ///
    /// If the entry already holds an `LRA`, the check is a plain byte
    /// comparison. Otherwise the answers are run through scrypt and tried
    /// against `ELP2`: success proves them and memoizes `LRA`, `LRA1`,
    /// `LRA3`, and `LP2` (the work is already paid for); an authentication
    /// failure means wrong answers.
    pub fn check_answers(&mut self, answers: &str) -> LoginResult<bool> {
        let l = self.require_l()?;
        let candidate = SecretBytes::concat(l.as_bytes(), answers.as_bytes());

        if let Some(cached) = &self.lra {
            return Ok(*cached == candidate);
        }

        let elp2 = self
            .login
            .as_ref()
            .ok_or_else(|| LoginError::parse("login package not loaded; ELP2 unavailable"))?
            .elp2
            .clone()
            .ok_or(LoginError::NoRecoveryQuestions)?;

        let lra3 = scrypt_snrp(candidate.as_bytes(), &self.snrp3()?)?;
        match elp2.open(&lra3) {
            Ok(lp2) => {
                let lra1 = scrypt_snrp(candidate.as_bytes(), &self.snrp1)?;
                memoize(&mut self.lra, candidate, "LRA")?;
                memoize(&mut self.lra1, lra1, "LRA1")?;
                memoize(&mut self.lra3, lra3, "LRA3")?;
                memoize(&mut self.lp2, lp2, "LP2")?;
                Ok(true)
            }
            Err(LoginError::DecryptFailure { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

/// Username → secret-state map. The only shared mutable state in the core.
#[derive(Default)]
pub struct KeyCache {
    entries: HashMap<String, CacheEntry>,
}

impl KeyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `username`, creating an empty one if the
    /// username has not been touched yet.
    pub fn entry(&mut self, username: &str) -> &mut CacheEntry {
        self.entries
            .entry(username.to_string())
            .or_insert_with(|| CacheEntry::new(username))
    }

    /// Returns the entry for `username` if one exists.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<&CacheEntry> {
        self.entries.get(username)
    }

    /// Mutable variant of [`KeyCache::get`].
    pub fn get_mut(&mut self, username: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(username)
    }

    /// Evicts one user's entry, zeroizing every secret it held.
    pub fn evict(&mut self, username: &str) {
        if self.entries.remove(username).is_some() {
            log::debug!("evicted cached keys for one account");
        }
    }

    /// Evicts every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn sync_key_string(bytes: &SecretBytes) -> LoginResult<String> {
    String::from_utf8(bytes.as_bytes().to_vec())
        .map_err(|_| LoginError::internal("sync key is not valid hex text"))
}

fn rq_string(bytes: &SecretBytes) -> LoginResult<String> {
    String::from_utf8(bytes.as_bytes().to_vec())
        .map_err(|_| LoginError::internal("recovery questions are not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{fast_snrp, EncryptedEnvelope};

    const USERNAME: &str = "alice";
    const PASSWORD: &str = "hunter2";
    const ANSWERS: &str = "A1\nA2";

    /// Builds a care/login package pair the way `create` would.
    fn packages(with_recovery: bool) -> (CarePackage, LoginPackage, SecretBytes) {
        let care = CarePackage {
            erq: None,
            snrp2: fast_snrp(),
            snrp3: fast_snrp(),
            snrp4: fast_snrp(),
        };

        let l = USERNAME.as_bytes();
        let lp = SecretBytes::concat(l, PASSWORD.as_bytes());
        let lp2 = scrypt_snrp(lp.as_bytes(), &care.snrp2).unwrap();
        let l4 = scrypt_snrp(l, &care.snrp4).unwrap();

        let mk = SecretBytes::new(vec![0xAB; 32]);
        let sync_key_hex = "00112233445566778899aabbccddeeff00112233";

        let (elp2, elra3, erq) = if with_recovery {
            let lra = SecretBytes::concat(l, ANSWERS.as_bytes());
            let lra3 = scrypt_snrp(lra.as_bytes(), &care.snrp3).unwrap();
            (
                Some(EncryptedEnvelope::seal(lp2.as_bytes(), &lra3).unwrap()),
                Some(EncryptedEnvelope::seal(lra3.as_bytes(), &lp2).unwrap()),
                Some(EncryptedEnvelope::seal(b"Q1\nQ2\0", &l4).unwrap()),
            )
        } else {
            (None, None, None)
        };

        let care = CarePackage { erq, ..care };
        let login = LoginPackage {
            emk: EncryptedEnvelope::seal(mk.as_bytes(), &lp2).unwrap(),
            esync_key: EncryptedEnvelope::seal(sync_key_hex.as_bytes(), &l4).unwrap(),
            elp2,
            elra3,
        };
        (care, login, mk)
    }

    fn loaded_entry(with_recovery: bool) -> (KeyCache, SecretBytes) {
        let (care, login, mk) = packages(with_recovery);
        let mut cache = KeyCache::new();
        let entry = cache.entry(USERNAME);
        entry.set_packages(care, login);
        (cache, mk)
    }

    #[test]
    fn test_lazy_derivation_and_memoization() {
        let (mut cache, mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        entry.supply_password(PASSWORD).unwrap();

        let l1_first = entry.require_l1().unwrap();
        let l1_again = entry.require_l1().unwrap();
        assert_eq!(l1_first, l1_again);

        assert_eq!(entry.require_master_key().unwrap(), mk);
        assert_eq!(
            entry.require_sync_key().unwrap(),
            "00112233445566778899aabbccddeeff00112233"
        );
    }

    #[test]
    fn test_wrong_password_is_bad_password() {
        let (mut cache, _mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        entry.supply_password("wrong").unwrap();

        let result = entry.require_master_key();
        assert!(matches!(result, Err(LoginError::BadPassword)));
    }

    #[test]
    fn test_password_resupply_must_match() {
        let (mut cache, _mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        entry.supply_password(PASSWORD).unwrap();

        entry.supply_password(PASSWORD).unwrap();
        assert!(matches!(
            entry.supply_password("other"),
            Err(LoginError::BadPassword)
        ));
    }

    #[test]
    fn test_missing_password_fails_derivation() {
        let (mut cache, _mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        assert!(matches!(entry.require_lp1(), Err(LoginError::BadPassword)));
        // Username-only derivations still work.
        assert!(entry.require_l1().is_ok());
        assert!(entry.require_l4().is_ok());
    }

    #[test]
    fn test_corrupt_sync_key_is_internal_error() {
        let (care, mut login, _mk) = packages(false);
        login.esync_key.ct[0] ^= 0xFF;

        let mut cache = KeyCache::new();
        let entry = cache.entry(USERNAME);
        entry.set_packages(care, login);

        let result = entry.require_sync_key();
        assert!(matches!(result, Err(LoginError::Internal { .. })));
    }

    #[test]
    fn test_memoize_refuses_conflicting_value() {
        let (mut cache, _mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        entry.supply_password(PASSWORD).unwrap();
        entry.require_master_key().unwrap();

        let result = entry.set_master_key(SecretBytes::new(vec![0xEE; 32]));
        assert!(matches!(result, Err(LoginError::Internal { .. })));
    }

    #[test]
    fn test_recovery_questions() {
        let (mut cache, _mk) = loaded_entry(true);
        let entry = cache.get_mut(USERNAME).unwrap();
        assert_eq!(entry.require_recovery_questions().unwrap(), "Q1\nQ2\0");

        let (mut cache, _mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        assert!(matches!(
            entry.require_recovery_questions(),
            Err(LoginError::NoRecoveryQuestions)
        ));
    }

    #[test]
    fn test_check_answers() {
        let (mut cache, _mk) = loaded_entry(true);
        let entry = cache.get_mut(USERNAME).unwrap();

        assert!(!entry.check_answers("B1\nB2").unwrap());
        assert!(entry.check_answers(ANSWERS).unwrap());

        // Second check hits the memoized LRA instead of scrypt.
        assert!(entry.check_answers(ANSWERS).unwrap());
        assert!(!entry.check_answers("B1\nB2").unwrap());
    }

    #[test]
    fn test_check_answers_without_recovery() {
        let (mut cache, _mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        assert!(matches!(
            entry.check_answers(ANSWERS),
            Err(LoginError::NoRecoveryQuestions)
        ));
    }

    #[test]
    fn test_password_after_answers_check_is_still_proven() {
        // A successful answers check memoizes LP2. A password supplied
        // afterwards must not ride on that LP2; it has to prove itself
        // against EMK.
        let (mut cache, _mk) = loaded_entry(true);
        let entry = cache.get_mut(USERNAME).unwrap();
        assert!(entry.check_answers(ANSWERS).unwrap());

        entry.supply_password("wrong").unwrap();
        assert!(matches!(
            entry.require_master_key(),
            Err(LoginError::BadPassword)
        ));
    }

    #[test]
    fn test_replace_password_keeps_mk() {
        let (mut cache, mk) = loaded_entry(false);
        let entry = cache.get_mut(USERNAME).unwrap();
        entry.supply_password(PASSWORD).unwrap();
        entry.require_master_key().unwrap();
        let old_lp2 = entry.require_lp2().unwrap();

        entry.replace_password("swordfish");
        assert_eq!(entry.require_master_key().unwrap(), mk);
        let new_lp2 = entry.require_lp2().unwrap();
        assert_ne!(old_lp2, new_lp2);
    }

    #[test]
    fn test_eviction() {
        let (mut cache, _mk) = loaded_entry(false);
        assert_eq!(cache.len(), 1);
        cache.evict(USERNAME);
        assert!(cache.is_empty());
        assert!(cache.get(USERNAME).is_none());
        // Evicting again is harmless.
        cache.evict(USERNAME);
    }
}
