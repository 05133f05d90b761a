//! End-to-end login flows against the in-memory server and a tempdir
//! store: create, sign-in (online and offline), recovery, password
//! change, and the failure-compensation paths.

use std::sync::Arc;

use lockbox_core::crypto::{scrypt_snrp, Snrp};
use lockbox_core::error::LoginError;
use lockbox_core::login::LoginContext;
use lockbox_core::package::{CarePackage, LoginPackage};
use lockbox_core::server::{LoginServer, MemoryLoginServer, RepoInfo};
use lockbox_core::store::{AccountStore, PackageKind};
use lockbox_core::sync::MemorySyncEngine;

const USERNAME: &str = "alice";
const PASSWORD: &str = "hunter2";
const QUESTIONS: &str = "Q1\nQ2";
const ANSWERS: &str = "A1\nA2";

type Ctx = LoginContext<Arc<MemoryLoginServer>, Arc<MemorySyncEngine>>;

/// One simulated device: its own store directory and sync engine, a
/// possibly-shared server.
struct Device {
    _dir: tempfile::TempDir,
    ctx: Ctx,
}

fn device(server: &Arc<MemoryLoginServer>) -> Device {
    let dir = tempfile::tempdir().unwrap();
    let ctx = LoginContext::new(
        AccountStore::new(dir.path()),
        Arc::clone(server),
        Arc::new(MemorySyncEngine::new()),
    );
    Device { _dir: dir, ctx }
}

fn single_device() -> Device {
    device(&Arc::new(MemoryLoginServer::new()))
}

fn l1(username: &str) -> Vec<u8> {
    scrypt_snrp(username.as_bytes(), &Snrp::server())
        .unwrap()
        .as_bytes()
        .to_vec()
}

fn lp1(username: &str, password: &str) -> Vec<u8> {
    let lp = format!("{username}{password}");
    scrypt_snrp(lp.as_bytes(), &Snrp::server())
        .unwrap()
        .as_bytes()
        .to_vec()
}

// Creation

#[test]
fn test_create_registers_account_and_slot() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();

    // Slot 0 exists and both package files parse.
    let store = dev.ctx.store();
    assert_eq!(store.slot_for_username(USERNAME).unwrap(), Some(0));
    let care_text = store.read_package(0, PackageKind::Care).unwrap().unwrap();
    let care = CarePackage::parse(&care_text).unwrap();
    assert!(care.erq.is_none());
    let login_text = store.read_package(0, PackageKind::Login).unwrap().unwrap();
    let login = LoginPackage::parse(&login_text).unwrap();
    assert!(login.elp2.is_none());

    // The server saw exactly L1 = scrypt(L, SNRP1) and accepts
    // LP1 = scrypt(L || P, SNRP1) as the password token.
    let server = dev.ctx.server();
    let handle = l1(USERNAME);
    assert!(server.is_activated(&handle));
    assert!(server
        .get_login_package(&handle, Some(&lp1(USERNAME, PASSWORD)), None)
        .is_ok());

    // The sync dir was initialized, synced once, and remotely activated.
    let sync = dev.ctx.sync_engine();
    assert_eq!(sync.repos().len(), 1);
    assert_eq!(sync.sync_count(), 1);
    assert_eq!(sync.last_sync_key(), Some(dev.ctx.server().sync_keys(&handle)[0].clone()));
}

#[test]
fn test_create_existing_account_fails() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    assert!(matches!(
        dev.ctx.create(USERNAME, "other"),
        Err(LoginError::AccountAlreadyExists)
    ));

    assert!(!dev.ctx.is_username_available(USERNAME).unwrap());
    assert!(dev.ctx.is_username_available("bob").unwrap());
}

#[test]
fn test_failed_create_leaves_no_slot() {
    let server = Arc::new(MemoryLoginServer::new());
    let mut dev = device(&server);

    server.set_offline(true);
    let result = dev.ctx.create(USERNAME, PASSWORD);
    assert!(matches!(result, Err(LoginError::Server { .. })));
    assert_eq!(dev.ctx.store().slot_for_username(USERNAME).unwrap(), None);

    // The same context recovers once the server is reachable.
    server.set_offline(false);
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    assert_eq!(dev.ctx.store().slot_for_username(USERNAME).unwrap(), Some(0));
}

// Sign-in

#[test]
fn test_sign_in_round_trips_master_key() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    let created = dev.ctx.sync_keys(USERNAME, PASSWORD).unwrap();

    dev.ctx.sign_out_all();
    dev.ctx.sign_in(USERNAME, PASSWORD).unwrap();
    let restored = dev.ctx.sync_keys(USERNAME, PASSWORD).unwrap();

    assert_eq!(created.master_key, restored.master_key);
    assert_eq!(created.sync_key_hex, restored.sync_key_hex);
}

#[test]
fn test_sign_in_wrong_password() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    dev.ctx.sign_out_all();

    assert!(matches!(
        dev.ctx.sign_in(USERNAME, "wrong"),
        Err(LoginError::BadPassword)
    ));
}

#[test]
fn test_sign_in_offline_uses_local_packages() {
    let server = Arc::new(MemoryLoginServer::new());
    let mut dev = device(&server);
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    dev.ctx.sign_out_all();

    server.set_offline(true);
    dev.ctx.sign_in(USERNAME, PASSWORD).unwrap();

    // The wrong password is still caught locally.
    assert!(matches!(
        dev.ctx.sign_in(USERNAME, "wrong"),
        Err(LoginError::BadPassword)
    ));
}

#[test]
fn test_sign_in_on_new_device_fetches_account() {
    let server = Arc::new(MemoryLoginServer::new());
    let mut first = device(&server);
    first.ctx.create(USERNAME, PASSWORD).unwrap();
    let original = first.ctx.sync_keys(USERNAME, PASSWORD).unwrap();

    let mut second = device(&server);
    second.ctx.sign_in(USERNAME, PASSWORD).unwrap();

    assert_eq!(
        second.ctx.store().slot_for_username(USERNAME).unwrap(),
        Some(0)
    );
    // The fetched account initialized its own sync dir.
    assert_eq!(second.ctx.sync_engine().repos().len(), 1);

    let fetched = second.ctx.sync_keys(USERNAME, PASSWORD).unwrap();
    assert_eq!(original.master_key, fetched.master_key);
}

#[test]
fn test_sign_in_on_new_device_with_unknown_user() {
    let mut dev = single_device();
    let result = dev.ctx.sign_in("nobody", PASSWORD);
    assert!(matches!(result, Err(LoginError::AccountDoesNotExist)));
    assert_eq!(dev.ctx.store().slot_for_username("nobody").unwrap(), None);
}

#[test]
fn test_sign_in_detects_password_changed_elsewhere() {
    let server = Arc::new(MemoryLoginServer::new());
    let mut laptop = device(&server);
    laptop.ctx.create(USERNAME, PASSWORD).unwrap();

    let mut phone = device(&server);
    phone.ctx.sign_in(USERNAME, PASSWORD).unwrap();

    laptop.ctx.change_password(USERNAME, Some(PASSWORD), None, "swordfish").unwrap();

    // The phone still holds packages for the old password; the server
    // refusing the old LP1 is terminal, not an offline fallback.
    assert!(matches!(
        phone.ctx.sign_in(USERNAME, PASSWORD),
        Err(LoginError::BadPassword)
    ));
    phone.ctx.sign_in(USERNAME, "swordfish").unwrap();
}

#[test]
fn test_check_credentials() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();

    dev.ctx.check_credentials(USERNAME, PASSWORD).unwrap();
    assert!(matches!(
        dev.ctx.check_credentials(USERNAME, "wrong"),
        Err(LoginError::BadPassword)
    ));
    assert!(matches!(
        dev.ctx.check_credentials("nobody", PASSWORD),
        Err(LoginError::AccountDoesNotExist)
    ));
}

// Corruption

#[test]
fn test_corrupt_sync_key_is_not_bad_password() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    dev.ctx.sign_out_all();

    // Flip one ciphertext byte of ESyncKey on disk.
    let text = dev
        .ctx
        .store()
        .read_package(0, PackageKind::Login)
        .unwrap()
        .unwrap();
    let mut login = LoginPackage::parse(&text).unwrap();
    login.esync_key.ct[0] ^= 0xFF;
    dev.ctx
        .store()
        .write_package(0, PackageKind::Login, &login.serialize().unwrap())
        .unwrap();

    let result = dev.ctx.sign_in(USERNAME, PASSWORD);
    assert!(matches!(result, Err(LoginError::Internal { .. })));
}

// Recovery

#[test]
fn test_set_recovery_and_check_answers() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    dev.ctx
        .set_recovery(USERNAME, PASSWORD, QUESTIONS, ANSWERS)
        .unwrap();

    assert!(dev.ctx.check_recovery_answers(USERNAME, ANSWERS).unwrap());
    assert!(!dev.ctx.check_recovery_answers(USERNAME, "B1\nB2").unwrap());

    // The stored questions round-trip with their trailing NUL.
    assert_eq!(
        dev.ctx.recovery_questions(USERNAME).unwrap(),
        "Q1\nQ2\0"
    );

    // The recovery envelopes were uploaded.
    let uploaded = dev
        .ctx
        .server()
        .uploaded_login_package(&l1(USERNAME))
        .unwrap();
    let uploaded = LoginPackage::parse(&uploaded).unwrap();
    assert!(uploaded.elp2.is_some());
    assert!(uploaded.elra3.is_some());
}

#[test]
fn test_check_answers_without_recovery_configured() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    assert!(matches!(
        dev.ctx.check_recovery_answers(USERNAME, ANSWERS),
        Err(LoginError::NoRecoveryQuestions)
    ));
    assert!(matches!(
        dev.ctx.recovery_questions(USERNAME),
        Err(LoginError::NoRecoveryQuestions)
    ));
}

#[test]
fn test_recovery_on_new_device() {
    let server = Arc::new(MemoryLoginServer::new());
    let mut laptop = device(&server);
    laptop.ctx.create(USERNAME, PASSWORD).unwrap();
    laptop
        .ctx
        .set_recovery(USERNAME, PASSWORD, QUESTIONS, ANSWERS)
        .unwrap();
    let original = laptop.ctx.sync_keys(USERNAME, PASSWORD).unwrap();

    // A new device fetches the questions, then proves the answers.
    let mut phone = device(&server);
    assert_eq!(
        phone.ctx.recovery_questions(USERNAME).unwrap(),
        "Q1\nQ2\0"
    );

    assert!(!phone.ctx.check_recovery_answers(USERNAME, "B1\nB2").unwrap());
    // A wrong guess keeps the pending state, so a retry still works.
    assert!(phone.ctx.check_recovery_answers(USERNAME, ANSWERS).unwrap());
    assert_eq!(phone.ctx.store().slot_for_username(USERNAME).unwrap(), Some(0));

    // Change the password knowing only the answers, then sign in with it.
    phone
        .ctx
        .change_password(USERNAME, None, Some(ANSWERS), "swordfish")
        .unwrap();
    phone.ctx.sign_out_all();
    phone.ctx.sign_in(USERNAME, "swordfish").unwrap();
    let recovered = phone.ctx.sync_keys(USERNAME, "swordfish").unwrap();
    assert_eq!(original.master_key, recovered.master_key);
}

#[test]
fn test_remote_questions_for_account_without_recovery() {
    let server = Arc::new(MemoryLoginServer::new());
    let mut laptop = device(&server);
    laptop.ctx.create(USERNAME, PASSWORD).unwrap();

    let mut phone = device(&server);
    assert_eq!(phone.ctx.recovery_questions(USERNAME).unwrap(), "");
    // No recovery token exists, so any answer is rejected.
    assert!(!phone.ctx.check_recovery_answers(USERNAME, ANSWERS).unwrap());
}

// Password change

#[test]
fn test_change_password_preserves_master_key() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    let original = dev.ctx.sync_keys(USERNAME, PASSWORD).unwrap();

    dev.ctx
        .change_password(USERNAME, Some(PASSWORD), None, "swordfish")
        .unwrap();

    dev.ctx.sign_out_all();
    dev.ctx.sign_in(USERNAME, "swordfish").unwrap();
    let changed = dev.ctx.sync_keys(USERNAME, "swordfish").unwrap();
    assert_eq!(original.master_key, changed.master_key);
    assert_eq!(original.sync_key_hex, changed.sync_key_hex);

    assert!(matches!(
        dev.ctx.sign_in(USERNAME, PASSWORD),
        Err(LoginError::BadPassword)
    ));
}

#[test]
fn test_change_password_keeps_recovery_working() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    dev.ctx
        .set_recovery(USERNAME, PASSWORD, QUESTIONS, ANSWERS)
        .unwrap();

    dev.ctx
        .change_password(USERNAME, Some(PASSWORD), None, "swordfish")
        .unwrap();

    // The answers were re-wrapped under the new LP2.
    dev.ctx.sign_out_all();
    assert!(dev.ctx.check_recovery_answers(USERNAME, ANSWERS).unwrap());
}

#[test]
fn test_change_password_with_wrong_answers() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    dev.ctx
        .set_recovery(USERNAME, PASSWORD, QUESTIONS, ANSWERS)
        .unwrap();
    dev.ctx.sign_out_all();

    let result = dev
        .ctx
        .change_password(USERNAME, None, Some("B1\nB2"), "swordfish");
    assert!(matches!(result, Err(LoginError::BadPassword)));

    // Nothing changed.
    dev.ctx.sign_in(USERNAME, PASSWORD).unwrap();
}

#[test]
fn test_change_password_notifies_wallet_layer() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    dev.ctx.set_password_change_hook(Box::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    dev.ctx
        .change_password(USERNAME, Some(PASSWORD), None, "swordfish")
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// Slot isolation

#[test]
fn test_two_accounts_are_isolated() {
    let mut dev = single_device();
    dev.ctx.create("alice", PASSWORD).unwrap();
    dev.ctx.create("bob", "letmein").unwrap();

    assert_eq!(dev.ctx.store().slot_for_username("alice").unwrap(), Some(0));
    assert_eq!(dev.ctx.store().slot_for_username("bob").unwrap(), Some(1));

    // Removing alice's slot does not perturb bob's.
    dev.ctx.store().delete_slot(0).unwrap();
    dev.ctx.sign_out_all();
    assert_eq!(dev.ctx.store().slot_for_username("alice").unwrap(), None);
    assert_eq!(dev.ctx.store().slot_for_username("bob").unwrap(), Some(1));
    dev.ctx.sign_in("bob", "letmein").unwrap();
}

// Server-facing helpers

#[test]
fn test_server_keys_and_update_login_package() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();

    let (l1_bytes, lp1_bytes) = dev.ctx.server_keys(USERNAME, PASSWORD).unwrap();
    assert_eq!(l1_bytes.as_bytes(), l1(USERNAME).as_slice());
    assert_eq!(lp1_bytes.as_bytes(), lp1(USERNAME, PASSWORD).as_slice());

    dev.ctx.update_login_package(USERNAME, PASSWORD).unwrap();
}

#[test]
fn test_sync_data_reaches_engine() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();
    let before = dev.ctx.sync_engine().sync_count();
    let dirty = dev.ctx.sync_data(USERNAME, PASSWORD).unwrap();
    assert!(!dirty);
    assert_eq!(dev.ctx.sync_engine().sync_count(), before + 1);
}

// Wallet repositories

#[test]
fn test_wallet_repo_lifecycle() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();

    let wallet_key = "aa".repeat(20);
    dev.ctx.wallet_create(USERNAME, PASSWORD, &wallet_key).unwrap();
    // Idempotent: calling again succeeds without duplicating.
    dev.ctx.wallet_create(USERNAME, PASSWORD, &wallet_key).unwrap();
    dev.ctx.wallet_activate(USERNAME, PASSWORD, &wallet_key).unwrap();
    dev.ctx.wallet_activate(USERNAME, PASSWORD, &wallet_key).unwrap();

    let keys = dev.ctx.server().sync_keys(&l1(USERNAME));
    assert_eq!(keys.iter().filter(|k| **k == wallet_key).count(), 1);

    let repo = RepoInfo {
        repo_type: "wallet:repo:bitcoin:bip32".to_string(),
        sync_key_hex: "bb".repeat(20),
    };
    dev.ctx.repos_add(USERNAME, PASSWORD, &repo).unwrap();
    dev.ctx.repos_add(USERNAME, PASSWORD, &repo).unwrap();
    assert_eq!(dev.ctx.server().repos(&l1(USERNAME)), vec![repo]);
}

// 2-factor authentication

#[test]
fn test_otp_lifecycle() {
    let mut dev = single_device();
    dev.ctx.create(USERNAME, PASSWORD).unwrap();

    dev.ctx
        .otp_enable(USERNAME, PASSWORD, "SECRET", 7 * 86400)
        .unwrap();
    let status = dev.ctx.otp_status(USERNAME, PASSWORD).unwrap();
    assert!(status.enabled);
    assert_eq!(status.timeout_secs, Some(7 * 86400));

    // A bogus reset token is rejected and must not be retried.
    assert!(matches!(
        dev.ctx.otp_reset(USERNAME, "bogus"),
        Err(LoginError::InvalidOtp { .. })
    ));

    dev.ctx.otp_reset(USERNAME, "SECRET").unwrap();
    assert_eq!(
        dev.ctx.server().otp_pending(&[l1(USERNAME)]).unwrap(),
        vec![true]
    );

    dev.ctx.otp_reset_cancel(USERNAME, PASSWORD).unwrap();
    dev.ctx.otp_disable(USERNAME, PASSWORD).unwrap();
    assert!(!dev.ctx.otp_status(USERNAME, PASSWORD).unwrap().enabled);
}
