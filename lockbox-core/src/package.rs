//! CarePackage and LoginPackage codecs.
//!
//! Both packages are small JSON documents with a fixed set of named fields.
//! The CarePackage is public (it only carries scrypt parameters and the
//! encrypted recovery questions); the LoginPackage is persisted unencrypted
//! but every sensitive field inside it is an [`EncryptedEnvelope`].

use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptedEnvelope, Snrp};
use crate::error::{LoginError, LoginResult};

/// The public per-account document: per-account scrypt parameters plus the
/// optional encrypted recovery questions.
///
/// `ERQ` is `Encrypt(RQ, L4)` and is absent until recovery is configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarePackage {
    /// Encrypted recovery questions, if any are set.
    #[serde(rename = "ERQ", default, skip_serializing_if = "Option::is_none")]
    pub erq: Option<EncryptedEnvelope>,
    /// Parameters for `LP2 = scrypt(L || P, SNRP2)`.
    #[serde(rename = "SNRP2")]
    pub snrp2: Snrp,
    /// Parameters for `LRA3 = scrypt(L || RA, SNRP3)`.
    #[serde(rename = "SNRP3")]
    pub snrp3: Snrp,
    /// Parameters for `L4 = scrypt(L, SNRP4)`.
    #[serde(rename = "SNRP4")]
    pub snrp4: Snrp,
}

/// The per-account document holding the encrypted master key, sync key,
/// and (once recovery is configured) the password/recovery cross-wraps.
///
/// The `SyncKey` wire name is historical; the field holds `ESyncKey`,
/// the sync key encrypted with `L4`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPackage {
    /// `EMK = Encrypt(MK, LP2)`.
    #[serde(rename = "EMK")]
    pub emk: EncryptedEnvelope,
    /// `ESyncKey = Encrypt(SyncKey, L4)`.
    #[serde(rename = "SyncKey")]
    pub esync_key: EncryptedEnvelope,
    /// `ELP2 = Encrypt(LP2, LRA3)`; present iff recovery is configured.
    #[serde(rename = "ELP2", default, skip_serializing_if = "Option::is_none")]
    pub elp2: Option<EncryptedEnvelope>,
    /// `ELRA3 = Encrypt(LRA3, LP2)`; present iff recovery is configured.
    #[serde(rename = "ELRA3", default, skip_serializing_if = "Option::is_none")]
    pub elra3: Option<EncryptedEnvelope>,
}

impl CarePackage {
    /// Parses a CarePackage document.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Parse`] if the text is not a JSON object or a
    /// required field is missing or mis-shaped.
    pub fn parse(text: &str) -> LoginResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LoginError::parse(format!("care package: {e}")))
    }

    /// Serializes the package to its on-disk/on-wire JSON form.
    pub fn serialize(&self) -> LoginResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl LoginPackage {
    /// Parses a LoginPackage document.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Parse`] if the text is not a JSON object or a
    /// required field is missing or mis-shaped.
    pub fn parse(text: &str) -> LoginResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| LoginError::parse(format!("login package: {e}")))
    }

    /// Serializes the package to its on-disk/on-wire JSON form.
    pub fn serialize(&self) -> LoginResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
