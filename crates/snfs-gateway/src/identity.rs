//! Identity store: user accounts, credentials and filesystem grants.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

use snfs_meta::FsNo;

use crate::catalog::FsCatalog;
use crate::credential::{Credential, CredentialHasher};
use crate::error::{SnfsError, SnfsResult};

/// Opaque user identifier (UUID v4 string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserNo(String);

impl UserNo {
    /// Allocates a fresh user number.
    pub fn generate() -> Self {
        UserNo(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserNo {
    fn from(s: &str) -> Self {
        UserNo(s.to_string())
    }
}

impl fmt::Display for UserNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Identifier
    pub userno: UserNo,
    /// Login name, unique and case-sensitive
    pub name: String,
    /// May administer users and filesystems
    pub admin: bool,
    /// Salted password digest
    pub credential: Credential,
    /// Primary, writable filesystem
    pub fs: Option<FsNo>,
    /// Additional read-only filesystems, in overlay order
    pub union: Vec<FsNo>,
}

impl UserRecord {
    /// Whether the user holds a grant on `fsno`: `Some(true)` for the
    /// primary grant, `Some(false)` for a union grant.
    pub fn grant(&self, fsno: &FsNo) -> Option<bool> {
        if self.fs.as_ref() == Some(fsno) {
            Some(true)
        } else if self.union.contains(fsno) {
            Some(false)
        } else {
            None
        }
    }

    /// Every granted fsno, primary first.
    pub fn grants(&self) -> Vec<FsNo> {
        self.fs.iter().chain(self.union.iter()).cloned().collect()
    }

    /// Caller-facing view, resolving filesystem names through `catalog`.
    pub fn info(&self, catalog: &FsCatalog) -> UserInfo {
        let access = |fsno: &FsNo, writeable: bool| {
            catalog.name_of(fsno).map(|name| FsAccess {
                name,
                fsno: fsno.clone(),
                writeable,
            })
        };
        UserInfo {
            userno: self.userno.clone(),
            name: self.name.clone(),
            admin: self.admin,
            fs: self.fs.as_ref().and_then(|f| access(f, true)),
            union: self.union.iter().filter_map(|f| access(f, false)).collect(),
        }
    }
}

/// One filesystem grant as shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsAccess {
    /// Filesystem name
    pub name: String,
    /// Filesystem identifier
    pub fsno: FsNo,
    /// True for the primary grant
    pub writeable: bool,
}

/// User account as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Identifier
    pub userno: UserNo,
    /// Login name
    pub name: String,
    /// Admin flag
    pub admin: bool,
    /// Primary grant
    pub fs: Option<FsAccess>,
    /// Read-only grants
    pub union: Vec<FsAccess>,
}

/// Fields for a new user.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseraddOptions {
    /// Login name
    pub name: String,
    /// Initial password
    pub password: String,
    /// Admin flag
    #[serde(default)]
    pub admin: bool,
    /// Primary grant
    #[serde(default)]
    pub fs: Option<FsNo>,
    /// Read-only grants
    #[serde(default)]
    pub union: Vec<FsNo>,
}

impl fmt::Debug for UseraddOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseraddOptions")
            .field("name", &self.name)
            .field("admin", &self.admin)
            .field("fs", &self.fs)
            .field("union", &self.union)
            .finish_non_exhaustive()
    }
}

/// Partial update of a user; only supplied fields change.
///
/// `fs: Some(None)` clears the primary grant. In JSON that is an explicit
/// `"fs": null`, while an absent key leaves it untouched.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsermodOptions {
    /// New login name
    pub name: Option<String>,
    /// New password
    pub password: Option<String>,
    /// New admin flag
    pub admin: Option<bool>,
    /// New primary grant
    #[serde(
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub fs: Option<Option<FsNo>>,
    /// New union grants
    pub union: Option<Vec<FsNo>>,
}

impl fmt::Debug for UsermodOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsermodOptions")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("admin", &self.admin)
            .field("fs", &self.fs)
            .field("union", &self.union)
            .finish()
    }
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Drops repeated fsnos and any union entry equal to the primary grant.
fn normalize_union(fs: Option<&FsNo>, union: Vec<FsNo>) -> Vec<FsNo> {
    let mut out: Vec<FsNo> = Vec::with_capacity(union.len());
    for fsno in union {
        if Some(&fsno) != fs && !out.contains(&fsno) {
            out.push(fsno);
        }
    }
    out
}

fn check_references<'a>(
    catalog: &FsCatalog,
    fsnos: impl IntoIterator<Item = &'a FsNo>,
) -> SnfsResult<()> {
    for fsno in fsnos {
        if !catalog.contains(fsno) {
            return Err(SnfsError::InvalidReference {
                fsno: fsno.clone(),
            });
        }
    }
    Ok(())
}

/// All user accounts of one service instance.
pub struct IdentityStore {
    users: DashMap<UserNo, UserRecord>,
    /// Serializes add/modify so name checks and updates are atomic.
    admin: Mutex<()>,
    hasher: Arc<dyn CredentialHasher>,
    /// Verified against when the login name is unknown.
    decoy: Credential,
}

impl IdentityStore {
    /// Creates an empty store using `hasher` for credentials.
    pub fn new(hasher: Arc<dyn CredentialHasher>) -> Self {
        let decoy = hasher.hash("");
        Self {
            users: DashMap::new(),
            admin: Mutex::new(()),
            hasher,
            decoy,
        }
    }

    fn name_taken(&self, name: &str, except: Option<&UserNo>) -> bool {
        self.users
            .iter()
            .any(|u| u.value().name == name && Some(u.key()) != except)
    }

    /// Creates a user. Grants must name existing filesystems.
    pub fn add(&self, opts: UseraddOptions, catalog: &FsCatalog) -> SnfsResult<UserRecord> {
        let _admin = self.admin.lock();
        if self.name_taken(&opts.name, None) {
            return Err(SnfsError::DuplicateName { name: opts.name });
        }
        check_references(catalog, opts.fs.iter().chain(opts.union.iter()))?;

        let union = normalize_union(opts.fs.as_ref(), opts.union);
        let record = UserRecord {
            userno: UserNo::generate(),
            name: opts.name,
            admin: opts.admin,
            credential: self.hasher.hash(&opts.password),
            fs: opts.fs,
            union,
        };
        self.users.insert(record.userno.clone(), record.clone());
        tracing::info!(userno = %record.userno, name = %record.name, admin = record.admin, "user created");
        Ok(record)
    }

    /// Applies a partial update.
    pub fn modify(
        &self,
        userno: &UserNo,
        opts: UsermodOptions,
        catalog: &FsCatalog,
    ) -> SnfsResult<UserRecord> {
        let _admin = self.admin.lock();
        let mut record = self.get(userno)?;
        if let Some(name) = &opts.name {
            if self.name_taken(name, Some(userno)) {
                return Err(SnfsError::DuplicateName { name: name.clone() });
            }
        }
        if let Some(Some(fsno)) = &opts.fs {
            check_references(catalog, [fsno])?;
        }
        if let Some(union) = &opts.union {
            check_references(catalog, union)?;
        }

        if let Some(name) = opts.name {
            record.name = name;
        }
        if let Some(password) = opts.password {
            record.credential = self.hasher.hash(&password);
        }
        if let Some(admin) = opts.admin {
            record.admin = admin;
        }
        if let Some(fs) = opts.fs {
            record.fs = fs;
        }
        let union = opts.union.unwrap_or_else(|| record.union.clone());
        record.union = normalize_union(record.fs.as_ref(), union);

        self.users.insert(userno.clone(), record.clone());
        tracing::info!(%userno, name = %record.name, "user modified");
        Ok(record)
    }

    /// Deletes a user and returns the removed record.
    pub fn remove(&self, userno: &UserNo) -> SnfsResult<UserRecord> {
        let _admin = self.admin.lock();
        let (_, record) = self
            .users
            .remove(userno)
            .ok_or_else(|| SnfsError::not_found(format!("user {}", userno)))?;
        tracing::info!(%userno, name = %record.name, "user deleted");
        Ok(record)
    }

    /// Every user, sorted by name.
    pub fn list(&self) -> Vec<UserRecord> {
        let mut all: Vec<UserRecord> = self.users.iter().map(|u| u.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// The user with `userno`.
    pub fn get(&self, userno: &UserNo) -> SnfsResult<UserRecord> {
        self.users
            .get(userno)
            .map(|u| u.value().clone())
            .ok_or_else(|| SnfsError::not_found(format!("user {}", userno)))
    }

    /// The user called `name`, if any.
    pub fn find_by_name(&self, name: &str) -> Option<UserRecord> {
        self.users
            .iter()
            .find(|u| u.value().name == name)
            .map(|u| u.value().clone())
    }

    /// Checks a login. Unknown names and wrong passwords are indistinguishable.
    pub fn authenticate(&self, name: &str, password: &str) -> SnfsResult<UserRecord> {
        match self.find_by_name(name) {
            Some(record) if self.hasher.verify(password, &record.credential) => Ok(record),
            Some(_) => Err(SnfsError::InvalidCredentials),
            None => {
                let _ = self.hasher.verify(password, &self.decoy);
                Err(SnfsError::InvalidCredentials)
            }
        }
    }

    /// Every fsno the user may open without admin rights.
    pub fn grants_of(&self, userno: &UserNo) -> SnfsResult<Vec<FsNo>> {
        self.get(userno).map(|u| u.grants())
    }

    /// True if any user holds a grant on `fsno`.
    pub fn references(&self, fsno: &FsNo) -> bool {
        self.users.iter().any(|u| u.value().grant(fsno).is_some())
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True when no account exists.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FsaddOptions;
    use crate::credential::Sha256Hasher;
    use crate::error::ErrorKind;
    use snfs_storage::MemoryBlobStore;

    fn setup() -> (IdentityStore, FsCatalog) {
        (
            IdentityStore::new(Arc::new(Sha256Hasher::new(4))),
            FsCatalog::new(Arc::new(MemoryBlobStore::new()), 1024),
        )
    }

    fn fs(catalog: &FsCatalog, name: &str) -> FsNo {
        catalog
            .add(FsaddOptions {
                name: name.to_string(),
                ..FsaddOptions::default()
            })
            .unwrap()
            .fsno
    }

    fn user(name: &str) -> UseraddOptions {
        UseraddOptions {
            name: name.to_string(),
            password: "pw".to_string(),
            ..UseraddOptions::default()
        }
    }

    #[test]
    fn test_add_and_authenticate() {
        let (ids, catalog) = setup();
        let rec = ids.add(user("alice"), &catalog).unwrap();
        assert!(!rec.admin);
        assert_eq!(ids.authenticate("alice", "pw").unwrap().userno, rec.userno);
        assert_eq!(
            ids.authenticate("alice", "nope").unwrap_err().kind(),
            ErrorKind::InvalidCredentials
        );
        assert_eq!(
            ids.authenticate("bob", "pw").unwrap_err().kind(),
            ErrorKind::InvalidCredentials
        );
    }

    #[test]
    fn test_duplicate_name() {
        let (ids, catalog) = setup();
        ids.add(user("alice"), &catalog).unwrap();
        assert_eq!(
            ids.add(user("alice"), &catalog).unwrap_err().kind(),
            ErrorKind::DuplicateName
        );
        assert!(ids.add(user("Alice"), &catalog).is_ok());
    }

    #[test]
    fn test_invalid_reference() {
        let (ids, catalog) = setup();
        let mut opts = user("alice");
        opts.union = vec![FsNo::from("ghost")];
        assert_eq!(
            ids.add(opts, &catalog).unwrap_err().kind(),
            ErrorKind::InvalidReference
        );
        assert!(ids.is_empty());
    }

    #[test]
    fn test_union_deduplicated() {
        let (ids, catalog) = setup();
        let home = fs(&catalog, "home");
        let a = fs(&catalog, "a");
        let b = fs(&catalog, "b");
        let mut opts = user("alice");
        opts.fs = Some(home.clone());
        opts.union = vec![a.clone(), home.clone(), b.clone(), a.clone()];
        let rec = ids.add(opts, &catalog).unwrap();
        assert_eq!(rec.union, vec![a.clone(), b.clone()]);
        assert_eq!(rec.grants(), vec![home.clone(), a, b]);
        assert_eq!(rec.grant(&home), Some(true));
    }

    #[test]
    fn test_modify_partial() {
        let (ids, catalog) = setup();
        let home = fs(&catalog, "home");
        let mut opts = user("alice");
        opts.fs = Some(home.clone());
        let rec = ids.add(opts, &catalog).unwrap();

        let updated = ids
            .modify(
                &rec.userno,
                UsermodOptions {
                    admin: Some(true),
                    ..UsermodOptions::default()
                },
                &catalog,
            )
            .unwrap();
        assert!(updated.admin);
        assert_eq!(updated.fs, Some(home));
        assert_eq!(updated.name, "alice");

        let cleared = ids
            .modify(
                &rec.userno,
                UsermodOptions {
                    fs: Some(None),
                    ..UsermodOptions::default()
                },
                &catalog,
            )
            .unwrap();
        assert_eq!(cleared.fs, None);
    }

    #[test]
    fn test_modify_password() {
        let (ids, catalog) = setup();
        let rec = ids.add(user("alice"), &catalog).unwrap();
        ids.modify(
            &rec.userno,
            UsermodOptions {
                password: Some("new".to_string()),
                ..UsermodOptions::default()
            },
            &catalog,
        )
        .unwrap();
        assert!(ids.authenticate("alice", "pw").is_err());
        assert!(ids.authenticate("alice", "new").is_ok());
    }

    #[test]
    fn test_modify_rename_collision_and_unknown_user() {
        let (ids, catalog) = setup();
        let alice = ids.add(user("alice"), &catalog).unwrap();
        ids.add(user("bob"), &catalog).unwrap();
        let rename = UsermodOptions {
            name: Some("bob".to_string()),
            ..UsermodOptions::default()
        };
        assert_eq!(
            ids.modify(&alice.userno, rename.clone(), &catalog)
                .unwrap_err()
                .kind(),
            ErrorKind::DuplicateName
        );
        assert_eq!(
            ids.modify(&UserNo::from("nobody"), rename, &catalog)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_primary_change_normalizes_union() {
        let (ids, catalog) = setup();
        let a = fs(&catalog, "a");
        let b = fs(&catalog, "b");
        let mut opts = user("alice");
        opts.union = vec![a.clone(), b.clone()];
        let rec = ids.add(opts, &catalog).unwrap();
        let updated = ids
            .modify(
                &rec.userno,
                UsermodOptions {
                    fs: Some(Some(a.clone())),
                    ..UsermodOptions::default()
                },
                &catalog,
            )
            .unwrap();
        assert_eq!(updated.fs, Some(a));
        assert_eq!(updated.union, vec![b]);
    }

    #[test]
    fn test_remove_and_references() {
        let (ids, catalog) = setup();
        let home = fs(&catalog, "home");
        let mut opts = user("alice");
        opts.union = vec![home.clone()];
        let rec = ids.add(opts, &catalog).unwrap();
        assert!(ids.references(&home));
        ids.remove(&rec.userno).unwrap();
        assert!(!ids.references(&home));
        assert_eq!(
            ids.remove(&rec.userno).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_list_sorted_and_info() {
        let (ids, catalog) = setup();
        let home = fs(&catalog, "home");
        let mut opts = user("zed");
        opts.fs = Some(home.clone());
        ids.add(opts, &catalog).unwrap();
        ids.add(user("amy"), &catalog).unwrap();
        let names: Vec<String> = ids.list().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["amy", "zed"]);

        let zed = ids.find_by_name("zed").unwrap();
        let info = zed.info(&catalog);
        assert_eq!(
            info.fs,
            Some(FsAccess {
                name: "home".to_string(),
                fsno: home,
                writeable: true,
            })
        );
        assert!(info.union.is_empty());
    }

    #[test]
    fn test_usermod_fs_null_vs_absent() {
        let absent: UsermodOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.fs, None);
        let null: UsermodOptions = serde_json::from_str(r#"{"fs": null}"#).unwrap();
        assert_eq!(null.fs, Some(None));
        let set: UsermodOptions = serde_json::from_str(r#"{"fs": "abc"}"#).unwrap();
        assert_eq!(set.fs, Some(Some(FsNo::from("abc"))));
    }

    #[test]
    fn test_options_debug_hides_password() {
        let mut opts = user("alice");
        opts.password = "hunter2".to_string();
        assert!(!format!("{:?}", opts).contains("hunter2"));
        let modopts = UsermodOptions {
            password: Some("s3cret".to_string()),
            ..UsermodOptions::default()
        };
        assert!(!format!("{:?}", modopts).contains("s3cret"));
    }
}
