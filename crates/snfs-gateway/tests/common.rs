//! Common fixtures for service-level tests.

#![allow(dead_code)]

use snfs_gateway::{
    BootstrapAdmin, FsInfo, FsLimits, FsNo, FsaddOptions, Session, Snfs, SnfsConfig, UserInfo,
    UseraddOptions,
};

pub const ADMIN: &str = "root";
pub const ADMIN_PASSWORD: &str = "rootpw";

/// A service with a bootstrap admin and cheap hashing.
pub fn service() -> Snfs {
    service_with(SnfsConfig::default())
}

pub fn service_with(config: SnfsConfig) -> Snfs {
    Snfs::new(SnfsConfig {
        hash_iterations: 2,
        chunk_size: 16,
        bootstrap_admin: Some(BootstrapAdmin {
            name: ADMIN.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        }),
        ..config
    })
    .unwrap()
}

pub fn admin(snfs: &Snfs) -> Session {
    snfs.login(ADMIN, ADMIN_PASSWORD).unwrap()
}

pub fn add_fs(admin: &Session, name: &str, limits: FsLimits) -> FsInfo {
    admin
        .fsadd(FsaddOptions {
            name: name.to_string(),
            limits,
        })
        .unwrap()
}

pub fn add_user(admin: &Session, name: &str, fs: Option<&FsNo>, union: &[&FsNo]) -> UserInfo {
    admin
        .useradd(UseraddOptions {
            name: name.to_string(),
            password: format!("{}-pw", name),
            admin: false,
            fs: fs.cloned(),
            union: union.iter().map(|f| (*f).clone()).collect(),
        })
        .unwrap()
}

pub fn login(snfs: &Snfs, name: &str) -> Session {
    snfs.login(name, &format!("{}-pw", name)).unwrap()
}
