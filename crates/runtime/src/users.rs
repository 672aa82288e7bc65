//! Account database lookups.

use std::path::PathBuf;

use nix::unistd::{Uid, User};

/// A resolved local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
	pub name: String,
	pub uid: u32,
	pub home: PathBuf,
}

impl From<User> for UserRecord {
	fn from(user: User) -> Self {
		Self {
			name: user.name,
			uid: user.uid.as_raw(),
			home: user.dir,
		}
	}
}

/// Looks up an account by login name.
pub fn lookup_user(name: &str) -> Option<UserRecord> {
	if name.is_empty() || name.contains('\0') {
		return None;
	}
	User::from_name(name).ok().flatten().map(UserRecord::from)
}

/// Looks up the account of the calling process's real uid.
pub fn current_user() -> Option<UserRecord> {
	lookup_uid(nix::unistd::getuid().as_raw())
}

/// Looks up an account by numeric uid.
pub fn lookup_uid(uid: u32) -> Option<UserRecord> {
	User::from_uid(Uid::from_raw(uid)).ok().flatten().map(UserRecord::from)
}
