//! Access control lists attached to nodes.

use std::fmt;
use std::ops::BitOr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::Serialize;
use sha1::Digest;
use sha1::Sha1;
use tracing::info;

use crate::error::KeeperError;

/// Permission bitmask of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(u32);

impl Permission {
    /// Read data and list children.
    pub const READ: Permission = Permission(1);
    /// Set data.
    pub const WRITE: Permission = Permission(2);
    /// Create children.
    pub const CREATE: Permission = Permission(4);
    /// Delete children.
    pub const DELETE: Permission = Permission(8);
    /// Set permissions.
    pub const ADMIN: Permission = Permission(16);
    /// Every permission.
    pub const ALL: Permission = Permission(31);

    /// Build a mask from raw bits; unknown bits are dropped.
    pub fn from_bits(bits: u32) -> Self {
        Permission(bits & Self::ALL.0)
    }

    /// Raw bits of the mask.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    pub fn contains(&self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

/// Identity scheme of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// `user:base64(sha1(user:password))`.
    Digest,
    /// Client address or CIDR.
    Ip,
    /// Whatever identities the creating session authenticated with.
    Auth,
    /// Everyone (`anyone`).
    World,
}

impl Scheme {
    /// Scheme name as understood by the service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Digest => "digest",
            Scheme::Ip => "ip",
            Scheme::Auth => "auth",
            Scheme::World => "world",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity an ACL entry grants permissions to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
    /// Identity scheme.
    pub scheme: Scheme,
    /// Scheme-specific identity string.
    pub id: String,
}

impl Id {
    /// Build an identity, normalizing the id for its scheme.
    ///
    /// Digest ids are given as `user:password` and stored hashed. World ids are
    /// always `anyone` and auth ids are always empty.
    pub fn new(scheme: Scheme, id: &str) -> Result<Self, KeeperError> {
        let id = match scheme {
            Scheme::Digest => {
                let (user, password) = id.split_once(':').ok_or_else(|| KeeperError::InvalidArgument {
                    reason: "digest credentials must be 'user:password'".to_string(),
                })?;
                Self::digest(user, password)
            }
            Scheme::World => {
                if !id.is_empty() && id != "anyone" {
                    info!(id, scheme = %scheme, "ignoring provided id");
                }
                "anyone".to_string()
            }
            Scheme::Auth => {
                if !id.is_empty() {
                    info!(id, scheme = %scheme, "ignoring provided id");
                }
                String::new()
            }
            Scheme::Ip => id.to_string(),
        };
        Ok(Self { scheme, id })
    }

    /// The `world:anyone` identity.
    pub fn anyone() -> Self {
        Self {
            scheme: Scheme::World,
            id: "anyone".to_string(),
        }
    }

    /// The identities the creating session authenticated with.
    pub fn authenticated() -> Self {
        Self {
            scheme: Scheme::Auth,
            id: String::new(),
        }
    }

    /// Encode credentials the way the service stores digest identities.
    pub fn digest(user: &str, password: &str) -> String {
        let hash = Sha1::digest(format!("{user}:{password}").as_bytes());
        format!("{user}:{}", STANDARD.encode(hash))
    }
}

/// One entry of an access control list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    /// Granted permissions.
    pub perms: Permission,
    /// Identity receiving them.
    pub id: Id,
}

impl Acl {
    /// Create an ACL entry.
    pub fn new(perms: Permission, id: Id) -> Self {
        Self { perms, id }
    }

    /// Every permission for everyone. Completely unsafe.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(Permission::ALL, Id::anyone())]
    }

    /// Every permission for the creator. The session must authenticate first.
    pub fn creator_all() -> Vec<Acl> {
        vec![Acl::new(Permission::ALL, Id::authenticated())]
    }

    /// Read access for everyone.
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::new(Permission::READ, Id::anyone())]
    }
}
