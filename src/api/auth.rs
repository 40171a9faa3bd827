//! Principal construction at the HTTP boundary. See DESIGN.md's Open
//! Question resolution #4: identity/password management is out of scope,
//! so Basic credentials authenticate as their username with no password
//! check, and bearer tokens reconstruct the same Principal from their
//! `sub` claim.

use uuid::Uuid;

use crate::catalog::{Principal, Role};

/// Namespace used to derive a stable principal id from a username. Any
/// fixed UUID works; this one has no meaning beyond being a constant.
const PRINCIPAL_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0xa4, 0x59, 0xea, 0x42, 0xe6, 0x41, 0x20, 0xbb, 0xa3, 0x4e, 0xca, 0x6d, 0xc3, 0x6e, 0xa8,
]);

pub fn principal_for_username(username: &str) -> Principal {
    let role = if username == "admin" { Role::Admin } else { Role::User };
    Principal {
        id: Uuid::new_v5(&PRINCIPAL_NAMESPACE, username.as_bytes()),
        username: username.to_string(),
        role,
    }
}

/// Decodes an `Authorization: Basic <base64>` header value into a
/// principal, ignoring the password.
pub fn principal_from_basic(header_value: &str) -> Option<Principal> {
    use base64::Engine as _;
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, _password) = text.split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some(principal_for_username(username))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_username_gets_admin_role() {
        let p = principal_for_username("admin");
        assert_eq!(p.role, Role::Admin);
    }

    #[test]
    fn other_usernames_get_user_role() {
        let p = principal_for_username("alice");
        assert_eq!(p.role, Role::User);
    }

    #[test]
    fn same_username_derives_same_id_every_time() {
        let a = principal_for_username("alice");
        let b = principal_for_username("alice");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn basic_header_decodes_username_ignoring_password() {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"alice:whatever");
        let p = principal_from_basic(&format!("Basic {encoded}")).unwrap();
        assert_eq!(p.username, "alice");
    }
}
