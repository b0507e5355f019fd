//! Capability tokens: mint, sign, verify, attenuate.
//!
//! A token is a signed declaration of what a thread may do, derived from
//! directive permissions. Signatures are Ed25519 over the canonical JSON
//! of the token minus its signature field; the transport form is base64
//! of the signed JSON object.
//!
//! Key material lives in a per-user keychain directory. The private key
//! file is mode 0600 and both keys are generated lazily on first sign.

use crate::error::RuntimeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use kiwi_artifacts::{PermissionDecl, PermissionTag};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

/// Audience constant preventing cross-service token replay.
pub const TOKEN_AUDIENCE: &str = "kiwi-mcp";

const SIGNING_KEY_FILE: &str = "signing.key";
const VERIFYING_KEY_FILE: &str = "verifying.key";

/// A capability token.
///
/// `caps` is kept sorted so the canonical signing payload is independent
/// of declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub caps: Vec<String>,
    pub aud: String,
    pub exp: DateTime<Utc>,
    pub directive_id: String,
    pub thread_id: String,
    pub parent_id: Option<String>,
    /// Base64 Ed25519 signature; absent until signed.
    pub signature: Option<String>,
}

impl CapabilityToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.exp
    }

    /// Whether the token grants a capability id.
    pub fn has_capability(&self, cap: &str) -> bool {
        self.caps.iter().any(|c| c == cap)
    }

    /// Canonical JSON of every field except the signature. This is the
    /// exact byte sequence that gets signed and verified.
    fn signing_payload(&self) -> Result<Vec<u8>, RuntimeError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| RuntimeError::TokenEncoding(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("signature");
        }
        let canonical = kiwi_integrity::canonical_json(&value)
            .map_err(|e| RuntimeError::TokenEncoding(e.to_string()))?;
        Ok(canonical.into_bytes())
    }
}

/// Mints an unsigned token.
///
/// # Example
///
/// ```rust
/// use kiwi_runtime::{mint_token, TOKEN_AUDIENCE};
///
/// let token = mint_token(
///     vec!["fs.write".into(), "fs.read".into()],
///     "deploy_staging",
///     "thread-1",
///     None,
///     1,
/// );
/// assert_eq!(token.aud, TOKEN_AUDIENCE);
/// assert_eq!(token.caps, vec!["fs.read", "fs.write"]); // sorted
/// assert!(token.signature.is_none());
/// ```
pub fn mint_token(
    caps: Vec<String>,
    directive_id: &str,
    thread_id: &str,
    parent_id: Option<String>,
    exp_hours: i64,
) -> CapabilityToken {
    let caps: BTreeSet<String> = caps.into_iter().collect();
    CapabilityToken {
        caps: caps.into_iter().collect(),
        aud: TOKEN_AUDIENCE.to_string(),
        exp: Utc::now() + Duration::hours(exp_hours),
        directive_id: directive_id.to_string(),
        thread_id: thread_id.to_string(),
        parent_id,
        signature: None,
    }
}

/// Attenuates a parent token for a child thread.
///
/// The child receives the intersection of the parent's capabilities and
/// what it declares, so a child can never gain a capability its parent
/// lacks. Audience and expiry carry over; `parent_id` records the
/// parent's directive.
pub fn attenuate_token(parent: &CapabilityToken, declared: &[String]) -> CapabilityToken {
    let parent_caps: BTreeSet<&str> = parent.caps.iter().map(String::as_str).collect();
    let attenuated: BTreeSet<String> = declared
        .iter()
        .filter(|cap| parent_caps.contains(cap.as_str()))
        .cloned()
        .collect();

    CapabilityToken {
        caps: attenuated.into_iter().collect(),
        aud: parent.aud.clone(),
        exp: parent.exp,
        directive_id: "<child>".to_string(),
        thread_id: "<child>".to_string(),
        parent_id: Some(parent.directive_id.clone()),
        signature: None,
    }
}

/// Maps directive `<permission>` declarations to capability ids.
///
/// | Declaration | Capability |
/// |-------------|-----------|
/// | `<read …/>` | `fs.read` |
/// | `<write …/>` | `fs.write` |
/// | `<execute resource="tool" id="X"/>` | `tool.X` |
/// | `<execute resource="spawn" action="thread"/>` | `spawn.thread` |
/// | `<execute resource="registry" action="write"/>` | `registry.write` |
/// | `<execute resource="kiwi-mcp" action="A"/>` | `kiwi-mcp.A` |
pub fn permissions_to_caps(permissions: &[PermissionDecl]) -> Vec<String> {
    let mut caps = BTreeSet::new();

    for perm in permissions {
        match perm.tag {
            PermissionTag::Read => {
                caps.insert("fs.read".to_string());
            }
            PermissionTag::Write => {
                caps.insert("fs.write".to_string());
            }
            PermissionTag::Execute => {
                let resource = perm.attr("resource").unwrap_or_default();
                let action = perm.attr("action").unwrap_or_default();
                match (resource, action) {
                    ("tool", _) => {
                        if let Some(id) = perm.attr("id") {
                            caps.insert(format!("tool.{id}"));
                        }
                    }
                    ("spawn", "thread") => {
                        caps.insert("spawn.thread".to_string());
                    }
                    ("registry", "write") => {
                        caps.insert("registry.write".to_string());
                    }
                    ("kiwi-mcp", "execute" | "read" | "write") => {
                        caps.insert(format!("kiwi-mcp.{action}"));
                    }
                    _ => {}
                }
            }
        }
    }

    caps.into_iter().collect()
}

/// Ed25519 token signer backed by a keychain directory.
///
/// Keys are loaded once per process and generated on first use if the
/// keychain is empty.
pub struct TokenSigner {
    key_dir: PathBuf,
    signing: Mutex<Option<SigningKey>>,
}

impl TokenSigner {
    /// `key_dir` is typically `{user_space}/keys`.
    pub fn new(key_dir: PathBuf) -> Self {
        Self {
            key_dir,
            signing: Mutex::new(None),
        }
    }

    /// Signs a token and returns the transport string: base64 of the
    /// token JSON carrying the signature.
    pub fn sign_token(&self, token: &CapabilityToken) -> Result<String, RuntimeError> {
        let payload = token.signing_payload()?;
        let key = self.load_or_generate()?;
        let signature: Signature = key.sign(&payload);

        let mut signed = token.clone();
        signed.signature = Some(BASE64.encode(signature.to_bytes()));

        let json = serde_json::to_string(&signed)
            .map_err(|e| RuntimeError::TokenEncoding(e.to_string()))?;
        Ok(BASE64.encode(json.as_bytes()))
    }

    /// Verifies a transport string.
    ///
    /// Returns `None` on any failure: malformed encoding, bad signature,
    /// or an expired token. Callers get no detail by design; a rejected
    /// token is a rejected token.
    pub fn verify_token(&self, token_str: &str) -> Option<CapabilityToken> {
        let json = BASE64.decode(token_str).ok()?;
        let token: CapabilityToken = serde_json::from_slice(&json).ok()?;

        let signature_b64 = token.signature.as_deref()?;
        let signature_bytes = BASE64.decode(signature_b64).ok()?;
        let signature = Signature::from_slice(&signature_bytes).ok()?;

        let payload = token.signing_payload().ok()?;
        let verifying = self.verifying_key().ok()?;
        verifying.verify(&payload, &signature).ok()?;

        if token.is_expired() {
            debug!(thread_id = %token.thread_id, "token expired");
            return None;
        }
        Some(token)
    }

    fn load_or_generate(&self) -> Result<SigningKey, RuntimeError> {
        let mut guard = self.signing.lock();
        if let Some(key) = guard.as_ref() {
            return Ok(key.clone());
        }

        let path = self.key_dir.join(SIGNING_KEY_FILE);
        let key = if path.is_file() {
            let bytes = std::fs::read(&path)?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| RuntimeError::Keychain("signing key is not 32 bytes".into()))?;
            SigningKey::from_bytes(&bytes)
        } else {
            self.generate_keys()?
        };

        *guard = Some(key.clone());
        Ok(key)
    }

    fn generate_keys(&self) -> Result<SigningKey, RuntimeError> {
        std::fs::create_dir_all(&self.key_dir)?;
        let key = SigningKey::generate(&mut rand::rngs::OsRng);

        let private_path = self.key_dir.join(SIGNING_KEY_FILE);
        std::fs::write(&private_path, key.to_bytes())?;
        set_private_mode(&private_path)?;

        std::fs::write(
            self.key_dir.join(VERIFYING_KEY_FILE),
            key.verifying_key().to_bytes(),
        )?;
        debug!(dir = %self.key_dir.display(), "generated keychain");
        Ok(key)
    }

    fn verifying_key(&self) -> Result<VerifyingKey, RuntimeError> {
        let path = self.key_dir.join(VERIFYING_KEY_FILE);
        if !path.is_file() {
            // Lazy init covers verify-before-first-sign.
            self.load_or_generate()?;
        }
        let bytes = std::fs::read(&path)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RuntimeError::Keychain("verifying key is not 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| RuntimeError::Keychain(format!("invalid verifying key: {e}")))
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key_dir", &self.key_dir)
            .finish()
    }
}

#[cfg(unix)]
fn set_private_mode(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_private_mode(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn signer() -> (TempDir, TokenSigner) {
        let dir = TempDir::new().unwrap();
        let signer = TokenSigner::new(dir.path().join("keys"));
        (dir, signer)
    }

    fn decl(tag: PermissionTag, attrs: &[(&str, &str)]) -> PermissionDecl {
        PermissionDecl {
            tag,
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_mint_sorts_and_dedupes_caps() {
        let token = mint_token(
            vec!["tool.bash".into(), "fs.read".into(), "fs.read".into()],
            "d",
            "t",
            None,
            1,
        );
        assert_eq!(token.caps, vec!["fs.read", "tool.bash"]);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let (_dir, signer) = signer();
        let token = mint_token(vec!["fs.read".into()], "deploy", "thread-1", None, 1);

        let transport = signer.sign_token(&token).unwrap();
        let verified = signer.verify_token(&transport).unwrap();

        assert_eq!(verified.caps, token.caps);
        assert_eq!(verified.directive_id, "deploy");
        assert!(verified.signature.is_some());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let (_dir, signer) = signer();
        let token = mint_token(vec!["fs.read".into()], "d", "t", None, 1);
        let transport = signer.sign_token(&token).unwrap();

        // Grant ourselves fs.write inside the encoded payload.
        let json = BASE64.decode(&transport).unwrap();
        let tampered = String::from_utf8(json).unwrap().replace("fs.read", "fs.write");
        let tampered_transport = BASE64.encode(tampered.as_bytes());

        assert!(signer.verify_token(&tampered_transport).is_none());
    }

    #[test]
    fn test_malformed_transport_rejected() {
        let (_dir, signer) = signer();
        assert!(signer.verify_token("not base64 at all!!").is_none());
        assert!(signer.verify_token(&BASE64.encode(b"{\"not\": \"a token\"}")).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let (_dir, signer) = signer();
        let mut token = mint_token(vec!["fs.read".into()], "d", "t", None, 1);
        token.exp = Utc::now() - Duration::hours(1);

        let transport = signer.sign_token(&token).unwrap();
        assert!(signer.verify_token(&transport).is_none());
    }

    #[test]
    fn test_keychain_created_lazily_with_private_mode() {
        let (dir, signer) = signer();
        let key_path = dir.path().join("keys").join(SIGNING_KEY_FILE);
        assert!(!key_path.exists());

        let token = mint_token(vec![], "d", "t", None, 1);
        signer.sign_token(&token).unwrap();
        assert!(key_path.is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_attenuation_is_intersection() {
        let parent = mint_token(
            vec!["fs.read".into(), "fs.write".into(), "spawn.thread".into()],
            "parent_directive",
            "thread-1",
            None,
            1,
        );
        let child = attenuate_token(&parent, &["fs.write".into(), "tool.bash".into()]);

        assert_eq!(child.caps, vec!["fs.write"]);
        assert_eq!(child.parent_id.as_deref(), Some("parent_directive"));
        assert_eq!(child.aud, parent.aud);
        assert_eq!(child.exp, parent.exp);
    }

    #[test]
    fn test_attenuation_subset_invariant() {
        let parent = mint_token(
            vec!["a".into(), "b".into(), "c".into()],
            "p",
            "t",
            None,
            1,
        );
        // Declared order must not matter (set semantics).
        let child1 = attenuate_token(&parent, &["c".into(), "a".into(), "z".into()]);
        let child2 = attenuate_token(&parent, &["z".into(), "a".into(), "c".into()]);
        assert_eq!(child1.caps, child2.caps);

        for cap in &child1.caps {
            assert!(parent.has_capability(cap));
        }
    }

    #[test]
    fn test_permissions_to_caps_mapping() {
        let perms = vec![
            decl(PermissionTag::Read, &[("resource", "filesystem")]),
            decl(PermissionTag::Write, &[("resource", "filesystem")]),
            decl(PermissionTag::Execute, &[("resource", "tool"), ("id", "bash")]),
            decl(
                PermissionTag::Execute,
                &[("resource", "spawn"), ("action", "thread")],
            ),
            decl(
                PermissionTag::Execute,
                &[("resource", "registry"), ("action", "write")],
            ),
            decl(
                PermissionTag::Execute,
                &[("resource", "kiwi-mcp"), ("action", "execute")],
            ),
        ];

        let caps = permissions_to_caps(&perms);
        assert_eq!(
            caps,
            vec![
                "fs.read",
                "fs.write",
                "kiwi-mcp.execute",
                "registry.write",
                "spawn.thread",
                "tool.bash",
            ]
        );
    }

    #[test]
    fn test_unknown_execute_resources_ignored() {
        let perms = vec![decl(
            PermissionTag::Execute,
            &[("resource", "martian"), ("action", "land")],
        )];
        assert!(permissions_to_caps(&perms).is_empty());
    }
}
