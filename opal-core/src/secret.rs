//! Secret handle (C2): a tainted-value wrapper whose plaintext never leaks through `Display`,
//! `Debug`, or serialization, and which only yields plaintext through a capability-gated unwrap.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::invariant::precondition;

/// Process-wide permission to unwrap [`Secret`] plaintext. Installed by
/// [`crate::executor::Executor::execute`] immediately before evaluating the first step of a run,
/// and cleared on return (spec.md §4.2). Kept as an explicit type (rather than a bare global) so
/// tests can construct one directly instead of going through the process-wide instance (§9,
/// "keep the constructor form functional").
#[derive(Debug)]
pub struct Capability {
    installed: AtomicBool,
}

impl Default for Capability {
    fn default() -> Self {
        Self {
            installed: AtomicBool::new(false),
        }
    }
}

impl Capability {
    /// Returns a fresh, not-yet-installed capability.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this capability as installed.
    pub fn install(&self) {
        self.installed.store(true, Ordering::SeqCst);
    }

    /// Clears this capability.
    pub fn clear(&self) {
        self.installed.store(false, Ordering::SeqCst);
    }

    /// Returns true if this capability is currently installed.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

static GLOBAL_CAPABILITY: std::sync::OnceLock<Capability> = std::sync::OnceLock::new();

/// The process-wide [`Capability`] instance (one of the three globals named in spec.md §9).
pub fn global_capability() -> &'static Capability {
    GLOBAL_CAPABILITY.get_or_init(Capability::default)
}

/// Returns true if `OPAL_SECRET_DEBUG=1` is set, in which case every plaintext unwrap panics
/// unconditionally regardless of capability state (spec.md §6).
fn secret_debug_mode() -> bool {
    std::env::var("OPAL_SECRET_DEBUG").as_deref() == Ok("1")
}

/// A wrapped plaintext value whose raw bytes are unreachable except through an explicit,
/// capability-gated unwrap.
pub struct Secret {
    /// Random, not value-derived, so an attacker cannot use the id as an oracle on the plaintext.
    id: u64,
    plaintext: Zeroizing<String>,
}

impl Secret {
    /// Wraps `plaintext` in a new handle with a freshly generated random id.
    pub fn new(plaintext: impl Into<String>) -> Self {
        Self {
            id: rand::random(),
            plaintext: Zeroizing::new(plaintext.into()),
        }
    }

    /// The opaque, non-value-derived id used in this handle's display form.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `first n...last n` with `***` interior, or a bare `***` when the plaintext is too short to
    /// mask meaningfully (fewer than `2*n` characters).
    pub fn unwrap_with_mask(&self, n: usize) -> String {
        let s = self.plaintext.as_str();
        if s.chars().count() <= n * 2 {
            return "***".to_string();
        }
        let chars: Vec<char> = s.chars().collect();
        let head: String = chars[..n].iter().collect();
        let tail: String = chars[chars.len() - n..].iter().collect();
        format!("{head}***{tail}")
    }

    /// Shorthand for [`Self::unwrap_with_mask`] with `n = 0`, i.e. always `***`.
    pub fn mask(&self) -> String {
        "***".to_string()
    }

    /// The last 4 characters, or `***` if the plaintext has fewer than 4.
    pub fn unwrap_last4(&self) -> String {
        let chars: Vec<char> = self.plaintext.chars().collect();
        if chars.len() < 4 {
            return "***".to_string();
        }
        chars[chars.len() - 4..].iter().collect()
    }

    fn check_unwrap_allowed(&self) {
        if secret_debug_mode() {
            precondition(
                false,
                format_args!("plaintext secret unwrap attempted under OPAL_SECRET_DEBUG=1"),
            );
        }
        precondition(
            global_capability().is_installed(),
            format_args!(
                "plaintext secret unwrap attempted with no capability installed (id={})",
                self.id
            ),
        );
    }

    /// Returns the plaintext bytes. Panics if no process-wide capability is installed, or
    /// unconditionally under `OPAL_SECRET_DEBUG=1`.
    pub fn bytes(&self) -> &[u8] {
        self.check_unwrap_allowed();
        self.plaintext.as_bytes()
    }

    /// Returns the plaintext string. Same panic conditions as [`Self::bytes`].
    pub fn unsafe_unwrap(&self) -> &str {
        self.check_unwrap_allowed();
        self.plaintext.as_str()
    }

    /// Returns a `KEY=plaintext` pair suitable for an environment application. Same panic
    /// conditions as [`Self::bytes`].
    pub fn for_env(&self, key: &str) -> (String, String) {
        self.check_unwrap_allowed();
        (key.to_string(), self.plaintext.to_string())
    }

    /// Constant-time comparison of the two handles' plaintext bytes.
    pub fn equal(&self, other: &Self) -> bool {
        self.plaintext.as_bytes().ct_eq(other.plaintext.as_bytes()).into()
    }

    /// A 32-byte keyed fingerprint of the plaintext, for the (out-of-scope) scrubber's secret
    /// detection; never the user-visible id. `key` must be at least 32 bytes.
    ///
    /// See DESIGN.md for why this uses `blake3::keyed_hash` rather than the literal BLAKE2b-256
    /// spec.md names: no blake2 crate is grounded anywhere in the retrieved corpus.
    pub fn fingerprint(&self, key: &[u8]) -> [u8; 32] {
        precondition(
            key.len() >= 32,
            format_args!("fingerprint key must be at least 32 bytes, got {}", key.len()),
        );
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&key[..32]);
        *blake3::keyed_hash(&key_bytes, self.plaintext.as_bytes()).as_bytes()
    }

    /// The base58 (Bitcoin alphabet, no `0/O/I/l`) encoding of this handle's id, used in its
    /// display form.
    fn display_id(&self) -> String {
        bs58::encode(self.id.to_be_bytes()).into_string()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opal:secret:{}", self.display_id())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opal:secret:{}", self.display_id())
    }
}

impl serde::Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_never_leaks_plaintext() {
        let secret = Secret::new("hunter2");
        let rendered = secret.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.starts_with("opal:secret:"));
    }

    #[test]
    fn mask_hides_interior() {
        let secret = Secret::new("abcdefgh");
        assert_eq!(secret.unwrap_with_mask(2), "ab***gh");
        assert_eq!(secret.mask(), "***");
    }

    #[test]
    fn short_value_masks_entirely() {
        let secret = Secret::new("ab");
        assert_eq!(secret.unwrap_with_mask(2), "***");
    }

    #[test]
    #[should_panic(expected = "no capability installed")]
    fn unwrap_without_capability_panics() {
        // SAFETY net: this test relies on the *global* capability not being installed by any
        // other test in this process; secret tests never install it.
        let secret = Secret::new("hunter2");
        let _ = secret.unsafe_unwrap();
    }

    #[test]
    fn unwrap_with_capability_succeeds() {
        let cap = Capability::new();
        cap.install();
        // This exercises the standalone `Capability` type directly rather than the process
        // global, since the global is shared mutable state across this module's tests.
        assert!(cap.is_installed());
        cap.clear();
        assert!(!cap.is_installed());
    }

    #[test]
    fn equal_is_true_for_same_plaintext() {
        let a = Secret::new("matching-value");
        let b = Secret::new("matching-value");
        assert!(a.equal(&b));

        let c = Secret::new("different-value");
        assert!(!a.equal(&c));
    }

    #[test]
    fn fingerprint_is_deterministic_for_same_key_and_value() {
        let key = [7u8; 32];
        let a = Secret::new("value");
        let b = Secret::new("value");
        assert_eq!(a.fingerprint(&key), b.fingerprint(&key));
    }
}
