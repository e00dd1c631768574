//! Name decomposition: maps a dotted name onto its controlling basename
//!
//! A name such as `a.b.c.raffy.chonk.eth` is matched against the registry by suffix,
//! longest suffix first, so a registered `chonk.eth` wins over a registered `eth`:
//!
//! ```text
//! a.b.c . raffy . chonk.eth
//! ^^^^^   ^^^^^   ^^^^^^^^^ basename (controller from registry)
//! |       token label -> token = keccak256("raffy")
//! token fragment
//! ```
//!
//! The owned fragment is everything left of the basename (`a.b.c.raffy`), used when the
//! basename owns its namespace directly.

use std::collections::HashMap;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::keys::labelhash;
use crate::{Error, Result};

/// Maximum length of a single DNS wire-format label
pub const MAX_LABEL_LEN: usize = 255;

/// One registry entry: a basename and the account that controls records under it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basename {
    pub name: String,
    pub controller: Address,
}

/// Basename → controller lookup used to anchor resolution
#[derive(Debug, Clone, Default)]
pub struct BasenameRegistry {
    controllers: HashMap<String, Address>,
}

impl BasenameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a basename
    pub fn insert(&mut self, name: impl Into<String>, controller: Address) {
        self.controllers.insert(name.into(), controller);
    }

    pub fn get(&self, name: &str) -> Option<Address> {
        self.controllers.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Split `name` into basename and remainder.
    ///
    /// Fails with [`Error::NoBasenameMatch`] when no suffix of the name is registered.
    pub fn decompose(&self, name: &str) -> Result<Decomposition> {
        let labels = split_labels(name)?;

        for drop in (1..=labels.len()).rev() {
            let split = labels.len() - drop;
            let suffix = labels[split..].join(".");

            let Some(controller) = self.get(&suffix) else {
                continue;
            };

            let token = (split > 0).then(|| Token::new(labels[split - 1], &labels[..split - 1]));
            let decomposition = Decomposition {
                basename: suffix,
                controller,
                owned_fragment: labels[..split].join("."),
                token,
            };

            tracing::debug!(
                name,
                basename = %decomposition.basename,
                controller = %controller,
                fragment = %decomposition.owned_fragment,
                tokenized = decomposition.token.is_some(),
                "Matched basename"
            );

            return Ok(decomposition);
        }

        Err(Error::NoBasenameMatch(name.to_string()))
    }
}

impl FromIterator<Basename> for BasenameRegistry {
    fn from_iter<I: IntoIterator<Item = Basename>>(iter: I) -> Self {
        let mut registry = Self::new();
        for entry in iter {
            registry.insert(entry.name, entry.controller);
        }
        registry
    }
}

/// The label directly left of the basename, and what lies further left
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// keccak256 of the label
    pub id: B256,
    pub label: String,
    pub fragment: String,
}

impl Token {
    fn new(label: &str, fragment_labels: &[&str]) -> Self {
        Self {
            id: labelhash(label),
            label: label.to_string(),
            fragment: fragment_labels.join("."),
        }
    }
}

/// Result of matching a name against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    pub basename: String,
    pub controller: Address,
    /// Labels left of the basename, empty when the name is the basename
    pub owned_fragment: String,
    /// Present iff at least one label lies left of the basename
    pub token: Option<Token>,
}

fn split_labels(name: &str) -> Result<Vec<&str>> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "empty name",
        });
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.iter().any(|label| label.is_empty()) {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "empty label",
        });
    }

    Ok(labels)
}

/// DNS wire-format encoding of a dotted name (`resolve(bytes name, ...)`)
pub fn dns_encode(name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(name.len() + 2);
    if !name.is_empty() {
        for label in split_labels(name)? {
            if label.len() > MAX_LABEL_LEN {
                return Err(Error::InvalidName {
                    name: name.to_string(),
                    reason: "label too long",
                });
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    Ok(out)
}

/// Inverse of [`dns_encode`]
pub fn dns_decode(data: &[u8]) -> Result<String> {
    let invalid = |reason| Error::InvalidName {
        name: hex::encode(data),
        reason,
    };

    let mut labels = Vec::new();
    let mut pos = 0usize;
    loop {
        let len = *data.get(pos).ok_or_else(|| invalid("missing terminator"))? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        let label = data
            .get(pos..pos + len)
            .ok_or_else(|| invalid("truncated label"))?;
        let label = std::str::from_utf8(label).map_err(|_| invalid("label is not utf-8"))?;
        labels.push(label);
        pos += len;
    }

    if pos != data.len() {
        return Err(invalid("trailing bytes"));
    }

    Ok(labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_registry() -> BasenameRegistry {
        let mut registry = BasenameRegistry::new();
        registry.insert("raffy.eth", Address::repeat_byte(0x11));
        registry.insert("chonk.eth", Address::repeat_byte(0x22));
        registry.insert("a.b.c", Address::repeat_byte(0x33));
        registry.insert("b.c", Address::repeat_byte(0x44));
        registry
    }

    #[test]
    fn test_longest_suffix_wins() {
        let registry = create_test_registry();
        let d = registry.decompose("x.a.b.c").unwrap();

        assert_eq!(d.basename, "a.b.c");
        assert_eq!(d.controller, Address::repeat_byte(0x33));
        assert_eq!(d.owned_fragment, "x");

        let d = registry.decompose("y.b.c").unwrap();
        assert_eq!(d.basename, "b.c");
    }

    #[test]
    fn test_registration_order_irrelevant() {
        let forward: BasenameRegistry = [
            Basename {
                name: "b.c".into(),
                controller: Address::repeat_byte(1),
            },
            Basename {
                name: "a.b.c".into(),
                controller: Address::repeat_byte(2),
            },
        ]
        .into_iter()
        .collect();
        let backward: BasenameRegistry = [
            Basename {
                name: "a.b.c".into(),
                controller: Address::repeat_byte(2),
            },
            Basename {
                name: "b.c".into(),
                controller: Address::repeat_byte(1),
            },
        ]
        .into_iter()
        .collect();

        assert_eq!(
            forward.decompose("x.a.b.c").unwrap(),
            backward.decompose("x.a.b.c").unwrap()
        );
    }

    #[test]
    fn test_basename_itself() {
        let registry = create_test_registry();
        let d = registry.decompose("raffy.eth").unwrap();

        assert_eq!(d.basename, "raffy.eth");
        assert_eq!(d.owned_fragment, "");
        assert!(d.token.is_none());
    }

    #[test]
    fn test_token_split() {
        let registry = create_test_registry();
        let d = registry.decompose("a.b.c.raffy.chonk.eth").unwrap();

        assert_eq!(d.basename, "chonk.eth");
        assert_eq!(d.owned_fragment, "a.b.c.raffy");

        let token = d.token.unwrap();
        assert_eq!(token.label, "raffy");
        assert_eq!(token.fragment, "a.b.c");
        assert_eq!(token.id, labelhash("raffy"));
    }

    #[test]
    fn test_single_remainder_label() {
        let registry = create_test_registry();
        let d = registry.decompose("raffy.chonk.eth").unwrap();

        let token = d.token.unwrap();
        assert_eq!(token.label, "raffy");
        assert_eq!(token.fragment, "");
        assert_eq!(d.owned_fragment, "raffy");
    }

    #[test]
    fn test_no_basename() {
        let registry = create_test_registry();
        let err = registry.decompose("vitalik.eth").unwrap_err();
        assert!(matches!(err, Error::NoBasenameMatch(name) if name == "vitalik.eth"));
    }

    #[test]
    fn test_empty_labels_rejected() {
        let registry = create_test_registry();
        assert!(matches!(registry.decompose(""), Err(Error::InvalidName { .. })));
        assert!(matches!(registry.decompose("a..raffy.eth"), Err(Error::InvalidName { .. })));
        assert!(matches!(registry.decompose(".raffy.eth"), Err(Error::InvalidName { .. })));
    }

    #[test]
    fn test_dns_encode() {
        assert_eq!(dns_encode("").unwrap(), vec![0]);
        assert_eq!(
            dns_encode("raffy.eth").unwrap(),
            b"\x05raffy\x03eth\x00".to_vec()
        );
        assert_eq!(dns_decode(b"\x05raffy\x03eth\x00").unwrap(), "raffy.eth");
        assert_eq!(dns_decode(&[0]).unwrap(), "");
    }

    #[test]
    fn test_dns_decode_malformed() {
        assert!(dns_decode(b"").is_err());
        assert!(dns_decode(b"\x05raf").is_err());
        assert!(dns_decode(b"\x03eth\x00\x00").is_err());
    }
}
