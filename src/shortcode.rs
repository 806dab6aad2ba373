//! Shortcodes: short, path-safe, reversible stand-ins for remote ids.
//!
//! A shortcode is `"__" + hex(sha256(id))[..n] + "__"`. Within one scope
//! every id gets the same `n`, the smallest step of [`LENGTH_STEPS`] (never
//! below the length already persisted for that scope) at which no two ids
//! collide.
//!
//! ```text
//! scope                     persisted in
//! ───────────────────────── ───────────────────────────────────────────────
//! all folders               index/shortcodes/folders.json
//! conversations of a folder index/shortcodes/conversations/<folder>.json
//! messages of a conversation index/shortcodes/conversations/<folder>.json
//! attachments of a message  <message dir>/attachment_shortcodes.json
//! ```

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{MirrorError, Result};
use crate::export::write;

/// Marker placed before the hash prefix.
pub const SHORTCODE_PREFIX: &str = "__";

/// Marker placed after the hash prefix.
pub const SHORTCODE_SUFFIX: &str = "__";

/// Hash-prefix lengths tried in order when a scope has collisions.
pub const LENGTH_STEPS: &[usize] = &[8, 12, 16, 20, 24, 32, 40, 64];

/// Persisted mapping for one uniqueness scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcodeMap {
    /// Hash-prefix length shared by every shortcode in the scope (0 when empty).
    pub shortcode_length: usize,
    /// Current shortcode → remote id.
    pub shortcode_to_id: BTreeMap<String, String>,
    /// Remote id → current shortcode.
    #[serde(default)]
    pub id_to_shortcode: BTreeMap<String, String>,
    /// Shortcodes superseded when the scope had to widen. Directories created
    /// under them stay resolvable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retired: BTreeMap<String, String>,
}

impl ShortcodeMap {
    /// Current shortcode for a remote id.
    pub fn shortcode(&self, id: &str) -> Option<&str> {
        self.id_to_shortcode.get(id).map(String::as_str)
    }

    /// Resolve a shortcode (current or retired) back to its remote id.
    pub fn resolve(&self, shortcode: &str) -> Option<&str> {
        self.shortcode_to_id
            .get(shortcode)
            .or_else(|| self.retired.get(shortcode))
            .map(String::as_str)
    }

    /// Number of ids in the scope.
    pub fn len(&self) -> usize {
        self.shortcode_to_id.len()
    }

    /// `true` if the scope holds no ids.
    pub fn is_empty(&self) -> bool {
        self.shortcode_to_id.is_empty()
    }

    /// Load a persisted map. Returns `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut map: ShortcodeMap = write::read_json(path)?;
        // Older maps only carried the forward direction.
        if map.id_to_shortcode.is_empty() && !map.shortcode_to_id.is_empty() {
            map.id_to_shortcode = invert(&map.shortcode_to_id);
        }
        Ok(Some(map))
    }

    /// Persist the map atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        write::write_json(path, self)
    }
}

/// Compute the shortcode of `id` at a given hash-prefix length.
pub fn shortcode_for(id: &str, length: usize) -> String {
    let digest = hex_digest(id);
    format!(
        "{SHORTCODE_PREFIX}{}{SHORTCODE_SUFFIX}",
        &digest[..length.min(digest.len())]
    )
}

/// Allocate shortcodes for every id of a scope.
///
/// `prior` is the mapping persisted by an earlier run for the same scope.
/// Its ids stay in the scope and its length acts as a floor, so an id
/// never changes shortcode unless the scope must widen. Empty and duplicate
/// ids are ignored.
pub fn allocate<'a, I>(scope: &str, ids: I, prior: Option<&'a ShortcodeMap>) -> Result<ShortcodeMap>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut unique: BTreeSet<&str> = BTreeSet::new();
    if let Some(prior) = prior {
        unique.extend(prior.shortcode_to_id.values().map(String::as_str));
    }
    unique.extend(ids.into_iter().filter(|id| !id.is_empty()));

    let digests: Vec<(String, String)> = unique
        .into_iter()
        .map(|id| (id.to_string(), hex_digest(id)))
        .collect();

    allocate_digests(scope, &digests, prior)
}

/// Core of [`allocate`], over precomputed `(id, hex digest)` pairs.
fn allocate_digests(
    scope: &str,
    digests: &[(String, String)],
    prior: Option<&ShortcodeMap>,
) -> Result<ShortcodeMap> {
    if digests.is_empty() {
        return Ok(prior.cloned().unwrap_or_default());
    }

    let floor = prior.map(|p| p.shortcode_length).unwrap_or(0);

    for &length in LENGTH_STEPS.iter().filter(|&&l| l >= floor) {
        let mut shortcode_to_id: BTreeMap<String, String> = BTreeMap::new();
        let mut collided = false;

        for (id, digest) in digests {
            let code = format!(
                "{SHORTCODE_PREFIX}{}{SHORTCODE_SUFFIX}",
                &digest[..length.min(digest.len())]
            );
            match shortcode_to_id.entry(code) {
                Entry::Vacant(slot) => {
                    slot.insert(id.clone());
                }
                Entry::Occupied(slot) => {
                    if slot.get() != id {
                        collided = true;
                        break;
                    }
                }
            }
        }

        if collided {
            debug!(scope = scope, length = length, "Shortcode collision, widening scope");
            continue;
        }

        let mut retired = prior.map(|p| p.retired.clone()).unwrap_or_default();
        if let Some(prior) = prior.filter(|p| p.shortcode_length != 0 && p.shortcode_length != length) {
            warn!(
                scope = scope,
                from = prior.shortcode_length,
                to = length,
                "Shortcode length grew; earlier shortcodes are retired"
            );
            for (code, id) in &prior.shortcode_to_id {
                if !shortcode_to_id.contains_key(code) {
                    retired.insert(code.clone(), id.clone());
                }
            }
        }

        return Ok(ShortcodeMap {
            shortcode_length: length,
            id_to_shortcode: invert(&shortcode_to_id),
            shortcode_to_id,
            retired,
        });
    }

    Err(MirrorError::ShortcodeExhausted {
        scope: scope.to_string(),
        count: digests.len(),
    })
}

fn hex_digest(id: &str) -> String {
    sha256_hex(id.as_bytes())
}

/// Lower-case hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn invert(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter().map(|(k, v)| (v.clone(), k.clone())).collect()
}
