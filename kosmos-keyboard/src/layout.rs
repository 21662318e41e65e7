//! Key-matrix layouts
//!
//! A layout tells the emulators where each key lives:
//!
//! - galvanic keys sit at a `(column, row)` cell of the switch matrix
//! - analog (Gtech) keys sit at a chain index of the optical-switch chain and
//!   carry the [`MatrixPosition::Undefined`] sentinel in the cell map
//!
//! Fn-layer aliases press the layout's Fn key together with their base key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::key_id::KeyId;

/// Position of a key in the galvanic switch matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPosition", into = "RawPosition")]
pub enum MatrixPosition {
    Cell { col: u8, row: u8 },
    /// `COL_ROW_UNDEFINED`: the key is driven through the analog chain
    Undefined,
}

impl MatrixPosition {
    pub fn cell(self) -> Option<(u8, u8)> {
        match self {
            Self::Cell { col, row } => Some((col, row)),
            Self::Undefined => None,
        }
    }
}

/// On-disk form: `[col, row]` or `"undefined"`
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPosition {
    Cell([u8; 2]),
    Sentinel(String),
}

impl TryFrom<RawPosition> for MatrixPosition {
    type Error = String;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        match raw {
            RawPosition::Cell([col, row]) => Ok(Self::Cell { col, row }),
            RawPosition::Sentinel(s) if s.eq_ignore_ascii_case("undefined") => Ok(Self::Undefined),
            RawPosition::Sentinel(s) => Err(format!("expected [col, row] or \"undefined\", got {s:?}")),
        }
    }
}

impl From<MatrixPosition> for RawPosition {
    fn from(pos: MatrixPosition) -> Self {
        match pos {
            MatrixPosition::Cell { col, row } => Self::Cell([col, row]),
            MatrixPosition::Undefined => Self::Sentinel("undefined".into()),
        }
    }
}

/// Which emulator drives a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Galvanic { col: u8, row: u8 },
    Analog { chain_id: u8 },
}

/// Static key layout of one device under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardLayout {
    pub name: String,
    /// Key held to reach the Fn layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fn_key: Option<KeyId>,
    /// Every key of the device; analog keys carry `Undefined`
    #[serde(default)]
    pub keys: BTreeMap<KeyId, MatrixPosition>,
    /// Chain index of every analog key
    #[serde(default)]
    pub chain_ids: BTreeMap<KeyId, u8>,
    /// Fn-layer alias → base key
    #[serde(default)]
    pub fn_keys: BTreeMap<KeyId, KeyId>,
}

impl KeyboardLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fn_key: None,
            keys: BTreeMap::new(),
            chain_ids: BTreeMap::new(),
            fn_keys: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Builder
    // ------------------------------------------------------------------------

    /// Add a galvanic key
    pub fn with_cell(mut self, key: KeyId, col: u8, row: u8) -> Self {
        self.keys.insert(key, MatrixPosition::Cell { col, row });
        self
    }

    /// Add an analog key (also records the undefined cell)
    pub fn with_chain(mut self, key: KeyId, chain_id: u8) -> Self {
        self.keys.insert(key, MatrixPosition::Undefined);
        self.chain_ids.insert(key, chain_id);
        self
    }

    pub fn with_fn_key(mut self, key: KeyId) -> Self {
        self.fn_key = Some(key);
        self
    }

    pub fn with_fn_alias(mut self, alias: KeyId, base: KeyId) -> Self {
        self.fn_keys.insert(alias, base);
        self
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Parse and validate a layout from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, LayoutError> {
        let layout: Self = toml::from_str(content).map_err(|e| LayoutError::Parse(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn to_toml_string(&self) -> Result<String, LayoutError> {
        toml::to_string_pretty(self).map_err(|e| LayoutError::Parse(e.to_string()))
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Check partition exclusivity, uniqueness and Fn alias targets
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut cells: BTreeMap<(u8, u8), KeyId> = BTreeMap::new();
        for (&key, &pos) in &self.keys {
            match pos {
                MatrixPosition::Cell { col, row } => {
                    if self.chain_ids.contains_key(&key) {
                        return Err(LayoutError::GalvanicKeyHasChain(key));
                    }
                    if let Some(&first) = cells.get(&(col, row)) {
                        return Err(LayoutError::DuplicateCell {
                            col,
                            row,
                            first,
                            second: key,
                        });
                    }
                    cells.insert((col, row), key);
                }
                MatrixPosition::Undefined => {
                    if !self.chain_ids.contains_key(&key) {
                        return Err(LayoutError::MissingChain(key));
                    }
                }
            }
        }

        let mut chains: BTreeMap<u8, KeyId> = BTreeMap::new();
        for (&key, &chain_id) in &self.chain_ids {
            if self.keys.get(&key) != Some(&MatrixPosition::Undefined) {
                return Err(LayoutError::MissingUndefinedSentinel(key));
            }
            if let Some(&first) = chains.get(&chain_id) {
                return Err(LayoutError::DuplicateChain {
                    chain_id,
                    first,
                    second: key,
                });
            }
            chains.insert(chain_id, key);
        }

        if let Some(fn_key) = self.fn_key {
            if !self.keys.contains_key(&fn_key) {
                return Err(LayoutError::FnKeyMissing(fn_key));
            }
        } else if !self.fn_keys.is_empty() {
            return Err(LayoutError::NoFnKey);
        }
        for (&alias, &base) in &self.fn_keys {
            if !self.keys.contains_key(&base) {
                return Err(LayoutError::FnBaseMissing { alias, base });
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Check if the key (or Fn alias) is known to this layout
    pub fn contains(&self, key: KeyId) -> bool {
        self.keys.contains_key(&key) || self.fn_keys.contains_key(&key)
    }

    /// Where a physical key lives
    pub fn kind(&self, key: KeyId) -> Option<KeyKind> {
        match self.keys.get(&key)? {
            MatrixPosition::Cell { col, row } => Some(KeyKind::Galvanic {
                col: *col,
                row: *row,
            }),
            MatrixPosition::Undefined => self
                .chain_ids
                .get(&key)
                .map(|&chain_id| KeyKind::Analog { chain_id }),
        }
    }

    pub fn position(&self, key: KeyId) -> Option<(u8, u8)> {
        self.keys.get(&key).and_then(|p| p.cell())
    }

    pub fn chain_id(&self, key: KeyId) -> Option<u8> {
        self.chain_ids.get(&key).copied()
    }

    pub fn is_galvanic(&self, key: KeyId) -> bool {
        self.position(key).is_some()
    }

    pub fn is_analog(&self, key: KeyId) -> bool {
        self.chain_ids.contains_key(&key)
    }

    /// Base key behind an Fn-layer alias
    pub fn fn_base(&self, alias: KeyId) -> Option<KeyId> {
        self.fn_keys.get(&alias).copied()
    }

    /// Galvanic keys with their cells, in key order
    pub fn galvanic_keys(&self) -> impl Iterator<Item = (KeyId, u8, u8)> + '_ {
        self.keys
            .iter()
            .filter_map(|(&k, p)| p.cell().map(|(col, row)| (k, col, row)))
    }

    /// Analog keys with their chain ids, in key order
    pub fn analog_keys(&self) -> impl Iterator<Item = (KeyId, u8)> + '_ {
        self.chain_ids.iter().map(|(&k, &c)| (k, c))
    }

    /// Largest column and row used, if any galvanic key exists
    pub fn matrix_extent(&self) -> Option<(u8, u8)> {
        let cols = self.galvanic_keys().map(|(_, c, _)| c).max()?;
        let rows = self.galvanic_keys().map(|(_, _, r)| r).max()?;
        Some((cols, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> KeyboardLayout {
        KeyboardLayout::new("small")
            .with_cell(KeyId::PLAY_PAUSE, 0, 0)
            .with_cell(KeyId::FN_KEY, 1, 0)
            .with_cell(KeyId::KEYBOARD_F1, 2, 0)
            .with_chain(KeyId::KEYBOARD_A, 0)
            .with_chain(KeyId::KEYBOARD_B, 1)
            .with_fn_key(KeyId::FN_KEY)
            .with_fn_alias(KeyId::FN_KEYBOARD_F1, KeyId::KEYBOARD_F1)
    }

    #[test]
    fn test_valid_layout() {
        let layout = small();
        layout.validate().unwrap();
        assert_eq!(
            layout.kind(KeyId::PLAY_PAUSE),
            Some(KeyKind::Galvanic { col: 0, row: 0 })
        );
        assert_eq!(
            layout.kind(KeyId::KEYBOARD_B),
            Some(KeyKind::Analog { chain_id: 1 })
        );
        assert!(layout.contains(KeyId::FN_KEYBOARD_F1));
        assert_eq!(layout.fn_base(KeyId::FN_KEYBOARD_F1), Some(KeyId::KEYBOARD_F1));
        assert_eq!(layout.matrix_extent(), Some((2, 0)));
    }

    #[test]
    fn test_partition_exclusivity() {
        let mut layout = small();
        layout.chain_ids.insert(KeyId::PLAY_PAUSE, 9);
        assert_eq!(
            layout.validate(),
            Err(LayoutError::GalvanicKeyHasChain(KeyId::PLAY_PAUSE))
        );

        let mut layout = small();
        layout.keys.remove(&KeyId::KEYBOARD_A);
        assert_eq!(
            layout.validate(),
            Err(LayoutError::MissingUndefinedSentinel(KeyId::KEYBOARD_A))
        );

        let mut layout = small();
        layout.keys.insert(KeyId::KEYBOARD_C, MatrixPosition::Undefined);
        assert_eq!(
            layout.validate(),
            Err(LayoutError::MissingChain(KeyId::KEYBOARD_C))
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let layout = small().with_cell(KeyId::STOP, 0, 0);
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::DuplicateCell { col: 0, row: 0, .. })
        ));

        let layout = small().with_chain(KeyId::KEYBOARD_C, 1);
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::DuplicateChain { chain_id: 1, .. })
        ));
    }

    #[test]
    fn test_fn_alias_checks() {
        let layout = small().with_fn_alias(KeyId::FN_KEYBOARD_F2, KeyId::KEYBOARD_F2);
        assert_eq!(
            layout.validate(),
            Err(LayoutError::FnBaseMissing {
                alias: KeyId::FN_KEYBOARD_F2,
                base: KeyId::KEYBOARD_F2
            })
        );

        let mut layout = small();
        layout.fn_key = None;
        assert_eq!(layout.validate(), Err(LayoutError::NoFnKey));
    }

    #[test]
    fn test_toml_layout() {
        let content = r#"
name = "from-file"
fn_key = "FN_KEY"

[keys]
NEXT_TRACK = [3, 1]
FN_KEY = [0, 0]
KEYBOARD_Q = "undefined"

[chain_ids]
KEYBOARD_Q = 7
"#;
        let layout = KeyboardLayout::from_toml_str(content).unwrap();
        assert_eq!(layout.name, "from-file");
        assert_eq!(layout.position(KeyId::NEXT_TRACK), Some((3, 1)));
        assert_eq!(layout.chain_id(KeyId::KEYBOARD_Q), Some(7));

        let again = KeyboardLayout::from_toml_str(&layout.to_toml_string().unwrap()).unwrap();
        assert_eq!(again, layout);
    }

    #[test]
    fn test_toml_rejects_unknown_key() {
        let content = "name = \"x\"\n[keys]\nNOT_A_KEY = [0, 0]\n";
        assert!(matches!(
            KeyboardLayout::from_toml_str(content),
            Err(LayoutError::Parse(_))
        ));
    }
}
