//! Layout error types

use thiserror::Error;

use crate::key_id::KeyId;

/// Errors raised while building or validating a key layout
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{0} has a chain id but a defined matrix cell")]
    GalvanicKeyHasChain(KeyId),

    #[error("{0} has an undefined matrix cell but no chain id")]
    MissingChain(KeyId),

    #[error("{0} has a chain id but no COL_ROW_UNDEFINED entry in the key map")]
    MissingUndefinedSentinel(KeyId),

    #[error("Matrix cell ({col}, {row}) is used by both {first} and {second}")]
    DuplicateCell {
        col: u8,
        row: u8,
        first: KeyId,
        second: KeyId,
    },

    #[error("Chain id {chain_id} is used by both {first} and {second}")]
    DuplicateChain {
        chain_id: u8,
        first: KeyId,
        second: KeyId,
    },

    #[error("Fn alias {alias} refers to {base}, which is not in the layout")]
    FnBaseMissing { alias: KeyId, base: KeyId },

    #[error("Layout has Fn aliases but no Fn key")]
    NoFnKey,

    #[error("Fn key {0} is not in the layout")]
    FnKeyMissing(KeyId),

    #[error("Unknown built-in layout: {0}")]
    UnknownLayout(String),

    #[error("Failed to parse layout: {0}")]
    Parse(String),
}
