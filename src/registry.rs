// src/registry.rs
//! Decoders for persisted changes and operations.
//!
//! Changes are stored as `(kind, payload)` and operations as JSON objects
//! tagged with `op`. The registries map those tags back to concrete types.
//! Components take an `Arc<Registries>` explicitly; the process-wide slot
//! below only exists so that a binary can install its registries once and
//! hand them out.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use crate::history::Change;
use crate::operations::{
    column_move, column_removal, column_rename, row_flag, Operation, UnknownOperation,
};

pub type ChangeDecoder = fn(serde_json::Value) -> Result<Arc<dyn Change>, serde_json::Error>;
pub type OperationDecoder = fn(serde_json::Value) -> Result<Arc<dyn Operation>, serde_json::Error>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No decoder registered for change kind '{0}'")]
    UnknownChangeKind(String),
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decoder for any change type that deserializes from its payload.
pub fn decode_change<C>(payload: serde_json::Value) -> Result<Arc<dyn Change>, serde_json::Error>
where
    C: Change + DeserializeOwned + 'static,
{
    Ok(Arc::new(serde_json::from_value::<C>(payload)?))
}

/// Decoder for any operation type that deserializes from its JSON form.
pub fn decode_operation<O>(json: serde_json::Value) -> Result<Arc<dyn Operation>, serde_json::Error>
where
    O: Operation + DeserializeOwned + 'static,
{
    Ok(Arc::new(serde_json::from_value::<O>(json)?))
}

#[derive(Debug, Clone, Default)]
pub struct ChangeRegistry {
    decoders: HashMap<String, ChangeDecoder>,
}

impl ChangeRegistry {
    pub fn register(&mut self, kind: &str, decoder: ChangeDecoder) -> &mut Self {
        self.decoders.insert(kind.to_string(), decoder);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn decode(&self, kind: &str, payload: serde_json::Value) -> Result<Arc<dyn Change>, RegistryError> {
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownChangeKind(kind.to_string()))?;
        Ok(decoder(payload)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    decoders: HashMap<String, OperationDecoder>,
}

impl OperationRegistry {
    pub fn register(&mut self, op_id: &str, decoder: OperationDecoder) -> &mut Self {
        self.decoders.insert(op_id.to_string(), decoder);
        self
    }

    pub fn contains(&self, op_id: &str) -> bool {
        self.decoders.contains_key(op_id)
    }

    /// Unregistered ids and `null` become `UnknownOperation`s.
    pub fn decode(&self, json: serde_json::Value) -> Result<Arc<dyn Operation>, serde_json::Error> {
        let decoder = json
            .get("op")
            .and_then(|op| op.as_str())
            .and_then(|op| self.decoders.get(op));
        match decoder {
            Some(decoder) => decoder(json),
            None => Ok(Arc::new(UnknownOperation::new(json))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub changes: ChangeRegistry,
    pub operations: OperationRegistry,
}

impl Registries {
    /// Registries holding the built-in catalog.
    pub fn builtin() -> Self {
        let mut registries = Registries::default();
        registries
            .changes
            .register(column_rename::CHANGE_KIND, decode_change::<column_rename::ColumnRenameChange>)
            .register(column_removal::CHANGE_KIND, decode_change::<column_removal::ColumnRemovalChange>)
            .register(column_move::CHANGE_KIND, decode_change::<column_move::ColumnMoveChange>)
            .register(row_flag::CHANGE_KIND, decode_change::<row_flag::RowFlagChange>);
        registries
            .operations
            .register(column_rename::OP_ID, decode_operation::<column_rename::ColumnRenameOperation>)
            .register(column_removal::OP_ID, decode_operation::<column_removal::ColumnRemovalOperation>)
            .register(column_move::OP_ID, decode_operation::<column_move::ColumnMoveOperation>)
            .register(row_flag::OP_ID, decode_operation::<row_flag::RowFlagOperation>);
        registries
    }
}

static INSTALLED: RwLock<Option<Arc<Registries>>> = parking_lot::const_rwlock(None);

/// Makes `registries` the process-wide registries, returning the previous ones.
pub fn install(registries: Arc<Registries>) -> Option<Arc<Registries>> {
    info!(
        "Registries: installing {} change kinds, {} operations",
        registries.changes.decoders.len(),
        registries.operations.decoders.len()
    );
    INSTALLED.write().replace(registries)
}

pub fn installed() -> Option<Arc<Registries>> {
    INSTALLED.read().clone()
}

pub fn uninstall() -> Option<Arc<Registries>> {
    INSTALLED.write().take()
}
