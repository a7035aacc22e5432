/*
    codec.rs - Snapshot blob format

    A blob is a versioned bincode envelope around a full log export:
    log id, log type, causal heads and entries in total order. Decoding
    checks everything a consumer relies on before any byte reaches the
    target log:
    - the envelope version
    - the log id matches the target store
    - every entry hashes to its id and belongs to the log
    - the heads are the frontier of the entries
*/

use super::errors::{SyncError, SyncResult};
use crate::core_log::{compute_heads, LogExport};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    export: LogExport,
}

pub fn encode(export: &LogExport) -> SyncResult<Vec<u8>> {
    let envelope = Envelope { version: SNAPSHOT_VERSION, export: export.clone() };
    bincode::serialize(&envelope).map_err(|e| SyncError::CorruptSnapshot {
        store: export.log_id.clone(),
        reason: format!("encode: {}", e),
    })
}

/// Decode and validate a blob for `store`
pub fn decode(bytes: &[u8], store: &str) -> SyncResult<LogExport> {
    let corrupt = |reason: String| SyncError::CorruptSnapshot { store: store.to_string(), reason };

    let envelope: Envelope =
        bincode::deserialize(bytes).map_err(|e| corrupt(format!("decode: {}", e)))?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(corrupt(format!("unsupported version {}", envelope.version)));
    }
    let export = envelope.export;
    if export.log_id != store {
        return Err(corrupt(format!("snapshot is for {}", export.log_id)));
    }
    if let Some(bad) = export
        .entries
        .iter()
        .find(|e| e.log_id != store || !e.verify_hash())
    {
        return Err(corrupt(format!("entry {} fails verification", bad.hash)));
    }
    let mut heads = export.heads.clone();
    heads.sort();
    if heads != compute_heads(&export.entries) {
        return Err(corrupt("heads do not match entries".to_string()));
    }
    Ok(export)
}
