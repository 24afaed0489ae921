//! The visual-object store: opaque byte objects filed by format under
//! per-format directories, addressed by string handles.
//!
//! Decode and transform of the stored media belong to the external
//! visual pipeline; the store validates requested operations and keeps
//! the handle seam (`put`/`get`/`delete`/`apply_ops`) the engine
//! depends on.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown format {0:?}")]
    UnknownFormat(String),
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    #[error("malformed operation: {0}")]
    MalformedOperation(String),
    #[error("bad object handle {0:?}")]
    BadHandle(String),
    #[error("object store I/O: {0}")]
    Io(#[from] io::Error),
}

/// Formats an object can be filed under. `Desc` is internal to
/// descriptor storage and not accepted from queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectFormat {
    Png,
    Jpg,
    Tdb,
    Bin,
    Mp4,
    Avi,
    Mov,
    Desc,
}

impl ObjectFormat {
    /// Parse an image format named in a query.
    pub fn parse_image(format: &str) -> Result<ObjectFormat, StoreError> {
        Ok(match format {
            "png" => ObjectFormat::Png,
            "jpg" => ObjectFormat::Jpg,
            "tdb" => ObjectFormat::Tdb,
            "bin" => ObjectFormat::Bin,
            other => return Err(StoreError::UnknownFormat(other.to_string())),
        })
    }

    /// Parse a video container named in a query.
    pub fn parse_container(container: &str) -> Result<ObjectFormat, StoreError> {
        Ok(match container {
            "mp4" => ObjectFormat::Mp4,
            "avi" => ObjectFormat::Avi,
            "mov" => ObjectFormat::Mov,
            other => return Err(StoreError::UnknownFormat(other.to_string())),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectFormat::Png => "png",
            ObjectFormat::Jpg => "jpg",
            ObjectFormat::Tdb => "tdb",
            ObjectFormat::Bin => "bin",
            ObjectFormat::Mp4 => "mp4",
            ObjectFormat::Avi => "avi",
            ObjectFormat::Mov => "mov",
            ObjectFormat::Desc => "desc",
        }
    }
}

/// A validated visual transform, forwarded to the external pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Resize { width: u32, height: u32 },
    Crop { x: i64, y: i64, width: u32, height: u32 },
    Threshold { value: i64 },
    Flip { code: i64 },
    Rotate { angle: f64, resize: bool },
    Interval { start: u64, stop: u64, step: u64 },
    RemoteOp { url: String, options: Value },
    SyncRemoteOp { url: String, options: Value },
    UserOp { options: Value },
}

impl Operation {
    /// Validate a JSON `operations` array into a typed pipeline.
    pub fn parse_list(operations: &Value) -> Result<Vec<Operation>, StoreError> {
        let array = operations.as_array().ok_or_else(|| {
            StoreError::MalformedOperation("operations must be an array".to_string())
        })?;
        array.iter().map(Operation::parse).collect()
    }

    fn parse(operation: &Value) -> Result<Operation, StoreError> {
        let kind = operation
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::MalformedOperation("operation without a type".to_string())
            })?;
        let malformed =
            |what: &str| StoreError::MalformedOperation(format!("{}: {}", kind, what));

        Ok(match kind {
            "resize" => Operation::Resize {
                width: required_u32(operation, "width").map_err(|e| malformed(&e))?,
                height: required_u32(operation, "height").map_err(|e| malformed(&e))?,
            },
            "crop" => Operation::Crop {
                x: required_i64(operation, "x").map_err(|e| malformed(&e))?,
                y: required_i64(operation, "y").map_err(|e| malformed(&e))?,
                width: required_u32(operation, "width").map_err(|e| malformed(&e))?,
                height: required_u32(operation, "height").map_err(|e| malformed(&e))?,
            },
            "threshold" => Operation::Threshold {
                value: required_i64(operation, "value").map_err(|e| malformed(&e))?,
            },
            "flip" => Operation::Flip {
                code: required_i64(operation, "code").map_err(|e| malformed(&e))?,
            },
            "rotate" => Operation::Rotate {
                angle: operation
                    .get("angle")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| malformed("missing numeric angle"))?,
                resize: operation
                    .get("resize")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            "interval" => {
                let start = required_u64(operation, "start").map_err(|e| malformed(&e))?;
                let stop = required_u64(operation, "stop").map_err(|e| malformed(&e))?;
                if stop <= start {
                    return Err(malformed("stop must be greater than start"));
                }
                Operation::Interval {
                    start,
                    stop,
                    step: operation
                        .get("step")
                        .and_then(Value::as_u64)
                        .unwrap_or(1)
                        .max(1),
                }
            }
            "remoteOp" | "syncremoteOp" => {
                let url = operation
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("missing url"))?
                    .to_string();
                let options = operation.get("options").cloned().unwrap_or(Value::Null);
                if kind == "remoteOp" {
                    Operation::RemoteOp { url, options }
                } else {
                    Operation::SyncRemoteOp { url, options }
                }
            }
            "userOp" => Operation::UserOp {
                options: operation.get("options").cloned().unwrap_or(Value::Null),
            },
            other => return Err(StoreError::UnknownOperation(other.to_string())),
        })
    }
}

fn required_u32(operation: &Value, key: &str) -> Result<u32, String> {
    operation
        .get(key)
        .and_then(Value::as_u64)
        .filter(|v| *v > 0 && *v <= u32::MAX as u64)
        .map(|v| v as u32)
        .ok_or_else(|| format!("missing positive {}", key))
}

fn required_u64(operation: &Value, key: &str) -> Result<u64, String> {
    operation
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("missing non-negative {}", key))
}

fn required_i64(operation: &Value, key: &str) -> Result<i64, String> {
    operation
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("missing integer {}", key))
}

/// Filesystem-backed object store. Handles look like
/// `png/4cd2…f1.png`: the format directory key plus a generated file
/// name.
pub struct ObjectStore {
    roots: HashMap<ObjectFormat, PathBuf>,
}

impl ObjectStore {
    /// Create the store with directories from `config`, creating any
    /// that are missing.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let db_root = &config.db_root_path;
        let defaulted = |configured: &Option<PathBuf>, sub: &str| {
            configured
                .clone()
                .unwrap_or_else(|| db_root.join(sub))
        };

        let mut roots = HashMap::new();
        roots.insert(ObjectFormat::Png, defaulted(&config.storage_png, "images/png"));
        roots.insert(ObjectFormat::Jpg, defaulted(&config.storage_jpg, "images/jpg"));
        roots.insert(ObjectFormat::Tdb, defaulted(&config.storage_tdb, "images/tdb"));
        roots.insert(ObjectFormat::Bin, defaulted(&config.blob_path, "blobs"));
        roots.insert(ObjectFormat::Mp4, defaulted(&config.storage_mp4, "videos/mp4"));
        roots.insert(ObjectFormat::Avi, defaulted(&config.storage_avi, "videos/avi"));
        roots.insert(ObjectFormat::Mov, defaulted(&config.storage_mov, "videos/mov"));
        roots.insert(
            ObjectFormat::Desc,
            defaulted(&config.descriptor_path, "descriptors"),
        );
        if let Some(bin) = &config.storage_bin {
            roots.insert(ObjectFormat::Bin, bin.clone());
        }

        for root in roots.values() {
            fs::create_dir_all(root)?;
        }
        Ok(ObjectStore { roots })
    }

    /// Store `bytes` as a new object, returning its handle.
    pub fn put(&self, bytes: &[u8], format: ObjectFormat) -> Result<String, StoreError> {
        let name = format!("{}.{}", Uuid::new_v4(), format.as_str());
        let handle = format!("{}/{}", format.as_str(), name);
        fs::write(self.root(format)?.join(&name), bytes)?;
        Ok(handle)
    }

    /// Ingest a file already on the server (`from_server_file`).
    pub fn put_file(&self, path: &Path, format: ObjectFormat) -> Result<String, StoreError> {
        let bytes = fs::read(path)?;
        self.put(&bytes, format)
    }

    pub fn get(&self, handle: &str) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(self.resolve(handle)?)?)
    }

    pub fn delete(&self, handle: &str) -> Result<(), StoreError> {
        Ok(fs::remove_file(self.resolve(handle)?)?)
    }

    /// Apply a validated operation pipeline to a stored object.
    ///
    /// Codec work is the external pipeline's job; the bundled store
    /// passes the object through untouched and returns the same handle.
    pub fn apply_ops(&self, handle: &str, _ops: &[Operation]) -> Result<String, StoreError> {
        self.resolve(handle)?;
        Ok(handle.to_string())
    }

    fn root(&self, format: ObjectFormat) -> Result<&PathBuf, StoreError> {
        self.roots
            .get(&format)
            .ok_or_else(|| StoreError::UnknownFormat(format.as_str().to_string()))
    }

    /// Turn a handle back into a path, refusing anything that could
    /// escape the storage directories.
    fn resolve(&self, handle: &str) -> Result<PathBuf, StoreError> {
        let mut parts = handle.splitn(2, '/');
        let format = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StoreError::BadHandle(handle.to_string()))?;
        let name = parts
            .next()
            .filter(|n| !n.is_empty() && !n.contains('/') && !n.contains(".."))
            .ok_or_else(|| StoreError::BadHandle(handle.to_string()))?;

        let format = match format {
            "png" => ObjectFormat::Png,
            "jpg" => ObjectFormat::Jpg,
            "tdb" => ObjectFormat::Tdb,
            "bin" => ObjectFormat::Bin,
            "mp4" => ObjectFormat::Mp4,
            "avi" => ObjectFormat::Avi,
            "mov" => ObjectFormat::Mov,
            "desc" => ObjectFormat::Desc,
            _ => return Err(StoreError::BadHandle(handle.to_string())),
        };
        Ok(self.root(format)?.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.db_root_path = dir.path().to_path_buf();
        let store = ObjectStore::new(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, store) = store();
        let handle = store.put(&[0x89, 0x50, 0x4e], ObjectFormat::Png).unwrap();
        assert!(handle.starts_with("png/"));
        assert_eq!(store.get(&handle).unwrap(), vec![0x89, 0x50, 0x4e]);
    }

    #[test]
    fn delete_removes_the_object() {
        let (_dir, store) = store();
        let handle = store.put(b"bytes", ObjectFormat::Bin).unwrap();
        store.delete(&handle).unwrap();
        assert!(store.get(&handle).is_err());
    }

    #[test]
    fn traversal_handles_are_rejected() {
        let (_dir, store) = store();
        assert!(store.get("png/../../etc/passwd").is_err());
        assert!(store.get("nope/x.bin").is_err());
        assert!(store.get("png").is_err());
    }

    #[test]
    fn operations_validate() {
        let ops = json!([
            {"type": "resize", "width": 512, "height": 512},
            {"type": "rotate", "angle": 45.0},
            {"type": "interval", "start": 0, "stop": 10}
        ]);
        let parsed = Operation::parse_list(&ops).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(
            parsed[0],
            Operation::Resize {
                width: 512,
                height: 512
            }
        );

        let bad = json!([{"type": "sharpen"}]);
        assert!(matches!(
            Operation::parse_list(&bad),
            Err(StoreError::UnknownOperation(_))
        ));

        let missing = json!([{"type": "resize", "width": 512}]);
        assert!(matches!(
            Operation::parse_list(&missing),
            Err(StoreError::MalformedOperation(_))
        ));
    }

    #[test]
    fn image_formats_parse() {
        assert!(ObjectFormat::parse_image("png").is_ok());
        assert!(ObjectFormat::parse_image("gif").is_err());
        assert!(ObjectFormat::parse_container("mp4").is_ok());
        assert!(ObjectFormat::parse_container("mkv").is_err());
    }
}
