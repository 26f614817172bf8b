//! Data versions and version stamps
//!
//! Every namespace records the last version its data was migrated to in a
//! top-level integer field named `<namespace>_DataVersion`.

use serde_json::{Map, Value};

use crate::error::{FixerError, Result};

/// Integer version key used by schema versions, fixers and stamps
pub type DataVersion = i64;

/// Suffix of the per-namespace stamp field
pub const STAMP_SUFFIX: &str = "_DataVersion";

/// Stamp assumed for records that carry no stamp for a namespace
pub const UNSTAMPED: DataVersion = 0;

/// Build a version key from a release version and a sub-version.
///
/// Producers that need several schema steps within one release use
/// sub-versions `0..=9`; keys stay ordered by `(version, sub)`.
pub const fn version_key(version: DataVersion, sub: DataVersion) -> DataVersion {
    version * 10 + sub
}

/// Split a key produced by [`version_key`] back into `(version, sub)`
pub const fn split_version_key(key: DataVersion) -> (DataVersion, DataVersion) {
    (key.div_euclid(10), key.rem_euclid(10))
}

/// Name of the stamp field for a namespace (e.g. `example_DataVersion`)
pub fn stamp_field(namespace: &str) -> String {
    format!("{}{}", namespace, STAMP_SUFFIX)
}

/// Read a namespace's stamp from a record map.
///
/// Missing stamps read as [`UNSTAMPED`]. Integral floats (`3.0`) are accepted
/// since some storage layers widen integers; anything else is an error.
pub fn read_stamp(record: &Map<String, Value>, namespace: &str) -> Result<DataVersion> {
    let field = stamp_field(namespace);
    match record.get(&field) {
        None => Ok(UNSTAMPED),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(FixerError::InvalidStamp {
                    field,
                    found: n.to_string(),
                }),
            }
        }
        Some(other) => Err(FixerError::InvalidStamp {
            field,
            found: other.to_string(),
        }),
    }
}

/// Write a namespace's stamp into a record map
pub fn write_stamp(record: &mut Map<String, Value>, namespace: &str, version: DataVersion) {
    record.insert(stamp_field(namespace), Value::from(version));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_stamp_field_name() {
        assert_eq!(stamp_field("example"), "example_DataVersion");
    }

    #[test]
    fn test_version_keys() {
        assert_eq!(version_key(1451, 3), 14513);
        assert_eq!(split_version_key(14513), (1451, 3));
        assert!(version_key(1451, 9) < version_key(1452, 0));
    }

    #[test]
    fn test_read_stamp() {
        let record = as_map(json!({"a_DataVersion": 7, "b_DataVersion": 3.0}));
        assert_eq!(read_stamp(&record, "a").unwrap(), 7);
        assert_eq!(read_stamp(&record, "b").unwrap(), 3);
        assert_eq!(read_stamp(&record, "missing").unwrap(), UNSTAMPED);
    }

    #[test]
    fn test_read_invalid_stamp() {
        let record = as_map(json!({"a_DataVersion": "seven", "b_DataVersion": 1.5}));
        assert!(matches!(read_stamp(&record, "a"), Err(FixerError::InvalidStamp { .. })));
        assert!(matches!(read_stamp(&record, "b"), Err(FixerError::InvalidStamp { .. })));
    }

    #[test]
    fn test_write_stamp_overwrites() {
        let mut record = as_map(json!({"a_DataVersion": 1}));
        write_stamp(&mut record, "a", 4);
        assert_eq!(record.get("a_DataVersion"), Some(&json!(4)));
    }
}
