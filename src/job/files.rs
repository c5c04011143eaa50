use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use url::Url;

use crate::error::{ProxyError, Result};

/// Remote file reference -> local destination.
pub type FileMap = BTreeMap<String, PathBuf>;

/// A `scheme://bucket/object` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub scheme: String,
    pub bucket: String,
    pub object: String,
}

impl RemoteFile {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            ProxyError::Staging(format!("invalid file reference {:?}: {}", reference, reason))
        };
        let url = Url::parse(reference).map_err(|e| invalid(&e.to_string()))?;
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("no bucket"))?
            .to_string();
        // Object names are taken verbatim rather than from the percent-encoded URL path.
        let object = reference
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, object)| object.to_string())
            .filter(|o| !o.is_empty())
            .ok_or_else(|| invalid("no object path"))?;
        // The local copy mirrors bucket/object, so neither may step outside it.
        let is_dot = |part: &str| part == "." || part == "..";
        if is_dot(&bucket) || object.split('/').any(is_dot) {
            return Err(invalid("dot segments are not allowed"));
        }
        Ok(Self {
            scheme: url.scheme().to_string(),
            bucket,
            object,
        })
    }

    pub fn key(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.bucket, self.object)
    }

    /// `root/bucket/object`
    pub fn local_path(&self, root: &Path) -> PathBuf {
        let mut path = root.join(&self.bucket);
        for part in self.object.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

/// Parse `s` as JSON when it looks like an array or object, otherwise keep it
/// as a plain string. Malformed JSON also falls back to the string.
pub fn parse_json(s: &str) -> Value {
    let trimmed = s.trim();
    let looks_like_json = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if !looks_like_json {
        return Value::String(s.to_string());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(s.to_string()))
}

/// Every scalar leaf reachable through array elements and object values,
/// depth first. Object keys are never emitted.
pub fn flatten(value: &Value) -> Vec<&Value> {
    let mut leaves = Vec::new();
    collect_leaves(value, &mut leaves);
    leaves
}

fn collect_leaves<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, out)),
        scalar => out.push(scalar),
    }
}

/// String leaves of `value`, the only leaves treated as file references.
pub fn remote_references(value: &Value) -> Vec<&str> {
    flatten(value)
        .into_iter()
        .filter_map(|leaf| match leaf {
            Value::String(s) => Some(s.as_str()),
            other => {
                tracing::warn!(value = %other, "Invalid download file URL, skipped");
                None
            }
        })
        .collect()
}

/// Structural copy of `value` with each string leaf replaced by its local
/// path. A string missing from `map` is kept as-is.
pub fn copy_with_file_map(value: &Value, map: &FileMap) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| copy_with_file_map(v, map)).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), copy_with_file_map(v, map)))
                .collect(),
        ),
        Value::String(s) => match lookup(map, s) {
            Some(path) => Value::String(path.to_string_lossy().to_string()),
            None => {
                tracing::warn!(reference = %s, "No local path for file reference");
                Value::String(s.clone())
            }
        },
        other => other.clone(),
    }
}

/// Map keys are canonical references; accept the leaf as written too.
fn lookup<'a>(map: &'a FileMap, reference: &str) -> Option<&'a PathBuf> {
    map.get(reference).or_else(|| {
        RemoteFile::parse(reference)
            .ok()
            .and_then(|file| map.get(&file.key()))
    })
}

/// Build the reference -> local path map for every string leaf of `remote`.
pub fn build_file_map(remote: &Value, downloads_dir: &Path) -> Result<FileMap> {
    let mut map = FileMap::new();
    for reference in remote_references(remote) {
        let file = RemoteFile::parse(reference)?;
        map.insert(file.key(), file.local_path(downloads_dir));
    }
    Ok(map)
}

/// Regular files below `dir`, recursively, in sorted order.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else {
                result.push(path);
            }
        }
    }
    result.sort();
    Ok(result)
}

/// Split a path under the uploads root into `(bucket, object)`.
pub fn upload_target(uploads_dir: &Path, local: &Path) -> Result<(String, String)> {
    let rel = local.strip_prefix(uploads_dir).map_err(|_| {
        ProxyError::Staging(format!(
            "{} is not under {}",
            local.display(),
            uploads_dir.display()
        ))
    })?;
    let mut parts = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string());
    let bucket = parts.next();
    let object = parts.collect::<Vec<_>>().join("/");
    match bucket {
        Some(bucket) if !object.is_empty() => Ok((bucket, object)),
        _ => Err(ProxyError::Staging(format!(
            "{} must be placed in a bucket directory",
            local.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_json_only_for_arrays_and_objects() {
        assert_eq!(parse_json(r#"["a","b"]"#), json!(["a", "b"]));
        assert_eq!(parse_json(r#"{"k":"v"}"#), json!({"k": "v"}));
        assert_eq!(parse_json("gs://bucket/a.txt"), json!("gs://bucket/a.txt"));
        assert_eq!(parse_json("123"), json!("123"));
        assert_eq!(parse_json("[not json"), json!("[not json"));
        assert_eq!(parse_json("[broken]"), json!("[broken]"));
    }

    #[test]
    fn flatten_collects_leaves_depth_first() {
        let v = json!(["a", ["b", 1, null], {"k": true}, [[["c"]]]]);
        let leaves = flatten(&v);
        assert_eq!(
            leaves,
            vec![&json!("a"), &json!("b"), &json!(1), &json!(null), &json!(true), &json!("c")]
        );
    }

    #[test]
    fn flatten_scalar_is_itself() {
        let v = json!("gs://bucket/a.txt");
        assert_eq!(flatten(&v), vec![&v]);
    }

    #[test]
    fn flatten_skips_object_keys() {
        let v = json!({"gs://bucket/key": "gs://bucket/value"});
        assert_eq!(remote_references(&v), vec!["gs://bucket/value"]);
    }

    #[test]
    fn only_strings_are_references() {
        let v = json!(["gs://bucket/a.txt", 3, false, null, {"x": 1.5}]);
        assert_eq!(remote_references(&v), vec!["gs://bucket/a.txt"]);
    }

    #[test]
    fn remote_file_parse() {
        let f = RemoteFile::parse("gs://bucket/dir/a.txt").unwrap();
        assert_eq!(f.scheme, "gs");
        assert_eq!(f.bucket, "bucket");
        assert_eq!(f.object, "dir/a.txt");
        assert_eq!(f.key(), "gs://bucket/dir/a.txt");
        assert_eq!(
            f.local_path(Path::new("/w/downloads")),
            PathBuf::from("/w/downloads/bucket/dir/a.txt")
        );
    }

    #[test]
    fn remote_file_rejects_bad_references() {
        assert!(RemoteFile::parse("not a url").is_err());
        assert!(RemoteFile::parse("gs://bucket").is_err());
        assert!(RemoteFile::parse("gs://bucket/").is_err());
    }

    #[test]
    fn remote_file_rejects_dot_segments() {
        for reference in [
            "gs://bucket/../../../../tmp/pwned",
            "gs://bucket/dir/../a.txt",
            "gs://bucket/./a.txt",
            "gs://bucket/dir/..",
        ] {
            assert!(
                matches!(RemoteFile::parse(reference), Err(ProxyError::Staging(_))),
                "{} should be rejected",
                reference
            );
        }
        // Dots inside a name are fine.
        assert!(RemoteFile::parse("gs://bucket/a..b/.hidden").is_ok());
    }

    #[test]
    fn escaping_reference_fails_file_map() {
        let remote = parse_json(r#"["gs://bucket/a.txt","gs://bucket/../../../../tmp/pwned"]"#);
        let result = build_file_map(&remote, Path::new("/w/job/downloads"));
        assert!(matches!(result, Err(ProxyError::Staging(_))));
    }

    #[test]
    fn build_file_map_for_array() {
        let remote = parse_json(r#"["gs://bucket/a.txt","gs://bucket/b.txt"]"#);
        let map = build_file_map(&remote, Path::new("/w/downloads")).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map["gs://bucket/a.txt"],
            PathBuf::from("/w/downloads/bucket/a.txt")
        );
        assert_eq!(
            map["gs://bucket/b.txt"],
            PathBuf::from("/w/downloads/bucket/b.txt")
        );
    }

    #[test]
    fn copy_with_file_map_is_isomorphic() {
        let remote = json!({
            "foo": "gs://bucket1/path/to/foo",
            "bar": ["gs://bucket2/bar1", "gs://bucket2/bar2"],
            "n": 1
        });
        let map = build_file_map(&remote, Path::new("/d")).unwrap();
        let local = copy_with_file_map(&remote, &map);
        assert_eq!(
            local,
            json!({
                "foo": "/d/bucket1/path/to/foo",
                "bar": ["/d/bucket2/bar1", "/d/bucket2/bar2"],
                "n": 1
            })
        );
    }

    #[test]
    fn copy_with_file_map_keeps_unmapped_strings() {
        let v = json!(["gs://bucket/unknown"]);
        assert_eq!(copy_with_file_map(&v, &FileMap::new()), v);
    }

    #[test]
    fn upload_target_splits_bucket() {
        let root = Path::new("/w/uploads");
        assert_eq!(
            upload_target(root, Path::new("/w/uploads/bucket2/out.txt")).unwrap(),
            ("bucket2".to_string(), "out.txt".to_string())
        );
        assert_eq!(
            upload_target(root, Path::new("/w/uploads/b/x/y.txt")).unwrap(),
            ("b".to_string(), "x/y.txt".to_string())
        );
        assert!(upload_target(root, Path::new("/w/uploads/loose.txt")).is_err());
    }

    #[test]
    fn list_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/sub")).unwrap();
        std::fs::write(dir.path().join("b/1.txt"), "1").unwrap();
        std::fs::write(dir.path().join("b/sub/2.txt"), "2").unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("b/1.txt"), dir.path().join("b/sub/2.txt")]
        );
    }
}
