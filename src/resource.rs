// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `read(...)` resource loader.
//!
//! Paths resolve relative to the current feature file. The extension picks
//! the parse: `.json`, `.yaml`/`.yml`, `.csv` (list of maps), `.txt`
//! (verbatim string), `.feature` (a feature reference for `call`), anything
//! else raw (string when UTF-8, bytes otherwise). A `@tag` suffix narrows a
//! feature reference; a bare `@tag` means the current feature.

use std::{fs, path::{Path, PathBuf}};

use crate::{
    error::StepError,
    value::{FeatureRef, Map, Value},
};

/// Loader bound to one feature's directory.
#[derive(Clone, Debug)]
pub struct ResourceLoader {
    /// Directory reads resolve against.
    pub base: PathBuf,

    /// The feature file being executed, for bare `@tag` references.
    pub current_feature: Option<PathBuf>,
}

impl ResourceLoader {
    /// Creates a loader rooted at the directory of `feature_path`.
    #[must_use]
    pub fn for_feature(feature_path: &Path) -> Self {
        Self {
            base: feature_path
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            current_feature: Some(feature_path.to_path_buf()),
        }
    }

    /// Creates a loader rooted at an arbitrary directory.
    #[must_use]
    pub fn rooted(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), current_feature: None }
    }

    /// Resolves a path spec against the loader root.
    #[must_use]
    pub fn resolve(&self, spec: &str) -> PathBuf {
        let p = Path::new(spec);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base.join(p)
        }
    }

    /// Reads and parses a resource by its extension.
    ///
    /// # Errors
    ///
    /// [`StepError::Resource`] when the file is missing or unparseable.
    pub fn read(&self, spec: &str) -> Result<Value, StepError> {
        let spec = spec.trim();

        // `@tag` alone references scenarios of the current feature.
        if let Some(tag) = spec.strip_prefix('@') {
            let path = self.current_feature.clone().ok_or_else(|| {
                StepError::Resource(format!(
                    "no current feature to resolve @{tag} against"
                ))
            })?;
            return Ok(Value::FeatureRef(FeatureRef {
                path,
                tag: Some(tag.to_owned()),
            }));
        }

        let (path_spec, tag) = match spec.rsplit_once('@') {
            Some((p, t)) if p.ends_with(".feature") => {
                (p, Some(t.to_owned()))
            }
            _ => (spec, None),
        };
        let path = self.resolve(path_spec);

        if path_spec.ends_with(".feature") {
            if !path.is_file() {
                return Err(StepError::Resource(format!(
                    "feature not found: {}",
                    path.display(),
                )));
            }
            return Ok(Value::FeatureRef(FeatureRef { path, tag }));
        }

        let bytes = fs::read(&path).map_err(|e| {
            StepError::Resource(format!("{}: {e}", path.display()))
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => {
                let text = utf8(&path, bytes)?;
                Value::parse_json(&text).map_err(|e| {
                    StepError::Resource(format!("{}: {e}", path.display()))
                })
            }
            "yaml" | "yml" => {
                let text = utf8(&path, bytes)?;
                let json: serde_json::Value = serde_yaml::from_str(&text)
                    .map_err(|e| {
                        StepError::Resource(format!("{}: {e}", path.display()))
                    })?;
                Ok(Value::from_json(json))
            }
            "csv" => {
                let text = utf8(&path, bytes)?;
                parse_csv(&text).map_err(|e| {
                    StepError::Resource(format!("{}: {e}", path.display()))
                })
            }
            "xml" => {
                let text = utf8(&path, bytes)?;
                crate::xml::parse(&text).map(Value::Xml).map_err(|e| {
                    StepError::Resource(format!("{}: {e}", path.display()))
                })
            }
            "txt" => utf8(&path, bytes).map(Value::String),
            _ => Ok(String::from_utf8(bytes)
                .map_or_else(|e| Value::Bytes(e.into_bytes()), Value::String)),
        }
    }

    /// Reads a resource as raw bytes (multipart file contents).
    ///
    /// # Errors
    ///
    /// [`StepError::Resource`] when the file is missing.
    pub fn read_bytes(&self, spec: &str) -> Result<Vec<u8>, StepError> {
        let path = self.resolve(spec.trim());
        fs::read(&path)
            .map_err(|e| StepError::Resource(format!("{}: {e}", path.display())))
    }
}

fn utf8(path: &Path, bytes: Vec<u8>) -> Result<String, StepError> {
    String::from_utf8(bytes).map_err(|_| {
        StepError::Resource(format!("{}: not valid utf-8", path.display()))
    })
}

/// Parses CSV text into a list of maps keyed by the header row.
pub fn parse_csv(text: &str) -> Result<Value, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers: Vec<String> =
        reader.headers()?.iter().map(str::to_owned).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), Value::String(cell.to_owned()));
        }
        rows.push(Value::Map(row));
    }
    Ok(Value::List(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parses_to_list_of_maps() {
        let v = parse_csv("name,age\nBillie,3\nWild,2\n").unwrap();
        let rows = v.as_list().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].as_map().unwrap().get("name"),
            Some(&Value::String("Billie".into())),
        );
        assert_eq!(
            rows[1].as_map().unwrap().get("age"),
            Some(&Value::String("2".into())),
        );
    }

    #[test]
    fn read_dispatches_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"a":1}"#).unwrap();
        std::fs::write(dir.path().join("note.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("other.feature"), "Feature:\n").unwrap();

        let loader = ResourceLoader::rooted(dir.path());
        assert_eq!(
            loader.read("data.json").unwrap(),
            Value::parse_json(r#"{"a":1}"#).unwrap(),
        );
        assert_eq!(
            loader.read("note.txt").unwrap(),
            Value::String("hello".into()),
        );
        let Value::FeatureRef(f) = loader.read("other.feature@smoke").unwrap()
        else {
            panic!("expected feature ref");
        };
        assert_eq!(f.tag.as_deref(), Some("smoke"));
    }

    #[test]
    fn bare_tag_references_current_feature() {
        let loader = ResourceLoader {
            base: PathBuf::from("."),
            current_feature: Some(PathBuf::from("./self.feature")),
        };
        let Value::FeatureRef(f) = loader.read("@setup").unwrap() else {
            panic!("expected feature ref");
        };
        assert_eq!(f.tag.as_deref(), Some("setup"));
        assert_eq!(f.path, PathBuf::from("./self.feature"));
    }
}
