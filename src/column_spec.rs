// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Column key spec parsing.
//!
//! The user-facing syntax assigns encrypted columns to master keys:
//!
//! ```text
//! spec  := group (";" group)*
//! group := masterKeyId ":" column ("," column)*
//! ```
//!
//! For example `"kc1:id,address;kc2:phone"` protects `id` and `address` with
//! master key `kc1` and `phone` with `kc2`. One data encryption key is
//! generated per group.

use std::collections::HashSet;

use crate::{Error, ErrorKind, Result};

/// One parsed group: a master key id and the columns it protects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKeyGroup {
    /// ID of the master key protecting this group.
    pub master_key_id: String,
    /// Paths of the columns in this group.
    pub columns: Vec<String>,
}

/// Parses a column key spec into its groups, preserving group order.
///
/// Fails with [`ErrorKind::SpecInvalid`] on an empty group, a group without
/// columns, a column listed in more than one group, or malformed separators;
/// the error message names the offending fragment.
pub fn parse_column_keys(spec: &str) -> Result<Vec<ColumnKeyGroup>> {
    if spec.trim().is_empty() {
        return Err(Error::new(
            ErrorKind::SpecInvalid,
            "Column key spec is empty",
        ));
    }

    let mut groups = Vec::new();
    let mut seen_columns: HashSet<String> = HashSet::new();

    for fragment in spec.split(';') {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(spec_error(spec, "empty key group"));
        }

        let (master_key_id, columns) = fragment
            .split_once(':')
            .ok_or_else(|| spec_error(fragment, "missing ':' between master key and columns"))?;

        let master_key_id = master_key_id.trim();
        if master_key_id.is_empty() {
            return Err(spec_error(fragment, "empty master key id"));
        }

        let mut group_columns = Vec::new();
        for column in columns.split(',') {
            let column = column.trim();
            if column.is_empty() {
                return Err(spec_error(fragment, "empty column name"));
            }
            if !seen_columns.insert(column.to_string()) {
                return Err(spec_error(
                    fragment,
                    format!("column '{column}' is assigned to more than one master key"),
                ));
            }
            group_columns.push(column.to_string());
        }

        if group_columns.is_empty() {
            return Err(spec_error(fragment, "key group has no columns"));
        }

        groups.push(ColumnKeyGroup {
            master_key_id: master_key_id.to_string(),
            columns: group_columns,
        });
    }

    Ok(groups)
}

fn spec_error(fragment: &str, reason: impl Into<String>) -> Error {
    Error::new(ErrorKind::SpecInvalid, reason).with_context("fragment", fragment)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_two_groups() {
        let groups = parse_column_keys("k1:colA,colB;k2:colC").unwrap();
        assert_eq!(groups, vec![
            ColumnKeyGroup {
                master_key_id: "k1".to_string(),
                columns: vec!["colA".to_string(), "colB".to_string()],
            },
            ColumnKeyGroup {
                master_key_id: "k2".to_string(),
                columns: vec!["colC".to_string()],
            },
        ]);
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let groups = parse_column_keys(" k1 : colA , colB ; k2 : colC ").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].columns, vec!["colA", "colB"]);
        assert_eq!(groups[1].master_key_id, "k2");
    }

    #[test]
    fn test_parse_preserves_group_order() {
        let groups = parse_column_keys("kz:c1;ka:c2;km:c3").unwrap();
        let ids: Vec<_> = groups.iter().map(|g| g.master_key_id.as_str()).collect();
        assert_eq!(ids, vec!["kz", "ka", "km"]);
    }

    #[test]
    fn test_duplicate_column_across_groups_rejected() {
        let err = parse_column_keys("k1:colA;k2:colA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpecInvalid);
        assert!(err.message().contains("colA"));
    }

    #[test]
    fn test_duplicate_column_within_group_rejected() {
        let err = parse_column_keys("k1:colA,colA").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpecInvalid);
    }

    #[test]
    fn test_malformed_specs_rejected() {
        for spec in ["", "  ", "k1", "k1:", ":colA", "k1:colA;;k2:colB", "k1:colA,", "k1:colA;"] {
            let err = parse_column_keys(spec).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SpecInvalid, "spec {spec:?}");
        }
    }

    #[test]
    fn test_error_names_offending_fragment() {
        let err = parse_column_keys("k1:colA;badgroup").unwrap_err();
        assert!(format!("{err}").contains("badgroup"));
    }
}
