use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::domain::{CDD_GROUP, GO_GROUP, IDENTITY_COLUMN, INTERPRO_GROUP};
use crate::error::GeneReportError;
use crate::table::{Cell, Table};

pub const GROUP_DELIMITER: &str = "|||";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedGroup {
    members: Vec<String>,
}

impl MergedGroup {
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn column_name(&self) -> String {
        self.members.join(GROUP_DELIMITER)
    }
}

pub fn merge_group(
    table: &Table,
    columns: &[&str],
) -> Result<(Table, MergedGroup), GeneReportError> {
    let mut members = Vec::new();
    for &column in columns {
        if table.has_column(column) {
            members.push(column.to_string());
        } else {
            warn!(column, "group member not in table, leaving it out of the merge");
        }
    }
    let group = MergedGroup { members };
    if group.members.is_empty() {
        return Ok((table.clone(), group));
    }

    let indices: Vec<usize> = group
        .members
        .iter()
        .filter_map(|member| table.column_index(member))
        .collect();
    let mut merged = Vec::with_capacity(table.len());
    for row in table.rows() {
        let mut parts = Vec::with_capacity(indices.len());
        for (&idx, member) in indices.iter().zip(&group.members) {
            let value = row[idx].as_deref().unwrap_or("");
            if value.contains(GROUP_DELIMITER) {
                return Err(GeneReportError::DelimiterCollision {
                    column: member.clone(),
                    value: value.to_string(),
                });
            }
            parts.push(value);
        }
        merged.push(Some(parts.join(GROUP_DELIMITER)));
    }

    let mut out = table.clone();
    let member_names: Vec<&str> = group.members.iter().map(String::as_str).collect();
    out.drop_columns(&member_names);
    out.set_column(&group.column_name(), merged)?;
    Ok((out, group))
}

pub fn unmerge_group(table: &Table, group: &MergedGroup) -> Result<Table, GeneReportError> {
    if group.members.is_empty() {
        return Ok(table.clone());
    }
    let merged_name = group.column_name();
    let values = table
        .column_values(&merged_name)
        .ok_or_else(|| GeneReportError::MissingColumn(merged_name.clone()))?;

    let width = group.members.len();
    let mut split: Vec<Vec<Cell>> = vec![Vec::with_capacity(table.len()); width];
    for value in values {
        let parts: Vec<&str> = match value {
            Some(value) => value.split(GROUP_DELIMITER).collect(),
            None => Vec::new(),
        };
        if parts.len() > width {
            return Err(GeneReportError::GroupArity {
                column: merged_name,
                expected: width,
                got: parts.len(),
            });
        }
        for (idx, column) in split.iter_mut().enumerate() {
            column.push(Some(parts.get(idx).copied().unwrap_or("").to_string()));
        }
    }

    let mut out = table.clone();
    out.drop_columns(&[merged_name.as_str()]);
    for (member, column) in group.members.iter().zip(split) {
        out.set_column(member, column)?;
    }
    Ok(out)
}

// Row i of an entity holds the i-th distinct value of each column, or "".
pub fn expand_rows(table: &Table, identity: &str) -> Result<Table, GeneReportError> {
    let identity_idx = table
        .column_index(identity)
        .ok_or_else(|| GeneReportError::MissingColumn(identity.to_string()))?;

    let mut order: Vec<&str> = Vec::new();
    let mut partitions: HashMap<&str, Vec<&[Cell]>> = HashMap::new();
    let mut unnamed = 0usize;
    for row in table.rows() {
        let entity = match row[identity_idx].as_deref() {
            Some(entity) if !entity.trim().is_empty() => entity,
            _ => {
                unnamed += 1;
                continue;
            }
        };
        partitions
            .entry(entity)
            .or_insert_with(|| {
                order.push(entity);
                Vec::new()
            })
            .push(row.as_slice());
    }
    if unnamed > 0 {
        warn!(identity, rows = unnamed, "dropping rows without an identity value");
    }

    let mut expanded = Table::new(table.columns().iter().cloned());
    for entity in order {
        let rows = &partitions[entity];
        let distinct: Vec<Vec<&str>> = (0..table.columns().len())
            .map(|col| distinct_in_order(rows.iter().map(|row| row[col].as_deref().unwrap_or(""))))
            .collect();
        let width = distinct.iter().map(Vec::len).max().unwrap_or(0);

        for i in 0..width {
            let row = distinct
                .iter()
                .enumerate()
                .map(|(col, values)| match values.get(i) {
                    Some(value) => Some(value.to_string()),
                    None if col == identity_idx => Some(entity.to_string()),
                    None => Some(String::new()),
                })
                .collect();
            expanded.push_row(row)?;
        }
    }
    Ok(expanded)
}

fn distinct_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    values.filter(|value| seen.insert(*value)).collect()
}

pub fn reshape_annotations(table: &Table) -> Result<Table, GeneReportError> {
    let (table, go) = merge_group(table, &GO_GROUP)?;
    let (table, interpro) = merge_group(&table, &INTERPRO_GROUP)?;
    let (table, cdd) = merge_group(&table, &CDD_GROUP)?;

    let table = expand_rows(&table, IDENTITY_COLUMN)?;

    let table = unmerge_group(&table, &go)?;
    let table = unmerge_group(&table, &interpro)?;
    unmerge_group(&table, &cdd)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn row(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|value| Some(value.to_string())).collect()
    }

    #[test]
    fn merge_joins_members_and_drops_originals() {
        let table = Table::from_rows(
            ["name", "go_id", "go_name"],
            vec![vec![Some("lacZ".into()), Some("GO:1".into()), None]],
        )
        .unwrap();
        let (merged, group) = merge_group(&table, &["go_id", "go_name", "go_type"]).unwrap();
        assert_eq!(group.members(), ["go_id", "go_name"]);
        assert_eq!(merged.columns(), ["name", "go_id|||go_name"]);
        assert_eq!(merged.get(0, "go_id|||go_name"), Some("GO:1|||"));
    }

    #[test]
    fn merge_rejects_delimiter_in_values() {
        let table = Table::from_rows(["a", "b"], vec![row(&["x|||y", "z"])]).unwrap();
        let err = merge_group(&table, &["a", "b"]).unwrap_err();
        assert_matches!(err, GeneReportError::DelimiterCollision { column, .. } if column == "a");
    }

    #[test]
    fn unmerge_restores_merged_group() {
        let table = Table::from_rows(
            ["name", "ipr_id", "ipr_name", "organism"],
            vec![
                row(&["lacZ", "IPR1", "Glyco hydro", "E. coli"]),
                row(&["recA", "", "", "E. coli"]),
            ],
        )
        .unwrap();
        let (merged, group) = merge_group(&table, &["ipr_id", "ipr_name"]).unwrap();
        let restored = unmerge_group(&merged, &group).unwrap();
        let names: Vec<&str> = table.columns().iter().map(String::as_str).collect();
        assert_eq!(restored.reindex(&names), table);
    }

    #[test]
    fn unmerge_pads_filler_cells() {
        let group = MergedGroup {
            members: vec!["a".into(), "b".into(), "c".into()],
        };
        let table = Table::from_rows(["a|||b|||c"], vec![row(&[""]), row(&["1|||2|||3"])]).unwrap();
        let restored = unmerge_group(&table, &group).unwrap();
        assert_eq!(restored.columns(), ["a", "b", "c"]);
        assert_eq!(restored.rows()[0], row(&["", "", ""]));
        assert_eq!(restored.rows()[1], row(&["1", "2", "3"]));
    }

    #[test]
    fn unmerge_rejects_extra_parts() {
        let group = MergedGroup {
            members: vec!["a".into(), "b".into()],
        };
        let table = Table::from_rows(["a|||b"], vec![row(&["1|||2|||3"])]).unwrap();
        let err = unmerge_group(&table, &group).unwrap_err();
        assert_matches!(err, GeneReportError::GroupArity { expected: 2, got: 3, .. });
    }

    #[test]
    fn expand_single_row_entity() {
        let table = Table::from_rows(["name", "organism"], vec![row(&["lacZ", "E. coli"])]).unwrap();
        let expanded = expand_rows(&table, "name").unwrap();
        assert_eq!(expanded, table);
    }

    #[test]
    fn expand_pads_short_columns_without_repeating() {
        let table = Table::from_rows(
            ["name", "go", "cdd"],
            vec![
                row(&["geneA", "g1", "c1"]),
                row(&["geneA", "g2", "c1"]),
                row(&["geneA", "g3", "c1"]),
            ],
        )
        .unwrap();
        let expanded = expand_rows(&table, "name").unwrap();
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded.rows()[0], row(&["geneA", "g1", "c1"]));
        assert_eq!(expanded.rows()[1], row(&["geneA", "g2", ""]));
        assert_eq!(expanded.rows()[2], row(&["geneA", "g3", ""]));
    }

    #[test]
    fn expand_keeps_entities_in_first_seen_order() {
        let table = Table::from_rows(
            ["name", "gi"],
            vec![
                row(&["recA", "2"]),
                row(&["lacZ", "1"]),
                row(&["recA", "2"]),
            ],
        )
        .unwrap();
        let expanded = expand_rows(&table, "name").unwrap();
        assert_eq!(expanded.rows(), [row(&["recA", "2"]), row(&["lacZ", "1"])]);
    }

    #[test]
    fn expand_drops_rows_without_identity() {
        let table = Table::from_rows(
            ["name", "go"],
            vec![
                row(&["lacZ", "g1"]),
                vec![None, Some("orphan".into())],
                row(&["  ", "g9"]),
            ],
        )
        .unwrap();
        let expanded = expand_rows(&table, "name").unwrap();
        assert_eq!(expanded.rows(), [row(&["lacZ", "g1"])]);
    }

    #[test]
    fn expand_requires_identity_column() {
        let table = Table::new(["gene"]);
        let err = expand_rows(&table, "name").unwrap_err();
        assert_matches!(err, GeneReportError::MissingColumn(_));
    }
}
