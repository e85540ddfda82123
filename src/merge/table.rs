use super::{MergeOutcome, MergeStrategy};
use crate::error::Result;

/// Cell-level merge for documents whose pipe tables keep their shape.
///
/// Two sides editing different cells of the same row merge cleanly, which a
/// line merge would report as a conflict. Anything this strategy cannot
/// settle is handed to the next strategy.
pub struct TableMerge;

impl MergeStrategy for TableMerge {
    fn name(&self) -> &'static str {
        "table merge"
    }

    fn merge(&self, base: &str, local: &str, remote: &str) -> Result<MergeOutcome> {
        Ok(merge_tables(base, local, remote).map_or(MergeOutcome::NotApplicable, MergeOutcome::Clean))
    }
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 2 && trimmed.starts_with('|') && trimmed.ends_with('|')
}

fn split_cells(line: &str) -> Vec<&str> {
    let trimmed = line.trim();
    trimmed[1..trimmed.len() - 1].split('|').collect()
}

fn pick<'a>(base: &'a str, local: &'a str, remote: &'a str) -> Option<&'a str> {
    if local == remote || remote == base {
        Some(local)
    } else if local == base {
        Some(remote)
    } else {
        None
    }
}

fn merge_tables(base: &str, local: &str, remote: &str) -> Option<String> {
    let base_lines: Vec<&str> = base.split('\n').collect();
    let local_lines: Vec<&str> = local.split('\n').collect();
    let remote_lines: Vec<&str> = remote.split('\n').collect();

    if base_lines.len() != local_lines.len() || base_lines.len() != remote_lines.len() {
        return None;
    }
    if !base_lines.iter().any(|l| is_table_row(l)) {
        return None;
    }

    let mut merged = Vec::with_capacity(base_lines.len());
    for ((b, l), r) in base_lines.iter().zip(&local_lines).zip(&remote_lines) {
        let rows = [is_table_row(b), is_table_row(l), is_table_row(r)];
        if rows.iter().all(|&row| !row) {
            merged.push(pick(b, l, r)?.to_string());
            continue;
        }
        if !rows.iter().all(|&row| row) {
            return None;
        }

        let (bc, lc, rc) = (split_cells(b), split_cells(l), split_cells(r));
        if bc.len() != lc.len() || bc.len() != rc.len() {
            return None;
        }

        // Whole-row agreement keeps the original spacing
        if let Some(line) = pick(b, l, r) {
            merged.push(line.to_string());
            continue;
        }

        let cells = bc
            .iter()
            .zip(&lc)
            .zip(&rc)
            .map(|((b, l), r)| pick(b, l, r))
            .collect::<Option<Vec<_>>>()?;
        let indent = &l[..l.len() - l.trim_start().len()];
        merged.push(format!("{}|{}|", indent, cells.join("|")));
    }

    Some(merged.join("\n"))
}
