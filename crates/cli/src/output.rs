use serde::Serialize;
use std::collections::HashSet;

/// Keeps only the requested keys of each object; no fields means keep all.
pub fn filter_fields(mut rows: Vec<serde_json::Value>, fields: &[String]) -> Vec<serde_json::Value> {
    if fields.is_empty() {
        return rows;
    }
    let want: HashSet<String> = fields.iter().map(|s| s.trim().to_lowercase()).collect();
    for row in rows.iter_mut() {
        if let Some(obj) = row.as_object_mut() {
            obj.retain(|k, _| want.contains(&k.to_lowercase()));
        }
    }
    rows
}

pub fn to_rows<T: Serialize>(items: &[T]) -> anyhow::Result<Vec<serde_json::Value>> {
    items
        .iter()
        .map(|item| Ok(serde_json::to_value(item)?))
        .collect()
}

/// Pretty JSON array with `json`, otherwise one compact object per line.
pub fn render_rows(rows: &[serde_json::Value], json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(rows)?);
    }
    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        lines.push(serde_json::to_string(row)?);
    }
    Ok(lines.join("\n"))
}

pub fn print_rows<T: Serialize>(items: &[T], fields: &[String], json: bool) -> anyhow::Result<()> {
    let rows = filter_fields(to_rows(items)?, fields);
    let rendered = render_rows(&rows, json)?;
    if !rendered.is_empty() {
        println!("{rendered}");
    }
    Ok(())
}
