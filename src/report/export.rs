use crate::record::{FlatRecord, StoredRecord, FIELD_NAMES, RECORD_ID_KEY};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::Write;

/// 列表视图中显示的列
const TABLE_COLUMNS: [&str; 12] = [
    RECORD_ID_KEY,
    "Age",
    "Gender",
    "Species",
    "Setting",
    "Acquisition",
    "BSI_Source",
    "CR",
    "BLBLI_R",
    "FQR",
    "GC3_R",
    "Created_At",
];

/// 默认导出文件名
pub fn default_export_name(today: NaiveDate) -> String {
    format!("patient_data_{}.csv", today.format("%Y-%m-%d"))
}

/// 把记录写成 CSV
///
/// 列顺序：出现过的固定字段（按表单顺序）、其他列（按名称）、标识符。
pub fn write_csv<W: Write>(records: &[StoredRecord], writer: W) -> Result<()> {
    let rows = to_flat_rows(records)?;
    let columns = columns_for(&rows);

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&columns).context("写入 CSV 表头失败")?;
    for row in &rows {
        wtr.write_record(columns.iter().map(|column| cell_text(row.get(column))))
            .context("写入 CSV 行失败")?;
    }
    wtr.flush().context("写入 CSV 失败")?;
    Ok(())
}

/// 以对齐的文本表格输出记录
pub fn write_table<W: Write>(records: &[StoredRecord], mut writer: W) -> Result<()> {
    let rows = to_flat_rows(records)?;
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            TABLE_COLUMNS
                .iter()
                .map(|column| cell_text(row.get(*column)))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = TABLE_COLUMNS
        .iter()
        .enumerate()
        .map(|(index, header)| {
            cells
                .iter()
                .map(|row| row[index].chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = TABLE_COLUMNS.iter().map(|h| h.to_string()).collect();
    write_row(&mut writer, &header, &widths)?;
    for row in &cells {
        write_row(&mut writer, row, &widths)?;
    }
    Ok(())
}

fn write_row<W: Write>(writer: &mut W, cells: &[String], widths: &[usize]) -> Result<()> {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.chars().count());
            format!("{}{}", cell, " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(writer, "{}", line.trim_end())?;
    Ok(())
}

fn to_flat_rows(records: &[StoredRecord]) -> Result<Vec<FlatRecord>> {
    records
        .iter()
        .map(|record| {
            record
                .to_flat()
                .with_context(|| format!("无法展开记录 {}", record.id))
        })
        .collect()
}

fn columns_for(rows: &[FlatRecord]) -> Vec<String> {
    let present: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let mut columns: Vec<String> = Vec::new();
    columns.extend(
        FIELD_NAMES
            .iter()
            .filter(|name| present.contains(**name))
            .map(|name| name.to_string()),
    );
    columns.extend(
        present
            .iter()
            .filter(|name| **name != RECORD_ID_KEY && !FIELD_NAMES.contains(*name))
            .map(|name| name.to_string()),
    );
    columns.push(RECORD_ID_KEY.to_string());
    columns
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
