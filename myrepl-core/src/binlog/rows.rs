//! row events and the packed row image decoder
use super::table_map::TableMap;
use super::value::{read_value, BinlogValue};
use crate::error::{Error, Result};
use crate::util::{bitmap_index, bitmap_ones};
use bytes::{Buf, Bytes};
use myrepl_bytes::my::ReadMyEnc;
use myrepl_bytes::ReadBytesExt;

/// what a rows event does to its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// knobs of the row image decoder
#[derive(Debug, Clone, Default)]
pub struct RowsDecodeOpts {
    // temporals as chrono values instead of strings
    pub parse_time: bool,
    // decimals as bigdecimal instead of strings
    pub use_decimal: bool,
    // tolerate events with more columns than the table map knows,
    // produced by masters replaying DDL mid-transaction
    pub allow_extra_columns: bool,
}

/// one decoded row image, values in column order
///
/// columns absent from the present bitmap and NULL columns both
/// surface as BinlogValue::Null
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<BinlogValue>);

/// before and after images of one updated row
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub before: Row,
    pub after: Row,
}

/// WRITE_ROWS / DELETE_ROWS event body
#[derive(Debug, Clone)]
pub struct RowsData {
    pub kind: RowsKind,
    pub table_id: u64,
    pub flags: u16,
    pub extra_data: Bytes,
    pub n_cols: usize,
    pub rows: Vec<Row>,
}

/// UPDATE_ROWS event body
#[derive(Debug, Clone)]
pub struct UpdateRowsData {
    pub table_id: u64,
    pub flags: u16,
    pub extra_data: Bytes,
    pub n_cols: usize,
    pub rows: Vec<UpdateRow>,
}

fn corrupt<S: Into<String>>(msg: S) -> Error {
    Error::CorruptRowImage(msg.into())
}

/// common prefix of every rows event: table id, flags and, for v2,
/// a length-prefixed extra data block
pub(crate) struct RowsPrefix {
    pub table_id: u64,
    pub flags: u16,
    pub extra_data: Bytes,
    pub n_cols: usize,
    pub bitmap_len: usize,
}

pub(crate) fn read_rows_prefix(input: &mut Bytes, v2: bool) -> Result<RowsPrefix> {
    let table_id = input.read_le_u48()?;
    let flags = input.read_le_u16()?;
    let extra_data = if v2 {
        let extra_len = input.read_le_u16()?;
        // the length counts its own two bytes
        let extra_len = (extra_len as usize)
            .checked_sub(2)
            .ok_or_else(|| corrupt("invalid extra data length"))?;
        input.read_len(extra_len)?
    } else {
        Bytes::new()
    };
    let n_cols = input
        .read_len_enc_int()?
        .to_u64()
        .ok_or_else(|| corrupt("invalid column count"))? as usize;
    let bitmap_len = (n_cols + 7) / 8;
    Ok(RowsPrefix {
        table_id,
        flags,
        extra_data,
        n_cols,
        bitmap_len,
    })
}

fn check_width(n_cols: usize, table_map: &TableMap, opts: &RowsDecodeOpts) -> Result<usize> {
    if n_cols == table_map.col_count() {
        return Ok(n_cols);
    }
    if opts.allow_extra_columns && n_cols > table_map.col_count() {
        log::warn!(
            "rows event for {}.{} carries {} columns, table map has {}; truncating",
            table_map.schema_name,
            table_map.table_name,
            n_cols,
            table_map.col_count()
        );
        return Ok(table_map.col_count());
    }
    Err(corrupt(format!(
        "rows event has {} columns, table map {} has {}",
        n_cols,
        table_map.table_id,
        table_map.col_count()
    )))
}

/// decode one row image against the columns whose present bit is set
fn read_row(
    input: &mut Bytes,
    table_map: &TableMap,
    present: &[u8],
    n_cols: usize,
    decode_cols: usize,
    opts: &RowsDecodeOpts,
) -> Result<Row> {
    let present_count = bitmap_ones(present, n_cols);
    let null_bitmap = input
        .read_len((present_count + 7) / 8)
        .map_err(|_| corrupt("row shorter than its null bitmap"))?;
    let mut values = Vec::with_capacity(n_cols);
    let mut present_idx = 0;
    for i in 0..n_cols {
        if !bitmap_index(present, i) {
            values.push(BinlogValue::Null);
            continue;
        }
        let is_null = bitmap_index(null_bitmap.as_ref(), present_idx);
        present_idx += 1;
        if is_null {
            values.push(BinlogValue::Null);
            continue;
        }
        if i >= decode_cols {
            // truncated decode of an over-wide event
            values.push(BinlogValue::Null);
            continue;
        }
        let value = read_value(input, &table_map.cols[i], opts)
            .map_err(|e| corrupt(format!("column {} of {}: {}", i, table_map.table_name, e)))?;
        values.push(value);
    }
    Ok(Row(values))
}

pub(crate) fn read_write_or_delete_rows(
    input: &mut Bytes,
    kind: RowsKind,
    v2: bool,
    table_map: &TableMap,
    opts: &RowsDecodeOpts,
) -> Result<RowsData> {
    let prefix = read_rows_prefix(input, v2)?;
    let decode_cols = check_width(prefix.n_cols, table_map, opts)?;
    let present = input.read_len(prefix.bitmap_len)?;
    let mut rows = Vec::new();
    while input.has_remaining() {
        rows.push(read_row(
            input,
            table_map,
            present.as_ref(),
            prefix.n_cols,
            decode_cols,
            opts,
        )?);
    }
    Ok(RowsData {
        kind,
        table_id: prefix.table_id,
        flags: prefix.flags,
        extra_data: prefix.extra_data,
        n_cols: prefix.n_cols,
        rows,
    })
}

pub(crate) fn read_update_rows(
    input: &mut Bytes,
    v2: bool,
    table_map: &TableMap,
    opts: &RowsDecodeOpts,
) -> Result<UpdateRowsData> {
    let prefix = read_rows_prefix(input, v2)?;
    let decode_cols = check_width(prefix.n_cols, table_map, opts)?;
    let present_before = input.read_len(prefix.bitmap_len)?;
    let present_after = input.read_len(prefix.bitmap_len)?;
    let mut rows = Vec::new();
    while input.has_remaining() {
        let before = read_row(
            input,
            table_map,
            present_before.as_ref(),
            prefix.n_cols,
            decode_cols,
            opts,
        )?;
        let after = read_row(
            input,
            table_map,
            present_after.as_ref(),
            prefix.n_cols,
            decode_cols,
            opts,
        )?;
        rows.push(UpdateRow { before, after });
    }
    Ok(UpdateRowsData {
        table_id: prefix.table_id,
        flags: prefix.flags,
        extra_data: prefix.extra_data,
        n_cols: prefix.n_cols,
        rows,
    })
}
