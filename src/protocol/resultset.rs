//! Text-protocol result set decoding
//!
//! A `COM_QUERY` response is either OK/ERR or:
//! column count, N column definitions, EOF, rows..., EOF.

use std::sync::Arc;

/// Column counts come from the server; allocations up front are capped at this
pub const MAX_PREALLOCATED_COLUMNS: usize = 64;

/// One row of a text result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Build a row from literal pairs, mostly for fakes and tests
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Option<String>>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Some(v.into())))
            .unzip();
        Self::new(columns.into(), values)
    }

    /// Value at a zero-based column index; NULL and out of range are both None
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Value by column label, matched case-insensitively
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Read a length-encoded integer, advancing the slice
pub fn read_lenenc_int(buf: &mut &[u8]) -> Option<u64> {
    let (&first, rest) = buf.split_first()?;
    let (value, width) = match first {
        0..=0xFA => (first as u64, 0),
        0xFC if rest.len() >= 2 => (u16::from_le_bytes([rest[0], rest[1]]) as u64, 2),
        0xFD if rest.len() >= 3 => (u32::from_le_bytes([rest[0], rest[1], rest[2], 0]) as u64, 3),
        0xFE if rest.len() >= 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&rest[..8]);
            (u64::from_le_bytes(raw), 8)
        }
        _ => return None,
    };
    *buf = &rest[width..];
    Some(value)
}

/// Read a length-encoded string; `Some(None)` is SQL NULL (0xFB)
pub fn read_lenenc_str(buf: &mut &[u8]) -> Option<Option<String>> {
    if buf.first() == Some(&0xFB) {
        *buf = &buf[1..];
        return Some(None);
    }
    let len = read_lenenc_int(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let value = String::from_utf8_lossy(&buf[..len]).into_owned();
    *buf = &buf[len..];
    Some(Some(value))
}

/// Column count header of a result set
pub fn parse_column_count(payload: &[u8]) -> Option<usize> {
    let mut buf = payload;
    read_lenenc_int(&mut buf).map(|n| n as usize)
}

/// Extract the column label from a ColumnDefinition41 packet
pub fn parse_column_name(payload: &[u8]) -> Option<String> {
    let mut buf = payload;
    // catalog, schema, table, org_table precede the label
    for _ in 0..4 {
        read_lenenc_str(&mut buf)?;
    }
    Some(read_lenenc_str(&mut buf)?.unwrap_or_default())
}

/// Decode a text-protocol row with `column_count` values
pub fn parse_text_row(payload: &[u8], column_count: usize) -> Option<Vec<Option<String>>> {
    let mut buf = payload;
    let mut values = Vec::with_capacity(column_count.min(MAX_PREALLOCATED_COLUMNS));
    for _ in 0..column_count {
        values.push(read_lenenc_str(&mut buf)?);
    }
    Some(values)
}
