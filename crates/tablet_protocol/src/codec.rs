//! Value codec for bind variables, result cells and result sets.
//!
//! All multi-byte integers are little-endian. A bind variable is encoded as
//! `[tag: u8][payload_len: u32][payload]`, and the payload length must agree
//! with the tag: 0 bytes for NULL, 8 for INT/UINT/FLOAT, and for lists a
//! `u32` count followed by exactly that many elements.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::types::*;

type Result<T> = std::result::Result<T, ProtocolError>;

// ── Helper: read/write primitives ────────────────────────────────────────

fn ensure(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(ProtocolError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    let v = buf[0];
    *buf = &buf[1..];
    Ok(v)
}

fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    let v = u16::from_le_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    let v = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_fixed<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    ensure(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[..N]);
    *buf = &buf[N..];
    Ok(arr)
}

fn read_u64(buf: &mut &[u8]) -> Result<u64> {
    Ok(u64::from_le_bytes(read_fixed::<8>(buf)?))
}

fn read_i64(buf: &mut &[u8]) -> Result<i64> {
    Ok(i64::from_le_bytes(read_fixed::<8>(buf)?))
}

fn read_f64(buf: &mut &[u8]) -> Result<f64> {
    Ok(f64::from_le_bytes(read_fixed::<8>(buf)?))
}

fn read_slice<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    ensure(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_string_u16(buf: &mut &[u8], field: &str) -> Result<String> {
    let len = read_u16(buf)? as usize;
    let bytes = read_slice(buf, len)?.to_vec();
    String::from_utf8(bytes).map_err(|e| ProtocolError::InvalidUtf8 {
        field: field.to_string(),
        source: e,
    })
}

fn write_string_u16(out: &mut BytesMut, s: &str, field: &str) -> Result<()> {
    if s.len() > u16::MAX as usize {
        return Err(ProtocolError::TooLong {
            field: field.to_string(),
            len: s.len(),
            max: u16::MAX as usize,
        });
    }
    out.put_u16_le(s.len() as u16);
    out.put_slice(s.as_bytes());
    Ok(())
}

fn u32_len(len: usize, field: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| ProtocolError::TooLong {
        field: field.to_string(),
        len,
        max: u32::MAX as usize,
    })
}

fn write_bytes_u32(out: &mut BytesMut, b: &[u8], field: &str) -> Result<()> {
    out.put_u32_le(u32_len(b.len(), field)?);
    out.put_slice(b);
    Ok(())
}

fn expect_consumed(buf: &[u8], field: &str) -> Result<()> {
    if !buf.is_empty() {
        return Err(ProtocolError::TrailingBytes {
            field: field.to_string(),
            remaining: buf.len(),
        });
    }
    Ok(())
}

// ── Native value <-> bind variable ───────────────────────────────────────

/// Encode a native value as its tagged bind variable. Total.
pub fn encode_value(v: &Value) -> BindVariable {
    match v {
        Value::Null => BindVariable::Null,
        Value::Bytes(b) => BindVariable::Bytes(b.clone()),
        Value::Int(i) => BindVariable::Int(*i),
        Value::Uint(u) => BindVariable::Uint(*u),
        Value::Float(f) => BindVariable::Float(*f),
        Value::BytesList(l) => BindVariable::BytesList(l.clone()),
        Value::IntList(l) => BindVariable::IntList(l.clone()),
        Value::UintList(l) => BindVariable::UintList(l.clone()),
        Value::FloatList(l) => BindVariable::FloatList(l.clone()),
    }
}

/// Decode a bind variable into a native value. Total; the inverse of
/// [`encode_value`].
pub fn decode_value(bv: &BindVariable) -> Value {
    match bv {
        BindVariable::Null => Value::Null,
        BindVariable::Bytes(b) => Value::Bytes(b.clone()),
        BindVariable::Int(i) => Value::Int(*i),
        BindVariable::Uint(u) => Value::Uint(*u),
        BindVariable::Float(f) => Value::Float(*f),
        BindVariable::BytesList(l) => Value::BytesList(l.clone()),
        BindVariable::IntList(l) => Value::IntList(l.clone()),
        BindVariable::UintList(l) => Value::UintList(l.clone()),
        BindVariable::FloatList(l) => Value::FloatList(l.clone()),
    }
}

/// Reject bind variables no statement can use: unnamed ones and empty
/// `IN (...)` lists.
pub fn validate_bind_variables(vars: &BindVariables) -> Result<()> {
    for (name, bv) in vars {
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        let empty = match bv {
            BindVariable::BytesList(l) => l.is_empty(),
            BindVariable::IntList(l) => l.is_empty(),
            BindVariable::UintList(l) => l.is_empty(),
            BindVariable::FloatList(l) => l.is_empty(),
            _ => false,
        };
        if empty {
            return Err(ProtocolError::EmptyList(name.clone()));
        }
    }
    Ok(())
}

// ── Bind variable wire form ──────────────────────────────────────────────

fn write_payload(out: &mut BytesMut, bv: &BindVariable) -> Result<()> {
    match bv {
        BindVariable::Null => {}
        BindVariable::Bytes(b) => out.put_slice(b),
        BindVariable::Int(i) => out.put_i64_le(*i),
        BindVariable::Uint(u) => out.put_u64_le(*u),
        BindVariable::Float(f) => out.put_f64_le(*f),
        BindVariable::BytesList(l) => {
            out.put_u32_le(u32_len(l.len(), "list")?);
            for b in l {
                write_bytes_u32(out, b, "list_element")?;
            }
        }
        BindVariable::IntList(l) => {
            out.put_u32_le(u32_len(l.len(), "list")?);
            for i in l {
                out.put_i64_le(*i);
            }
        }
        BindVariable::UintList(l) => {
            out.put_u32_le(u32_len(l.len(), "list")?);
            for u in l {
                out.put_u64_le(*u);
            }
        }
        BindVariable::FloatList(l) => {
            out.put_u32_le(u32_len(l.len(), "list")?);
            for f in l {
                out.put_f64_le(*f);
            }
        }
    }
    Ok(())
}

/// Append one tagged bind variable to `out`.
pub fn write_bind_variable(out: &mut BytesMut, bv: &BindVariable) -> Result<()> {
    let mut payload = BytesMut::new();
    write_payload(&mut payload, bv)?;
    out.put_u8(bv.tag());
    write_bytes_u32(out, &payload, "bind_variable")
}

fn fixed_width(tag: u8, payload: &[u8], width: usize) -> Result<()> {
    if payload.len() != width {
        return Err(ProtocolError::PayloadMismatch {
            tag,
            expected: format!("{} bytes", width),
            actual: payload.len(),
        });
    }
    Ok(())
}

fn numeric_list_width(tag: u8, payload: &[u8]) -> Result<usize> {
    let mut buf = payload;
    let count = read_u32(&mut buf)? as usize;
    let need = count.checked_mul(8).and_then(|n| n.checked_add(4));
    if need != Some(payload.len()) {
        return Err(ProtocolError::PayloadMismatch {
            tag,
            expected: format!("4 + 8 * {} bytes", count),
            actual: payload.len(),
        });
    }
    Ok(count)
}

/// Read one tagged bind variable from the front of `buf`.
pub fn read_bind_variable(buf: &mut &[u8]) -> Result<BindVariable> {
    let tag = read_u8(buf)?;
    let len = read_u32(buf)? as usize;
    let payload = read_slice(buf, len)?;
    let bv = match tag {
        TAG_NULL => {
            fixed_width(tag, payload, 0)?;
            BindVariable::Null
        }
        TAG_BYTES => BindVariable::Bytes(payload.to_vec()),
        TAG_INT => {
            fixed_width(tag, payload, 8)?;
            BindVariable::Int(read_i64(&mut &payload[..])?)
        }
        TAG_UINT => {
            fixed_width(tag, payload, 8)?;
            BindVariable::Uint(read_u64(&mut &payload[..])?)
        }
        TAG_FLOAT => {
            fixed_width(tag, payload, 8)?;
            BindVariable::Float(read_f64(&mut &payload[..])?)
        }
        TAG_BYTES_LIST => {
            let mut p = payload;
            let count = read_u32(&mut p)? as usize;
            let mut items = Vec::with_capacity(count.min(65536));
            for _ in 0..count {
                let n = read_u32(&mut p)? as usize;
                items.push(read_slice(&mut p, n)?.to_vec());
            }
            expect_consumed(p, "bytes_list")?;
            BindVariable::BytesList(items)
        }
        TAG_INT_LIST => {
            let count = numeric_list_width(tag, payload)?;
            let mut p = &payload[4..];
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_i64(&mut p)?);
            }
            BindVariable::IntList(items)
        }
        TAG_UINT_LIST => {
            let count = numeric_list_width(tag, payload)?;
            let mut p = &payload[4..];
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_u64(&mut p)?);
            }
            BindVariable::UintList(items)
        }
        TAG_FLOAT_LIST => {
            let count = numeric_list_width(tag, payload)?;
            let mut p = &payload[4..];
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_f64(&mut p)?);
            }
            BindVariable::FloatList(items)
        }
        other => return Err(ProtocolError::UnknownTag(other)),
    };
    Ok(bv)
}

pub fn encode_bind_variable(bv: &BindVariable) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(16);
    write_bind_variable(&mut out, bv)?;
    Ok(out)
}

/// Decode exactly one bind variable; leftover input is an error.
pub fn decode_bind_variable(input: &[u8]) -> Result<BindVariable> {
    let mut buf = input;
    let bv = read_bind_variable(&mut buf)?;
    expect_consumed(buf, "bind_variable")?;
    Ok(bv)
}

// ── Bound query wire form ────────────────────────────────────────────────

pub fn encode_bound_query(q: &BoundQuery) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(64 + q.sql.len());
    write_bytes_u32(&mut out, &q.sql, "sql")?;
    if q.bind_variables.len() > u16::MAX as usize {
        return Err(ProtocolError::TooLong {
            field: "bind_variables".into(),
            len: q.bind_variables.len(),
            max: u16::MAX as usize,
        });
    }
    out.put_u16_le(q.bind_variables.len() as u16);
    for (name, bv) in &q.bind_variables {
        write_string_u16(&mut out, name, "bind_variable_name")?;
        write_bind_variable(&mut out, bv)?;
    }
    Ok(out)
}

pub fn decode_bound_query(input: &[u8]) -> Result<BoundQuery> {
    let mut buf = input;
    let sql_len = read_u32(&mut buf)? as usize;
    let sql = read_slice(&mut buf, sql_len)?.to_vec();
    let count = read_u16(&mut buf)? as usize;
    let mut bind_variables = BindVariables::new();
    for _ in 0..count {
        let name = read_string_u16(&mut buf, "bind_variable_name")?;
        let bv = read_bind_variable(&mut buf)?;
        bind_variables.insert(name, bv);
    }
    expect_consumed(buf, "bound_query")?;
    Ok(BoundQuery {
        sql,
        bind_variables,
    })
}

// ── Result cells ─────────────────────────────────────────────────────────

/// Render a native value as a result cell (text form for numbers).
pub fn value_to_cell(v: &Value) -> Result<Cell> {
    let cell = match v {
        Value::Null => Cell(None),
        Value::Bytes(b) => Cell(Some(b.clone())),
        Value::Int(i) => Cell(Some(i.to_string().into_bytes())),
        Value::Uint(u) => Cell(Some(u.to_string().into_bytes())),
        Value::Float(f) => Cell(Some(f.to_string().into_bytes())),
        other => return Err(ProtocolError::NonScalarCell(other.type_name())),
    };
    Ok(cell)
}

/// Interpret a result cell according to its column's type and flags.
pub fn cell_to_value(cell: &Cell, field: &Field) -> Result<Value> {
    let bytes = match &cell.0 {
        None => return Ok(Value::Null),
        Some(b) => b,
    };
    if field.field_type == FieldType::Null {
        return Ok(Value::Null);
    }
    let numeric = field.field_type.is_integral() || field.field_type.is_float();
    if !numeric {
        return Ok(Value::Bytes(bytes.clone()));
    }
    let invalid = |reason: String| ProtocolError::InvalidCell {
        column: field.name.clone(),
        reason,
    };
    let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
    if field.field_type.is_float() {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|e| invalid(format!("{:?}: {}", text, e)))
    } else if field.has_flag(FLAG_UNSIGNED) {
        text.parse::<u64>()
            .map(Value::Uint)
            .map_err(|e| invalid(format!("{:?}: {}", text, e)))
    } else {
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|e| invalid(format!("{:?}: {}", text, e)))
    }
}

// ── Null bitmap helpers ──────────────────────────────────────────────────

fn null_bitmap_size(num_cols: usize) -> usize {
    num_cols.div_ceil(8)
}

fn encode_null_bitmap(out: &mut BytesMut, cells: &[Cell]) {
    let mut bitmap = vec![0u8; null_bitmap_size(cells.len())];
    for (i, c) in cells.iter().enumerate() {
        if c.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    out.put_slice(&bitmap);
}

fn decode_null_bitmap(buf: &mut &[u8], num_cols: usize) -> Result<Vec<bool>> {
    let bitmap = read_slice(buf, null_bitmap_size(num_cols))?;
    Ok((0..num_cols)
        .map(|i| bitmap[i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

// ── Row encode/decode ────────────────────────────────────────────────────

/// Write `[column_count u16][row_count u32]` and every row. Each row must
/// be exactly `num_cols` wide.
pub fn write_rows(out: &mut BytesMut, rows: &[Row], num_cols: usize) -> Result<()> {
    if num_cols > u16::MAX as usize {
        return Err(ProtocolError::TooLong {
            field: "columns".into(),
            len: num_cols,
            max: u16::MAX as usize,
        });
    }
    if num_cols == 0 && !rows.is_empty() {
        return Err(ProtocolError::ZeroWidthRows(rows.len()));
    }
    out.put_u16_le(num_cols as u16);
    out.put_u32_le(u32_len(rows.len(), "rows")?);
    for row in rows {
        if row.cells.len() != num_cols {
            return Err(ProtocolError::RowWidth {
                expected: num_cols,
                actual: row.cells.len(),
            });
        }
        encode_null_bitmap(out, &row.cells);
        for cell in &row.cells {
            if let Some(b) = &cell.0 {
                write_bytes_u32(out, b, "cell")?;
            }
        }
    }
    Ok(())
}

pub fn read_rows(buf: &mut &[u8]) -> Result<(usize, Vec<Row>)> {
    let num_cols = read_u16(buf)? as usize;
    let num_rows = read_u32(buf)? as usize;
    // Every row costs at least its null bitmap, so a zero-width row count
    // is unbounded by the input.
    if num_cols == 0 && num_rows > 0 {
        return Err(ProtocolError::ZeroWidthRows(num_rows));
    }
    let mut rows = Vec::with_capacity(num_rows.min(65536));
    for _ in 0..num_rows {
        let is_null = decode_null_bitmap(buf, num_cols)?;
        let mut cells = Vec::with_capacity(num_cols);
        for null in is_null {
            if null {
                cells.push(Cell(None));
            } else {
                let n = read_u32(buf)? as usize;
                cells.push(Cell(Some(read_slice(buf, n)?.to_vec())));
            }
        }
        rows.push(Row { cells });
    }
    Ok((num_cols, rows))
}

// ── Query result encode/decode ───────────────────────────────────────────

/// Encode a full result or one streamed message. A row-only message (no
/// fields) takes its column count from its first row.
pub fn encode_query_result(r: &QueryResult) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(256);
    if r.fields.len() > u16::MAX as usize {
        return Err(ProtocolError::TooLong {
            field: "fields".into(),
            len: r.fields.len(),
            max: u16::MAX as usize,
        });
    }
    out.put_u16_le(r.fields.len() as u16);
    for f in &r.fields {
        write_string_u16(&mut out, &f.name, "field_name")?;
        out.put_u8(f.field_type.code());
        out.put_u32_le(f.flags);
    }
    out.put_u64_le(r.rows_affected);
    out.put_u64_le(r.insert_id);
    let num_cols = if r.fields.is_empty() {
        r.rows.first().map(|row| row.cells.len()).unwrap_or(0)
    } else {
        r.fields.len()
    };
    write_rows(&mut out, &r.rows, num_cols)?;
    Ok(out)
}

pub fn decode_query_result(input: &[u8]) -> Result<QueryResult> {
    let mut buf = input;
    let num_fields = read_u16(&mut buf)? as usize;
    let mut fields = Vec::with_capacity(num_fields);
    for _ in 0..num_fields {
        let name = read_string_u16(&mut buf, "field_name")?;
        let field_type = FieldType::try_from(read_u8(&mut buf)?)?;
        let flags = read_u32(&mut buf)?;
        fields.push(Field {
            name,
            field_type,
            flags,
        });
    }
    let rows_affected = read_u64(&mut buf)?;
    let insert_id = read_u64(&mut buf)?;
    let (num_cols, rows) = read_rows(&mut buf)?;
    if !fields.is_empty() && num_cols != fields.len() {
        return Err(ProtocolError::RowWidth {
            expected: fields.len(),
            actual: num_cols,
        });
    }
    expect_consumed(buf, "query_result")?;
    Ok(QueryResult {
        fields,
        rows_affected,
        insert_id,
        rows,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn all_values() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Bytes(vec![]),
            Value::Bytes(b"\x00\xffhello".to_vec()),
            Value::Int(i64::MIN),
            Value::Int(-1),
            Value::Uint(u64::MAX),
            Value::Float(-0.5),
            Value::Float(f64::MAX),
            Value::BytesList(vec![b"a".to_vec(), vec![], b"ccc".to_vec()]),
            Value::IntList(vec![3, 1, 2]),
            Value::UintList(vec![u64::MAX, 0]),
            Value::FloatList(vec![1.25, -2.5]),
        ]
    }

    #[test]
    fn test_value_roundtrip_through_bind_variable() {
        for v in all_values() {
            assert_eq!(decode_value(&encode_value(&v)), v);
        }
    }

    #[test]
    fn test_wire_roundtrip_preserves_list_order() {
        for v in all_values() {
            let bv = encode_value(&v);
            let bytes = encode_bind_variable(&bv).unwrap();
            assert_eq!(bytes[0], bv.tag());
            assert_eq!(decode_bind_variable(&bytes).unwrap(), bv);
        }
    }

    #[test]
    fn test_nan_roundtrips_bitwise() {
        let bytes = encode_bind_variable(&BindVariable::Float(f64::NAN)).unwrap();
        match decode_bind_variable(&bytes).unwrap() {
            BindVariable::Float(f) => assert_eq!(f.to_bits(), f64::NAN.to_bits()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_int_tag_with_short_payload_is_malformed() {
        let mut raw = BytesMut::new();
        raw.put_u8(TAG_INT);
        raw.put_u32_le(3);
        raw.put_slice(&[1, 2, 3]);
        let err = decode_bind_variable(&raw).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadMismatch { tag: TAG_INT, .. }));
    }

    #[test]
    fn test_null_tag_with_payload_is_malformed() {
        let mut raw = BytesMut::new();
        raw.put_u8(TAG_NULL);
        raw.put_u32_le(1);
        raw.put_u8(0);
        assert!(decode_bind_variable(&raw).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        let mut raw = BytesMut::new();
        raw.put_u8(9);
        raw.put_u32_le(0);
        assert!(matches!(
            decode_bind_variable(&raw).unwrap_err(),
            ProtocolError::UnknownTag(9)
        ));
    }

    #[test]
    fn test_list_count_mismatch_is_malformed() {
        // Claims 3 ints but carries 2.
        let mut raw = BytesMut::new();
        raw.put_u8(TAG_INT_LIST);
        raw.put_u32_le(4 + 16);
        raw.put_u32_le(3);
        raw.put_i64_le(1);
        raw.put_i64_le(2);
        assert!(matches!(
            decode_bind_variable(&raw).unwrap_err(),
            ProtocolError::PayloadMismatch { .. }
        ));

        // Bytes list with a stray byte after the last element.
        let mut raw = BytesMut::new();
        let mut payload = BytesMut::new();
        payload.put_u32_le(1);
        payload.put_u32_le(1);
        payload.put_u8(b'x');
        payload.put_u8(b'!');
        raw.put_u8(TAG_BYTES_LIST);
        raw.put_u32_le(payload.len() as u32);
        raw.put_slice(&payload);
        assert!(matches!(
            decode_bind_variable(&raw).unwrap_err(),
            ProtocolError::TrailingBytes { .. }
        ));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode_bind_variable(&BindVariable::Bytes(b"abcdef".to_vec())).unwrap();
        let err = decode_bind_variable(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_bound_query_roundtrip() {
        let q = BoundQuery::new("select * from t where id in ::ids and name = :name")
            .with_bind("ids", BindVariable::IntList(vec![5, 1, 9]))
            .with_bind("name", BindVariable::Bytes(b"bob".to_vec()));
        let bytes = encode_bound_query(&q).unwrap();
        assert_eq!(decode_bound_query(&bytes).unwrap(), q);
    }

    #[test]
    fn test_validate_bind_variables() {
        let mut vars = BindVariables::new();
        vars.insert("ok".into(), BindVariable::IntList(vec![1]));
        assert!(validate_bind_variables(&vars).is_ok());
        vars.insert("empty".into(), BindVariable::UintList(vec![]));
        assert!(matches!(
            validate_bind_variables(&vars).unwrap_err(),
            ProtocolError::EmptyList(name) if name == "empty"
        ));
        let mut vars = BindVariables::new();
        vars.insert(String::new(), BindVariable::Null);
        assert!(matches!(
            validate_bind_variables(&vars).unwrap_err(),
            ProtocolError::EmptyName
        ));
    }

    #[test]
    fn test_cells_roundtrip_by_field_type() {
        let int_field = Field::new("a", FieldType::LongLong);
        let uint_field = Field::new("b", FieldType::LongLong).with_flags(FLAG_UNSIGNED);
        let float_field = Field::new("c", FieldType::Double);
        let text_field = Field::new("d", FieldType::VarString);
        let cases = vec![
            (Value::Int(-42), &int_field),
            (Value::Uint(u64::MAX), &uint_field),
            (Value::Float(0.1), &float_field),
            (Value::Float(1e300), &float_field),
            (Value::Bytes(b"".to_vec()), &text_field),
            (Value::Null, &text_field),
        ];
        for (v, field) in cases {
            let cell = value_to_cell(&v).unwrap();
            assert_eq!(cell_to_value(&cell, field).unwrap(), v);
        }
        assert_eq!(value_to_cell(&Value::Int(7)).unwrap(), Cell::from("7"));
    }

    #[test]
    fn test_list_is_not_a_cell() {
        assert!(matches!(
            value_to_cell(&Value::IntList(vec![1])).unwrap_err(),
            ProtocolError::NonScalarCell("INT_LIST")
        ));
    }

    #[test]
    fn test_bad_numeric_cell() {
        let field = Field::new("n", FieldType::Long);
        assert!(matches!(
            cell_to_value(&Cell::from("12x"), &field).unwrap_err(),
            ProtocolError::InvalidCell { .. }
        ));
    }

    fn sample_result() -> QueryResult {
        QueryResult {
            fields: vec![
                Field::new("id", FieldType::LongLong).with_flags(FLAG_PRI_KEY | FLAG_NOT_NULL),
                Field::new("name", FieldType::VarString),
            ],
            rows_affected: 0,
            insert_id: 0,
            rows: vec![
                Row {
                    cells: vec![Cell::from("1"), Cell::from("alice")],
                },
                Row {
                    cells: vec![Cell::from("2"), Cell::null()],
                },
                Row {
                    cells: vec![Cell::from("3"), Cell::from("")],
                },
            ],
        }
    }

    #[test]
    fn test_query_result_roundtrip_keeps_null_and_empty_apart() {
        let r = sample_result();
        let decoded = decode_query_result(&encode_query_result(&r).unwrap()).unwrap();
        assert_eq!(decoded, r);
        assert!(decoded.rows[1].cells[1].is_null());
        assert_eq!(decoded.rows[2].cells[1], Cell(Some(vec![])));
    }

    #[test]
    fn test_row_only_message_roundtrip() {
        let mut r = sample_result();
        r.fields.clear();
        let decoded = decode_query_result(&encode_query_result(&r).unwrap()).unwrap();
        assert_eq!(decoded.rows, r.rows);
        assert!(decoded.fields.is_empty());
    }

    #[test]
    fn test_row_width_mismatch_rejected() {
        let mut r = sample_result();
        r.rows[0].cells.pop();
        assert!(matches!(
            encode_query_result(&r).unwrap_err(),
            ProtocolError::RowWidth { expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_unknown_field_type_on_decode() {
        let mut bytes = encode_query_result(&sample_result()).unwrap();
        // [count u16][name_len u16]["id"][type u8] -> type byte at offset 6.
        bytes[6] = 100;
        assert!(matches!(
            decode_query_result(&bytes).unwrap_err(),
            ProtocolError::UnknownFieldType(100)
        ));
    }

    #[test]
    fn test_zero_width_row_count_rejected_on_decode() {
        let mut bytes = BytesMut::new();
        bytes.put_u16_le(0); // fields
        bytes.put_u64_le(0); // rows_affected
        bytes.put_u64_le(0); // insert_id
        bytes.put_u16_le(0); // columns
        bytes.put_u32_le(u32::MAX); // rows
        assert_eq!(bytes.len(), 24);
        assert!(matches!(
            decode_query_result(&bytes).unwrap_err(),
            ProtocolError::ZeroWidthRows(n) if n == u32::MAX as usize
        ));
    }

    #[test]
    fn test_zero_width_rows_rejected_on_encode() {
        let r = QueryResult {
            rows: vec![Row { cells: vec![] }],
            ..Default::default()
        };
        assert!(matches!(
            encode_query_result(&r).unwrap_err(),
            ProtocolError::ZeroWidthRows(1)
        ));
    }

    #[test]
    fn test_length_prefix_overflow_is_too_long() {
        assert_eq!(u32_len(7, "sql").unwrap(), 7);
        assert_eq!(u32_len(u32::MAX as usize, "sql").unwrap(), u32::MAX);
        let err = u32_len(u32::MAX as usize + 1, "sql").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TooLong { ref field, max, .. } if field == "sql" && max == u32::MAX as usize
        ));
    }
}
