//! Declarative message layouts.
//!
//! A [`MessageSchema`] lists typed fields; one generic routine encodes and
//! decodes any [`Record`] against it. Strings and arrays carry a vuint50
//! length prefix, fixed byte fields are raw, and array elements repeat the
//! nested field list.

use bytes::{BufMut, Bytes, BytesMut};

use super::varint::{decode_vint50, decode_vuint50, encode_vint50, encode_vuint50};
use crate::error::{Error, Result};

/// Wire type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    VInt,
    VUInt,
    String,
    /// Exactly this many raw bytes.
    Bytes(usize),
    /// Repeated group of nested fields.
    Array(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn vint(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::VInt)
    }

    pub fn vuint(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::VUInt)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn bytes(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, FieldKind::Bytes(len))
    }

    pub fn array(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::new(name, FieldKind::Array(fields))
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    VInt(i64),
    VUInt(u64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Record>),
}

/// Field values by name, in schema order once decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: Vec<(String, Value)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn get_vint(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::VInt(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_vuint(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            Value::VUInt(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_array(&self, name: &str) -> Option<&[Record]> {
        match self.get(name)? {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Layout of one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub name: String,
    pub id: u16,
    pub fields: Vec<Field>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>, id: u16, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            id,
            fields,
        }
    }

    /// Append the encoding of `record` to `out`.
    ///
    /// # Errors
    ///
    /// [`Error::SchemaMismatch`] if a field is missing, has the wrong type,
    /// or a fixed byte field has the wrong length.
    pub fn encode<B: BufMut>(&self, record: &Record, out: &mut B) -> Result<()> {
        encode_fields(&self.name, &self.fields, record, out)
    }

    /// # Errors
    ///
    /// See [`encode`](Self::encode).
    pub fn to_bytes(&self, record: &Record) -> Result<Bytes> {
        let mut out = BytesMut::new();
        self.encode(record, &mut out)?;
        Ok(out.freeze())
    }

    /// Decode a whole packet.
    ///
    /// # Errors
    ///
    /// [`Error::EndOfStream`] naming the field that ran past the end,
    /// [`Error::JunkAfterPacket`] if bytes remain after the last field, or
    /// [`Error::InvalidUtf8`] for a string field that is not UTF-8.
    pub fn decode(&self, data: &[u8]) -> Result<Record> {
        let mut reader = Reader {
            message: &self.name,
            data,
        };
        let record = reader.fields(&self.fields)?;
        if !reader.data.is_empty() {
            return Err(Error::JunkAfterPacket {
                message: self.name.clone(),
            });
        }
        Ok(record)
    }
}

fn mismatch(message: &str, field: &Field, what: &str) -> Error {
    Error::SchemaMismatch(format!("{message}.{}: {what}", field.name))
}

fn encode_fields<B: BufMut>(
    message: &str,
    fields: &[Field],
    record: &Record,
    out: &mut B,
) -> Result<()> {
    for field in fields {
        let value = record
            .get(&field.name)
            .ok_or_else(|| mismatch(message, field, "missing"))?;
        match (&field.kind, value) {
            (FieldKind::VInt, Value::VInt(v)) => encode_vint50(*v, out),
            (FieldKind::VUInt, Value::VUInt(v)) => encode_vuint50(*v, out),
            (FieldKind::String, Value::String(s)) => {
                encode_vuint50(s.len() as u64, out);
                out.put_slice(s.as_bytes());
            }
            (FieldKind::Bytes(len), Value::Bytes(b)) => {
                if b.len() != *len {
                    return Err(mismatch(
                        message,
                        field,
                        &format!("expected {len} bytes, got {}", b.len()),
                    ));
                }
                out.put_slice(b);
            }
            (FieldKind::Array(nested), Value::Array(items)) => {
                encode_vuint50(items.len() as u64, out);
                for item in items {
                    encode_fields(message, nested, item, out)?;
                }
            }
            _ => return Err(mismatch(message, field, "wrong value type")),
        }
    }
    Ok(())
}

struct Reader<'a> {
    message: &'a str,
    data: &'a [u8],
}

impl Reader<'_> {
    fn end_of_stream(&self, field: &Field) -> Error {
        Error::EndOfStream {
            message: self.message.to_owned(),
            field: field.name.clone(),
        }
    }

    fn vuint(&mut self, field: &Field) -> Result<u64> {
        let (value, used) = decode_vuint50(self.data).ok_or_else(|| self.end_of_stream(field))?;
        self.data = &self.data[used..];
        Ok(value)
    }

    fn take(&mut self, field: &Field, len: u64) -> Result<&[u8]> {
        let len = usize::try_from(len).map_err(|_| self.end_of_stream(field))?;
        if self.data.len() < len {
            return Err(self.end_of_stream(field));
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(head)
    }

    fn fields(&mut self, fields: &[Field]) -> Result<Record> {
        let mut record = Record::new();
        for field in fields {
            let value = match &field.kind {
                FieldKind::VInt => {
                    let (value, used) =
                        decode_vint50(self.data).ok_or_else(|| self.end_of_stream(field))?;
                    self.data = &self.data[used..];
                    Value::VInt(value)
                }
                FieldKind::VUInt => Value::VUInt(self.vuint(field)?),
                FieldKind::String => {
                    let len = self.vuint(field)?;
                    let raw = self.take(field, len)?;
                    Value::String(std::str::from_utf8(raw)?.to_owned())
                }
                FieldKind::Bytes(len) => Value::Bytes(self.take(field, *len as u64)?.to_vec()),
                FieldKind::Array(nested) => {
                    let count = self.vuint(field)?;
                    // Each element takes at least one byte unless it has no fields.
                    if !nested.is_empty() && count > self.data.len() as u64 {
                        return Err(self.end_of_stream(field));
                    }
                    let mut items = Vec::new();
                    for _ in 0..count {
                        items.push(self.fields(nested)?);
                    }
                    Value::Array(items)
                }
            };
            record.values.push((field.name.clone(), value));
        }
        Ok(record)
    }
}
