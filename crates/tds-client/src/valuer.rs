//! Binding decoded fields to caller targets.
//!
//! A [`Valuer`] sits between the token stream and the caller. It keeps the
//! current column set, the prepared bindings registered for it, a buffer
//! with the last decoded row, and everything the server said on the side:
//! row counts, INFO and ERROR messages, return status and output
//! parameters.
//!
//! Bindings come in two shapes. A [`Slot`] is a shared cell that receives a
//! converted value once per row. A [`Sink`] is a writer that receives the
//! pieces of a `(max)` value as they arrive, so the value is never held in
//! memory whole.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tds_types::{Chunk, Column, FromValue, TypeError, TypeInfo, Value, decode_var};
use tds_wire::{ServerMessage, TypeId};

use crate::error::{Error, Result};
use crate::stream::ReturnValue;

/// A target that a decoded value can be converted into.
///
/// Implemented for every [`FromValue`] type, so `&mut i32`,
/// `&mut Option<String>` and friends can be passed to
/// [`QueryResult::scan`](crate::QueryResult::scan) directly.
pub trait ScanInto: Send {
    /// Convert `value` and store it.
    fn scan_value(&mut self, value: Value) -> std::result::Result<(), TypeError>;
}

impl<T: FromValue + Send> ScanInto for T {
    fn scan_value(&mut self, value: Value) -> std::result::Result<(), TypeError> {
        *self = T::from_value(value)?;
        Ok(())
    }
}

/// A binding registered before rows are read.
pub(crate) trait Binding: Send {
    fn assign(&mut self, value: Value) -> std::result::Result<(), TypeError>;

    /// Whether chunks are written through instead of collected.
    fn streams(&self) -> bool {
        false
    }

    fn write_chunk(
        &mut self,
        _info: &TypeInfo,
        _chunk: &Chunk,
    ) -> std::result::Result<(), TypeError> {
        Ok(())
    }
}

/// Shared cell filled with each row's value.
///
/// Clone it, register one clone with [`prep`](crate::QueryResult::prep),
/// and read the other after every [`next`](crate::QueryResult::next).
#[derive(Debug, Default)]
pub struct Slot<T>(Arc<Mutex<T>>);

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Slot<T> {
    /// A slot holding `initial` until a row is read.
    pub fn new(initial: T) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    /// Copy of the current value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.lock().clone()
    }

    /// Take the current value, leaving the default.
    pub fn take(&self) -> T
    where
        T: Default,
    {
        std::mem::take(&mut *self.0.lock())
    }

    /// Run `f` on the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.lock())
    }
}

impl<T: FromValue + Send> Binding for Slot<T> {
    fn assign(&mut self, value: Value) -> std::result::Result<(), TypeError> {
        *self.0.lock() = T::from_value(value)?;
        Ok(())
    }
}

/// Writer that receives a column's bytes as they arrive.
///
/// Binary values are written as is. Text is written as UTF-8 whatever its
/// wire encoding; UTF-16 code units split across chunks are carried over.
#[derive(Debug)]
pub struct Sink<W>(Arc<Mutex<W>>);

impl<W> Clone for Sink<W> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<W: Write + Send + 'static> Sink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self(Arc::new(Mutex::new(writer)))
    }

    /// Run `f` on the writer.
    pub fn with<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Recover the writer once every other handle is gone.
    pub fn into_inner(self) -> std::result::Result<W, Self> {
        Arc::try_unwrap(self.0)
            .map(Mutex::into_inner)
            .map_err(Self)
    }

    pub(crate) fn binding(&self) -> SinkBinding<W> {
        SinkBinding {
            sink: self.clone(),
            pending: Vec::new(),
        }
    }
}

pub(crate) struct SinkBinding<W> {
    sink: Sink<W>,
    // partial UTF-16 unit or surrogate pair
    pending: Vec<u8>,
}

impl<W: Write + Send> SinkBinding<W> {
    fn write(&self, data: &[u8]) -> std::result::Result<(), TypeError> {
        self.sink
            .0
            .lock()
            .write_all(data)
            .map_err(|_| TypeError::unsupported("stream", "writer"))
    }

    fn write_utf16(&mut self, data: &[u8], last: bool) -> std::result::Result<(), TypeError> {
        self.pending.extend_from_slice(data);
        let mut usable = self.pending.len() & !1;
        if !last && usable >= 2 {
            // hold back a trailing high surrogate until its pair arrives
            let unit = u16::from_le_bytes([self.pending[usable - 2], self.pending[usable - 1]]);
            if (0xD800..0xDC00).contains(&unit) {
                usable -= 2;
            }
        }
        let text = tds_wire::utf16::decode_utf16_lossy(&self.pending[..usable]);
        self.pending.drain(..usable);
        if last {
            self.pending.clear();
        }
        self.write(text.as_bytes())
    }
}

impl<W: Write + Send> Binding for SinkBinding<W> {
    fn assign(&mut self, value: Value) -> std::result::Result<(), TypeError> {
        match value {
            Value::Null => Ok(()),
            Value::Bytes(b) => self.write(&b),
            Value::String(s) => self.write(s.as_bytes()),
            other => self.write(other.to_string().as_bytes()),
        }
    }

    fn streams(&self) -> bool {
        true
    }

    fn write_chunk(&mut self, info: &TypeInfo, chunk: &Chunk) -> std::result::Result<(), TypeError> {
        let props = info.props();
        if props.nchar || info.id == TypeId::Xml {
            self.write_utf16(&chunk.data, !chunk.more)
        } else if props.is_text {
            let collation = info.collation.unwrap_or_default();
            if collation.is_utf8() {
                self.write(&chunk.data)
            } else {
                self.write(collation.decode_text(&chunk.data).as_bytes())
            }
        } else {
            self.write(&chunk.data)
        }
    }
}

/// An opaque binding produced by a [`Bindable`].
pub struct BoundTarget(pub(crate) Box<dyn Binding>);

impl std::fmt::Debug for BoundTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundTarget")
            .field("streams", &self.0.streams())
            .finish()
    }
}

/// Something that can be registered with
/// [`prep`](crate::QueryResult::prep): a [`Slot`] or a [`Sink`].
pub trait Bindable {
    /// A fresh binding writing into this target.
    fn bound(&self) -> BoundTarget;
}

impl<T: FromValue + Send + 'static> Bindable for Slot<T> {
    fn bound(&self) -> BoundTarget {
        BoundTarget(Box::new(self.clone()))
    }
}

impl<W: Write + Send + 'static> Bindable for Sink<W> {
    fn bound(&self) -> BoundTarget {
        BoundTarget(Box::new(self.binding()))
    }
}

/// Declare a newtype over a scalar as scannable and bindable.
///
/// ```ignore
/// struct UserId(i64);
/// tds_client::scalar_newtype!(UserId(i64));
/// ```
#[macro_export]
macro_rules! scalar_newtype {
    ($($name:ident($inner:ty)),+ $(,)?) => {
        $(
            impl $crate::FromValue for $name {
                fn from_value(
                    value: $crate::Value,
                ) -> ::std::result::Result<Self, $crate::TypeError> {
                    <$inner as $crate::FromValue>::from_value(value).map($name)
                }
            }

            impl ::std::convert::From<$name> for $crate::Value {
                fn from(v: $name) -> Self {
                    $crate::Value::from(v.0)
                }
            }
        )+
    };
}

/// Field values, bindings and side information of one response.
#[derive(Default)]
pub struct Valuer {
    columns: Arc<[Column]>,
    index: HashMap<String, usize>,
    bindings: Vec<Option<Box<dyn Binding>>>,
    row: Vec<Option<Value>>,
    // (column, bytes so far) of a chunked value nobody streams
    partial: Option<(usize, BytesMut)>,
    null_as: HashMap<String, Value>,
    in_row: bool,
    row_decoded: bool,
    rows_affected: u64,
    rows_read: u64,
    messages: Vec<ServerMessage>,
    errors: Vec<ServerMessage>,
    return_status: Option<i32>,
    outputs: Vec<ReturnValue>,
}

impl std::fmt::Debug for Valuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Valuer")
            .field("columns", &self.columns.len())
            .field("rows_read", &self.rows_read)
            .field("rows_affected", &self.rows_affected)
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl Valuer {
    /// A valuer substituting `null_as[name]` for NULLs of column `name`.
    #[must_use]
    pub fn new(null_as: HashMap<String, Value>) -> Self {
        Self {
            null_as,
            ..Self::default()
        }
    }

    /// Start a new result set.
    pub(crate) fn set_columns(&mut self, columns: Arc<[Column]>) {
        self.index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        self.bindings = std::iter::repeat_with(|| None).take(columns.len()).collect();
        self.row = vec![None; columns.len()];
        self.columns = columns;
        self.partial = None;
        self.in_row = false;
        self.row_decoded = false;
    }

    /// Columns of the current result set.
    #[must_use]
    pub fn columns(&self) -> &Arc<[Column]> {
        &self.columns
    }

    /// Position of the column called `name`.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownColumn(name.to_owned()))
    }

    fn check_index(&self, column: usize) -> Result<()> {
        if column < self.columns.len() {
            Ok(())
        } else {
            Err(Error::UnknownColumn(format!("#{column}")))
        }
    }

    /// Register a binding for `column`; only legal before a row is decoded.
    pub(crate) fn prep(&mut self, column: usize, target: BoundTarget) -> Result<()> {
        if self.row_decoded || self.in_row {
            return Err(Error::PrepAfterRow);
        }
        self.check_index(column)?;
        self.bindings[column] = Some(target.0);
        Ok(())
    }

    fn field_name(&self, column: usize) -> &str {
        self.columns.get(column).map_or("", |c| c.name.as_str())
    }

    fn begin_field(&mut self) {
        if !self.in_row {
            self.in_row = true;
            self.row.iter_mut().for_each(|v| *v = None);
        }
    }

    /// Deliver a complete field of the current row.
    pub(crate) fn field(&mut self, column: usize, mut value: Value) -> Result<()> {
        self.check_index(column)?;
        self.begin_field();
        if value.is_null() {
            if let Some(sub) = self.null_as.get(self.field_name(column)) {
                value = sub.clone();
            }
        }
        if let Some(binding) = self.bindings[column].as_mut() {
            let streams = binding.streams();
            if let Err(e) = binding.assign(value.clone()) {
                return Err(Error::conversion(self.field_name(column), e));
            }
            if streams {
                return Ok(());
            }
        }
        self.row[column] = Some(value);
        Ok(())
    }

    /// Deliver a piece of a chunked field.
    pub(crate) fn chunk(&mut self, column: usize, chunk: Chunk) -> Result<()> {
        self.check_index(column)?;
        self.begin_field();
        let info = &self.columns[column].type_info;
        if let Some(binding) = self.bindings[column].as_mut() {
            if binding.streams() {
                return binding
                    .write_chunk(info, &chunk)
                    .map_err(|e| Error::conversion(&self.columns[column].name, e));
            }
        }

        let (_, buf) = self
            .partial
            .get_or_insert_with(|| (column, BytesMut::new()));
        buf.extend_from_slice(&chunk.data);
        if chunk.more {
            return Ok(());
        }
        let Some((_, data)) = self.partial.take() else {
            return Ok(());
        };
        let value = decode_var(info, &data)?;
        self.field(column, value)
    }

    /// The current row is complete.
    pub(crate) fn end_row(&mut self) {
        self.in_row = false;
        self.row_decoded = true;
        self.rows_read += 1;
    }

    /// Rows read so far over all result sets.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Whether `column` is bound to a sink, leaving its values out of the
    /// row buffer.
    #[must_use]
    pub fn is_streamed(&self, column: usize) -> bool {
        self.bindings
            .get(column)
            .and_then(Option::as_ref)
            .is_some_and(|b| b.streams())
    }

    /// Value of `column` in the last decoded row, `None` if it went to a sink.
    pub fn get(&self, column: usize) -> Result<Option<&Value>> {
        self.check_index(column)?;
        Ok(self.row[column].as_ref())
    }

    /// Record an INFO or ERROR.
    pub(crate) fn message(&mut self, msg: ServerMessage) {
        if msg.is_error() {
            self.errors.push(msg);
        } else {
            self.messages.push(msg);
        }
    }

    pub(crate) fn add_rows_affected(&mut self, rows: u64) {
        self.rows_affected += rows;
    }

    pub(crate) fn set_return_status(&mut self, status: i32) {
        self.return_status = Some(status);
    }

    pub(crate) fn output(&mut self, value: ReturnValue) {
        self.outputs.push(value);
    }

    /// Informational messages so far.
    #[must_use]
    pub fn info(&self) -> &[ServerMessage] {
        &self.messages
    }

    /// Take the errors collected so far.
    pub(crate) fn take_errors(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.errors)
    }

    /// Whether any ERROR has been collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Rows affected as reported by DONE tokens.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Procedure return code.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Output parameter by name, with or without the leading `@`.
    #[must_use]
    pub fn output_value(&self, name: &str) -> Option<&Value> {
        let name = name.trim_start_matches('@');
        self.outputs
            .iter()
            .find(|o| o.name.trim_start_matches('@') == name)
            .map(|o| &o.value)
    }

    /// All output parameters in arrival order.
    #[must_use]
    pub fn outputs(&self) -> &[ReturnValue] {
        &self.outputs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tds_wire::{Collation, SqlType};

    fn valuer(columns: Vec<Column>) -> Valuer {
        let mut v = Valuer::default();
        v.set_columns(columns.into());
        v
    }

    fn nvarchar(name: &str) -> Column {
        Column::new(
            name,
            TypeInfo::for_sql_type(SqlType::NVarChar(None), Collation::default()),
        )
    }

    fn int(name: &str) -> Column {
        Column::new(name, TypeInfo::for_sql_type(SqlType::Int, Collation::default()))
    }

    #[test]
    fn test_slot_receives_converted_values() {
        let mut v = valuer(vec![int("id")]);
        let id: Slot<i64> = Slot::default();
        v.prep(0, id.bound()).unwrap();
        v.field(0, Value::I32(7)).unwrap();
        v.end_row();
        assert_eq!(id.get(), 7);
        assert_eq!(v.get(0).unwrap(), Some(&Value::I32(7)));
    }

    #[test]
    fn test_slot_binding_keeps_row_value_sink_does_not() {
        let mut v = valuer(vec![int("id"), nvarchar("body")]);
        let id: Slot<i32> = Slot::default();
        let sink = Sink::new(Vec::<u8>::new());
        v.prep(0, id.bound()).unwrap();
        v.prep(1, sink.bound()).unwrap();
        assert!(!v.is_streamed(0));
        assert!(v.is_streamed(1));
        assert!(!v.is_streamed(9));

        v.field(0, Value::I32(3)).unwrap();
        v.field(1, Value::String("hi".into())).unwrap();
        v.end_row();
        assert_eq!(v.get(0).unwrap(), Some(&Value::I32(3)));
        assert_eq!(v.get(1).unwrap(), None);
    }

    #[test]
    fn test_prep_after_row_fails() {
        let mut v = valuer(vec![int("id")]);
        v.field(0, Value::I32(1)).unwrap();
        v.end_row();
        let slot: Slot<i32> = Slot::default();
        assert!(matches!(
            v.prep(0, slot.bound()),
            Err(Error::PrepAfterRow)
        ));
    }

    #[test]
    fn test_scan_null_into_plain_target() {
        let mut v = valuer(vec![int("id")]);
        let slot: Slot<i32> = Slot::default();
        v.prep(0, slot.bound()).unwrap();
        let err = v.field(0, Value::Null).unwrap_err();
        assert!(matches!(err, Error::ScanNull { ref field } if field == "id"));

        let mut v = valuer(vec![int("id")]);
        let slot: Slot<Option<i32>> = Slot::new(Some(5));
        v.prep(0, slot.bound()).unwrap();
        v.field(0, Value::Null).unwrap();
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_null_substitution() {
        let mut v = Valuer::new(HashMap::from([("id".to_owned(), Value::I32(-1))]));
        v.set_columns(vec![int("id")].into());
        let slot: Slot<i32> = Slot::default();
        v.prep(0, slot.bound()).unwrap();
        v.field(0, Value::Null).unwrap();
        assert_eq!(slot.get(), -1);
    }

    #[test]
    fn test_unsupported_conversion_names_types() {
        let mut v = valuer(vec![int("id")]);
        let slot: Slot<uuid_like::Id> = Slot::default();
        v.prep(0, slot.bound()).unwrap();
        let err = v.field(0, Value::from("x")).unwrap_err();
        assert!(matches!(err, Error::TypeNotSupported { ref field, .. } if field == "id"));
    }

    mod uuid_like {
        #[derive(Debug, Default)]
        pub struct Id(pub i64);
        crate::scalar_newtype!(Id(i64));
    }

    #[test]
    fn test_chunks_collected_without_binding() {
        let mut v = valuer(vec![nvarchar("doc")]);
        let wire: Vec<u8> = "héllo".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let (a, b) = wire.split_at(3);
        v.chunk(0, Chunk { data: Bytes::copy_from_slice(a), more: true }).unwrap();
        v.chunk(0, Chunk { data: Bytes::copy_from_slice(b), more: false }).unwrap();
        v.end_row();
        assert_eq!(v.get(0).unwrap().and_then(Value::as_str), Some("héllo"));
    }

    #[test]
    fn test_sink_transcodes_split_surrogates() {
        let mut v = valuer(vec![nvarchar("doc")]);
        let sink = Sink::new(Vec::new());
        v.prep(0, sink.bound()).unwrap();
        let wire: Vec<u8> = "a😀b".encode_utf16().flat_map(u16::to_le_bytes).collect();
        // split between the two halves of the surrogate pair
        let (a, b) = wire.split_at(4);
        v.chunk(0, Chunk { data: Bytes::copy_from_slice(a), more: true }).unwrap();
        v.chunk(0, Chunk { data: Bytes::copy_from_slice(b), more: false }).unwrap();
        v.end_row();
        assert_eq!(v.get(0).unwrap(), None);
        let out = sink.into_inner().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a😀b");
    }

    #[test]
    fn test_messages_and_outputs() {
        let mut v = Valuer::default();
        v.output(ReturnValue {
            ordinal: 1,
            name: "@total".into(),
            value: Value::I64(3),
        });
        v.set_return_status(0);
        v.add_rows_affected(2);
        v.add_rows_affected(3);
        assert_eq!(v.output_value("total"), Some(&Value::I64(3)));
        assert_eq!(v.output_value("@total"), Some(&Value::I64(3)));
        assert_eq!(v.return_status(), Some(0));
        assert_eq!(v.rows_affected(), 5);
        assert!(matches!(v.column_index("nope"), Err(Error::UnknownColumn(_))));
    }

    #[test]
    fn test_scan_into_blanket() {
        let mut target: Option<String> = None;
        let dst: &mut dyn ScanInto = &mut target;
        dst.scan_value(Value::from("x")).unwrap();
        assert_eq!(target.as_deref(), Some("x"));
    }
}
