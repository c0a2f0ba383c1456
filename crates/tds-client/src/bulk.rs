//! Bulk load framing.
//!
//! A bulk load is two requests on one connection: an `INSERT BULK`
//! statement naming the table and its columns, then a BulkLoad message
//! (packet type 0x07) carrying COLMETADATA, one ROW token per row and a
//! final DONE with the row count. Row data uses the same wire format as
//! result rows.
//!
//! ```rust,ignore
//! let mut bulk = BulkInsert::new("dbo.users")
//!     .column("id", SqlType::Int)
//!     .column("name", SqlType::NVarChar(Some(64)))
//!     .options(BulkOptions { table_lock: true, ..Default::default() });
//! bulk.push_row(vec![Value::from(1), Value::from("ada")])?;
//! let inserted = db.bulk_insert(&bulk).await?;
//! ```

use bytes::{Bytes, BytesMut};
use tds_types::{Column, TypeInfo, Value, encode_colmetadata, encode_row};
use tds_wire::{Collation, ColumnFlags, Done, SqlType};

use crate::error::{Error, Result};

/// Hints for the `INSERT BULK` statement.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Rows per batch hint. 0 sends everything as one batch.
    pub batch_size: usize,

    /// Check constraints during insert.
    pub check_constraints: bool,

    /// Fire INSERT triggers.
    pub fire_triggers: bool,

    /// Keep NULLs instead of column defaults.
    pub keep_nulls: bool,

    /// Take a table lock for the duration of the load.
    pub table_lock: bool,

    /// Columns the rows are already sorted by.
    pub order_hint: Option<Vec<String>>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            batch_size: 0,
            check_constraints: true,
            fire_triggers: false,
            keep_nulls: true,
            table_lock: false,
            order_hint: None,
        }
    }
}

/// A destination column.
#[derive(Debug, Clone)]
pub struct BulkColumn {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: SqlType,
    /// Whether NULL is accepted.
    pub nullable: bool,
}

/// Rows waiting to be loaded into one table.
#[derive(Debug, Clone)]
pub struct BulkInsert {
    table: String,
    columns: Vec<BulkColumn>,
    options: BulkOptions,
    rows: Vec<Vec<Value>>,
}

impl BulkInsert {
    /// A load into `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            options: BulkOptions::default(),
            rows: Vec::new(),
        }
    }

    /// Add a nullable destination column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: SqlType) -> Self {
        self.columns.push(BulkColumn {
            name: name.into(),
            ty,
            nullable: true,
        });
        self
    }

    /// Add a destination column.
    #[must_use]
    pub fn typed_column(mut self, column: BulkColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Replace the statement hints.
    #[must_use]
    pub fn options(mut self, options: BulkOptions) -> Self {
        self.options = options;
        self
    }

    /// Queue a row; it must have one value per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Config(format!(
                "bulk row has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        if let Some(column) = self
            .columns
            .iter()
            .zip(&row)
            .find_map(|(c, v)| (!c.nullable && v.is_null()).then_some(c))
        {
            return Err(Error::ScanNull {
                field: column.name.clone(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Destination columns.
    #[must_use]
    pub fn columns(&self) -> &[BulkColumn] {
        &self.columns
    }

    /// Rows queued so far.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The `INSERT BULK` statement announcing the load.
    #[must_use]
    pub fn statement(&self) -> String {
        let mut sql = format!("INSERT BULK {}", self.table);

        if !self.columns.is_empty() {
            let cols: Vec<String> = self
                .columns
                .iter()
                .map(|c| {
                    let null = if c.nullable { "NULL" } else { "NOT NULL" };
                    format!("{} {} {null}", c.name, c.ty.declaration())
                })
                .collect();
            sql.push_str(" (");
            sql.push_str(&cols.join(", "));
            sql.push(')');
        }

        let mut hints: Vec<String> = Vec::new();
        if self.options.check_constraints {
            hints.push("CHECK_CONSTRAINTS".to_owned());
        }
        if self.options.fire_triggers {
            hints.push("FIRE_TRIGGERS".to_owned());
        }
        if self.options.keep_nulls {
            hints.push("KEEP_NULLS".to_owned());
        }
        if self.options.table_lock {
            hints.push("TABLOCK".to_owned());
        }
        if self.options.batch_size > 0 {
            hints.push(format!("ROWS_PER_BATCH = {}", self.options.batch_size));
        }
        if let Some(order) = &self.options.order_hint {
            hints.push(format!("ORDER({})", order.join(", ")));
        }
        if !hints.is_empty() {
            sql.push_str(" WITH (");
            sql.push_str(&hints.join(", "));
            sql.push(')');
        }
        sql
    }

    fn wire_columns(&self, collation: Collation) -> Vec<Column> {
        self.columns
            .iter()
            .enumerate()
            .map(|(ordinal, c)| {
                let mut column = Column::new(&c.name, TypeInfo::for_sql_type(c.ty, collation));
                column.ordinal = ordinal;
                column.flags = if c.nullable {
                    ColumnFlags::NULLABLE
                } else {
                    ColumnFlags::empty()
                };
                column
            })
            .collect()
    }

    /// The BulkLoad message body: COLMETADATA, rows and DONE.
    pub fn encode(&self, collation: Collation) -> Result<Bytes> {
        let columns = self.wire_columns(collation);
        let mut buf = BytesMut::new();
        encode_colmetadata(&mut buf, &columns)?;
        for (i, row) in self.rows.iter().enumerate() {
            encode_row(&mut buf, &columns, row).map_err(|e| {
                let name = columns
                    .iter()
                    .zip(row)
                    .find(|(_, v)| !v.is_null())
                    .map_or_else(|| format!("row {i}"), |(c, _)| format!("row {i} ({})", c.name));
                Error::parameter(&name, e)
            })?;
        }
        Done::new(Some(self.rows.len() as u64)).encode(&mut buf);
        Ok(buf.freeze())
    }
}
