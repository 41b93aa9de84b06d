//! CSV to Parquet conversion for the purchase dataset.
//!
//! Reads every CSV column as text, enforces the types of the required
//! columns, and writes a compressed Parquet file through a temp file and an
//! atomic rename.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float32Builder, Float64Builder, Int64Builder, RecordBatch, StringArray,
    TimestampMicrosecondBuilder,
};
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono_tz::Tz;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, Encoding};
use parquet::file::properties::{WriterProperties, WriterVersion};
use tracing::{debug, info};

use crate::error::OfflineError;
use crate::schema::{column_kind, purchase_columns, ColumnKind};

/// Options for a conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Timezone of naive timestamps in the CSV.
    pub timezone: Tz,

    /// Compression codec.
    pub compression: Compression,

    /// Rows per CSV read batch.
    pub batch_size: usize,
}

impl ConvertOptions {
    /// Snappy compression, default batch size.
    pub fn new(timezone: Tz) -> Self {
        ConvertOptions {
            timezone,
            compression: Compression::SNAPPY,
            batch_size: crate::DEFAULT_BATCH_SIZE,
        }
    }

    /// Set custom batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Summary of a written Parquet file, read back from its footer.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub output_path: PathBuf,
    pub num_rows: i64,
    pub num_columns: usize,
    pub schema: SchemaRef,
}

impl std::fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Parquet File Details:")?;
        writeln!(f, "Path: {}", self.output_path.display())?;
        writeln!(f, "Rows: {}", self.num_rows)?;
        writeln!(f, "Columns: {}", self.num_columns)?;
        writeln!(f)?;
        writeln!(f, "Column Types:")?;
        for field in self.schema.fields() {
            let nullable = if field.is_nullable() { "" } else { " not null" };
            writeln!(f, "  {}: {}{}", field.name(), field.data_type(), nullable)?;
        }
        Ok(())
    }
}

/// Default output path: the input path with a `.parquet` extension.
pub fn default_parquet_path(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("parquet")
}

/// Convert a CSV file into a typed, compressed Parquet file.
pub fn convert_csv_to_parquet(
    csv_path: &Path,
    parquet_path: Option<&Path>,
    options: &ConvertOptions,
) -> Result<ConversionReport, OfflineError> {
    if !csv_path.is_file() {
        return Err(OfflineError::NotFound(csv_path.to_path_buf()));
    }
    let output_path = parquet_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_parquet_path(csv_path));

    let format = Format::default().with_header(true);
    let (header, _) = format.infer_schema(File::open(csv_path)?, Some(1))?;

    for (name, _) in purchase_columns() {
        if header.field_with_name(name).is_err() {
            return Err(OfflineError::MissingColumn {
                column: name.to_string(),
                path: csv_path.to_path_buf(),
            });
        }
    }

    let text_schema = Arc::new(Schema::new(
        header
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let output_schema = Arc::new(Schema::new(
        header
            .fields()
            .iter()
            .map(|f| match column_kind(f.name()) {
                Some(kind) => Field::new(f.name(), kind.data_type(), kind.nullable()),
                None => Field::new(f.name(), DataType::Utf8, true),
            })
            .collect::<Vec<_>>(),
    ));

    let reader = ReaderBuilder::new(text_schema)
        .with_format(format)
        .with_batch_size(options.batch_size)
        .build(File::open(csv_path)?)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let temp_path = output_path.with_extension("parquet.tmp");
    let props = WriterProperties::builder()
        .set_writer_version(WriterVersion::PARQUET_2_0)
        .set_compression(options.compression)
        // Dictionary encoding for string columns
        .set_dictionary_enabled(true)
        // Use plain encoding for numeric columns
        .set_encoding(Encoding::PLAIN)
        .build();
    let writer =
        ArrowWriter::try_new(File::create(&temp_path)?, output_schema.clone(), Some(props))?;

    let rows_seen = match write_batches(reader, writer, &output_schema, options.timezone) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };
    atomic_rename(&temp_path, &output_path)?;
    debug!(rows = rows_seen, path = %output_path.display(), "parquet file written");

    let report = inspect_parquet(&output_path)?;
    info!(
        path = %report.output_path.display(),
        rows = report.num_rows,
        columns = report.num_columns,
        "converted csv to parquet"
    );
    Ok(report)
}

/// Read row count and schema from a Parquet file footer.
pub fn inspect_parquet(path: &Path) -> Result<ConversionReport, OfflineError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let metadata = builder.metadata().file_metadata();
    Ok(ConversionReport {
        output_path: path.to_path_buf(),
        num_rows: metadata.num_rows(),
        num_columns: metadata.schema_descr().num_columns(),
        schema: builder.schema().clone(),
    })
}

fn convert_batch(
    batch: &RecordBatch,
    output_schema: &SchemaRef,
    row_offset: usize,
    tz: Tz,
) -> Result<RecordBatch, OfflineError> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (idx, field) in output_schema.fields().iter().enumerate() {
        let text = batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| OfflineError::ColumnType {
                column: field.name().clone(),
                expected: "text".to_string(),
                message: "csv column was not read as text".to_string(),
            })?;
        let column: ArrayRef = match column_kind(field.name()) {
            Some(kind) => parse_column(text, field.name(), kind, row_offset, tz)?,
            None => Arc::new(text.clone()),
        };
        columns.push(column);
    }
    Ok(RecordBatch::try_new(output_schema.clone(), columns)?)
}

fn write_batches<I>(
    reader: I,
    mut writer: ArrowWriter<File>,
    output_schema: &SchemaRef,
    tz: Tz,
) -> Result<usize, OfflineError>
where
    I: IntoIterator<Item = Result<RecordBatch, arrow::error::ArrowError>>,
{
    let mut rows_seen = 0usize;
    for batch in reader {
        let batch = batch?;
        let typed = convert_batch(&batch, output_schema, rows_seen, tz)?;
        rows_seen += batch.num_rows();
        writer.write(&typed)?;
    }
    writer.close()?;
    Ok(rows_seen)
}

/// Text of one cell, or None for an empty cell in a nullable column.
fn cell<'a>(
    text: &'a StringArray,
    row: usize,
    column: &str,
    kind: ColumnKind,
    row_offset: usize,
) -> Result<Option<&'a str>, OfflineError> {
    if text.is_null(row) {
        if kind.nullable() {
            return Ok(None);
        }
        return Err(OfflineError::InvalidValue {
            column: column.to_string(),
            row: row_offset + row + 1,
            message: "missing value".to_string(),
        });
    }
    Ok(Some(text.value(row).trim()))
}

fn parse_column(
    text: &StringArray,
    column: &str,
    kind: ColumnKind,
    row_offset: usize,
    tz: Tz,
) -> Result<ArrayRef, OfflineError> {
    let invalid = |row: usize, message: String| OfflineError::InvalidValue {
        column: column.to_string(),
        row: row_offset + row + 1,
        message,
    };

    match kind {
        ColumnKind::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(text.len());
            for row in 0..text.len() {
                match cell(text, row, column, kind, row_offset)? {
                    Some(raw) => {
                        let ts = cfs_common::time::parse_timestamp(raw, tz)
                            .map_err(|e| invalid(row, e.to_string()))?;
                        builder.append_value(ts.timestamp_micros());
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish().with_timezone("UTC")))
        }
        ColumnKind::Int64 => {
            let mut builder = Int64Builder::with_capacity(text.len());
            for row in 0..text.len() {
                match cell(text, row, column, kind, row_offset)? {
                    Some(raw) => {
                        let v = cfs_common::types::parse_integral(raw)
                            .ok_or_else(|| invalid(row, format!("{:?} is not an integer", raw)))?;
                        builder.append_value(v);
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        ColumnKind::Float64 => {
            let mut builder = Float64Builder::with_capacity(text.len());
            for row in 0..text.len() {
                match cell(text, row, column, kind, row_offset)? {
                    Some(raw) => {
                        let v: f64 = raw
                            .parse()
                            .map_err(|_| invalid(row, format!("{:?} is not a number", raw)))?;
                        // NaN and infinities are stored as missing
                        builder.append_option(Some(v).filter(|v| v.is_finite()));
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        ColumnKind::Float32 => {
            let mut builder = Float32Builder::with_capacity(text.len());
            for row in 0..text.len() {
                match cell(text, row, column, kind, row_offset)? {
                    Some(raw) => {
                        let v: f32 = raw
                            .parse()
                            .map_err(|_| invalid(row, format!("{:?} is not a number", raw)))?;
                        // NaN and infinities are stored as missing
                        builder.append_option(Some(v).filter(|v| v.is_finite()));
                    }
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

/// Helper to rename temp file to final path atomically.
pub fn atomic_rename(temp_path: &Path, final_path: &Path) -> Result<(), OfflineError> {
    fs::rename(temp_path, final_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_default_parquet_path() {
        assert_eq!(
            default_parquet_path(Path::new("/data/test_task_data.csv")),
            PathBuf::from("/data/test_task_data.parquet")
        );
    }

    #[test]
    fn test_options_defaults() {
        let options = ConvertOptions::new(chrono_tz::UTC);
        assert!(matches!(options.compression, Compression::SNAPPY));
        assert_eq!(options.batch_size, crate::DEFAULT_BATCH_SIZE);
        assert_eq!(options.with_batch_size(0).batch_size, 1);
    }

    #[test]
    fn test_missing_input_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = convert_csv_to_parquet(
            &dir.path().join("absent.csv"),
            None,
            &ConvertOptions::new(chrono_tz::UTC),
        )
        .unwrap_err();
        assert!(matches!(err, OfflineError::NotFound(_)));
    }

    #[test]
    fn test_missing_column_rejected() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "partial.csv",
            "purchase_timestamp,customer_id,purchase_value\n2024-01-01 10:00:00,1,2.5\n",
        );
        let err = convert_csv_to_parquet(&csv, None, &ConvertOptions::new(chrono_tz::UTC))
            .unwrap_err();
        assert!(
            matches!(err, OfflineError::MissingColumn { ref column, .. } if column == "loyalty_score")
        );
    }

    #[test]
    fn test_bad_integer_reports_row() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "bad.csv",
            "purchase_timestamp,customer_id,purchase_value,loyalty_score\n\
             2024-01-01 10:00:00,1,2.5,0.1\n\
             2024-01-02 10:00:00,abc,3.5,0.2\n",
        );
        let err = convert_csv_to_parquet(&csv, None, &ConvertOptions::new(chrono_tz::UTC))
            .unwrap_err();
        match err {
            OfflineError::InvalidValue { column, row, .. } => {
                assert_eq!(column, "customer_id");
                assert_eq!(row, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("bad.parquet").exists());
        assert!(!dir.path().join("bad.parquet.tmp").exists());
    }

    #[test]
    fn test_extra_columns_carried_as_text() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "extra.csv",
            "customer_id,purchase_timestamp,store,purchase_value,loyalty_score\n\
             7,2024-01-01 10:00:00,athens,12.0,0.5\n",
        );
        let report =
            convert_csv_to_parquet(&csv, None, &ConvertOptions::new(chrono_tz::UTC)).unwrap();
        assert_eq!(report.num_rows, 1);
        assert_eq!(report.num_columns, 5);
        assert_eq!(
            report.schema.field_with_name("store").unwrap().data_type(),
            &DataType::Utf8
        );
        assert_eq!(
            report.schema.field(0).name(),
            "customer_id",
            "input column order is preserved"
        );
    }

    #[test]
    fn test_report_display() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "d.csv",
            "purchase_timestamp,customer_id,purchase_value,loyalty_score\n\
             2024-01-01 10:00:00,1,2.5,0.1\n",
        );
        let out = dir.path().join("nested").join("out.parquet");
        let report =
            convert_csv_to_parquet(&csv, Some(&out), &ConvertOptions::new(chrono_tz::UTC))
                .unwrap();
        assert_eq!(report.output_path, out);
        let text = report.to_string();
        assert!(text.contains("Rows: 1"));
        assert!(text.contains("Columns: 4"));
        assert!(text.contains("loyalty_score: Float32"));
    }
}
