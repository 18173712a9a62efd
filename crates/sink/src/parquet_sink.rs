use crate::{error::SinkError, OpenMode, SinkOptions, SinkWriter};
use arrow::{
    array::{
        ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch,
        StringBuilder, TimestampMicrosecondBuilder,
    },
    datatypes::{DataType as ArrowType, Field, Schema, SchemaRef, TimeUnit},
};
use model::{
    core::{data_type::DataType, value::Value},
    schema::column::ColumnMeta,
};
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

/// Per-batch staging manifest: ordered list of finalized part files.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    columns: Vec<String>,
    parts: Vec<PartEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartEntry {
    file: String,
    rows: u64,
}

enum ColumnBuilder {
    Int(Int64Builder),
    Float(Float64Builder),
    Bool(BooleanBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Bytes(BinaryBuilder),
    Text(StringBuilder),
}

impl ColumnBuilder {
    fn for_column(column: &ColumnMeta) -> Self {
        match column.data_type {
            t if t.is_integer() => ColumnBuilder::Int(Int64Builder::new()),
            t if t.is_floating() => ColumnBuilder::Float(Float64Builder::new()),
            DataType::Boolean => ColumnBuilder::Bool(BooleanBuilder::new()),
            t if t.is_timestamp() => {
                ColumnBuilder::Timestamp(TimestampMicrosecondBuilder::new().with_timezone("UTC"))
            }
            DataType::Bytes => ColumnBuilder::Bytes(BinaryBuilder::new()),
            // Decimals ride as strings, per the documented envelope.
            _ => ColumnBuilder::Text(StringBuilder::new()),
        }
    }

    fn arrow_type(column: &ColumnMeta) -> ArrowType {
        match column.data_type {
            t if t.is_integer() => ArrowType::Int64,
            t if t.is_floating() => ArrowType::Float64,
            DataType::Boolean => ArrowType::Boolean,
            t if t.is_timestamp() => {
                ArrowType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
            }
            DataType::Bytes => ArrowType::Binary,
            _ => ArrowType::Utf8,
        }
    }

    fn append(&mut self, value: &Value) {
        match self {
            ColumnBuilder::Int(b) => b.append_option(value.as_i64()),
            ColumnBuilder::Float(b) => b.append_option(value.as_f64()),
            ColumnBuilder::Bool(b) => b.append_option(match value {
                Value::Boolean(v) => Some(*v),
                _ => None,
            }),
            ColumnBuilder::Timestamp(b) => b.append_option(match value {
                Value::Timestamp(ts) => Some(ts.timestamp_micros()),
                _ => None,
            }),
            ColumnBuilder::Bytes(b) => match value {
                Value::Bytes(v) => b.append_value(v),
                Value::Null => b.append_null(),
                other => b.append_value(other.render_text().as_bytes()),
            },
            ColumnBuilder::Text(b) => match value {
                Value::Null => b.append_null(),
                other => b.append_value(other.render_text()),
            },
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
            ColumnBuilder::Bytes(b) => Arc::new(b.finish()),
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
        }
    }
}

enum Backing {
    /// One file, one row group per flush, footer on close.
    Direct { writer: Option<ArrowWriter<File>> },
    /// One finalized file per flush plus a manifest; survives crashes at
    /// every flush boundary and is the only layout usable for resume.
    Staged {
        parts_dir: PathBuf,
        manifest_path: PathBuf,
        manifest: Manifest,
    },
}

/// Parquet sink.
///
/// Columns map per the declared envelope: integers to INT64, floats to
/// DOUBLE, decimals to UTF8 strings, timestamps to microsecond UTC,
/// bytes to BYTE_ARRAY, booleans to BOOLEAN, text to UTF8.
pub struct ParquetSink {
    schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    rows_buffered: usize,
    backing: Backing,
    closed: bool,
}

impl ParquetSink {
    pub fn open(
        path: &Path,
        columns: &[ColumnMeta],
        mode: OpenMode,
        options: &SinkOptions,
    ) -> Result<Self, SinkError> {
        let fields: Vec<Field> = columns
            .iter()
            .map(|c| Field::new(c.name.as_str(), ColumnBuilder::arrow_type(c), true))
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        let builders = columns.iter().map(ColumnBuilder::for_column).collect();

        let staged = options.stage_batches || mode == OpenMode::Append;
        let backing = if staged {
            let parts_dir = PathBuf::from(format!("{}.parts", path.display()));
            let manifest_path = PathBuf::from(format!("{}.manifest.json", path.display()));
            std::fs::create_dir_all(&parts_dir)?;

            let manifest = match mode {
                OpenMode::Append => match std::fs::read_to_string(&manifest_path) {
                    Ok(contents) => serde_json::from_str(&contents)?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest {
                        columns: columns.iter().map(|c| c.name.clone()).collect(),
                        parts: Vec::new(),
                    },
                    Err(e) => return Err(e.into()),
                },
                OpenMode::Create => Manifest {
                    columns: columns.iter().map(|c| c.name.clone()).collect(),
                    parts: Vec::new(),
                },
            };

            Backing::Staged {
                parts_dir,
                manifest_path,
                manifest,
            }
        } else {
            let file = File::create(path)?;
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            Backing::Direct {
                writer: Some(ArrowWriter::try_new(file, schema.clone(), Some(props))?),
            }
        };

        Ok(ParquetSink {
            schema,
            builders,
            rows_buffered: 0,
            backing,
            closed: false,
        })
    }

    fn finish_batch(&mut self) -> Result<RecordBatch, SinkError> {
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        self.rows_buffered = 0;
        Ok(RecordBatch::try_new(self.schema.clone(), arrays)?)
    }

    fn write_manifest(manifest: &Manifest, manifest_path: &Path) -> Result<(), SinkError> {
        let tmp = PathBuf::from(format!("{}.tmp", manifest_path.display()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
        std::fs::rename(&tmp, manifest_path)?;
        Ok(())
    }

    fn is_staged(&self) -> bool {
        matches!(self.backing, Backing::Staged { .. })
    }

    fn flush_staged(&mut self) -> Result<(), SinkError> {
        if self.rows_buffered == 0 {
            return Ok(());
        }
        let batch = self.finish_batch()?;
        let Backing::Staged {
            parts_dir,
            manifest_path,
            manifest,
        } = &mut self.backing
        else {
            unreachable!("flush_staged on a direct sink");
        };

        let part_name = format!("part-{:05}.parquet", manifest.parts.len());
        let part_path = parts_dir.join(&part_name);
        let tmp_path = parts_dir.join(format!("{part_name}.tmp"));

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let file = File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        std::fs::rename(&tmp_path, &part_path)?;

        manifest.parts.push(PartEntry {
            file: part_name,
            rows: batch.num_rows() as u64,
        });
        Self::write_manifest(manifest, manifest_path)?;
        debug!(rows = batch.num_rows(), "staged parquet part committed");
        Ok(())
    }

    fn flush_direct(&mut self) -> Result<(), SinkError> {
        if self.rows_buffered == 0 {
            return Ok(());
        }
        let batch = self.finish_batch()?;
        let Backing::Direct { writer } = &mut self.backing else {
            unreachable!("flush_direct on a staged sink");
        };
        let writer = writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write(&batch)?;
        // Row-group boundary: everything written so far is encoded out.
        writer.flush()?;
        Ok(())
    }
}

impl SinkWriter for ParquetSink {
    fn write_header(&mut self) -> Result<(), SinkError> {
        // Parquet carries its schema in the footer; no header row exists.
        Ok(())
    }

    fn write_row(&mut self, values: &[Value]) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if values.len() != self.builders.len() {
            return Err(SinkError::RowWidth {
                expected: self.builders.len(),
                got: values.len(),
            });
        }
        for (builder, value) in self.builders.iter_mut().zip(values) {
            builder.append(value);
        }
        self.rows_buffered += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.is_staged() {
            self.flush_staged()
        } else {
            self.flush_direct()
        }
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        if self.is_staged() {
            self.flush_staged()?;
        } else {
            self.flush_direct()?;
        }
        if let Backing::Staged {
            manifest,
            manifest_path,
            ..
        } = &self.backing
        {
            Self::write_manifest(manifest, manifest_path)?;
        }
        if let Backing::Direct { writer } = &mut self.backing {
            if let Some(writer) = writer.take() {
                writer.close()?;
            }
        }
        self.closed = true;
        debug!("parquet sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta::new("id", "bigint", false, 0),
            ColumnMeta::new("name", "text", true, 1),
            ColumnMeta::new("created_at", "timestamptz", true, 2),
        ]
    }

    fn direct_options() -> SinkOptions {
        SinkOptions {
            stage_batches: false,
            ..SinkOptions::default()
        }
    }

    fn read_rows(path: &Path) -> usize {
        let file = File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        reader.map(|batch| batch.unwrap().num_rows()).sum()
    }

    #[test]
    fn direct_mode_writes_single_valid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut sink =
            ParquetSink::open(&path, &columns(), OpenMode::Create, &direct_options()).unwrap();

        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        for i in 0..3 {
            sink.write_row(&[
                Value::Int(i),
                Value::String(format!("row-{i}")),
                Value::Timestamp(ts),
            ])
            .unwrap();
        }
        sink.flush().unwrap();
        sink.close().unwrap();

        assert_eq!(read_rows(&path), 3);
    }

    #[test]
    fn direct_mode_empty_file_is_still_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let mut sink =
            ParquetSink::open(&path, &columns(), OpenMode::Create, &direct_options()).unwrap();
        sink.close().unwrap();

        assert_eq!(read_rows(&path), 0);
    }

    #[test]
    fn staged_mode_commits_one_part_per_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let options = SinkOptions::default();
        let mut sink = ParquetSink::open(&path, &columns(), OpenMode::Create, &options).unwrap();

        sink.write_row(&[Value::Int(1), Value::Null, Value::Null])
            .unwrap();
        sink.flush().unwrap();
        sink.write_row(&[Value::Int(2), Value::Null, Value::Null])
            .unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        let parts_dir = dir.path().join("out.parquet.parts");
        assert_eq!(read_rows(&parts_dir.join("part-00000.parquet")), 1);
        assert_eq!(read_rows(&parts_dir.join("part-00001.parquet")), 1);

        let manifest: Manifest = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("out.parquet.manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.parts.len(), 2);
        assert_eq!(manifest.parts[0].rows, 1);
    }

    #[test]
    fn append_mode_resumes_part_numbering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let options = SinkOptions::default();

        let mut sink = ParquetSink::open(&path, &columns(), OpenMode::Create, &options).unwrap();
        sink.write_row(&[Value::Int(1), Value::Null, Value::Null])
            .unwrap();
        sink.close().unwrap();

        let mut sink = ParquetSink::open(&path, &columns(), OpenMode::Append, &options).unwrap();
        sink.write_row(&[Value::Int(2), Value::Null, Value::Null])
            .unwrap();
        sink.close().unwrap();

        let manifest: Manifest = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("out.parquet.manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.parts.len(), 2);
        assert_eq!(manifest.parts[1].file, "part-00001.parquet");
    }

    #[test]
    fn decimal_values_land_as_strings() {
        use bigdecimal::BigDecimal;
        use std::str::FromStr;

        let dir = tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let cols = vec![ColumnMeta::new("price", "numeric(12,4)", false, 0)];
        let mut sink =
            ParquetSink::open(&path, &cols, OpenMode::Create, &direct_options()).unwrap();

        sink.write_row(&[Value::Decimal(
            BigDecimal::from_str("19.9900").unwrap(),
        )])
        .unwrap();
        sink.close().unwrap();

        let file = File::open(&path).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batch = reader.next().unwrap().unwrap();
        let prices = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::StringArray>()
            .unwrap();
        assert_eq!(prices.value(0), "19.9900");
    }
}
