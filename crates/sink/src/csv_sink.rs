use crate::{error::SinkError, OpenMode, SinkWriter};
use model::{core::value::Value, schema::column::ColumnMeta};
use std::{
    fs::{File, OpenOptions},
    path::Path,
};
use tracing::debug;

/// CSV sink: comma-separated, `\n`-terminated, RFC-style quoting with
/// embedded quotes doubled. NULL renders as a configurable literal.
pub struct CsvSink {
    writer: Option<csv::Writer<File>>,
    header: Vec<String>,
    null_literal: String,
}

impl CsvSink {
    pub fn open(
        path: &Path,
        columns: &[ColumnMeta],
        mode: OpenMode,
        null_literal: String,
    ) -> Result<Self, SinkError> {
        let file = match mode {
            OpenMode::Create => File::create(path)?,
            // Resume: position past all previously flushed content.
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(path)?,
        };

        Ok(CsvSink {
            writer: Some(
                csv::WriterBuilder::new()
                    .terminator(csv::Terminator::Any(b'\n'))
                    .from_writer(file),
            ),
            header: columns.iter().map(|c| c.name.clone()).collect(),
            null_literal,
        })
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, SinkError> {
        self.writer.as_mut().ok_or(SinkError::Closed)
    }
}

impl SinkWriter for CsvSink {
    fn write_header(&mut self) -> Result<(), SinkError> {
        let header = self.header.clone();
        self.writer()?.write_record(&header)?;
        Ok(())
    }

    fn write_row(&mut self, values: &[Value]) -> Result<(), SinkError> {
        if values.len() != self.header.len() {
            return Err(SinkError::RowWidth {
                expected: self.header.len(),
                got: values.len(),
            });
        }
        let null_literal = self.null_literal.clone();
        let record: Vec<String> = values
            .iter()
            .map(|v| match v {
                Value::Null => null_literal.clone(),
                other => other.render_text(),
            })
            .collect();
        self.writer()?.write_record(&record)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            debug!("csv sink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta::new("id", "bigint", false, 0),
            ColumnMeta::new("name", "text", true, 1),
        ]
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Create, "NULL".into()).unwrap();

        sink.write_header().unwrap();
        sink.write_row(&[Value::Int(1), Value::String("a".into())])
            .unwrap();
        sink.write_row(&[Value::Int(2), Value::Null]).unwrap();
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "id,name\n1,a\n2,NULL\n");
    }

    #[test]
    fn quotes_embedded_delimiters_and_doubles_quotes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Create, "NULL".into()).unwrap();

        sink.write_row(&[Value::Int(1), Value::String("a,\"b\"\nc".into())])
            .unwrap();
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "1,\"a,\"\"b\"\"\nc\"\n");
    }

    #[test]
    fn append_mode_continues_past_existing_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Create, "NULL".into()).unwrap();
        sink.write_header().unwrap();
        sink.write_row(&[Value::Int(1), Value::String("a".into())])
            .unwrap();
        sink.close().unwrap();

        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Append, "NULL".into()).unwrap();
        sink.write_row(&[Value::Int(2), Value::String("b".into())])
            .unwrap();
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "id,name\n1,a\n2,b\n");
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Create, "NULL".into()).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
    }

    #[test]
    fn rejects_misaligned_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Create, "NULL".into()).unwrap();
        assert!(matches!(
            sink.write_row(&[Value::Int(1)]),
            Err(SinkError::RowWidth { .. })
        ));
    }

    #[test]
    fn empty_null_literal_renders_empty_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::open(&path, &columns(), OpenMode::Create, String::new()).unwrap();
        sink.write_row(&[Value::Int(1), Value::Null]).unwrap();
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "1,\n");
    }
}
