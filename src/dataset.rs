// PERFHARVEST DATASET WRITER
// ONE CSV ROW PER COMMITTED TRIAL, STREAMED AND FLUSHED AS IT IS WRITTEN.
// HEADER: id, <event-1> .. <event-N>, label, attack_type, load_level

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::capture::CounterVector;
use crate::config::LoadLevel;
use crate::planner::{Label, TrialDescriptor};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleRecord {
    sample_id: String,
    counters: CounterVector,
    label: Label,
    attack_type: String,
    load_level: LoadLevel,
}

impl SampleRecord {
    pub fn new(trial: &TrialDescriptor, counters: CounterVector) -> Self {
        Self {
            sample_id: trial.sample_id.clone(),
            counters,
            label: trial.label,
            attack_type: trial.attack_type.clone(),
            load_level: trial.load_level,
        }
    }
}

pub fn header(events: &[String]) -> Vec<String> {
    let mut cols = Vec::with_capacity(events.len() + 4);
    cols.push("id".to_string());
    cols.extend(events.iter().cloned());
    cols.push("label".to_string());
    cols.push("attack_type".to_string());
    cols.push("load_level".to_string());
    cols
}

pub struct DatasetWriter<W: Write> {
    out: BufWriter<W>,
    counters: usize,
    rows: u64,
    // SET BY THE FIRST FAILED WRITE. A PARTIAL ROW MAY BE ON DISK, SO
    // NOTHING MAY FOLLOW IT.
    failed: bool,
}

impl DatasetWriter<File> {
    // CREATES OR TRUNCATES
    pub fn open(path: &Path, events: &[String]) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        Self::from_writer(File::create(path)?, events)
    }
}

impl<W: Write> DatasetWriter<W> {
    pub fn from_writer(inner: W, events: &[String]) -> io::Result<Self> {
        let mut w = Self {
            out: BufWriter::new(inner),
            counters: events.len(),
            rows: 0,
            failed: false,
        };
        let cols = header(events);
        w.write_row(cols.iter().map(String::as_str))?;
        Ok(w)
    }

    pub fn append(&mut self, record: &SampleRecord) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("dataset output failed earlier, refusing row {}", record.sample_id),
            ));
        }
        if record.counters.len() != self.counters {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record {} has {} counters, header has {}",
                    record.sample_id,
                    record.counters.len(),
                    self.counters
                ),
            ));
        }
        let values: Vec<String> = record.counters.values().iter().map(u64::to_string).collect();
        let label = record.label.as_u8().to_string();
        let fields = std::iter::once(record.sample_id.as_str())
            .chain(values.iter().map(String::as_str))
            .chain([label.as_str(), record.attack_type.as_str(), record.load_level.label()]);
        if let Err(e) = self.write_row(fields) {
            self.failed = true;
            return Err(e);
        }
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn close(self) -> io::Result<W> {
        self.out.into_inner().map_err(|e| e.into_error())
    }

    // EACH ROW IS FLUSHED: AN INTERRUPTED RUN KEEPS EVERY COMMITTED SAMPLE
    fn write_row<'a, I>(&mut self, fields: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut first = true;
        for field in fields {
            if !first {
                self.out.write_all(b",")?;
            }
            first = false;
            write_field(&mut self.out, field)?;
        }
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

fn write_field<W: Write>(out: &mut W, field: &str) -> io::Result<()> {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        write!(out, "\"{}\"", field.replace('"', "\"\""))
    } else {
        out.write_all(field.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> Vec<String> {
        vec!["cycles".to_string(), "instructions".to_string()]
    }

    fn trial(sample_id: &str, label: Label, attack: &str) -> TrialDescriptor {
        TrialDescriptor {
            sample_id: sample_id.to_string(),
            label,
            attack_type: attack.to_string(),
            load_level: LoadLevel::AvgLoad,
            primary_command: None,
            auxiliary_commands: Vec::new(),
        }
    }

    fn written(w: DatasetWriter<Vec<u8>>) -> String {
        String::from_utf8(w.close().unwrap()).unwrap()
    }

    #[test]
    fn header_written_once_on_open() {
        let w = DatasetWriter::from_writer(Vec::new(), &events()).unwrap();
        assert_eq!(written(w), "id,cycles,instructions,label,attack_type,load_level\n");
    }

    #[test]
    fn rows_in_fixed_column_order() {
        let mut w = DatasetWriter::from_writer(Vec::new(), &events()).unwrap();
        let rec = SampleRecord::new(
            &trial("fr_libc.so.6_avg-load_0", Label::Attack, "fr"),
            CounterVector::new(vec![100, 200], 2).unwrap(),
        );
        w.append(&rec).unwrap();
        let rec = SampleRecord::new(
            &trial("benign_avg-load_3", Label::Benign, "benign"),
            CounterVector::new(vec![7, 8], 2).unwrap(),
        );
        w.append(&rec).unwrap();
        assert_eq!(w.rows_written(), 2);
        let text = written(w);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "fr_libc.so.6_avg-load_0,100,200,1,fr,avg-load");
        assert_eq!(lines[2], "benign_avg-load_3,7,8,0,benign,avg-load");
    }

    #[test]
    fn mismatched_counter_count_rejected() {
        let mut w = DatasetWriter::from_writer(Vec::new(), &events()).unwrap();
        let rec = SampleRecord::new(
            &trial("x", Label::Attack, "fr"),
            CounterVector::new(vec![1, 2, 3], 3).unwrap(),
        );
        let err = w.append(&rec).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(w.rows_written(), 0);
    }

    // ACCEPTS THE HEADER, THEN FAILS EVERY WRITE
    struct FailAfter {
        budget: usize,
        written: Vec<u8>,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() + buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_blocks_later_rows() {
        let header_len = "id,cycles,instructions,label,attack_type,load_level\n".len();
        let sink = FailAfter { budget: header_len, written: Vec::new() };
        let mut w = DatasetWriter::from_writer(sink, &events()).unwrap();
        assert!(!w.has_failed());

        let rec = SampleRecord::new(
            &trial("a", Label::Attack, "fr"),
            CounterVector::new(vec![1, 2], 2).unwrap(),
        );
        assert!(w.append(&rec).is_err());
        assert!(w.has_failed());
        assert_eq!(w.rows_written(), 0);

        let err = w.append(&rec).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(w.rows_written(), 0);
    }

    #[test]
    fn mismatch_does_not_block_later_rows() {
        let mut w = DatasetWriter::from_writer(Vec::new(), &events()).unwrap();
        let bad = SampleRecord::new(
            &trial("x", Label::Attack, "fr"),
            CounterVector::new(vec![1], 1).unwrap(),
        );
        assert!(w.append(&bad).is_err());
        assert!(!w.has_failed());
        let good = SampleRecord::new(
            &trial("y", Label::Attack, "fr"),
            CounterVector::new(vec![1, 2], 2).unwrap(),
        );
        w.append(&good).unwrap();
        assert_eq!(w.rows_written(), 1);
    }

    #[test]
    fn fields_with_delimiters_are_quoted() {
        let mut buf = Vec::new();
        write_field(&mut buf, "a,b").unwrap();
        buf.push(b'|');
        write_field(&mut buf, "say \"hi\"").unwrap();
        buf.push(b'|');
        write_field(&mut buf, "plain").unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "\"a,b\"|\"say \"\"hi\"\"\"|plain");
    }

    #[test]
    fn open_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale\nstale\n").unwrap();
        let w = DatasetWriter::open(&path, &events()).unwrap();
        w.close().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "id,cycles,instructions,label,attack_type,load_level\n");
    }
}
