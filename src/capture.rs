// PERFHARVEST COUNTER CAPTURE
// RUNS THE PROFILER FOR ONE BOUNDED WINDOW AND TURNS ITS REPORT INTO A
// FIXED-LENGTH COUNTER VECTOR. A VECTOR IS EITHER COMPLETE OR ABSENT.
//
// TIMELINE:
//   0 .. duration           PROFILER MEASURES (MAY EXIT ON ITS OWN)
//   duration                SIGINT: END OF MEASUREMENT, PROFILER PRINTS REPORT
//   duration + grace        SIGKILL: CaptureTimeout

use std::io::Read;
use std::process::Stdio;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{ProfilerConfig, ReportStream};
use crate::error::TrialError;
use crate::orchestrator::{ProcessHandle, POLL_INTERVAL};

// ---------------------------------------------------------------------------
// COUNTER VECTOR
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterVector {
    values: Vec<u64>,
}

impl CounterVector {
    // THE ONLY CONSTRUCTOR. WRONG LENGTH IS A FAILURE, NEVER A PADDED VECTOR.
    pub fn new(values: Vec<u64>, expected: usize) -> Result<Self, TrialError> {
        if values.len() != expected {
            return Err(TrialError::IncompleteCounterData {
                expected,
                found: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// REPORT PARSING
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ReportFormat {
    pub delimiter: char,
    pub value_field: usize,
    pub thousands_separators: String,
}

impl From<&ProfilerConfig> for ReportFormat {
    fn from(p: &ProfilerConfig) -> Self {
        Self {
            delimiter: p.delimiter,
            value_field: p.value_field,
            thousands_separators: p.thousands_separators.clone(),
        }
    }
}

// ONE VALUE PER LINE OR NOTHING. "<not counted>", COMMENTS, BLANKS AND
// LINES WITHOUT A FIELD AFTER THE VALUE (STRAY OUTPUT, NOT A COUNTER ROW) -> NONE.
pub fn parse_counter_line(line: &str, format: &ReportFormat) -> Option<u64> {
    let mut fields = line.trim().split(format.delimiter);
    let field = fields.nth(format.value_field)?;
    fields.next()?;
    let digits: String = field
        .trim()
        .chars()
        .filter(|c| !format.thousands_separators.contains(*c))
        .collect();
    digits.parse::<u64>().ok()
}

pub fn parse_report(report: &str, format: &ReportFormat, expected: usize) -> Result<CounterVector, TrialError> {
    let values: Vec<u64> = report
        .lines()
        .filter_map(|line| parse_counter_line(line, format))
        .collect();
    CounterVector::new(values, expected)
}

// ---------------------------------------------------------------------------
// CAPTURE
// ---------------------------------------------------------------------------

// WHAT THE SCHEDULER MEASURES WITH. CounterCapture IN PRODUCTION.
pub trait Sampler {
    fn sample(&self, duration: Duration) -> Result<CounterVector, TrialError>;
}

pub struct CounterCapture {
    profiler: ProfilerConfig,
    format: ReportFormat,
}

impl CounterCapture {
    pub fn new(profiler: ProfilerConfig) -> Self {
        let format = ReportFormat::from(&profiler);
        Self { profiler, format }
    }

    pub fn events(&self) -> &[String] {
        &self.profiler.events
    }

    pub fn capture(&self, duration: Duration) -> Result<CounterVector, TrialError> {
        let report = self.run_profiler(duration)?;
        let vector = parse_report(&report, &self.format, self.profiler.events.len());
        if let Err(TrialError::IncompleteCounterData { expected, found }) = &vector {
            debug!(expected, found, report = %report.trim(), "incomplete profiler report");
        }
        vector
    }

    // RETURNS THE RAW REPORT TEXT. THE PROFILER IS REAPED ON EVERY PATH.
    fn run_profiler(&self, duration: Duration) -> Result<String, TrialError> {
        let argv = self.profiler.argv();
        let (stdout, stderr) = match self.profiler.stream {
            ReportStream::Stdout => (Stdio::piped(), Stdio::null()),
            ReportStream::Stderr => (Stdio::null(), Stdio::piped()),
        };
        let mut handle = ProcessHandle::spawn(&argv, stdout, stderr)?;
        debug!(pid = handle.pid(), command = %handle.command(), "profiler started");

        let reader = match self.profiler.stream {
            ReportStream::Stdout => handle.take_stdout().map(drain),
            ReportStream::Stderr => handle.take_stderr().map(drain),
        };

        let start = handle.started_at();
        let window_end = start + duration;
        let hard_end = window_end + self.profiler.grace();
        let mut interrupted = false;

        let finished = loop {
            if handle.poll()?.is_some() {
                break true;
            }
            let now = Instant::now();
            if now >= hard_end {
                break false;
            }
            if !interrupted && now >= window_end {
                debug!(pid = handle.pid(), "window elapsed, sending SIGINT");
                handle.interrupt();
                interrupted = true;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !finished {
            handle.kill();
            handle.wait()?;
            // THE GROUP IS DEAD, SO THE PIPE IS CLOSED AND THE READER RETURNS
            if let Some(r) = reader {
                let _ = r.join();
            }
            return Err(TrialError::CaptureTimeout(duration + self.profiler.grace()));
        }

        match reader {
            Some(r) => r
                .join()
                .map_err(|_| TrialError::Unexpected("profiler report reader panicked".to_string()))?
                .map_err(TrialError::from),
            None => Err(TrialError::Unexpected("profiler report pipe missing".to_string())),
        }
    }
}

impl Sampler for CounterCapture {
    fn sample(&self, duration: Duration) -> Result<CounterVector, TrialError> {
        self.capture(duration)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<String>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf_format() -> ReportFormat {
        ReportFormat::from(&ProfilerConfig::default())
    }

    #[test]
    fn parses_perf_csv_line() {
        let f = perf_format();
        assert_eq!(parse_counter_line("123456,,cycles,5001234567,100.00,,", &f), Some(123456));
        assert_eq!(parse_counter_line("  42,,instructions", &f), Some(42));
    }

    #[test]
    fn skips_non_numeric_lines() {
        let f = perf_format();
        assert_eq!(parse_counter_line("<not counted>,,LLC-loads,0,0.00,,", &f), None);
        assert_eq!(parse_counter_line("<not supported>,,dTLB-loads", &f), None);
        assert_eq!(parse_counter_line("# started on Fri Oct 17", &f), None);
        assert_eq!(parse_counter_line("", &f), None);
        assert_eq!(parse_counter_line("-5,,cycles", &f), None);
    }

    #[test]
    fn bare_number_is_not_a_counter_row() {
        let f = perf_format();
        assert_eq!(parse_counter_line("12345", &f), None);
        assert_eq!(parse_counter_line("  12345  ", &f), None);
        assert_eq!(parse_counter_line("12345,", &f), Some(12345));
        let report = "99\n1,,a\n2,,b\n";
        assert_eq!(parse_report(report, &f, 2).unwrap().values(), &[1, 2]);
    }

    #[test]
    fn strips_thousands_separators() {
        let f = ReportFormat {
            delimiter: ';',
            value_field: 0,
            thousands_separators: ",.".to_string(),
        };
        assert_eq!(parse_counter_line("1,234,567;cycles", &f), Some(1_234_567));
        assert_eq!(parse_counter_line("9.876;instructions", &f), Some(9876));
    }

    #[test]
    fn value_field_is_configurable() {
        let f = ReportFormat {
            delimiter: '\t',
            value_field: 1,
            thousands_separators: String::new(),
        };
        assert_eq!(parse_counter_line("cycles\t777\tmsec", &f), Some(777));
        assert_eq!(parse_counter_line("cycles", &f), None);
    }

    #[test]
    fn report_keeps_line_order() {
        let report = "# header\n3,,a\n\n1,,b\n<not counted>,,x\n2,,c\n";
        let v = parse_report(report, &perf_format(), 3).unwrap();
        assert_eq!(v.values(), &[3, 1, 2]);
    }

    #[test]
    fn report_too_short_or_too_long_fails() {
        let report = "1,,a\n2,,b\n3,,c\n";
        assert!(matches!(
            parse_report(report, &perf_format(), 4),
            Err(TrialError::IncompleteCounterData { expected: 4, found: 3 })
        ));
        assert!(matches!(
            parse_report(report, &perf_format(), 2),
            Err(TrialError::IncompleteCounterData { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn counter_vector_rejects_wrong_length() {
        assert!(CounterVector::new(vec![1, 2], 2).is_ok());
        assert!(CounterVector::new(vec![], 2).is_err());
    }
}
