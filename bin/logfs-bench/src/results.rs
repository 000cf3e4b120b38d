//! Run time statistics and their printers

use serde::Serialize;
use std::io::Write;

/// Summary of the timed runs of one test, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub test_name: String,
    pub runs: usize,
    pub median: f64,
    pub mad: f64,
    pub min: f64,
    pub max: f64,
}

impl RunResult {
    /// Summarize run times; `None` if there are none
    pub fn from_samples(test_name: impl Into<String>, mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mid = samples.len() / 2;

        samples.sort_by(f64::total_cmp);
        let median = (samples[mid] + samples[samples.len() - 1 - mid]) / 2.0;

        let mut diffs: Vec<f64> = samples.iter().map(|x| (x - median).abs()).collect();
        diffs.sort_by(f64::total_cmp);

        Some(Self {
            test_name: test_name.into(),
            runs: samples.len(),
            median,
            mad: diffs[mid],
            min: samples[0],
            max: samples[samples.len() - 1],
        })
    }
}

/// Output format of a benchmark
pub trait ResultPrinter {
    fn print_configuration(&mut self, configuration: &serde_json::Value) -> std::io::Result<()>;
    fn print_result(&mut self, result: &RunResult) -> std::io::Result<()>;
}

/// Human-readable table
pub struct TextPrinter<W: Write> {
    out: W,
}

impl<W: Write> TextPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ResultPrinter for TextPrinter<W> {
    fn print_configuration(&mut self, configuration: &serde_json::Value) -> std::io::Result<()> {
        if let Some(fields) = configuration.as_object() {
            for (key, value) in fields {
                writeln!(self.out, "{key:>16}: {value}")?;
            }
        }
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{:<24} {:>6} {:>12} {:>12} {:>12} {:>12}",
            "test", "runs", "median [ms]", "mad [ms]", "min [ms]", "max [ms]"
        )
    }

    fn print_result(&mut self, r: &RunResult) -> std::io::Result<()> {
        writeln!(
            self.out,
            "{:<24} {:>6} {:>12.3} {:>12.3} {:>12.3} {:>12.3}",
            r.test_name, r.runs, r.median, r.mad, r.min, r.max
        )
    }
}

/// One JSON document per line
pub struct JsonPrinter<W: Write> {
    out: W,
}

impl<W: Write> JsonPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> ResultPrinter for JsonPrinter<W> {
    fn print_configuration(&mut self, configuration: &serde_json::Value) -> std::io::Result<()> {
        let document = serde_json::json!({ "configuration": configuration });
        serde_json::to_writer(&mut self.out, &document)?;
        writeln!(self.out)
    }

    fn print_result(&mut self, result: &RunResult) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, result)?;
        writeln!(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_number_of_runs() {
        let r = RunResult::from_samples("odd", vec![5.0, 1.0, 4.0, 2.0, 3.0]).unwrap();
        assert_eq!(r.runs, 5);
        assert_eq!(r.median, 3.0);
        // |x - 3| sorted: 0, 1, 1, 2, 2
        assert_eq!(r.mad, 1.0);
        assert_eq!(r.min, 1.0);
        assert_eq!(r.max, 5.0);
    }

    #[test]
    fn test_even_number_of_runs() {
        let r = RunResult::from_samples("even", vec![10.0, 40.0, 20.0, 30.0]).unwrap();
        assert_eq!(r.median, 25.0);
        // |x - 25| sorted: 5, 5, 15, 15
        assert_eq!(r.mad, 15.0);
        assert_eq!(r.min, 10.0);
        assert_eq!(r.max, 40.0);
    }

    #[test]
    fn test_no_runs() {
        assert!(RunResult::from_samples("none", Vec::new()).is_none());
    }

    #[test]
    fn test_printers() {
        let r = RunResult::from_samples("write", vec![1.0]).unwrap();

        let mut text = Vec::new();
        TextPrinter::new(&mut text).print_result(&r).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.starts_with("write"));
        assert!(text.contains("1.000"));

        let mut json = Vec::new();
        JsonPrinter::new(&mut json).print_result(&r).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["test_name"], "write");
        assert_eq!(value["runs"], 1);
    }
}
