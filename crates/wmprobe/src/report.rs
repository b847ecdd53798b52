//! Run reports

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::runner::{TestResult, TestStatus};

/// Output format of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{}' (expected text or json)", other)),
        }
    }
}

/// Results of a whole run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl RunReport {
    pub fn push(&mut self, result: TestResult) {
        match result.status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Error => self.errored += 1,
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    /// Process exit code: the number of tests that did not pass, capped at 255
    pub fn exit_code(&self) -> u8 {
        (self.failed + self.errored).min(u8::MAX as usize) as u8
    }

    pub fn summary(&self) -> String {
        format!(
            "{} tests: {} passed, {} failed, {} errored",
            self.total(),
            self.passed,
            self.failed,
            self.errored
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report in `format`
    pub fn write(&self, format: ReportFormat, out: &mut impl Write) -> io::Result<()> {
        match format {
            ReportFormat::Text => write!(out, "{}", self),
            ReportFormat::Json => {
                let json = self.to_json().map_err(io::Error::other)?;
                writeln!(out, "{}", json)
            }
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{}", result)?;
        }
        writeln!(f, "{}", self.summary())
    }
}

impl Extend<TestResult> for RunReport {
    fn extend<I: IntoIterator<Item = TestResult>>(&mut self, iter: I) {
        for result in iter {
            self.push(result);
        }
    }
}

impl FromIterator<TestResult> for RunReport {
    fn from_iter<I: IntoIterator<Item = TestResult>>(iter: I) -> Self {
        let mut report = RunReport::default();
        report.extend(iter);
        report
    }
}
