//! Letter processing progress.
//!
//! Emitted on **stderr** so the run summary on stdout stays parseable.

use std::io::Write;

/// How one letter ended, as reported to progress output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LetterResult {
    Processed { products: usize, matches: u64 },
    Skipped,
    Failed,
}

#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Walking the letters directory. Total unknown.
    Discovering,
    /// Letter `n` of `total` has started.
    Started { n: u64, total: u64, file: String },
    /// Letter `n` of `total` is done.
    Finished {
        n: u64,
        total: u64,
        file: String,
        result: LetterResult,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly lines: `[ 3/12] PIX2B.pdf  processed  2 products, 5 matches`.
pub struct StderrProgress;

impl StderrProgress {
    fn render(event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::Discovering => Some("process  discovering letters...".to_string()),
            // Started letters are reported by JSON output only.
            ProgressEvent::Started { .. } => None,
            ProgressEvent::Finished {
                n,
                total,
                file,
                result,
            } => {
                let width = format_number(*total).len();
                let outcome = match result {
                    LetterResult::Processed { products, matches } => format!(
                        "processed  {} product{}, {} match{}",
                        products,
                        if *products == 1 { "" } else { "s" },
                        matches,
                        if *matches == 1 { "" } else { "es" }
                    ),
                    LetterResult::Skipped => "skipped (already processed)".to_string(),
                    LetterResult::Failed => "FAILED".to_string(),
                };
                Some(format!(
                    "[{:>width$}/{}] {}  {}",
                    format_number(*n),
                    format_number(*total),
                    file,
                    outcome,
                    width = width
                ))
            }
        }
    }
}

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        if let Some(line) = Self::render(&event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn render(event: &ProgressEvent) -> serde_json::Value {
        match event {
            ProgressEvent::Discovering => serde_json::json!({
                "event": "progress",
                "phase": "discovering"
            }),
            ProgressEvent::Started { n, total, file } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total,
                "file": file
            }),
            ProgressEvent::Finished {
                n,
                total,
                file,
                result,
            } => {
                let mut obj = serde_json::json!({
                    "event": "letter",
                    "n": n,
                    "total": total,
                    "file": file,
                });
                match result {
                    LetterResult::Processed { products, matches } => {
                        obj["status"] = "processed".into();
                        obj["products"] = (*products).into();
                        obj["matches"] = (*matches).into();
                    }
                    LetterResult::Skipped => obj["status"] = "skipped".into(),
                    LetterResult::Failed => obj["status"] = "failed".into(),
                }
                obj
            }
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = Self::render(&event);
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", obj);
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse a `--progress` value; `None` picks by TTY.
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("off") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!("Unknown progress mode: '{}'. Use off, human, or json.", other),
        }
    }

    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(n: u64, total: u64, result: LetterResult) -> ProgressEvent {
        ProgressEvent::Finished {
            n,
            total,
            file: "PIX2B.pdf".to_string(),
            result,
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(342_229), "342,229");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_lines_are_padded_and_pluralised() {
        let line = StderrProgress::render(&finished(
            3,
            12,
            LetterResult::Processed {
                products: 1,
                matches: 4,
            },
        ))
        .unwrap();
        assert_eq!(line, "[ 3/12] PIX2B.pdf  processed  1 product, 4 matches");
        assert!(StderrProgress::render(&ProgressEvent::Started {
            n: 1,
            total: 2,
            file: "x".into()
        })
        .is_none());
        assert!(StderrProgress::render(&finished(1, 1, LetterResult::Failed))
            .unwrap()
            .ends_with("FAILED"));
    }

    #[test]
    fn json_letter_event() {
        let v = JsonProgress::render(&finished(1, 2, LetterResult::Skipped));
        assert_eq!(v["event"], "letter");
        assert_eq!(v["status"], "skipped");
        assert!(v.get("products").is_none());

        let v = JsonProgress::render(&finished(
            2,
            2,
            LetterResult::Processed {
                products: 2,
                matches: 3,
            },
        ));
        assert_eq!(v["status"], "processed");
        assert_eq!(v["matches"], 3);
    }

    #[test]
    fn progress_flag_parsing() {
        assert_eq!(ProgressMode::from_flag(Some("json")).unwrap(), ProgressMode::Json);
        assert_eq!(ProgressMode::from_flag(Some("off")).unwrap(), ProgressMode::Off);
        assert!(ProgressMode::from_flag(Some("loud")).is_err());
    }
}
