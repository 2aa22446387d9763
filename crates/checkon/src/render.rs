use checkon_core::CoreError;
use checkon_store::ComparisonRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

const TABLE_HEADERS: [&str; 8] = [
    "envname",
    "injected_artifact",
    "classname",
    "case_name",
    "line",
    "provider",
    "outcome",
    "failure_message",
];

pub fn render_records(
    records: &[ComparisonRecord],
    format: OutputFormat,
) -> Result<String, CoreError> {
    match format {
        OutputFormat::Table => Ok(render_table(records)),
        OutputFormat::Json => render_json(records),
    }
}

pub fn render_json(records: &[ComparisonRecord]) -> Result<String, CoreError> {
    serde_json::to_string_pretty(records)
        .map_err(|error| CoreError::Report(format!("failed to serialize comparison rows: {error}")))
}

/// Column-aligned text with a header row. Only the first line of a failure
/// message is shown; the full text is available through JSON output.
pub fn render_table(records: &[ComparisonRecord]) -> String {
    let rows: Vec<[String; 8]> = records.iter().map(table_row).collect();

    let mut widths = TABLE_HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &TABLE_HEADERS.map(str::to_owned), &widths);
    for row in &rows {
        push_line(&mut out, row, &widths);
    }
    out
}

fn table_row(record: &ComparisonRecord) -> [String; 8] {
    [
        record.envname.clone(),
        record.injected_artifact.clone(),
        record.classname.clone().unwrap_or_default(),
        record.case_name.clone(),
        record.line.map(|line| line.to_string()).unwrap_or_default(),
        record.provider.clone(),
        record.outcome.as_key().to_owned(),
        record
            .failure_message
            .as_deref()
            .and_then(|message| message.lines().next())
            .unwrap_or_default()
            .to_owned(),
    ]
}

fn push_line(out: &mut String, cells: &[String; 8], widths: &[usize; 8]) {
    let last = cells.len() - 1;
    let mut line = String::new();
    for (index, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if index == last {
            line.push_str(cell);
        } else {
            line.push_str(&format!("{cell:<width$}  "));
        }
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use checkon_core::TestOutcome;

    use super::*;

    fn record(artifact: &str, message: Option<&str>) -> ComparisonRecord {
        ComparisonRecord {
            envname: "py311".to_owned(),
            injected_artifact: artifact.to_owned(),
            classname: Some("tests.test_foo".to_owned()),
            case_name: "test_foo".to_owned(),
            line: Some(4),
            provider: "https://github.com/example/dependent".to_owned(),
            failure_message: message.map(str::to_owned),
            failure_text: message.map(|_| "traceback".to_owned()),
            outcome: if message.is_some() {
                TestOutcome::Failed
            } else {
                TestOutcome::Passed
            },
        }
    }

    #[test]
    fn table_aligns_columns_under_a_header() {
        let table = render_table(&[
            record("libx==1.0", None),
            record("libx==2.0", Some("AssertionError: expected 1, got 2\nmore detail")),
        ]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("envname"));
        let artifact_column = lines[0].find("injected_artifact").expect("artifact header");
        assert_eq!(lines[1].find("libx==1.0"), Some(artifact_column));
        assert_eq!(lines[2].find("libx==2.0"), Some(artifact_column));
        assert!(lines[2].ends_with("AssertionError: expected 1, got 2"));
        assert!(!table.contains("more detail"));
    }

    #[test]
    fn empty_table_still_has_a_header() {
        assert_eq!(render_table(&[]).lines().count(), 1);
    }

    #[test]
    fn json_keeps_full_failure_fields() {
        let json = render_records(&[record("libx==2.0", Some("boom"))], OutputFormat::Json)
            .expect("json");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(parsed[0]["injected_artifact"], "libx==2.0");
        assert_eq!(parsed[0]["failure_message"], "boom");
        assert_eq!(parsed[0]["failure_text"], "traceback");
        assert_eq!(parsed[0]["line"], 4);
    }
}
