use checkon_core::{CoreError, Failure, FailureKind, TestCaseRun, TestOutcome, TestSuiteRun};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

struct PendingFailure {
    kind: FailureKind,
    failure_type: Option<String>,
    message: Option<String>,
    text: String,
}

impl PendingFailure {
    fn finish(self) -> Failure {
        let text = self.text.trim_end();
        Failure {
            kind: self.kind,
            failure_type: self.failure_type,
            message: self.message,
            text: (!text.is_empty()).then(|| text.to_owned()),
        }
    }
}

#[derive(Default)]
struct JunitState {
    suites: Vec<TestSuiteRun>,
    open_suites: Vec<TestSuiteRun>,
    case: Option<TestCaseRun>,
    failure: Option<PendingFailure>,
}

impl JunitState {
    fn open_suite(&mut self, element: &BytesStart<'_>) -> Result<(), CoreError> {
        self.open_suites.push(TestSuiteRun {
            name: attribute(element, b"name")?,
            test_cases: Vec::new(),
        });
        Ok(())
    }

    fn close_suite(&mut self) {
        if let Some(suite) = self.open_suites.pop() {
            self.suites.push(suite);
        }
    }

    fn open_case(&mut self, element: &BytesStart<'_>) -> Result<(), CoreError> {
        let name = attribute(element, b"name")?.unwrap_or_default();
        let mut case =
            TestCaseRun::passed(attribute(element, b"classname")?.as_deref(), &name, None);
        case.file = attribute(element, b"file")?;
        case.line = attribute(element, b"line")?.and_then(|raw| raw.trim().parse().ok());
        case.duration_secs = attribute(element, b"time")?.and_then(|raw| raw.trim().parse().ok());
        self.case = Some(case);
        Ok(())
    }

    fn close_case(&mut self) {
        let Some(case) = self.case.take() else {
            return;
        };
        match self.open_suites.last_mut() {
            Some(suite) => suite.test_cases.push(case),
            None => match self.suites.iter_mut().find(|suite| suite.name.is_none()) {
                Some(loose) => loose.test_cases.push(case),
                None => self.suites.push(TestSuiteRun {
                    name: None,
                    test_cases: vec![case],
                }),
            },
        }
    }

    fn open_failure(
        &mut self,
        element: &BytesStart<'_>,
        kind: FailureKind,
    ) -> Result<(), CoreError> {
        if self.case.is_none() {
            return Ok(());
        }
        self.failure = Some(PendingFailure {
            kind,
            failure_type: attribute(element, b"type")?,
            message: attribute(element, b"message")?,
            text: String::new(),
        });
        Ok(())
    }

    fn close_failure(&mut self) {
        let Some(pending) = self.failure.take() else {
            return;
        };
        if let Some(case) = self.case.take() {
            // The first failure element wins; later ones are usually teardown noise.
            self.case = Some(if case.failure.is_some() {
                case
            } else {
                case.with_failure(pending.finish())
            });
        }
    }

    fn mark_skipped(&mut self) {
        if let Some(case) = self.case.as_mut() {
            if case.failure.is_none() {
                case.outcome = TestOutcome::Skipped;
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(pending) = self.failure.as_mut() {
            pending.text.push_str(text);
        }
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, CoreError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|error| CoreError::Report(format!("invalid attribute: {error}")))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|error| CoreError::Report(format!("invalid attribute value: {error}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Parses a JUnit-style XML report as written by pytest's `--junitxml`.
///
/// Accepts either a `<testsuites>` root or a bare `<testsuite>`. Test cases found
/// outside any suite are collected into an unnamed suite.
pub fn parse_junit(xml: &str) -> Result<Vec<TestSuiteRun>, CoreError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut state = JunitState::default();

    loop {
        let event = reader.read_event().map_err(|error| {
            CoreError::Report(format!(
                "malformed JUnit XML at byte {}: {error}",
                reader.buffer_position()
            ))
        })?;
        match event {
            Event::Start(element) => match element.name().as_ref() {
                b"testsuite" => state.open_suite(&element)?,
                b"testcase" => state.open_case(&element)?,
                b"failure" => state.open_failure(&element, FailureKind::Failure)?,
                b"error" => state.open_failure(&element, FailureKind::Error)?,
                b"skipped" => state.mark_skipped(),
                _ => {}
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"testsuite" => {
                    state.open_suite(&element)?;
                    state.close_suite();
                }
                b"testcase" => {
                    state.open_case(&element)?;
                    state.close_case();
                }
                b"failure" => {
                    state.open_failure(&element, FailureKind::Failure)?;
                    state.close_failure();
                }
                b"error" => {
                    state.open_failure(&element, FailureKind::Error)?;
                    state.close_failure();
                }
                b"skipped" => state.mark_skipped(),
                _ => {}
            },
            Event::End(element) => match element.name().as_ref() {
                b"testsuite" => state.close_suite(),
                b"testcase" => state.close_case(),
                b"failure" | b"error" => state.close_failure(),
                _ => {}
            },
            Event::Text(text) => {
                if state.failure.is_some() {
                    let text = text
                        .unescape()
                        .map_err(|error| CoreError::Report(format!("invalid text: {error}")))?;
                    state.push_text(&text);
                }
            }
            Event::CData(data) => state.push_text(&String::from_utf8_lossy(&data)),
            Event::Eof => break,
            _ => {}
        }
    }

    if state.case.is_some() || !state.open_suites.is_empty() {
        return Err(CoreError::Report(
            "JUnit XML ended before every element was closed".to_owned(),
        ));
    }
    Ok(state.suites)
}
