use std::collections::BTreeMap;

use checkon_core::{CoreError, EnvName, EnvironmentSummary};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ToxResultJson {
    #[serde(default)]
    testenvs: BTreeMap<String, ToxEnvJson>,
}

#[derive(Debug, Default, Deserialize)]
struct ToxEnvJson {
    #[serde(default)]
    setup: Vec<CommandRecord>,
    #[serde(default)]
    test: Vec<CommandRecord>,
}

#[derive(Debug, Deserialize)]
struct CommandRecord {
    #[serde(default)]
    retcode: Option<serde_json::Value>,
}

impl CommandRecord {
    /// tox has written `retcode` both as an integer and as a string.
    fn exit_code(&self) -> Option<i32> {
        match self.retcode.as_ref()? {
            serde_json::Value::Number(number) => {
                number.as_i64().and_then(|code| i32::try_from(code).ok())
            }
            serde_json::Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Extracts `envname`'s setup and test status from a `--result-json` document.
///
/// Returns `Ok(None)` when the document has no entry for the environment.
pub fn parse_tox_summary(
    json: &str,
    envname: &EnvName,
) -> Result<Option<EnvironmentSummary>, CoreError> {
    let document: ToxResultJson = serde_json::from_str(json)
        .map_err(|error| CoreError::Report(format!("malformed tox result JSON: {error}")))?;
    let Some(env) = document.testenvs.get(envname.as_str()) else {
        return Ok(None);
    };

    let setup_succeeded = env
        .setup
        .iter()
        .all(|record| record.exit_code().is_none_or(|code| code == 0));
    let codes: Vec<i32> = env.test.iter().filter_map(CommandRecord::exit_code).collect();
    let test_exit_code = codes
        .iter()
        .copied()
        .find(|code| *code != 0)
        .or_else(|| codes.last().copied());

    Ok(Some(EnvironmentSummary {
        setup_succeeded,
        test_exit_code,
    }))
}
