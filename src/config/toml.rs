use crate::config::SessionConfig;
use crate::error::{IssuanceError, IssueResult};
use std::path::Path;
use std::str::FromStr;
use toml_edit::DocumentMut;

pub(super) fn load_toml(file: &Path) -> IssueResult<SessionConfig> {
    let document = std::fs::read_to_string(file).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IssuanceError::NotFound {
            what: "configuration file",
            path: file.to_path_buf(),
        },
        _ => IssuanceError::storage(file, e),
    })?;
    let document = DocumentMut::from_str(&document).map_err(|e| {
        IssuanceError::Configuration(format!("{} is not valid TOML: {e}", file.display()))
    })?;
    toml_edit::de::from_document(document)
        .map_err(|e| IssuanceError::Configuration(format!("{}: {e}", file.display())))
}

/// Render a config as TOML. The account key is never written.
pub(super) fn to_toml(config: &SessionConfig) -> IssueResult<String> {
    toml_edit::ser::to_string_pretty(config)
        .map_err(|e| IssuanceError::Configuration(format!("cannot serialize configuration: {e}")))
}
