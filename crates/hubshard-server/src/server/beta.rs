use async_trait::async_trait;
use hubshard::{BetaUserLookup, BetaUsers, InstallationId, LookupError};
use std::path::PathBuf;

/// Beta-tester table kept in a plain text file.
///
/// One installation id per line; blank lines and lines starting with `#` are
/// skipped, and so are lines that are not valid ids (logged at `warn`). The
/// file is read on every lookup so edits apply without a restart.
#[derive(Clone, Debug)]
pub struct FileBetaUserLookup {
    path: PathBuf,
}

impl FileBetaUserLookup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BetaUserLookup for FileBetaUserLookup {
    async fn beta_users(&self) -> Result<BetaUsers, LookupError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| LookupError {
                reason: format!("cannot read {}: {e}", self.path.display()),
            })?;

        Ok(raw
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|(_line_no, line)| match InstallationId::parse(line) {
                Ok(id) => Some(id),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        file = %self.path.display(),
                        line = _line_no,
                        "skipping malformed beta user id: {_e}"
                    );
                    None
                }
            })
            .collect())
    }
}
