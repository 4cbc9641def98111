use std::path::Path;

use crate::error::Result;
use crate::utils::command::{run_checked, Invocation, Runner};

fn owner_spec(account: &str) -> String {
    format!("{}:{}", account, account)
}

/// Recursively hand `path` to the service account.
pub fn chown_recursive(runner: &dyn Runner, account: &str, path: &Path) -> Result<()> {
    let inv = Invocation::new("chown", &["-R"])
        .arg(owner_spec(account))
        .arg(path.display().to_string());
    run_checked(runner, &inv).map(|_| ())
}

/// Hand a single file to the service account.
pub fn chown(runner: &dyn Runner, account: &str, path: &Path) -> Result<()> {
    let inv = Invocation::new("chown", &[])
        .arg(owner_spec(account))
        .arg(path.display().to_string());
    run_checked(runner, &inv).map(|_| ())
}

/// Make `path` readable by every account: read on files, traverse on directories.
///
/// Applies recursively and is not undone.
pub fn grant_world_read(runner: &dyn Runner, path: &Path) -> Result<()> {
    let inv = Invocation::new("chmod", &["-R", "a+rX"]).arg(path.display().to_string());
    run_checked(runner, &inv).map(|_| ())
}
