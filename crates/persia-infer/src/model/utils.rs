use crate::{Error, Result};

/// Split `org/name[:revision]` into the repository id and its revision, defaulting to `main`.
pub fn parse_repo_string(repo_string: &str) -> Result<(&str, &str)> {
    // Fail if the repo string is empty
    if repo_string.is_empty() {
        return Err(Error::ModelLoad("Model repository string is empty"));
    }

    // Fail if the repo string contains illegal characters
    const ILLEGAL_CHARS: [char; 6] = ['\\', '<', '>', '|', '?', '*'];
    if repo_string.chars().any(|c| ILLEGAL_CHARS.contains(&c)) {
        return Err(Error::ModelLoad(
            "Model repository string contains illegal characters",
        ));
    }

    let (model_repo, revision) = match repo_string.split_once(':') {
        Some((model_repo, revision)) if !revision.is_empty() => (model_repo, revision),
        Some((model_repo, _)) => (model_repo, "main"),
        None => (repo_string, "main"),
    };

    if model_repo.is_empty() {
        return Err(Error::ModelLoad("Model repository id is empty"));
    }

    Ok((model_repo, revision))
}
