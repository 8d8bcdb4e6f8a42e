use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};

use crate::model::utils::parse_repo_string;
use crate::{Error, Result};

/// Represents a folder with model weights structured as a repository on HF Hub.
pub enum ModelRepo {
    Folder(PathBuf),
    ApiRepo(Box<ApiRepo>),
}

const SAFETENSORS_FILE: &str = "model.safetensors";
const PTH_FILE: &str = "pytorch_model.bin";
const CONFIG_FILE: &str = "config.json";

impl ModelRepo {
    pub fn from_path<P>(root: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self::Folder(root.as_ref().to_owned())
    }

    pub fn from_api_repo(api_repo: ApiRepo) -> Self {
        Self::ApiRepo(Box::new(api_repo))
    }

    /// Hub repository given as `org/name[:revision]`.
    pub fn from_repo_string(repo_string: &str) -> Result<Self> {
        let (repo_id, revision) = parse_repo_string(repo_string)?;
        let repo = Repo::with_revision(repo_id.to_owned(), RepoType::Model, revision.to_owned());
        let api = Api::new()?;
        Ok(Self::from_api_repo(api.repo(repo)))
    }

    /// An existing local directory, otherwise a hub repository string.
    pub fn from_source(source: &str) -> Result<Self> {
        let path = Path::new(source);
        if path.is_dir() {
            Ok(Self::from_path(path))
        } else {
            Self::from_repo_string(source)
        }
    }

    /// Get the relevant repository files.
    ///
    /// **Warning**: Will download model weights if not present in the expected
    /// folder in the Huggingface cache.
    pub(crate) fn file_paths(&self) -> Result<ModelRepoFiles> {
        let root = match self {
            ModelRepo::Folder(pathbuf) => pathbuf.to_owned(),
            ModelRepo::ApiRepo(api_repo) => {
                let model_path = api_repo
                    .get(SAFETENSORS_FILE)
                    .or_else(|_e| api_repo.get(PTH_FILE))?;

                let _ = api_repo.get(CONFIG_FILE)?;

                model_path
                    .parent()
                    .ok_or(Error::ModelLoad("Model path has no parent directory"))?
                    .to_owned()
            }
        };

        let config = root.join(CONFIG_FILE);
        if !config.exists() {
            return Err(Error::ModelLoad("Repository misses configuration files."));
        }

        // Safetensors get precedence over pth.
        let model_weights = if root.join(SAFETENSORS_FILE).exists() {
            ModelWeightsPath::Safetensors(root.join(SAFETENSORS_FILE))
        } else if root.join(PTH_FILE).exists() {
            ModelWeightsPath::Pth(root.join(PTH_FILE))
        } else {
            return Err(Error::ModelLoad(
                "Repository doesn't contain model weights.",
            ));
        };

        Ok(ModelRepoFiles {
            config,
            model_weights,
        })
    }
}

pub(crate) struct ModelRepoFiles {
    pub(crate) config: PathBuf,
    pub(crate) model_weights: ModelWeightsPath,
}

pub(crate) enum ModelWeightsPath {
    Pth(PathBuf),
    Safetensors(PathBuf),
}
