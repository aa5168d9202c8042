//! Saved deployment templates, one JSON file per template.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid template name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name and path for `name`; `.json` is added when missing.
    fn locate(&self, name: &str) -> Result<(String, PathBuf), TemplateError> {
        let name = name.trim();
        let file = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{}.json", name)
        };
        if file == ".json" || file.starts_with('.') || file.contains(['/', '\\']) {
            return Err(TemplateError::InvalidName(name.to_string()));
        }
        let path = self.dir.join(&file);
        Ok((file, path))
    }

    /// Write `template` under `name`, replacing any template of that name.
    pub async fn save(&self, name: &str, template: &Value) -> Result<(String, PathBuf), TemplateError> {
        let (file, path) = self.locate(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, serde_json::to_vec_pretty(template)?).await?;
        tracing::info!("Template saved: {}", path.display());
        Ok((file, path))
    }

    /// Template names without the `.json` suffix, sorted.
    pub async fn list(&self) -> Result<Vec<String>, TemplateError> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let file = entry.file_name().to_string_lossy().into_owned();
            if let Some(name) = file.strip_suffix(".json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Value>, TemplateError> {
        let (_, path) = self.locate(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the template. Returns `false` if there was none.
    pub async fn delete(&self, name: &str) -> Result<bool, TemplateError> {
        let (_, path) = self.locate(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Template deleted: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
