//! Fix tickets and their files.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path as UrlPath, Query, State},
};

use crate::dto::{FtQuery, path_component};
use crate::error::ApiError;
use crate::state::AppState;

struct Entry {
    name: String,
    is_dir: bool,
}

/// Entries of `dir`, sorted by name. A missing directory has no entries.
async fn entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type().await?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn is_sql(name: &str) -> bool {
    name.ends_with(".sql")
}

/// GET /api/fts?type=sql
pub async fn list_fts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FtQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let fts_dir = state.settings.fts_dir();
    let mut fts = Vec::new();
    for entry in entries(&fts_dir).await? {
        if !entry.is_dir {
            continue;
        }
        if query.sql_only() {
            let files = entries(&fts_dir.join(&entry.name)).await?;
            if !files.iter().any(|f| is_sql(&f.name)) {
                continue;
            }
        }
        fts.push(entry.name);
    }
    Ok(Json(fts))
}

/// GET /api/fts/{ft}/files?type=sql
pub async fn list_ft_files(
    State(state): State<Arc<AppState>>,
    UrlPath(ft): UrlPath<String>,
    Query(query): Query<FtQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ft = path_component(ft)?;
    let files = entries(&state.settings.ft_dir(&ft))
        .await?
        .into_iter()
        .filter(|e| !e.is_dir)
        .filter(|e| !query.sql_only() || is_sql(&e.name))
        .map(|e| e.name)
        .collect();
    Ok(Json(files))
}
