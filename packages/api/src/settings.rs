//! Paths and external programs used by the route handlers and job functions.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Root of the fix files; tickets live under `<dir>/AllFts/<ft>`.
    pub fix_files_dir: PathBuf,
    pub inventory_file: PathBuf,
    pub ansible_playbook_bin: String,
    pub psql_bin: String,
    pub ssh_bin: String,
    pub db_host: String,
    /// Remote user for ansible and ssh connections.
    pub ansible_user: String,
    /// Where generated playbooks and inventories go. System temp dir if unset.
    pub playbook_dir: Option<PathBuf>,
    /// Saved deployment templates, one `<name>.json` each.
    pub templates_dir: PathBuf,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            fix_files_dir: PathBuf::from("/app/fixfiles"),
            inventory_file: PathBuf::from("/app/inventory/inventory.json"),
            ansible_playbook_bin: "ansible-playbook".to_string(),
            psql_bin: "psql".to_string(),
            ssh_bin: "ssh".to_string(),
            db_host: "localhost".to_string(),
            ansible_user: "infadm".to_string(),
            playbook_dir: None,
            templates_dir: PathBuf::from("/app/deployment_templates"),
        }
    }
}

impl ApiSettings {
    /// Build settings from environment variables.
    ///
    /// - `FIX_FILES_DIR` (default: `/app/fixfiles`)
    /// - `INVENTORY_FILE` (default: `/app/inventory/inventory.json`)
    /// - `ANSIBLE_PLAYBOOK_BIN`, `PSQL_BIN`, `SSH_BIN`
    /// - `DB_HOST` (default: `localhost`)
    /// - `ANSIBLE_USER` (default: `infadm`)
    /// - `PLAYBOOK_DIR` (optional)
    /// - `TEMPLATES_DIR` (default: `/app/deployment_templates`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fix_files_dir: env_path("FIX_FILES_DIR").unwrap_or(defaults.fix_files_dir),
            inventory_file: env_path("INVENTORY_FILE").unwrap_or(defaults.inventory_file),
            ansible_playbook_bin: env_string("ANSIBLE_PLAYBOOK_BIN")
                .unwrap_or(defaults.ansible_playbook_bin),
            psql_bin: env_string("PSQL_BIN").unwrap_or(defaults.psql_bin),
            ssh_bin: env_string("SSH_BIN").unwrap_or(defaults.ssh_bin),
            db_host: env_string("DB_HOST").unwrap_or(defaults.db_host),
            ansible_user: env_string("ANSIBLE_USER").unwrap_or(defaults.ansible_user),
            playbook_dir: env_path("PLAYBOOK_DIR"),
            templates_dir: env_path("TEMPLATES_DIR").unwrap_or(defaults.templates_dir),
        }
    }

    pub fn fts_dir(&self) -> PathBuf {
        self.fix_files_dir.join("AllFts")
    }

    pub fn ft_dir(&self, ft: &str) -> PathBuf {
        self.fts_dir().join(ft)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.playbook_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn source_file(&self, ft: &str, file: &str) -> PathBuf {
        self.ft_dir(ft).join(file)
    }
}

fn env_string(var: &str) -> Option<String> {
    let v = std::env::var(var).ok()?;
    let trimmed = v.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    env_string(var).map(PathBuf::from)
}
