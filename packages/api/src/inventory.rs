//! Target inventory: VMs, users, database users and systemd services.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub name: String,
    #[serde(rename = "type")]
    pub vm_type: String,
    pub ip: String,
}

impl Vm {
    fn new(name: &str, vm_type: &str, ip: &str) -> Self {
        Self {
            name: name.to_string(),
            vm_type: vm_type.to_string(),
            ip: ip.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub vms: Vec<Vm>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub db_users: Vec<String>,
    #[serde(default)]
    pub systemd_services: Vec<String>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            vms: vec![
                Vm::new("batch1", "batch", "192.168.1.10"),
                Vm::new("batch2", "batch", "192.168.1.11"),
                Vm::new("imdg1", "imdg", "192.168.1.20"),
                Vm::new("imdg2", "imdg", "192.168.1.21"),
            ],
            users: vec!["infadm".into(), "abpwrk1".into()],
            db_users: vec!["postgres".into(), "dbadmin".into()],
            systemd_services: vec![
                "hazelcast".into(),
                "kafka".into(),
                "zookeeper".into(),
                "airflow-scheduler".into(),
            ],
        }
    }
}

impl Inventory {
    /// Read the inventory file.
    ///
    /// A missing file is replaced by the default inventory, which is also
    /// written to `path`. An unreadable or unparsable file falls back to the
    /// default without touching the file.
    pub async fn load_or_default(path: &Path) -> Self {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(inventory) => inventory,
                Err(e) => {
                    tracing::warn!(
                        "Inventory {} is not valid JSON ({}), using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let inventory = Self::default();
                if let Err(e) = inventory.save(path).await {
                    tracing::warn!("Could not write default inventory to {}: {}", path.display(), e);
                } else {
                    tracing::info!("Wrote default inventory to {}", path.display());
                }
                inventory
            }
            Err(e) => {
                tracing::warn!("Cannot read inventory {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(path, json).await
    }

    pub fn find_vm(&self, name: &str) -> Option<&Vm> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    /// Split requested VM names into known VMs and unknown names, keeping request order.
    pub fn resolve<'a>(&self, names: &'a [String]) -> (Vec<Vm>, Vec<&'a str>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match self.find_vm(name) {
                Some(vm) => found.push(vm.clone()),
                None => missing.push(name.as_str()),
            }
        }
        (found, missing)
    }
}
