//! Ansible playbooks and INI inventories for the job functions.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::inventory::Vm;

pub const FILE_GROUP: &str = "deployment_targets";
pub const COMMAND_GROUP: &str = "command_targets";
pub const SYSTEMD_GROUP: &str = "systemd_targets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemdOperation {
    Status,
    Start,
    Stop,
    Restart,
}

impl SystemdOperation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status" => Some(Self::Status),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    /// Target state for the systemd module. `None` for a status check.
    fn unit_state(&self) -> Option<&'static str> {
        match self {
            Self::Status => None,
            Self::Start => Some("started"),
            Self::Stop => Some("stopped"),
            Self::Restart => Some("restarted"),
        }
    }
}

impl std::fmt::Display for SystemdOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn play(name: &str, hosts: &str, tasks: Vec<Value>) -> Result<String, serde_yaml_ng::Error> {
    let playbook = json!([{
        "name": name,
        "hosts": hosts,
        "gather_facts": false,
        "tasks": tasks,
    }]);
    serde_yaml_ng::to_string(&playbook)
}

fn with_become(mut task: Value, sudo: bool) -> Value {
    if sudo {
        task["become"] = Value::Bool(true);
    }
    task
}

pub struct FileCopy<'a> {
    pub source: &'a str,
    pub target_dir: &'a str,
    pub file_name: &'a str,
    pub owner: &'a str,
    pub sudo: bool,
}

pub fn file_playbook(copy: &FileCopy<'_>) -> Result<String, serde_yaml_ng::Error> {
    let dest = format!("{}/{}", copy.target_dir.trim_end_matches('/'), copy.file_name);
    let tasks = vec![
        with_become(
            json!({
                "name": "Create target directory if it does not exist",
                "ansible.builtin.file": {
                    "path": copy.target_dir,
                    "state": "directory",
                    "mode": "0755",
                },
            }),
            copy.sudo,
        ),
        with_become(
            json!({
                "name": "Copy file to target VMs",
                "ansible.builtin.copy": {
                    "src": copy.source,
                    "dest": dest,
                    "mode": "0644",
                    "owner": copy.owner,
                },
                "register": "copy_result",
            }),
            copy.sudo,
        ),
        json!({
            "name": "Log copy result",
            "ansible.builtin.debug": { "msg": "File copied successfully to {{ inventory_hostname }}" },
            "when": "copy_result.changed",
        }),
    ];
    play("Deploy file to VMs", FILE_GROUP, tasks)
}

pub fn shell_playbook(command: &str, sudo: bool) -> Result<String, serde_yaml_ng::Error> {
    let tasks = vec![
        with_become(
            json!({
                "name": "Execute shell command",
                "ansible.builtin.shell": command,
                "register": "command_result",
            }),
            sudo,
        ),
        json!({
            "name": "Log command result",
            "ansible.builtin.debug": { "var": "command_result.stdout_lines" },
        }),
    ];
    play("Run shell command on VMs", COMMAND_GROUP, tasks)
}

pub fn systemd_playbook(
    service: &str,
    operation: SystemdOperation,
) -> Result<String, serde_yaml_ng::Error> {
    let mut tasks = Vec::new();
    if let Some(state) = operation.unit_state() {
        let mut unit = json!({ "name": service, "state": state });
        if operation == SystemdOperation::Start {
            unit["enabled"] = Value::Bool(true);
        }
        tasks.push(json!({
            "name": format!("{} {} service", capitalize(operation.as_str()), service),
            "ansible.builtin.systemd": unit,
            "become": true,
            "register": "systemd_result",
        }));
    }
    tasks.push(json!({
        "name": format!("Check {} service status", service),
        "ansible.builtin.command": format!("systemctl status {}", service),
        "become": true,
        "register": "status_result",
        "changed_when": false,
        "ignore_errors": true,
    }));
    tasks.push(json!({
        "name": "Log service status",
        "ansible.builtin.debug": { "var": "status_result.stdout_lines" },
    }));
    play("Perform systemd operation on VMs", SYSTEMD_GROUP, tasks)
}

/// INI inventory with one group holding every target.
pub fn inventory_ini(group: &str, vms: &[Vm], user: &str) -> String {
    let mut ini = format!("[{}]\n", group);
    for vm in vms {
        let _ = writeln!(ini, "{} ansible_host={} ansible_user={}", vm.name, vm.ip, user);
    }
    ini
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
