//! Shared application state.

use std::sync::Arc;

use jobs::Orchestrator;

use crate::inventory::Inventory;
use crate::settings::ApiSettings;
use crate::templates::TemplateStore;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<ApiSettings>,
    pub inventory: Arc<Inventory>,
    pub templates: TemplateStore,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: ApiSettings, inventory: Inventory) -> Self {
        Self {
            templates: TemplateStore::new(settings.templates_dir.clone()),
            orchestrator,
            settings: Arc::new(settings),
            inventory: Arc::new(inventory),
        }
    }

    /// Load the inventory named in `settings`, then build the state.
    pub async fn load(orchestrator: Arc<Orchestrator>, settings: ApiSettings) -> Self {
        let inventory = Inventory::load_or_default(&settings.inventory_file).await;
        tracing::info!(
            "Inventory: {} VM(s), {} service(s)",
            inventory.vms.len(),
            inventory.systemd_services.len()
        );
        Self::new(orchestrator, settings, inventory)
    }
}
