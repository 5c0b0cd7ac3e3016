use relayd::{RelayService, TaskLifecycleManager, WebhookIntake};

/// Handler state: the running engine.
#[derive(Clone)]
pub struct WebState {
    service: RelayService,
}

impl WebState {
    pub fn new(service: RelayService) -> Self {
        Self { service }
    }

    pub fn lifecycle(&self) -> &TaskLifecycleManager {
        &self.service.lifecycle
    }

    pub fn intake(&self) -> &WebhookIntake {
        &self.service.intake
    }

    pub fn service(&self) -> &RelayService {
        &self.service
    }
}
