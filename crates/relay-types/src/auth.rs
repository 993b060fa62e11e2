//! Caller identity and the permission-check capability.

use crate::RelayError;
use async_trait::async_trait;

/// Named capabilities guarding the administration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewPublishingEvents,
    ManagePublishingEvents,
    ViewProductControl,
    ManageProductControl,
    ViewConsumingEvents,
    ManageConsumingEvents,
    ViewIntegrationFlows,
    ManageIntegrationFlows,
}

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::ViewPublishingEvents,
        Permission::ManagePublishingEvents,
        Permission::ViewProductControl,
        Permission::ManageProductControl,
        Permission::ViewConsumingEvents,
        Permission::ManageConsumingEvents,
        Permission::ViewIntegrationFlows,
        Permission::ManageIntegrationFlows,
    ];

    /// Short name, e.g. `view_publishing_events`.
    pub fn short_name(self) -> &'static str {
        match self {
            Permission::ViewPublishingEvents => "view_publishing_events",
            Permission::ManagePublishingEvents => "manage_publishing_events",
            Permission::ViewProductControl => "view_product_control",
            Permission::ManageProductControl => "manage_product_control",
            Permission::ViewConsumingEvents => "view_consuming_events",
            Permission::ManageConsumingEvents => "manage_consuming_events",
            Permission::ViewIntegrationFlows => "view_integration_flows",
            Permission::ManageIntegrationFlows => "manage_integration_flows",
        }
    }

    /// Fully qualified capability name, e.g. `lmp_data_layer:view_publishing_events`.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ViewPublishingEvents => "lmp_data_layer:view_publishing_events",
            Permission::ManagePublishingEvents => "lmp_data_layer:manage_publishing_events",
            Permission::ViewProductControl => "lmp_data_layer:view_product_control",
            Permission::ManageProductControl => "lmp_data_layer:manage_product_control",
            Permission::ViewConsumingEvents => "lmp_data_layer:view_consuming_events",
            Permission::ManageConsumingEvents => "lmp_data_layer:manage_consuming_events",
            Permission::ViewIntegrationFlows => "lmp_data_layer:view_integration_flows",
            Permission::ManageIntegrationFlows => "lmp_data_layer:manage_integration_flows",
        }
    }

    /// Accepts either the short or the fully qualified name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.short_name() == s || p.as_str() == s)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller, resolved by the host before any core call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub email: Option<String>,
    pub tenant_id: String,
}

impl Caller {
    /// Actor name stamped on audit entries and `updatedBy`.
    pub fn actor(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.user_id)
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `Ok(())` when the caller holds `permission`, otherwise `RelayError::Permission`.
    async fn require(&self, caller: &Caller, permission: Permission) -> Result<(), RelayError>;
}
