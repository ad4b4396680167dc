use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{IntegrationsUpdate, Organization, OrganizationSettings, User},
    store::EntityStore,
};

pub struct OrganizationService {
    store: Arc<dyn EntityStore>,
}

impl OrganizationService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, organization_id: Uuid) -> AppResult<Organization> {
        self.store
            .get_organization(organization_id)
            .await?
            .ok_or(AppError::OrganizationNotFound)
    }

    pub async fn update_integrations(
        &self,
        organization_id: Uuid,
        update: IntegrationsUpdate,
    ) -> AppResult<Organization> {
        if update.is_empty() {
            return Err(AppError::BadRequest("No fields to update".to_string()));
        }
        if update
            .wati_base_url
            .as_deref()
            .is_some_and(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        {
            return Err(AppError::Validation("base_url must be an http(s) URL".to_string()));
        }

        let organization = self
            .store
            .update_integrations(organization_id, &update)
            .await?
            .ok_or(AppError::OrganizationNotFound)?;

        tracing::info!("Integrations updated for organization {}", organization_id);
        Ok(organization)
    }

    pub async fn update_settings(
        &self,
        organization_id: Uuid,
        settings: OrganizationSettings,
    ) -> AppResult<Organization> {
        let settings = OrganizationSettings {
            timezone: settings.timezone.trim().to_string(),
            currency: settings.currency.trim().to_uppercase(),
        };
        if settings.timezone.is_empty() || settings.currency.len() != 3 {
            return Err(AppError::Validation(
                "timezone is required and currency must be a 3-letter code".to_string(),
            ));
        }

        self.store
            .update_settings(organization_id, &settings)
            .await?
            .ok_or(AppError::OrganizationNotFound)
    }

    pub async fn get_user(&self, organization_id: Uuid, user_id: Uuid) -> AppResult<User> {
        self.store
            .get_user(organization_id, user_id)
            .await?
            .ok_or(AppError::UserNotFound)
    }

    pub async fn list_users(&self, organization_id: Uuid) -> AppResult<Vec<User>> {
        Ok(self.store.list_users(organization_id).await?)
    }

    pub async fn rename_user(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        name: &str,
    ) -> AppResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        self.store
            .update_user_name(organization_id, user_id, name)
            .await?
            .ok_or(AppError::UserNotFound)
    }
}
