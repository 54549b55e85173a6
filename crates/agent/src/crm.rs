//! Vendor-agnostic CRM capabilities.
//!
//! The tool bridge only sees the three capability traits; which vendor
//! adapter backs them is decided per tenant by a [`ConnectorResolver`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use frontdesk_core::domain::tenant::{CrmConnectorDescriptor, CrmConnectorKind, TenantConfig};

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm call timed out")]
    Timeout,
    #[error("crm returned status {0}")]
    Status(u16),
    #[error("crm transport error: {0}")]
    Transport(String),
    #[error("crm response was malformed: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContactDraft {
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(alias = "contact_id")]
    pub id: String,
    #[serde(default, alias = "name")]
    pub first_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DealDraft {
    pub contact_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealRecord {
    #[serde(alias = "deal_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[async_trait]
pub trait ContactSearcher: Send + Sync {
    async fn search_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<ContactRecord>, CrmError>;
}

#[async_trait]
pub trait ContactCreator: Send + Sync {
    async fn create_contact(&self, draft: &ContactDraft) -> Result<ContactRecord, CrmError>;
}

#[async_trait]
pub trait DealCreator: Send + Sync {
    async fn create_deal(&self, draft: &DealDraft) -> Result<DealRecord, CrmError>;
}

pub trait CrmConnector: ContactSearcher + ContactCreator + DealCreator {}

impl<T> CrmConnector for T where T: ContactSearcher + ContactCreator + DealCreator {}

/// Picks the connector for a tenant at request time.
pub trait ConnectorResolver: Send + Sync {
    fn resolve(&self, tenant: &TenantConfig) -> Option<Arc<dyn CrmConnector>>;
}

/// Builds an [`HttpCrmConnector`] from the tenant's descriptor.
#[derive(Clone, Default)]
pub struct HttpConnectorResolver {
    client: Client,
}

impl ConnectorResolver for HttpConnectorResolver {
    fn resolve(&self, tenant: &TenantConfig) -> Option<Arc<dyn CrmConnector>> {
        let descriptor = tenant.crm.as_ref()?;
        match descriptor.kind {
            CrmConnectorKind::Http => {
                Some(Arc::new(HttpCrmConnector::new(self.client.clone(), descriptor)))
            }
        }
    }
}

/// REST adapter: `GET /contacts/search`, `POST /contacts`, `POST /deals`.
pub struct HttpCrmConnector {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

impl HttpCrmConnector {
    pub fn new(client: Client, descriptor: &CrmConnectorDescriptor) -> Self {
        Self {
            client,
            base_url: descriptor.base_url.trim_end_matches('/').to_string(),
            api_key: descriptor.api_key.clone().map(SecretString::from),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(HTTP_TIMEOUT);
        match &self.api_key {
            Some(api_key) => builder.bearer_auth(api_key.expose_secret()),
            None => builder,
        }
    }

    async fn read_json<T>(response: reqwest::Response) -> Result<T, CrmError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::Status(status.as_u16()));
        }
        response.json::<T>().await.map_err(|error| CrmError::Malformed(error.to_string()))
    }
}

fn transport_error(error: reqwest::Error) -> CrmError {
    if error.is_timeout() {
        CrmError::Timeout
    } else {
        CrmError::Transport(error.to_string())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    contact: Option<ContactRecord>,
}

#[async_trait]
impl ContactSearcher for HttpCrmConnector {
    async fn search_contact(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<ContactRecord>, CrmError> {
        let mut query = Vec::new();
        if let Some(email) = email {
            query.push(("email", email));
        }
        if let Some(phone) = phone {
            query.push(("phone", phone));
        }

        let response = self
            .authorize(self.client.get(format!("{}/contacts/search", self.base_url)).query(&query))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: SearchResponse = Self::read_json(response).await?;
        Ok(body.contact)
    }
}

#[async_trait]
impl ContactCreator for HttpCrmConnector {
    async fn create_contact(&self, draft: &ContactDraft) -> Result<ContactRecord, CrmError> {
        let response = self
            .authorize(self.client.post(format!("{}/contacts", self.base_url)).json(draft))
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl DealCreator for HttpCrmConnector {
    async fn create_deal(&self, draft: &DealDraft) -> Result<DealRecord, CrmError> {
        let response = self
            .authorize(self.client.post(format!("{}/deals", self.base_url)).json(draft))
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(response).await
    }
}
