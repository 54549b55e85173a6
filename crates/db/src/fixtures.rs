use frontdesk_core::domain::tenant::{TenantConfig, TenantId};

use crate::repositories::{RepositoryError, TenantDirectory};

/// Tenants the demo dataset must contain, with the capabilities each one is
/// expected to carry.
const SEED_TENANTS: &[SeedTenantContract] = &[
    SeedTenantContract {
        tenant_id: "coffee-shop",
        has_cta_tree: true,
        has_crm: true,
        has_kb: true,
        description: "Cafe with a full CTA tree, CRM connector and knowledge base",
    },
    SeedTenantContract {
        tenant_id: "plain-dental",
        has_cta_tree: false,
        has_crm: false,
        has_kb: false,
        description: "Prompt-only tenant without optional capabilities",
    },
];

/// Demo tenant dataset used by `frontdesk seed` and integration tests.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const JSON: &str = include_str!("../../../config/fixtures/demo_tenants.json");

    pub fn tenants() -> Result<Vec<TenantConfig>, RepositoryError> {
        serde_json::from_str(Self::JSON).map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    pub async fn load(directory: &dyn TenantDirectory) -> Result<SeedResult, RepositoryError> {
        let tenants = Self::tenants()?;
        for tenant in &tenants {
            directory.upsert(tenant).await?;
        }

        let tenants_seeded = SEED_TENANTS
            .iter()
            .map(|tenant| TenantSeedInfo {
                tenant_id: tenant.tenant_id,
                description: tenant.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { tenants_seeded })
    }

    pub async fn verify(
        directory: &dyn TenantDirectory,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_TENANTS {
            let found = directory.find(&TenantId(contract.tenant_id.to_string())).await?;
            let Some(tenant) = found else {
                checks.push((contract.tenant_id.to_string(), false));
                continue;
            };

            checks.push((contract.tenant_id.to_string(), true));
            checks.push((
                format!("{}:cta_tree", contract.tenant_id),
                tenant.cta_tree.is_some() == contract.has_cta_tree,
            ));
            checks.push((
                format!("{}:cta_tree_clean", contract.tenant_id),
                tenant.cta_tree.as_ref().map(|tree| tree.issues().is_empty()).unwrap_or(true),
            ));
            checks.push((format!("{}:crm", contract.tenant_id), tenant.crm.is_some() == contract.has_crm));
            checks.push((
                format!("{}:kb", contract.tenant_id),
                tenant.knowledge_base().is_some() == contract.has_kb,
            ));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

struct SeedTenantContract {
    tenant_id: &'static str,
    has_cta_tree: bool,
    has_crm: bool,
    has_kb: bool,
    description: &'static str,
}

#[derive(Clone, Debug)]
pub struct SeedResult {
    pub tenants_seeded: Vec<TenantSeedInfo>,
}

#[derive(Clone, Debug)]
pub struct TenantSeedInfo {
    pub tenant_id: &'static str,
    pub description: &'static str,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
