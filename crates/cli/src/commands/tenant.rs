use std::fs;
use std::path::Path;

use frontdesk_core::domain::tenant::TenantConfig;
use frontdesk_core::errors::DomainError;
use frontdesk_db::repositories::{RepositoryError, SqlTenantDirectory, TenantDirectory};
use serde::Deserialize;

use crate::commands::{with_database, CommandResult, StepFailure};

const COMMAND: &str = "tenant validate";

#[derive(Deserialize)]
#[serde(untagged)]
enum TenantFile {
    Many(Vec<TenantConfig>),
    One(Box<TenantConfig>),
}

/// Validates tenant configs from `file`, or every tenant in the database when
/// no file is given.
pub fn validate(file: Option<&Path>) -> CommandResult {
    let tenants = match file {
        Some(path) => match read_tenant_file(path) {
            Ok(tenants) => tenants,
            Err(message) => return CommandResult::failure(COMMAND, "tenant_parse", message, 7),
        },
        None => match with_database(COMMAND, |pool| load_stored(SqlTenantDirectory::new(pool))) {
            Ok(tenants) => tenants,
            Err(failure) => return failure,
        },
    };

    let problems = tenants
        .iter()
        .filter_map(|tenant| tenant.validate().err().map(|error| describe(tenant, &error)))
        .collect::<Vec<_>>();

    if problems.is_empty() {
        CommandResult::success(COMMAND, format!("{} tenant config(s) valid", tenants.len()))
    } else {
        CommandResult::failure(
            COMMAND,
            "tenant_validation",
            format!(
                "{} of {} tenant config(s) invalid:\n{}",
                problems.len(),
                tenants.len(),
                problems.join("\n")
            ),
            7,
        )
    }
}

fn read_tenant_file(path: &Path) -> Result<Vec<TenantConfig>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("failed to read `{}`: {error}", path.display()))?;
    let parsed: TenantFile = serde_json::from_str(&raw)
        .map_err(|error| format!("failed to parse `{}`: {error}", path.display()))?;

    Ok(match parsed {
        TenantFile::Many(tenants) => tenants,
        TenantFile::One(tenant) => vec![*tenant],
    })
}

async fn load_stored(directory: SqlTenantDirectory) -> Result<Vec<TenantConfig>, StepFailure> {
    let to_failure = |error: RepositoryError| ("tenant_load", error.to_string(), 4u8);

    let mut tenants = Vec::new();
    for tenant_id in directory.list_ids().await.map_err(to_failure)? {
        if let Some(tenant) = directory.find(&tenant_id).await.map_err(to_failure)? {
            tenants.push(tenant);
        }
    }
    Ok(tenants)
}

fn describe(tenant: &TenantConfig, error: &DomainError) -> String {
    match error {
        DomainError::CtaTreeInvalid { issues, .. } => {
            let details = issues.iter().map(ToString::to_string).collect::<Vec<_>>();
            format!("  - {}: {}", tenant.tenant_id, details.join("; "))
        }
        other => format!("  - {}: {other}", tenant.tenant_id),
    }
}
