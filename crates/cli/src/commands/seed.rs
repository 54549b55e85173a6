use crate::commands::{with_database, CommandResult};
use frontdesk_db::repositories::SqlTenantDirectory;
use frontdesk_db::{DemoSeedDataset, TenantSeedInfo};

pub fn run() -> CommandResult {
    let result = with_database("seed", |pool| async move {
        let directory = SqlTenantDirectory::new(pool);

        let seeded = DemoSeedDataset::load(&directory)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&directory)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if verification.all_present {
            Ok(seeded.tenants_seeded)
        } else {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_failure_message(&failed), 6u8))
        }
    });

    match result {
        Ok(tenants) => CommandResult::success("seed", success_message(&tenants)),
        Err(failure) => failure,
    }
}

fn success_message(tenants: &[TenantSeedInfo]) -> String {
    let lines = tenants
        .iter()
        .map(|tenant| format!("  - {}: {}", tenant.tenant_id, tenant.description))
        .collect::<Vec<_>>();
    format!("demo tenants loaded:\n{}", lines.join("\n"))
}

fn verification_failure_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
