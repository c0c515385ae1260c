//! Personalization experiences and their variants
//!
//! Creating an experience makes the destination derive its variants in the
//! background. After the creates, the module polls for the variants of
//! every experience whose variants are not mapped yet and maps them by
//! name. Experiences whose variants never show up within the poll budget
//! are written to `failed-experiences.json`; the module still completes.
//! That file is a report for manual follow-up: a later run re-polls any
//! experience whose variants are still unmapped.

use crate::api::{ApiError, ListQuery};
use crate::batch::PageQuery;
use crate::error::MigrateError;
use crate::mapper::UidMapper;
use crate::modules::collection::{
    export_collection, plan_creates, read_stored, write_pending, WriteCounts,
};
use crate::modules::{
    FailureLog, MigrationContext, ModuleExporter, ModuleFuture, ModuleImporter, ModuleKind,
    ModuleReport,
};
use crate::record::Record;
use crate::store::StoreOptions;
use crate::transform::{LookupTables, TransformStage};
use crate::validation::PollState;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Remote collection of derived variants
pub const VARIANTS_COLLECTION: &str = "variants";
/// Field on a variant pointing at its experience
pub const EXPERIENCE_LINK_FIELD: &str = "experience_uid";
/// Array field of an experience describing its variants
pub const VARIANTS_FIELD: &str = "variants";
pub const VARIANT_MAPPER_FILE: &str = "variant-mapper.json";
pub const FAILED_EXPERIENCES_FILE: &str = "failed-experiences.json";

/// Exporter/importer for experiences
#[derive(Debug, Clone, Copy, Default)]
pub struct ExperiencesModule;

/// A source variant, identified by name across systems
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantSpec {
    pub uid: String,
    pub name: String,
}

/// An experience waiting for its derived variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingExperience {
    pub source_uid: String,
    pub destination_uid: String,
    pub variants: Vec<VariantSpec>,
}

fn variant_specs(record: &Record) -> Vec<VariantSpec> {
    record
        .get(VARIANTS_FIELD)
        .and_then(Value::as_array)
        .map(|specs| {
            specs
                .iter()
                .filter_map(|spec| {
                    Some(VariantSpec {
                        uid: spec.get("uid")?.as_str()?.to_string(),
                        name: spec.get("name")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ExperiencesModule {
    fn store_options(ctx: &MigrationContext) -> StoreOptions {
        ctx.store_options(&ctx.module_dir(ModuleKind::Experiences), ModuleKind::Experiences)
    }

    async fn run_export(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut report = ModuleReport::new(ModuleKind::Experiences);
        let mut failures = FailureLog::new(&ctx.mapper_dir(ModuleKind::Experiences));
        let result = export_collection(
            ctx,
            ModuleKind::Experiences.collection(),
            ListQuery::new(),
            Self::store_options(ctx),
            &mut failures,
        )
        .await;
        failures.flush()?;

        let export = result?;
        report.exported = export.records;
        report.chunks = export.chunks;
        report.failed = failures.len() as u64;
        Ok(report)
    }

    async fn run_import(&self, ctx: &MigrationContext) -> Result<ModuleReport, MigrateError> {
        let mut report = ModuleReport::new(ModuleKind::Experiences);
        let mut failures = FailureLog::new(&ctx.mapper_dir(ModuleKind::Experiences));
        let result = self.import_all(ctx, &mut report, &mut failures).await;
        failures.flush()?;
        result?;
        info!("Imported {}", report);
        Ok(report)
    }

    async fn import_all(
        &self,
        ctx: &MigrationContext,
        report: &mut ModuleReport,
        failures: &mut FailureLog,
    ) -> Result<(), MigrateError> {
        let records = read_stored(Self::store_options(ctx))?;
        let mapper = ctx.uid_mapper(ModuleKind::Experiences)?;
        let variant_mapper = ctx.named_mapper(ModuleKind::Experiences, VARIANT_MAPPER_FILE)?;
        let cleanup = ctx.transforms.restricted_to(&[TransformStage::PublishDetails]);
        let tables = LookupTables::new();
        let mut counts = WriteCounts::default();

        let writes = plan_creates(
            records.clone(),
            &mapper,
            |record: Record| cleanup.apply(record, &tables),
            failures,
            "experiences",
            &mut counts,
        );
        let written = write_pending(
            ctx,
            ModuleKind::Experiences.collection(),
            &writes,
            &mapper,
            failures,
            "experiences",
            &mut counts,
        )
        .await;
        report.created = counts.created;
        report.skipped = counts.skipped;
        report.failed = counts.failed;
        written?;

        let pending = Self::awaiting_variants(&records, &mapper, &variant_mapper);
        if pending.is_empty() {
            return Ok(());
        }
        self.validate_variants(ctx, pending, &variant_mapper, report, failures)
            .await
    }

    /// Mapped experiences with at least one unmapped variant
    fn awaiting_variants(
        records: &[Record],
        mapper: &UidMapper,
        variant_mapper: &UidMapper,
    ) -> Vec<PendingExperience> {
        records
            .iter()
            .filter_map(|record| {
                let source_uid = record.uid()?;
                let destination_uid = mapper.get(source_uid)?;
                let variants = variant_specs(record);
                if variants.iter().all(|v| variant_mapper.has(&v.uid)) {
                    return None;
                }
                Some(PendingExperience {
                    source_uid: source_uid.to_string(),
                    destination_uid,
                    variants,
                })
            })
            .collect()
    }

    async fn validate_variants(
        &self,
        ctx: &MigrationContext,
        pending: Vec<PendingExperience>,
        variant_mapper: &UidMapper,
        report: &mut ModuleReport,
        failures: &mut FailureLog,
    ) -> Result<(), MigrateError> {
        let api = ctx.api.clone();
        let limit = ctx.config.batch.page_size;

        let outcome = ctx
            .poller()
            .run(pending, move |experience: &PendingExperience| {
                let api = api.clone();
                let expected = experience.variants.len() as u64;
                let query = ListQuery::new()
                    .filter(EXPERIENCE_LINK_FIELD, experience.destination_uid.as_str())
                    .at_page(0, limit.max(expected));
                async move {
                    let response = api.list(VARIANTS_COLLECTION, query).await?;
                    Ok::<_, ApiError>((response.count >= expected).then_some(response.items))
                }
            })
            .await;

        for (experience, derived) in &outcome.verified {
            for variant in &experience.variants {
                let matched = derived
                    .iter()
                    .find(|d| d.get_str("name") == Some(variant.name.as_str()))
                    .and_then(Record::uid);
                match matched {
                    Some(destination) => variant_mapper.set(&variant.uid, destination)?,
                    None => {
                        report.failed += 1;
                        failures.record_in(
                            &variant.uid,
                            format!("no derived variant named '{}'", variant.name),
                            experience.source_uid.as_str(),
                        );
                    }
                }
            }
        }

        report.pending_validation = outcome.failed.len() as u64;
        let failed_path = ctx
            .mapper_dir(ModuleKind::Experiences)
            .join(FAILED_EXPERIENCES_FILE);
        if outcome.write_failed_file(&failed_path)? {
            warn!(
                "{} experiences still missing variants, see {}",
                outcome.failed.len(),
                failed_path.display()
            );
        }

        if outcome.state == PollState::Cancelled {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }
}

impl ModuleExporter for ExperiencesModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Experiences
    }

    fn export<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_export(ctx))
    }
}

impl ModuleImporter for ExperiencesModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Experiences
    }

    fn import<'a>(&'a self, ctx: &'a MigrationContext) -> ModuleFuture<'a> {
        Box::pin(self.run_import(ctx))
    }
}
