use std::collections::BTreeMap;

use serde_json::json;
use tdm_core::{SchemaGraph, UnifiedSchema, Value};
use tdm_fusion::{DomainPackRepository, SchemaFusionEngine, parse_fragment_json};
use tdm_generate::{
    RowCounts, SyntheticRelationalGenerator, ValueProviders, write_batches_csv, written_bytes,
};
use tdm_mask::{MaskingRuleSet, MaskingTransformRegistry, mask_batches};
use tdm_subset::{CsvRowSource, Filters, RowCaps, SubsetExtractor};
use tracing::{info, warn};

use crate::config::TdmConfig;
use crate::files::{load_graph, read_batches, read_json, read_to_string, write_json};
use crate::{CliError, FuseArgs, GenerateArgs, GraphArgs, MaskArgs, SubsetArgs};

pub fn graph(args: GraphArgs) -> Result<(), CliError> {
    let graph = load_graph(&args.schema)?;
    let plan = graph.dependency_plan(args.root.as_deref())?;
    let document = json!({
        "order": plan.order,
        "deferred": plan.deferred,
        "self_references": plan.self_references,
        "reachable": plan.reachable,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

pub fn subset(args: SubsetArgs, config: &TdmConfig) -> Result<(), CliError> {
    let graph = load_graph(&args.schema)?;
    let filters = typed_filters(&graph, &args.filters);
    let caps: RowCaps = args.caps.into_iter().collect();

    let mut options = config.subset.clone();
    if let Some(max_rows) = args.max_rows {
        options.default_max_rows = max_rows;
    }
    options.include_unrelated |= args.include_unrelated;

    let mut source = CsvRowSource::new(&args.source_dir);
    let extractor = SubsetExtractor::new(options);
    let result = match extractor.extract(&graph, &args.root, &filters, &caps, &mut source) {
        Ok(result) => result,
        Err(err) => {
            if let Some(partial) = err.partial() {
                let dir = args.out.join("partial");
                write_batches_csv(&dir, &partial.batches)?;
                warn!(
                    completed = ?partial.completed_tables,
                    dir = %dir.display(),
                    "partial subset written"
                );
            }
            return Err(err.into());
        }
    };

    let written = write_batches_csv(&args.out, &result.batches)?;
    write_json(
        &args.out.join("subset_report.json"),
        &json!({
            "root": result.root,
            "order": result.order,
            "row_counts": result.row_counts(),
            "dropped_rows": result.dropped_rows,
            "skipped_tables": result.skipped_tables,
        }),
    )?;
    info!(
        rows = result.total_rows(),
        files = written.len(),
        bytes = written_bytes(&written),
        out = %args.out.display(),
        "subset written"
    );
    Ok(())
}

pub fn generate(args: GenerateArgs, config: &TdmConfig) -> Result<(), CliError> {
    let schema: UnifiedSchema = read_json(&args.unified)?;
    let mut options = config.generate;
    if let Some(seed) = args.seed {
        options.seed = seed;
    }
    if let Some(default_rows) = args.default_rows {
        options.default_rows = default_rows;
    }
    let row_counts: RowCounts = args.rows.into_iter().collect();

    let mut providers = ValueProviders::fake(options.seed);
    let generator = SyntheticRelationalGenerator::new(options);
    let (batches, report) = generator.generate_with_report(&schema, &row_counts, &mut providers)?;

    let written = write_batches_csv(&args.out, &batches)?;
    write_json(&args.out.join("generation_report.json"), &report)?;
    info!(
        rows = report.total_rows(),
        files = written.len(),
        bytes = written_bytes(&written),
        out = %args.out.display(),
        "synthetic data written"
    );
    Ok(())
}

pub fn mask(args: MaskArgs, config: &TdmConfig) -> Result<(), CliError> {
    let graph = load_graph(&args.schema)?;
    let rules = match &args.rules {
        Some(path) => read_json(path)?,
        None => {
            let rules = MaskingRuleSet::suggest(&graph);
            info!(rules = rules.len(), "using suggested masking rules");
            rules
        }
    };

    let mut masking = config.mask.clone();
    if let Some(salt) = args.salt {
        masking.salt = salt;
    }
    let registry = MaskingTransformRegistry::new(masking);

    let mut batches = read_batches(&graph, &args.input)?;
    let report = mask_batches(&registry, &rules, &graph, &mut batches)?;

    let written = write_batches_csv(&args.out, &batches)?;
    write_json(&args.out.join("masking_report.json"), &report)?;
    info!(
        cells = report.masked_cells(),
        bytes = written_bytes(&written),
        warnings = report.warnings.len(),
        out = %args.out.display(),
        "masked data written"
    );
    Ok(())
}

pub fn fuse(args: FuseArgs, config: &TdmConfig) -> Result<(), CliError> {
    if args.fragments.is_empty() && args.domain_pack.is_none() {
        return Err(CliError::InvalidArgument(
            "at least one --fragment or --domain-pack is required".to_string(),
        ));
    }

    let mut fragments = Vec::with_capacity(args.fragments.len() + 1);
    for path in &args.fragments {
        fragments.push(parse_fragment_json(&read_to_string(path)?)?);
    }

    if let Some(pack) = &args.domain_pack {
        let mut repository = DomainPackRepository::with_builtins();
        if let Some(dir) = &args.pack_dir {
            repository.load_dir(dir)?;
        }
        fragments.push(repository.fragment(pack)?);
    }

    let engine = SchemaFusionEngine::new(config.fusion);
    let (schema, report) = engine.fuse_with_report(&fragments);
    for conflict in &report.conflicts {
        info!(
            entity = %conflict.entity,
            field = %conflict.field,
            resolved = %conflict.resolved,
            "type conflict"
        );
    }
    if !report.ambiguous.is_empty() {
        warn!(count = report.ambiguous.len(), "ambiguous relationships need review");
    }

    // Refuse to write a schema the generator could not load.
    schema.to_graph()?;
    write_json(&args.out, &schema)?;
    info!(entities = schema.entities.len(), out = %args.out.display(), "unified schema written");
    Ok(())
}

/// Type filter values by their column; unknown targets stay text for the extractor to reject.
fn typed_filters(graph: &SchemaGraph, raw: &[(String, String, String)]) -> Filters {
    let mut filters: Filters = BTreeMap::new();
    for (table, column, value) in raw {
        let typed = graph
            .table(table)
            .and_then(|table| table.column(column))
            .map(|column| Value::parse_typed(value, &column.data_type))
            .unwrap_or_else(|| Value::text(value.clone()));
        filters
            .entry(table.clone())
            .or_default()
            .insert(column.clone(), typed);
    }
    filters
}
