//! # CLI Command Implementations

use super::Backend;
use crate::api;
use crate::config::ServerConfig;
use agrolink_core::{Pipeline, PipelineError, ProjectId, StageCatalog};
use std::path::Path;

/// Largest catalog file accepted by `init` (1 MB).
const MAX_CATALOG_FILE_SIZE: u64 = 1024 * 1024;

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    db_path: &Path,
    backend: Backend,
    host: &str,
    port: u16,
) -> Result<(), PipelineError> {
    let pipeline = open_pipeline(db_path, backend)?;
    if pipeline.seed_catalog(&StageCatalog::default_catalog())? {
        tracing::info!(event = "catalog_seeded", "Empty registry seeded with the default catalog");
    }
    let config = ServerConfig::from_env();

    println!("AgroLink Pipeline Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:        {}", host);
    println!("  Port:        {}", port);
    println!("  Backend:     {}", backend);
    println!("  Database:    {:?}", db_path);
    println!("  Uploads:     {:?}", config.upload_dir);
    println!("  Alert after: {} days", config.proposal_alert_days);
    println!();
    println!("Endpoints:");
    println!("  GET  /etapas                      - Active stages");
    println!("  POST /projects                    - Start a project");
    println!("  PUT  /projects/{{id}}/next-stage    - Advance a project");
    println!("  PUT  /propostas/{{id}}/converter    - Convert a proposal");
    println!("  GET  /dashboard/stats             - Dashboard counters");
    println!("  GET  /health                      - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, pipeline, config).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the database and seed it with a stage catalog.
pub fn cmd_init(
    db_path: &Path,
    backend: Backend,
    catalog_path: Option<&Path>,
    force: bool,
) -> Result<(), PipelineError> {
    let catalog = match catalog_path {
        Some(path) => load_catalog(path)?,
        None => StageCatalog::default_catalog(),
    };
    catalog.validate()?;

    if backend == Backend::Memory {
        println!(
            "Catalog is valid ({} stages); the memory backend keeps nothing to initialize.",
            catalog.stages.len()
        );
        return Ok(());
    }

    if db_path.exists() {
        if !force {
            return Err(PipelineError::Io(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| PipelineError::Io(format!("Cannot remove {:?}: {}", db_path, e)))?;
    }

    let pipeline = Pipeline::with_redb(db_path)?;
    pipeline.seed_catalog(&catalog)?;
    println!(
        "Initialized redb database at {:?} with {} stages",
        db_path,
        pipeline.list_active_stages().len()
    );
    Ok(())
}

fn load_catalog(path: &Path) -> Result<StageCatalog, PipelineError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| PipelineError::Io(format!("Cannot read catalog {:?}: {}", path, e)))?;
    if !metadata.is_file() {
        return Err(PipelineError::Io(format!(
            "Catalog {:?} is not a regular file",
            path
        )));
    }
    if metadata.len() > MAX_CATALOG_FILE_SIZE {
        return Err(PipelineError::Io(format!(
            "Catalog size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CATALOG_FILE_SIZE
        )));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Io(format!("Cannot read catalog {:?}: {}", path, e)))?;
    StageCatalog::from_toml_str(&raw)
}

// =============================================================================
// STAGES COMMAND
// =============================================================================

/// List stages in pipeline order with their checklist items.
pub fn cmd_stages(
    db_path: &Path,
    backend: Backend,
    json_mode: bool,
    all: bool,
) -> Result<(), PipelineError> {
    let pipeline = open_pipeline(db_path, backend)?;
    let stages = if all {
        pipeline.list_all_stages()
    } else {
        pipeline.list_active_stages()
    };
    let registry = pipeline.registry();

    if json_mode {
        let output: Vec<serde_json::Value> = stages
            .iter()
            .map(|stage| {
                serde_json::json!({
                    "id": stage.id,
                    "name": stage.name,
                    "order": stage.order,
                    "active": stage.active,
                    "requirements": registry.all_requirements_of(stage.id),
                })
            })
            .collect();
        print_json(&output);
        return Ok(());
    }

    println!("AgroLink Stages");
    println!("===============");
    if stages.is_empty() {
        println!("(no stages configured - run `agrolink init`)");
    }
    for stage in &stages {
        let marker = if stage.active { "" } else { " [inactive]" };
        println!("{:>3}. {} (id {}){}", stage.order, stage.name, stage.id, marker);
        for requirement in registry.all_requirements_of(stage.id) {
            if requirement.active || all {
                println!("       - {} [{}]", requirement.name, requirement.field_key);
            }
        }
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show dashboard counters.
pub fn cmd_status(db_path: &Path, backend: Backend, json_mode: bool) -> Result<(), PipelineError> {
    let pipeline = open_pipeline(db_path, backend)?;
    let stats = pipeline.dashboard()?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": db_path.to_string_lossy(),
            "backend": backend.to_string(),
            "dashboard": stats,
        }));
        return Ok(());
    }

    println!("AgroLink Pipeline Status");
    println!("========================");
    println!("Database: {:?}", db_path);
    println!("Backend:  {}", backend);
    println!();
    println!("Active projects:      {}", stats.active_projects);
    println!("Started this month:   {}", stats.started_this_month);
    println!("Archived this month:  {}", stats.archived_this_month);
    println!("With pendency:        {}", stats.with_pendency);
    println!("Active credit:        {}", stats.total_active_credit);
    println!("Open proposals:       {}", stats.open_proposals);
    Ok(())
}

// =============================================================================
// PROJECT COMMAND
// =============================================================================

/// Show one project and its stage history.
pub fn cmd_project(
    db_path: &Path,
    backend: Backend,
    json_mode: bool,
    verbose: bool,
    id: u64,
) -> Result<(), PipelineError> {
    let pipeline = open_pipeline(db_path, backend)?;
    let view = pipeline.project_view(ProjectId(id))?;

    if json_mode {
        print_json(&view);
        return Ok(());
    }

    let project = &view.project;
    println!("Project {}", project.id());
    println!("==========");
    println!("Client:      {}", project.client_id());
    println!("Status:      {}", project.status());
    println!("Credit:      {}", project.credit_amount());
    if let Some(number) = project.contract_number() {
        println!("Contract:    {}", number);
    }
    if let Some(reason) = project.cancel_reason() {
        println!("Cancelled:   {}", reason);
    }
    println!(
        "Pendency:    {}",
        if view.tem_pendencia {
            format!("yes ({} unresolved)", view.unresolved_pendencies)
        } else {
            "no".to_string()
        }
    );
    if let Some(checklist) = &view.checklist {
        println!(
            "Checklist:   {}/{} complete",
            checklist.completed, checklist.total
        );
    }
    println!();
    println!("History:");
    let now = pipeline.now();
    for entry in project.stage_history() {
        let state = if entry.is_open() { "current" } else { "closed" };
        println!(
            "  - {} ({}, {} days)",
            entry.stage_name,
            state,
            entry.days_elapsed(now)
        );
        if verbose {
            for (index, pendencia) in entry.pendencies.iter().enumerate() {
                let mark = if pendencia.resolvida { "x" } else { " " };
                println!("      [{}] #{} {}", mark, index, pendencia.descricao);
            }
            for observacao in &entry.observations {
                println!(
                    "      note by {}: {}",
                    observacao.author_id, observacao.texto
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// ALERTS COMMAND
// =============================================================================

/// List open proposals at least `days` old.
pub fn cmd_alerts(
    db_path: &Path,
    backend: Backend,
    json_mode: bool,
    days: Option<u32>,
) -> Result<(), PipelineError> {
    let pipeline = open_pipeline(db_path, backend)?;
    let threshold = days.unwrap_or_else(|| ServerConfig::from_env().proposal_alert_days);
    let alerts = pipeline.stale_proposals(threshold)?;

    if json_mode {
        print_json(&serde_json::json!({
            "threshold_days": threshold,
            "alerts": alerts,
        }));
        return Ok(());
    }

    println!("Open proposals older than {} days: {}", threshold, alerts.len());
    for alert in &alerts {
        println!(
            "  - proposal {} (client {}, {}): {} days",
            alert.proposal.id(), alert.proposal.client_id(), alert.proposal.credit_amount(), alert.days_open
        );
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the pipeline for the selected backend.
///
/// The memory backend starts empty, so it is seeded with the default
/// catalog to be usable at all.
pub fn open_pipeline(db_path: &Path, backend: Backend) -> Result<Pipeline, PipelineError> {
    match backend {
        Backend::Redb => Pipeline::with_redb(db_path),
        Backend::Memory => {
            let pipeline = Pipeline::in_memory()?;
            pipeline.seed_catalog(&StageCatalog::default_catalog())?;
            Ok(pipeline)
        }
    }
}
