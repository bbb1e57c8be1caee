use anyhow::Result;
use log::{debug, info};

use crate::{
    application::{Action, LifecycleOptions, LifecycleOrchestrator, LifecycleReport},
    error::LifecycleError,
    interrupt::Interrupt,
    product::ProductId,
    progress::{NullProgress, TerminalProgress},
    registry::DependencyRegistry,
    runtime::Runtime,
};

pub mod config;
mod paths;

pub use config::Config;

/// Run one lifecycle action and print a summary.
#[tracing::instrument(skip(config, options, interrupt))]
pub fn run_lifecycle<R: Runtime>(
    config: &Config<R>,
    action: Action,
    product_id: &str,
    options: &LifecycleOptions,
    show_progress: bool,
    interrupt: &Interrupt,
) -> Result<()> {
    let id: ProductId = product_id.parse()?;
    let registry = config.registry()?;
    let extractor = config.extractor();
    let orchestrator = LifecycleOrchestrator::new(
        &config.runtime,
        &registry,
        &extractor,
        config.context(interrupt.clone()),
    );

    let report = if show_progress {
        let mut progress = TerminalProgress::new(&format!("{} {}", action, id));
        orchestrator.run(action, &id, options, &mut progress)?
    } else {
        orchestrator.run(action, &id, options, &mut NullProgress)?
    };

    print_summary(action, &id, &report);
    Ok(())
}

fn print_summary(action: Action, id: &ProductId, report: &LifecycleReport) {
    let dir = report
        .install_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "<unknown>".into());

    match action {
        Action::Install => println!("Installed {} to {} ({} files)", id, dir, report.extracted),
        Action::Repair => println!(
            "Repaired {} in {} ({} files, {} removed)",
            id, dir, report.extracted, report.removed
        ),
        Action::Remove => println!("Removed {} ({} files)", id, report.removed),
    }
    if report.kept_shared > 0 {
        println!("  kept {} file(s) used by other products", report.kept_shared);
    }
    if !report.pending_reboot.is_empty() {
        println!(
            "  {} file(s) will be removed at the next reboot",
            report.pending_reboot.len()
        );
    }
    if let Some(manifest) = &report.manifest_path {
        debug!("Manifest: {}", manifest.display());
    }
}

/// Record `dependent` as depending on `product`.
#[tracing::instrument(skip(config))]
pub fn add_dependent<R: Runtime>(config: &Config<R>, product: &str, dependent: &str) -> Result<()> {
    let product: ProductId = product.parse()?;
    let dependent: ProductId = dependent.parse()?;
    let registry = config.registry()?;
    let root = registry.root(config.scope);

    DependencyRegistry::new(&root)
        .add_dependency(&product, &dependent)
        .map_err(LifecycleError::from)?;
    println!("{} now depends on {}", dependent, product);
    Ok(())
}

/// Forget that `dependent` depends on `product`. Forgetting an unknown
/// dependent succeeds.
#[tracing::instrument(skip(config))]
pub fn remove_dependent<R: Runtime>(
    config: &Config<R>,
    product: &str,
    dependent: &str,
) -> Result<()> {
    let product: ProductId = product.parse()?;
    let dependent: ProductId = dependent.parse()?;
    let registry = config.registry()?;
    let root = registry.root(config.scope);

    match DependencyRegistry::new(&root).remove_dependency(&product, &dependent) {
        Ok(()) => println!("{} no longer depends on {}", dependent, product),
        Err(e) if e.is_not_found() => {
            info!("{} was not recorded as dependent of {}", dependent, product)
        }
        Err(e) => return Err(LifecycleError::from(e).into()),
    }
    Ok(())
}
