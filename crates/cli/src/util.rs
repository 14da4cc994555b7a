//! Shared helpers for commands

use crate::model::DemoModel;
use crate::provider::LatencyProvider;
use crate::ModelArgs;
use anyhow::{bail, Context, Result};
use canopy_core::TreePath;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use viewer::{TreeViewer, ViewerConfig};

/// Load the model and configuration and build a viewer over them
///
/// `adjust` may override loaded settings; the result is validated again.
pub fn open_viewer<F>(
    args: &ModelArgs,
    runtime: Handle,
    adjust: F,
) -> Result<(TreeViewer<String>, Arc<DemoModel>)>
where
    F: FnOnce(&mut ViewerConfig),
{
    let model = match &args.model {
        Some(path) => DemoModel::load(path)?,
        None => DemoModel::sample()?,
    };
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    adjust(&mut config);
    config.validate()?;
    let model = Arc::new(model);
    let content = LatencyProvider::new(model.clone(), runtime, Duration::from_millis(args.latency_ms));
    Ok((TreeViewer::new(content, config), model))
}

/// Split `a/b/c` into a path; empty segments are skipped
pub fn parse_path(text: &str) -> TreePath<String> {
    TreePath::from_segments(
        text.split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string),
    )
}

/// Process replies behind a spinner until the viewer is idle
pub fn settle(viewer: &mut TreeViewer<String>, message: &str, timeout: Duration) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.set_message(message.to_string());

    let deadline = Instant::now() + timeout;
    loop {
        viewer.process_pending();
        if viewer.is_idle() {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            spinner.finish_and_clear();
            bail!("viewer did not settle within {:?}", timeout);
        }
        viewer.wait_for_completions((deadline - now).min(Duration::from_millis(80)));
        spinner.tick();
    }
    spinner.finish_and_clear();
    Ok(())
}

/// Expand `path` one level at a time, settling after each
pub fn expand_path(viewer: &mut TreeViewer<String>, path: &TreePath<String>, timeout: Duration) -> Result<()> {
    for depth in 1..=path.len() {
        let prefix = path.truncated(depth);
        viewer
            .expand(&prefix)
            .with_context(|| format!("Cannot expand {}", prefix))?;
        settle(viewer, &format!("Expanding {}", prefix), timeout)?;
    }
    Ok(())
}
