//! Fetch and print the tree of an input

use crate::render::ViewSnapshot;
use crate::util::{expand_path, open_viewer, parse_path, settle};
use crate::ModelArgs;
use anyhow::{bail, Result};
use canopy_core::TreePath;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;
use viewer::ElementFilter;

pub fn run(
    args: &ModelArgs,
    input: Option<String>,
    expand: &[String],
    hide: Vec<String>,
    auto_expand: Option<i32>,
    runtime: Handle,
) -> Result<()> {
    let (mut viewer, model) = open_viewer(args, runtime, |config| {
        if let Some(level) = auto_expand {
            config.auto_expand_level = level;
        }
    })?;
    let timeout = Duration::from_secs(args.timeout);

    if !hide.is_empty() {
        let hidden: HashSet<String> = hide.into_iter().collect();
        let filter: Arc<dyn ElementFilter<String>> =
            Arc::new(move |_: &TreePath<String>, element: &String| !hidden.contains(element));
        viewer.add_filter(filter)?;
    }

    let input = input.unwrap_or_else(|| model.root.clone());
    if !model.contains(&input) {
        bail!("unknown input '{}'", input);
    }
    info!(input = %input, "browsing");
    viewer.set_input(input.clone())?;
    settle(&mut viewer, &format!("Fetching {}", input), timeout)?;

    for text in expand {
        expand_path(&mut viewer, &parse_path(text), timeout)?;
    }

    let snapshot = ViewSnapshot::capture(&input, viewer.tree());
    if args.json {
        println!("{}", snapshot.to_json()?);
    } else {
        snapshot.print();
    }
    viewer.dispose();
    Ok(())
}
