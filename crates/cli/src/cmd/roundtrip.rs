//! Save the view state of the root input, visit another input, come back

use crate::provider::NameTokens;
use crate::render::ViewSnapshot;
use crate::util::{expand_path, open_viewer, parse_path, settle};
use crate::ModelArgs;
use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;
use viewer::StateListener;

/// Prints save and restore notifications as they happen
#[derive(Default)]
struct StateLog {
    events: Mutex<Vec<String>>,
}

impl StateLog {
    fn record(&self, event: &str, input: &str) {
        info!(input = %input, "{}", event);
        self.events.lock().push(format!("{} {}", event, input));
    }
}

impl StateListener<String> for StateLog {
    fn save_begins(&self, input: &String) {
        self.record("save begins", input);
    }

    fn save_complete(&self, input: &String) {
        self.record("save complete", input);
    }

    fn restore_begins(&self, input: &String) {
        self.record("restore begins", input);
    }

    fn restore_complete(&self, input: &String) {
        self.record("restore complete", input);
    }
}

pub fn run(
    args: &ModelArgs,
    expand: &[String],
    select: &[String],
    via: Option<String>,
    runtime: Handle,
) -> Result<()> {
    let (mut viewer, model) = open_viewer(args, runtime, |_| {})?;
    let timeout = Duration::from_secs(args.timeout);
    let log = Arc::new(StateLog::default());
    viewer.set_token_provider(Arc::new(NameTokens));
    viewer.add_state_listener(log.clone());

    let root = model.root.clone();
    let via = match via {
        Some(via) => via,
        None => model
            .other_inputs()
            .first()
            .map(|input| input.to_string())
            .context("Model has no second input; pass --via")?,
    };
    if !model.contains(&via) {
        bail!("unknown input '{}'", via);
    }

    viewer.set_input(root.clone())?;
    settle(&mut viewer, &format!("Fetching {}", root), timeout)?;
    for text in expand {
        expand_path(&mut viewer, &parse_path(text), timeout)?;
    }
    if !select.is_empty() {
        viewer.set_selection(select.iter().map(|text| parse_path(text)).collect())?;
    }
    let before = ViewSnapshot::capture(&root, viewer.tree());

    viewer.set_input(via.clone())?;
    settle(&mut viewer, &format!("Visiting {}", via), timeout)?;
    let between = ViewSnapshot::capture(&via, viewer.tree());

    viewer.set_input(root.clone())?;
    settle(&mut viewer, &format!("Restoring {}", root), timeout)?;
    let after = ViewSnapshot::capture(&root, viewer.tree());
    viewer.dispose();

    let restored = before.same_view(&after);
    if args.json {
        let report = serde_json::json!({
            "before": before,
            "between": between,
            "after": after,
            "events": *log.events.lock(),
            "restored": restored,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        before.print();
        println!();
        between.print();
        println!();
        after.print();
        println!();
        println!("{}", "State events".bold());
        println!("{}", "━".repeat(60).dimmed());
        for event in log.events.lock().iter() {
            println!("  {}", event);
        }
        println!();
        if restored {
            println!("{} View restored ({} expanded)", "✓".green(), after.expanded().len());
        } else {
            println!("{} View differs after restore", "✗".red());
        }
    }

    if !restored {
        bail!("restored view differs from the saved one");
    }
    Ok(())
}
