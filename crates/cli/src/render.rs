//! Text and JSON rendering of the visible tree

use canopy_core::TreePath;
use owo_colors::OwoColorize;
use serde::Serialize;
use viewer::VirtualTree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeLine {
    pub path: Vec<String>,
    pub depth: usize,
    pub expanded: bool,
    pub has_children: Option<bool>,
    pub selected: bool,
    pub top: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewSnapshot {
    pub input: String,
    pub nodes: Vec<NodeLine>,
}

impl ViewSnapshot {
    pub fn capture(input: &str, tree: &VirtualTree<String>) -> Self {
        let top = tree.top_item();
        let nodes = tree
            .visible_paths()
            .into_iter()
            .map(|path| NodeLine {
                depth: path.len().saturating_sub(1),
                expanded: tree.is_expanded(&path),
                has_children: tree.has_children(&path),
                selected: tree.is_selected(&path),
                top: top == Some(&path),
                path: path.segments().to_vec(),
            })
            .collect();
        Self {
            input: input.to_string(),
            nodes,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn print(&self) {
        println!("{}", format!("Input: {}", self.input).bold());
        println!("{}", "━".repeat(60).dimmed());
        if self.nodes.is_empty() {
            println!("{}", "(empty)".dimmed());
        }
        for node in &self.nodes {
            let marker = match (node.expanded, node.has_children) {
                (true, _) => "▾",
                (false, Some(true)) => "▸",
                (false, None) => "?",
                (false, Some(false)) => " ",
            };
            let name = node.path.last().map(String::as_str).unwrap_or_default();
            let indent = "  ".repeat(node.depth);
            let mut line = format!("{}{} {}", indent, marker.cyan(), name);
            if node.selected {
                line = format!("{}{} {}", indent, marker.cyan(), name.green().bold());
            }
            if node.top {
                line.push_str(&format!("  {}", "(top)".yellow()));
            }
            println!("{}", line);
        }
    }

    /// Whether both show the same nodes, expansion, selection and top item
    pub fn same_view(&self, other: &ViewSnapshot) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.nodes.iter().zip(&other.nodes).all(|(a, b)| {
                a.path == b.path && a.expanded == b.expanded && a.selected == b.selected && a.top == b.top
            })
    }

    /// Paths of the expanded nodes
    pub fn expanded(&self) -> Vec<TreePath<String>> {
        self.nodes
            .iter()
            .filter(|node| node.expanded)
            .map(|node| TreePath::from_segments(node.path.iter().cloned()))
            .collect()
    }
}
