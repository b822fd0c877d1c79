//! `tracing` targets and a tree printer for debugging view models.
//!
//! Nothing here installs a subscriber. Filter the crate's output by the
//! constants in [`targets`]:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_max_level(tracing::Level::DEBUG)
//!     .init();
//! ```
//!
//! [`ViewModelTreeDebug`] dumps a node and its descendants, one per line:
//!
//! ```ignore
//! use presentation_core::logging::ViewModelTreeDebug;
//!
//! println!("{}", ViewModelTreeDebug::new().format_subtree(order.as_ref()));
//! ```

use std::collections::HashSet;
use std::fmt::Write as FmtWrite;
use std::sync::Arc;

use crate::view_model::ViewModel;

/// One target per subsystem, usable in `RUST_LOG` style directives.
pub mod targets {
    pub const CORE: &str = "presentation_core";
    /// Emissions and blocked payloads.
    pub const SIGNAL: &str = "presentation_core::signal";
    pub const PROPERTY: &str = "presentation_core::property";
    /// Parent links and dirty propagation.
    pub const VIEW_MODEL: &str = "presentation_core::view_model";
    /// Begin, accept and reject.
    pub const TRX: &str = "presentation_core::trx";
    pub const COLLECTION: &str = "presentation_core::collection";
    pub const COMMAND: &str = "presentation_core::command";
    pub const DISPATCHER: &str = "presentation_core::dispatcher";
    pub const DTO: &str = "presentation_core::dto";
}

/// Connector glyphs drawn in front of each child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// `+--` and `` `-- ``.
    Ascii,
    /// Box drawing.
    #[default]
    Unicode,
    /// A single dash.
    Compact,
}

impl TreeStyle {
    /// `(vertical, tee, last)`
    fn glyphs(self) -> (&'static str, &'static str, &'static str) {
        match self {
            TreeStyle::Ascii => ("|", "+--", "`--"),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            TreeStyle::Compact => ("", "-", "-"),
        }
    }
}

/// What [`ViewModelTreeDebug`] prints.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    pub style: TreeStyle,
    /// Print `crate::module::Type` rather than `Type`.
    pub full_type_names: bool,
    /// Append `[dirty, changed, editing, N errors]` where they apply.
    pub show_state: bool,
    /// Nodes deeper than this are left out; the root is depth 0.
    pub max_depth: Option<usize>,
    /// Spaces after each vertical connector.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::Unicode,
            full_type_names: false,
            show_state: true,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Type names only.
    pub fn minimal() -> Self {
        Self {
            show_state: false,
            ..Self::default()
        }
    }
}

/// Renders view model trees as indented text.
#[derive(Debug, Clone, Default)]
pub struct ViewModelTreeDebug {
    options: TreeFormatOptions,
}

impl ViewModelTreeDebug {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Render `root` and every node reachable through
    /// [`child_nodes`](ViewModel::child_nodes). A node already on the current
    /// path is printed once more with `(cycle)` and not descended into.
    pub fn format_subtree(&self, root: &dyn ViewModel) -> String {
        let mut out = String::new();
        let mut path = HashSet::new();
        self.write_node(&mut out, root, 0, true, &mut path);
        out
    }

    fn write_node(
        &self,
        out: &mut String,
        node: &dyn ViewModel,
        depth: usize,
        last: bool,
        path: &mut HashSet<usize>,
    ) {
        if matches!(self.options.max_depth, Some(limit) if depth > limit) {
            return;
        }

        self.write_connector(out, depth, last);
        let base = node.base();
        out.push_str(if self.options.full_type_names {
            base.type_name()
        } else {
            short_type_name(base.type_name())
        });

        // Identity of the node, not of the vtable.
        let key = node as *const dyn ViewModel as *const () as usize;
        if !path.insert(key) {
            out.push_str(" (cycle)\n");
            return;
        }

        if self.options.show_state {
            let flags = state_flags(node);
            if !flags.is_empty() {
                let _ = write!(out, " [{}]", flags.join(", "));
            }
        }
        out.push('\n');

        let children: Vec<Arc<dyn ViewModel>> = node.child_nodes();
        if let Some((tail, rest)) = children.split_last() {
            for child in rest {
                self.write_node(out, child.as_ref(), depth + 1, false, path);
            }
            self.write_node(out, tail.as_ref(), depth + 1, true, path);
        }

        path.remove(&key);
    }

    fn write_connector(&self, out: &mut String, depth: usize, last: bool) {
        let Some(ancestors) = depth.checked_sub(1) else {
            return;
        };
        let (vertical, tee, corner) = self.options.style.glyphs();
        let gap = " ".repeat(self.options.indent_size);
        for _ in 0..ancestors {
            out.push_str(vertical);
            out.push_str(&gap);
        }
        let _ = write!(out, "{} ", if last { corner } else { tee });
    }
}

fn state_flags(node: &dyn ViewModel) -> Vec<String> {
    let base = node.base();
    let mut flags = Vec::new();
    if base.is_dirty() {
        flags.push("dirty".to_string());
    }
    if let Some(trx) = node.as_transactional() {
        if trx.is_changed() {
            flags.push("changed".to_string());
        }
        if trx.is_editing() {
            flags.push("editing".to_string());
        }
    }
    match base.all_errors().len() {
        0 => {}
        n => flags.push(format!("{n} errors")),
    }
    flags
}

/// `a::b::Clan<c::Vampire>` becomes `Clan<c::Vampire>`.
fn short_type_name(type_name: &str) -> &str {
    let path = type_name.split('<').next().unwrap_or(type_name);
    match path.rfind("::") {
        Some(i) => &type_name[i + 2..],
        None => type_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ViewModelCollection;
    use crate::view_model::{ViewModelBase, create};

    struct Clan {
        base: ViewModelBase,
        members: ViewModelCollection<Vampire>,
    }

    impl ViewModel for Clan {
        fn base(&self) -> &ViewModelBase {
            &self.base
        }

        fn child_nodes(&self) -> Vec<Arc<dyn ViewModel>> {
            self.members.iter().map(|m| m as Arc<dyn ViewModel>).collect()
        }
    }

    struct Vampire {
        base: ViewModelBase,
    }

    impl ViewModel for Vampire {
        fn base(&self) -> &ViewModelBase {
            &self.base
        }
    }

    fn setup() -> Arc<Clan> {
        let clan = create(|base| {
            let members = ViewModelCollection::new(&base);
            Clan { base, members }
        });
        clan.members.add(create(|base| Vampire { base }));
        clan.members.add(create(|base| Vampire { base }));
        clan
    }

    #[test]
    fn test_children_drawn_with_box_connectors() {
        let clan = setup();
        let output = ViewModelTreeDebug::new().format_subtree(clan.as_ref());

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Clan"));
        assert!(lines[0].contains("dirty"));
        assert!(lines[1].contains("\u{251c}\u{2500}\u{2500} Vampire"));
        assert!(lines[2].contains("\u{2514}\u{2500}\u{2500} Vampire"));
    }

    #[test]
    fn test_minimal_ascii_omits_state() {
        let clan = setup();
        let options = TreeFormatOptions {
            style: TreeStyle::Ascii,
            ..TreeFormatOptions::minimal()
        };
        let output = ViewModelTreeDebug::with_options(options).format_subtree(clan.as_ref());
        assert!(!output.contains("dirty"));
        assert!(output.contains("`-- Vampire"));
    }

    #[test]
    fn test_depth_limit_keeps_root_only() {
        let clan = setup();
        let options = TreeFormatOptions {
            max_depth: Some(0),
            ..Default::default()
        };
        let output = ViewModelTreeDebug::with_options(options).format_subtree(clan.as_ref());
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn test_short_name_keeps_generic_arguments() {
        assert_eq!(short_type_name("a::b::Clan"), "Clan");
        assert_eq!(short_type_name("a::Wrapper<b::Clan>"), "Wrapper<b::Clan>");
        assert_eq!(short_type_name("Clan"), "Clan");
    }
}
