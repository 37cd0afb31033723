//! Graphviz export of coverage over a control-flow graph.
//!
//! Covered blocks are filled light green, uncovered ones light coral.
//! Turning the `.dot` file into an image is left to `dot -Tpng`.

use crate::block::{BlockId, BlockUniverse};
use crate::engine::{ControlFlow, EngineError, Visualizer};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const COVERED_FILL: &str = "lightgreen";
const UNCOVERED_FILL: &str = "lightcoral";

/// Writes coverage graphs in DOT format.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotRenderer;

impl DotRenderer {
    /// Render the graph restricted to `universe` as a DOT document.
    pub fn to_dot(
        &self,
        flow: &ControlFlow,
        universe: &BlockUniverse,
        observed: &BTreeSet<BlockId>,
    ) -> String {
        let mut out = String::new();
        let covered = universe.iter().filter(|b| observed.contains(b)).count();

        out.push_str("digraph coverage {\n");
        let _ = writeln!(
            out,
            "  label=\"{} (covered {}/{}; green=covered, red=uncovered)\";",
            universe.scope(),
            covered,
            universe.len()
        );
        out.push_str("  node [shape=box, style=filled, fontname=monospace];\n");

        for block in universe.iter() {
            let fill = if observed.contains(&block) {
                COVERED_FILL
            } else {
                UNCOVERED_FILL
            };
            let _ = writeln!(out, "  \"{}\" [fillcolor={}];", block, fill);
        }
        for (src, dst) in flow.edges_within(universe) {
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", src, dst);
        }

        out.push_str("}\n");
        out
    }
}

impl Visualizer for DotRenderer {
    fn render(
        &self,
        flow: &ControlFlow,
        universe: &BlockUniverse,
        observed: &BTreeSet<BlockId>,
        output: &Path,
    ) -> Result<(), EngineError> {
        fs::write(output, self.to_dot(flow, universe, observed))?;
        log::info!("Coverage graph saved to {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn flow() -> ControlFlow {
        ControlFlow {
            entry: BlockId(0x100),
            blocks: [0x100, 0x104, 0x108].map(BlockId).into(),
            edges: [
                (BlockId(0x100), BlockId(0x104)),
                (BlockId(0x100), BlockId(0x108)),
            ]
            .into(),
            functions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_dot_colours_nodes_by_coverage() {
        let flow = flow();
        let universe = flow.universe();
        let observed: BTreeSet<_> = [BlockId(0x100), BlockId(0x108)].into();

        let dot = DotRenderer.to_dot(&flow, &universe, &observed);
        assert!(dot.starts_with("digraph coverage {"));
        assert!(dot.contains("\"0x100\" [fillcolor=lightgreen];"));
        assert!(dot.contains("\"0x104\" [fillcolor=lightcoral];"));
        assert!(dot.contains("\"0x108\" [fillcolor=lightgreen];"));
        assert!(dot.contains("\"0x100\" -> \"0x104\";"));
        assert!(dot.contains("covered 2/3"));
    }

    #[test]
    fn test_render_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.dot");
        let flow = flow();

        DotRenderer
            .render(&flow, &flow.universe(), &BTreeSet::new(), &path)
            .unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.matches("lightcoral").count(), 3);
    }

    #[test]
    fn test_render_into_missing_directory_fails() {
        let flow = flow();
        let err = DotRenderer
            .render(
                &flow,
                &flow.universe(),
                &BTreeSet::new(),
                Path::new("/nonexistent/symcov/coverage.dot"),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
