use proptest::prelude::*;
use sqltrace_core::{
    analyze, ColumnFlags, EdgeKind, IdAllocator, LineageGraph, NodeKind, StringInterner,
    TableType,
};
use std::sync::Arc;

fn fresh_graph() -> LineageGraph {
    LineageGraph::with_ids(
        Arc::new(StringInterner::new()),
        false,
        IdAllocator::starting_at(1, 1),
    )
}

proptest! {
    /// P5: interning is identity-stable and canonical.
    #[test]
    fn intern_identity(name in "[a-zA-Z_@#][a-zA-Z0-9_]{0,16}") {
        let interner = StringInterner::new();
        let a = interner.intern(&name);
        let b = interner.intern(&name);
        prop_assert!(Arc::ptr_eq(&a, &b));

        let other = interner.intern(&format!("{name}_x"));
        prop_assert!(!Arc::ptr_eq(&a, &other));
    }

    /// P4: re-inserting an edge equal under the dedup key does not change
    /// the edge count.
    #[test]
    fn edge_insertion_idempotent(
        column_a in "[a-z]{1,8}",
        column_b in "[a-z]{1,8}",
        repeats in 1usize..8,
    ) {
        prop_assume!(column_a != column_b);
        let mut graph = fresh_graph();
        let table = graph.add_table("t", TableType::Base, None, None);
        let a = graph.add_column(table, &column_a, None, ColumnFlags::default()).unwrap();
        let b = graph.add_column(table, &column_b, None, ColumnFlags::default()).unwrap();

        for _ in 0..repeats {
            graph.add_edge(a, b, EdgeKind::Direct, "select", None).unwrap();
        }
        prop_assert_eq!(graph.edge_count(), 1);
    }

    /// P1 and P2 over generated joins: every edge endpoint is live and
    /// every column's owner is a live table.
    #[test]
    fn analysis_preserves_graph_invariants(
        table_a in "[a-z]{3,8}",
        table_b in "[a-z]{3,8}",
        column_a in "[a-z]{3,8}",
        column_b in "[a-z]{3,8}",
    ) {
        prop_assume!(table_a != table_b);
        // Bracket quoting keeps generated names from colliding with
        // keywords.
        let sql = format!(
            "SELECT [{ta}].[{ca}], [{tb}].[{cb}] FROM [{ta}] JOIN [{tb}] ON [{ta}].[{ca}] = [{tb}].[{cb}]",
            ta = table_a, tb = table_b, ca = column_a, cb = column_b,
        );

        let result = analyze(&sql);
        prop_assert!(!result.is_incomplete());
        prop_assert_eq!(result.summary.diagnostic_count.errors, 0);

        let graph = &result.graph;
        for edge in graph.edges() {
            prop_assert!(graph.has_node(edge.source_id));
            prop_assert!(graph.has_node(edge.target_id));
        }
        for node in graph.nodes() {
            if let NodeKind::Column(column) = &node.kind {
                match graph.node(column.owner_table_id).map(|owner| &owner.kind) {
                    Some(NodeKind::Table(_)) => {}
                    other => prop_assert!(false, "column owner must be a table, got {other:?}"),
                }
            }
        }
    }

    /// R1: analyzing the same input twice yields graphs equal under a
    /// canonical ordering (IDs aside).
    #[test]
    fn reruns_are_deterministic(
        table in "[a-z]{3,8}",
        column in "[a-z]{3,8}",
        extra in "[a-z]{3,8}",
    ) {
        prop_assume!(column != extra);
        let sql = format!(
            "SELECT [{column}], [{extra}] + 1 AS shifted FROM [{table}] WHERE [{extra}] > 0"
        );

        let canonical = |sql: &str| {
            let result = analyze(sql);
            let mut nodes: Vec<String> = result
                .graph
                .nodes()
                .map(|node| match &node.kind {
                    NodeKind::Table(t) => format!("table:{}", t.name),
                    NodeKind::Column(c) => format!("column:{}", c.name),
                    NodeKind::Expression(e) => format!("expr:{:?}", e.expression_type),
                })
                .collect();
            nodes.sort();
            let mut edges: Vec<String> = result
                .graph
                .edges()
                .map(|edge| format!("{:?}:{}", edge.kind, edge.operation))
                .collect();
            edges.sort();
            (nodes, edges)
        };

        prop_assert_eq!(canonical(&sql), canonical(&sql));
    }

    /// R2: serializing then deserializing the final graph preserves all
    /// nodes, edges, and their attributes.
    #[test]
    fn serialization_round_trip(
        table in "[a-z]{3,8}",
        column in "[a-z]{3,8}",
    ) {
        let sql = format!("SELECT [{column}] FROM [{table}]");
        let result = analyze(&sql);

        let json = serde_json::to_string(&result.graph).unwrap();
        let back: LineageGraph = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(back.node_count(), result.graph.node_count());
        prop_assert_eq!(back.edge_count(), result.graph.edge_count());

        let names = |graph: &LineageGraph| {
            let mut names: Vec<String> =
                graph.nodes().map(|node| node.kind.name().to_string()).collect();
            names.sort();
            names
        };
        prop_assert_eq!(names(&back), names(&result.graph));

        let ops = |graph: &LineageGraph| {
            let mut ops: Vec<(EdgeKind, String)> = graph
                .edges()
                .map(|edge| (edge.kind, edge.operation.to_string()))
                .collect();
            ops.sort_by(|a, b| (a.0 as u8, &a.1).cmp(&(b.0 as u8, &b.1)));
            ops
        };
        prop_assert_eq!(ops(&back), ops(&result.graph));
    }
}
