//! Name-resolution behaviors: aliases, CTE shadowing, temp table
//! persistence, procedure-scoped variables, and identifier case handling.

use sqltrace_core::{
    analyze, Analyzer, AnalyzerOptions, EdgeKind, MemoryCatalog, NodeKind, ScriptRequest,
    StringInterner, TableType,
};
use std::sync::Arc;

fn run_with_catalog(sql: &str, catalog: MemoryCatalog) -> sqltrace_core::AnalysisResult {
    Analyzer::with_services(
        AnalyzerOptions::default(),
        Arc::new(StringInterner::new()),
        Arc::new(catalog),
    )
    .analyze(&ScriptRequest::new(sql))
}

#[test]
fn test_alias_resolves_to_canonical_table() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_table("dbo.orders", &[("id", "INT"), ("total", "MONEY")]);
    let result = run_with_catalog("SELECT o.total FROM dbo.orders AS o;", catalog);
    let graph = &result.graph;

    let orders = graph.table_id("dbo.orders").expect("orders table");
    let total = graph.column_of(orders, "total").expect("total column");
    let out_total = graph.column_id("out", "total").expect("output column");
    assert!(graph
        .edges_between(total, out_total)
        .iter()
        .any(|edge| edge.kind == EdgeKind::Direct));
}

#[test]
fn test_cte_shadows_base_table() {
    let mut catalog = MemoryCatalog::new();
    catalog.add_table("t", &[("a", "INT")]);
    let result = run_with_catalog("WITH t AS (SELECT a FROM u) SELECT a FROM t;", catalog);
    let graph = &result.graph;

    // The outer SELECT reads the CTE, not the catalog table.
    let cte = graph
        .nodes()
        .find_map(|node| match &node.kind {
            NodeKind::Table(table)
                if table.name.as_ref() == "t" && table.table_type == TableType::Cte =>
            {
                Some(node.id)
            }
            _ => None,
        })
        .expect("cte node");
    let cte_a = graph.column_of(cte, "a").expect("cte column");
    let out_a = graph.column_id("out", "a").expect("output column");
    assert!(!graph.edges_between(cte_a, out_a).is_empty());

    let u = graph.table_id("u").expect("source table");
    let u_a = graph.column_of(u, "a").expect("source column");
    assert!(!graph.edges_between(u_a, cte_a).is_empty());
}

#[test]
fn test_temp_table_visible_across_batches() {
    // Temp tables persist for the session, across GO separators.
    let result = analyze("SELECT a INTO #stage FROM t;\nGO\nSELECT a FROM #stage;");
    let graph = &result.graph;

    let stage = graph.table_id("#stage").expect("temp table");
    let stage_a = graph.column_of(stage, "a").expect("temp column");
    let out_a = graph.column_id("out", "a").expect("output column");
    assert!(!graph.edges_between(stage_a, out_a).is_empty());
}

#[test]
fn test_procedure_variables_owned_by_procedure() {
    let sql = "CREATE PROCEDURE dbo.compute AS BEGIN \
               DECLARE @x INT = (SELECT SUM(a) FROM t); \
               SELECT a FROM t; END";
    let result = analyze(sql);
    let graph = &result.graph;

    let procedure = graph.table_id("dbo.compute").expect("procedure");
    let x = graph
        .column_of(procedure, "@x")
        .expect("variable owned by the procedure, not @@Variables");
    match &graph.node(x).unwrap().kind {
        NodeKind::Column(column) => assert_eq!(column.owner_table_id, procedure),
        _ => panic!("expected column"),
    }
    assert!(graph.table_id("@@variables").is_none());
}

#[test]
fn test_correlated_subquery_sees_outer_table() {
    let result = analyze("SELECT a FROM t WHERE EXISTS (SELECT 1 FROM u WHERE u.x = t.a);");
    let graph = &result.graph;

    // Only one `t` node: the correlated inner reference resolved to the
    // outer registration.
    let t_tables: Vec<_> = graph
        .nodes()
        .filter(|node| matches!(&node.kind, NodeKind::Table(t) if t.name.as_ref() == "t"))
        .collect();
    assert_eq!(t_tables.len(), 1);
}

#[test]
fn test_case_sensitive_option_keeps_distinct_tables() {
    let mut options = AnalyzerOptions::default();
    options.case_sensitive_identifiers = true;
    options.compact_on_finish = false;
    let result =
        Analyzer::new(options).analyze(&ScriptRequest::new("SELECT a FROM T;\nSELECT a FROM t;"));
    let graph = &result.graph;

    assert!(graph.table_id("T").is_some());
    assert!(graph.table_id("t").is_some());
    assert_ne!(graph.table_id("T"), graph.table_id("t"));
}

#[test]
fn test_unqualified_column_attaches_to_single_scope_table() {
    let mut options = AnalyzerOptions::default();
    options.compact_on_finish = false;
    let result = Analyzer::new(options).analyze(&ScriptRequest::new("SELECT mystery FROM t;"));
    let graph = &result.graph;

    let t = graph.table_id("t").expect("table");
    let stub = graph.column_of(t, "mystery").expect("stub column");
    match &graph.node(stub).unwrap().kind {
        NodeKind::Column(column) => assert!(column.synthetic),
        _ => panic!("expected column"),
    }
}

#[test]
fn test_bracketed_identifiers_normalize() {
    let result = analyze("SELECT [Total Amount] FROM [dbo].[Order Details];");
    let graph = &result.graph;

    let table = graph.table_id("dbo.order details").expect("bracketed table");
    assert!(graph.column_of(table, "total amount").is_some());
}

#[test]
fn test_variable_read_before_declare_is_diagnosed() {
    let result = analyze("SET @late = @early + 1;");
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.code == sqltrace_core::diagnostic_codes::UNKNOWN_IDENTIFIER));
    // Both variables exist as columns afterwards.
    let graph = &result.graph;
    let owner = graph.table_id("@@variables").expect("variables owner");
    assert!(graph.column_of(owner, "@late").is_some());
    assert!(graph.column_of(owner, "@early").is_some());
}
