//! The column-level lineage graph.
//!
//! Nodes are tables, columns, and computed expressions; edges record how
//! values flow from source columns through transformations into target
//! columns. The graph is append-only while a walk is running, then
//! optionally compacted and read-only.
//!
//! The serialized field names (`id`, `kind`, `name`, `schema`, `database`,
//! `table_type` / `data_type` / `expression_type` on nodes; `id`,
//! `source_id`, `target_id`, `kind`, `operation`, `sql_expression` on edges)
//! are the stable external contract.

use crate::error::AnalysisError;
use crate::intern::{IdAllocator, StringInterner};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Identifier of a node, unique across node kinds within one graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of an edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Classification of a table node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    /// Physical base table.
    Base,
    /// View.
    View,
    /// Common table expression binding (or derived-table alias).
    Cte,
    /// Temporary table (`#name`).
    Temp,
    /// Table variable (`@name`).
    TableVar,
    /// Stored procedure modeled as a table owning its parameters.
    Procedure,
}

/// Classification of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionType {
    /// CASE expression result.
    Case,
    /// Window function result.
    Window,
    /// Synthetic node gathering a join predicate's inputs.
    JoinCondition,
    /// Synthetic node gathering filter/grouping inputs of one query.
    Output,
    /// Any other computed scalar.
    Scalar,
}

/// A node in the lineage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Tagged node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Table(TableNode),
    Column(ColumnNode),
    Expression(ExpressionNode),
}

impl NodeKind {
    pub fn name(&self) -> &Arc<str> {
        match self {
            NodeKind::Table(t) => &t.name,
            NodeKind::Column(c) => &c.name,
            NodeKind::Expression(e) => &e.name,
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, NodeKind::Table(_))
    }

    pub fn is_column(&self) -> bool {
        matches!(self, NodeKind::Column(_))
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, NodeKind::Expression(_))
    }
}

/// A physical table, view, temp table, table variable, CTE, or procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableNode {
    pub name: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Arc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<Arc<str>>,
    pub table_type: TableType,
    /// IDs of the columns owned by this table, maintained on insertion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<NodeId>,
}

/// A column (real, CTE, temp, variable, or procedure parameter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnNode {
    pub name: Arc<str>,
    /// The owning table node. Every column has exactly one owner.
    pub owner_table_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<Arc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_computed: bool,
    /// True for columns invented because metadata was absent (stubs,
    /// `StarColumnN` placeholders, inferred CTE columns).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

/// A non-column value flowing through the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpressionNode {
    pub name: Arc<str>,
    pub expression_type: ExpressionType,
    /// Literal SQL text responsible for the expression.
    pub sql_text: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<Arc<str>>,
}

/// Optional attributes for [`LineageGraph::add_column`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnFlags {
    pub nullable: Option<bool>,
    pub computed: bool,
    pub synthetic: bool,
}

impl ColumnFlags {
    /// Flags for a stub column invented without metadata.
    pub fn synthetic() -> Self {
        Self {
            synthetic: true,
            ..Self::default()
        }
    }
}

/// The kind of a lineage edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Identity flow under type coercion (`SELECT a AS b`).
    Direct,
    /// Flow through a transformation.
    Indirect,
    /// Join relationship, recorded as a source/target pair.
    Join,
    /// Column constrains a result (WHERE, HAVING, ON, CASE WHEN).
    Filter,
    /// Column feeds a procedure parameter.
    Parameter,
    /// Column participates in grouping or partitioning.
    GroupBy,
    /// Column feeds a window function.
    Window,
}

/// A typed directed edge between two live nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub kind: EdgeKind,
    /// Short label describing the transformation ("select", "insert",
    /// "case", "sum", "+", ...).
    pub operation: Arc<str>,
    /// Literal SQL text responsible for the edge, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_expression: Option<Arc<str>>,
}

/// Node and edge counts, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GraphStatistics {
    pub table_count: usize,
    pub column_count: usize,
    pub expression_count: usize,
    pub direct_edges: usize,
    pub indirect_edges: usize,
    pub join_edges: usize,
    pub filter_edges: usize,
    pub parameter_edges: usize,
    pub group_by_edges: usize,
    pub window_edges: usize,
}

impl GraphStatistics {
    pub fn node_count(&self) -> usize {
        self.table_count + self.column_count + self.expression_count
    }

    pub fn edge_count(&self) -> usize {
        self.direct_edges
            + self.indirect_edges
            + self.join_edges
            + self.filter_edges
            + self.parameter_edges
            + self.group_by_edges
            + self.window_edges
    }
}

/// Plain serializable form of a graph; the wire contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GraphDocument {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<NodeId>,
}

/// The lineage graph with its lookup indices.
///
/// Indices (name to table, (table, column) to column, adjacency, edge
/// dedup) are updated atomically with node/edge insertion. Identifier keys
/// are case-folded unless the graph was built case-sensitive.
pub struct LineageGraph {
    interner: Arc<StringInterner>,
    ids: IdAllocator,
    case_sensitive: bool,
    nodes: Vec<Node>,
    node_index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    tables_by_name: HashMap<Arc<str>, Vec<NodeId>>,
    columns_by_name: HashMap<(NodeId, Arc<str>), NodeId>,
    out_edges: HashMap<NodeId, Vec<EdgeId>>,
    in_edges: HashMap<NodeId, Vec<EdgeId>>,
    edge_index: HashMap<EdgeId, usize>,
    edge_dedup: HashMap<(NodeId, NodeId, EdgeKind, Arc<str>), EdgeId>,
    outputs: HashSet<NodeId>,
}

impl LineageGraph {
    pub fn new(interner: Arc<StringInterner>, case_sensitive: bool) -> Self {
        Self::with_ids(interner, case_sensitive, IdAllocator::new())
    }

    /// Builds a graph with a caller-provided ID allocator, so tests can pin
    /// the minted sequence.
    pub fn with_ids(
        interner: Arc<StringInterner>,
        case_sensitive: bool,
        ids: IdAllocator,
    ) -> Self {
        Self {
            interner,
            ids,
            case_sensitive,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            edges: Vec::new(),
            tables_by_name: HashMap::new(),
            columns_by_name: HashMap::new(),
            out_edges: HashMap::new(),
            in_edges: HashMap::new(),
            edge_index: HashMap::new(),
            edge_dedup: HashMap::new(),
            outputs: HashSet::new(),
        }
    }

    /// Interns an identifier in its canonical (case-folded) form.
    pub fn canonical(&self, name: &str) -> Arc<str> {
        if self.case_sensitive {
            self.interner.intern(name)
        } else {
            self.interner.intern(&name.to_lowercase())
        }
    }

    /// Interns a string verbatim (operation labels, SQL text).
    pub fn intern(&self, text: &str) -> Arc<str> {
        self.interner.intern(text)
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    /// Adds a table node, returning the existing ID when a table with the
    /// same canonical name and type is already present.
    pub fn add_table(
        &mut self,
        name: &str,
        table_type: TableType,
        schema: Option<&str>,
        database: Option<&str>,
    ) -> NodeId {
        let key = self.table_key(name, schema, database);
        if let Some(candidates) = self.tables_by_name.get(&key) {
            for id in candidates {
                if let Some(NodeKind::Table(existing)) = self.node(*id).map(|n| &n.kind) {
                    if existing.table_type == table_type {
                        return *id;
                    }
                }
            }
        }

        let id = self.ids.mint_node_id();
        let table = TableNode {
            name: self.canonical(name),
            schema: schema.map(|s| self.canonical(s)),
            database: database.map(|d| self.canonical(d)),
            table_type,
            columns: Vec::new(),
        };
        self.push_node(Node {
            id,
            kind: NodeKind::Table(table),
        });
        self.tables_by_name.entry(key).or_default().push(id);
        id
    }

    /// Adds a column under `owner`, idempotent on `(owner, name)`.
    ///
    /// Fails with [`AnalysisError::UnknownOwner`] when `owner` is absent or
    /// not a table.
    pub fn add_column(
        &mut self,
        owner: NodeId,
        name: &str,
        data_type: Option<&str>,
        flags: ColumnFlags,
    ) -> Result<NodeId, AnalysisError> {
        match self.node(owner).map(|n| &n.kind) {
            Some(NodeKind::Table(_)) => {}
            _ => return Err(AnalysisError::UnknownOwner(owner)),
        }

        let canonical = self.canonical(name);
        if let Some(existing) = self.columns_by_name.get(&(owner, canonical.clone())) {
            return Ok(*existing);
        }

        let id = self.ids.mint_node_id();
        let column = ColumnNode {
            name: canonical.clone(),
            owner_table_id: owner,
            data_type: data_type.map(|t| self.intern(t)),
            nullable: flags.nullable,
            is_computed: flags.computed,
            synthetic: flags.synthetic,
        };
        self.push_node(Node {
            id,
            kind: NodeKind::Column(column),
        });
        self.columns_by_name.insert((owner, canonical), id);
        if let Some(idx) = self.node_index.get(&owner).copied() {
            if let NodeKind::Table(table) = &mut self.nodes[idx].kind {
                table.columns.push(id);
            }
        }
        Ok(id)
    }

    /// Adds an expression node. Always creates a new node.
    pub fn add_expression(
        &mut self,
        name: &str,
        sql_text: &str,
        expression_type: ExpressionType,
        result_type: Option<&str>,
    ) -> NodeId {
        let id = self.ids.mint_node_id();
        let expression = ExpressionNode {
            name: self.intern(name),
            expression_type,
            sql_text: self.intern(sql_text),
            result_type: result_type.map(|t| self.intern(t)),
        };
        self.push_node(Node {
            id,
            kind: NodeKind::Expression(expression),
        });
        id
    }

    /// Adds an edge, deduplicated on `(source, target, kind, operation)`.
    ///
    /// Returns the existing edge ID for duplicates. Fails with
    /// [`AnalysisError::Internal`] when either endpoint is not live.
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        operation: &str,
        sql_expression: Option<&str>,
    ) -> Result<EdgeId, AnalysisError> {
        if !self.has_node(source) {
            return Err(AnalysisError::Internal(format!(
                "edge source {source} is not a live node"
            )));
        }
        if !self.has_node(target) {
            return Err(AnalysisError::Internal(format!(
                "edge target {target} is not a live node"
            )));
        }

        let operation = self.intern(operation);
        let dedup_key = (source, target, kind, operation.clone());
        if let Some(existing) = self.edge_dedup.get(&dedup_key) {
            return Ok(*existing);
        }

        let id = self.ids.mint_edge_id();
        let edge = Edge {
            id,
            source_id: source,
            target_id: target,
            kind,
            operation,
            sql_expression: sql_expression.map(|s| self.intern(s)),
        };
        self.edge_index.insert(id, self.edges.len());
        self.edges.push(edge);
        self.edge_dedup.insert(dedup_key, id);
        self.out_edges.entry(source).or_default().push(id);
        self.in_edges.entry(target).or_default().push(id);
        Ok(id)
    }

    /// Marks a node as a declared output: a compaction root.
    pub fn mark_output(&mut self, id: NodeId) {
        self.outputs.insert(id);
    }

    pub fn outputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.outputs.iter().copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.node_index.get(&id).map(|idx| &self.nodes[*idx])
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edge_index.get(&id).map(|idx| &self.edges[*idx])
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.node_index.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Looks up a table by canonical name. Returns the first table created
    /// with that name when several kinds share it.
    pub fn table_id(&self, name: &str) -> Option<NodeId> {
        let key = self.canonical(name);
        self.tables_by_name
            .get(&key)
            .and_then(|ids| ids.first().copied())
    }

    /// Looks up a column by table name and column name.
    pub fn column_id(&self, table: &str, column: &str) -> Option<NodeId> {
        let table_id = self.table_id(table)?;
        self.column_of(table_id, column)
    }

    /// Looks up a column by owner node and name.
    pub fn column_of(&self, table: NodeId, column: &str) -> Option<NodeId> {
        let key = (table, self.canonical(column));
        self.columns_by_name.get(&key).copied()
    }

    /// Direct predecessors of a node: sources of its incoming edges.
    pub fn sources_of(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.in_edges
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |edge_id| self.edge(*edge_id))
            .filter_map(move |edge| self.node(edge.source_id))
    }

    /// Direct successors of a node: targets of its outgoing edges.
    pub fn targets_of(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.out_edges
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |edge_id| self.edge(*edge_id))
            .filter_map(move |edge| self.node(edge.target_id))
    }

    /// All edges from `source` to `target`, in insertion order.
    pub fn edges_between(&self, source: NodeId, target: NodeId) -> Vec<&Edge> {
        self.out_edges
            .get(&source)
            .into_iter()
            .flatten()
            .filter_map(|edge_id| self.edge(*edge_id))
            .filter(|edge| edge.target_id == target)
            .collect()
    }

    /// Enumerates simple paths from `source` to `target`, following edge
    /// direction, bounded by `max_depth` nodes. Stops at cycles.
    pub fn paths(&self, source: NodeId, target: NodeId, max_depth: usize) -> Vec<Vec<NodeId>> {
        let mut results = Vec::new();
        if !self.has_node(source) || !self.has_node(target) || max_depth == 0 {
            return results;
        }
        let mut path = vec![source];
        let mut on_path: HashSet<NodeId> = HashSet::from([source]);
        self.paths_dfs(source, target, max_depth, &mut path, &mut on_path, &mut results);
        results
    }

    fn paths_dfs(
        &self,
        current: NodeId,
        target: NodeId,
        max_depth: usize,
        path: &mut Vec<NodeId>,
        on_path: &mut HashSet<NodeId>,
        results: &mut Vec<Vec<NodeId>>,
    ) {
        if current == target {
            results.push(path.clone());
            return;
        }
        if path.len() >= max_depth {
            return;
        }
        let Some(edge_ids) = self.out_edges.get(&current) else {
            return;
        };
        for edge_id in edge_ids {
            let Some(edge) = self.edge(*edge_id) else {
                continue;
            };
            let next = edge.target_id;
            if !on_path.insert(next) {
                continue;
            }
            path.push(next);
            self.paths_dfs(next, target, max_depth, path, on_path, results);
            path.pop();
            on_path.remove(&next);
        }
    }

    /// Removes expression nodes with no outgoing edges and nodes not
    /// reachable from a declared output, then rebuilds all indices. The
    /// graph is read-only afterwards by convention.
    pub fn compact(&mut self) {
        // Drop expression nodes without outgoing edges, to a fixpoint:
        // removing one can strand another whose only consumer it was.
        let mut dropped: HashSet<NodeId> = HashSet::new();
        loop {
            let mut changed = false;
            for node in &self.nodes {
                if dropped.contains(&node.id) || !node.kind.is_expression() {
                    continue;
                }
                let has_live_out = self
                    .out_edges
                    .get(&node.id)
                    .into_iter()
                    .flatten()
                    .filter_map(|edge_id| self.edge(*edge_id))
                    .any(|edge| !dropped.contains(&edge.target_id));
                if !has_live_out {
                    dropped.insert(node.id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Reachability from declared outputs, walking edges backwards
        // (target to source) and keeping the owner table of every kept
        // column.
        let mut keep: HashSet<NodeId> = HashSet::new();
        let mut queue: Vec<NodeId> = self
            .outputs
            .iter()
            .copied()
            .filter(|id| !dropped.contains(id))
            .collect();
        while let Some(id) = queue.pop() {
            if !keep.insert(id) {
                continue;
            }
            if let Some(NodeKind::Column(column)) = self.node(id).map(|n| &n.kind) {
                if !dropped.contains(&column.owner_table_id) {
                    queue.push(column.owner_table_id);
                }
            }
            for edge_id in self.in_edges.get(&id).into_iter().flatten() {
                if let Some(edge) = self.edge(*edge_id) {
                    if !dropped.contains(&edge.source_id) {
                        queue.push(edge.source_id);
                    }
                }
            }
        }

        let keep: HashSet<NodeId> = keep.difference(&dropped).copied().collect();
        self.retain_nodes(&keep);
    }

    fn retain_nodes(&mut self, keep: &HashSet<NodeId>) {
        let nodes = std::mem::take(&mut self.nodes);
        let edges = std::mem::take(&mut self.edges);

        self.node_index.clear();
        self.edge_index.clear();
        self.tables_by_name.clear();
        self.columns_by_name.clear();
        self.out_edges.clear();
        self.in_edges.clear();
        self.edge_dedup.clear();
        self.outputs.retain(|id| keep.contains(id));

        for mut node in nodes {
            if !keep.contains(&node.id) {
                continue;
            }
            match &mut node.kind {
                NodeKind::Table(table) => {
                    table.columns.retain(|column| keep.contains(column));
                    let key = self.qualified_key(table);
                    self.tables_by_name.entry(key).or_default().push(node.id);
                }
                NodeKind::Column(column) => {
                    self.columns_by_name
                        .insert((column.owner_table_id, column.name.clone()), node.id);
                }
                NodeKind::Expression(_) => {}
            }
            self.node_index.insert(node.id, self.nodes.len());
            self.nodes.push(node);
        }

        for edge in edges {
            if !keep.contains(&edge.source_id) || !keep.contains(&edge.target_id) {
                continue;
            }
            let dedup_key = (
                edge.source_id,
                edge.target_id,
                edge.kind,
                edge.operation.clone(),
            );
            self.edge_index.insert(edge.id, self.edges.len());
            self.edge_dedup.insert(dedup_key, edge.id);
            self.out_edges.entry(edge.source_id).or_default().push(edge.id);
            self.in_edges.entry(edge.target_id).or_default().push(edge.id);
            self.edges.push(edge);
        }
    }

    /// Counts nodes and edges per kind.
    pub fn statistics(&self) -> GraphStatistics {
        let mut stats = GraphStatistics::default();
        for node in &self.nodes {
            match node.kind {
                NodeKind::Table(_) => stats.table_count += 1,
                NodeKind::Column(_) => stats.column_count += 1,
                NodeKind::Expression(_) => stats.expression_count += 1,
            }
        }
        for edge in &self.edges {
            match edge.kind {
                EdgeKind::Direct => stats.direct_edges += 1,
                EdgeKind::Indirect => stats.indirect_edges += 1,
                EdgeKind::Join => stats.join_edges += 1,
                EdgeKind::Filter => stats.filter_edges += 1,
                EdgeKind::Parameter => stats.parameter_edges += 1,
                EdgeKind::GroupBy => stats.group_by_edges += 1,
                EdgeKind::Window => stats.window_edges += 1,
            }
        }
        stats
    }

    /// Exports the graph to its plain serializable form.
    pub fn to_document(&self) -> GraphDocument {
        let mut outputs: Vec<NodeId> = self.outputs.iter().copied().collect();
        outputs.sort();
        GraphDocument {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            outputs,
        }
    }

    /// Rebuilds a graph (and its indices) from a document, validating that
    /// every column owner and edge endpoint is live.
    pub fn from_document(
        document: GraphDocument,
        interner: Arc<StringInterner>,
        case_sensitive: bool,
    ) -> Result<Self, AnalysisError> {
        let max_node = document.nodes.iter().map(|n| n.id.0).max().unwrap_or(0);
        let max_edge = document.edges.iter().map(|e| e.id.0).max().unwrap_or(0);
        let mut graph = Self::with_ids(
            interner,
            case_sensitive,
            IdAllocator::starting_at(max_node + 1, max_edge + 1),
        );

        for node in document.nodes {
            if graph.node_index.contains_key(&node.id) {
                return Err(AnalysisError::Internal(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            match &node.kind {
                NodeKind::Table(table) => {
                    let key = graph.qualified_key(table);
                    graph.tables_by_name.entry(key).or_default().push(node.id);
                }
                NodeKind::Column(column) => {
                    graph
                        .columns_by_name
                        .insert((column.owner_table_id, column.name.clone()), node.id);
                }
                NodeKind::Expression(_) => {}
            }
            graph.node_index.insert(node.id, graph.nodes.len());
            graph.nodes.push(node);
        }

        for node in &graph.nodes {
            if let NodeKind::Column(column) = &node.kind {
                match graph.node(column.owner_table_id).map(|n| &n.kind) {
                    Some(NodeKind::Table(_)) => {}
                    _ => return Err(AnalysisError::UnknownOwner(column.owner_table_id)),
                }
            }
        }

        for edge in document.edges {
            if !graph.has_node(edge.source_id) || !graph.has_node(edge.target_id) {
                return Err(AnalysisError::Internal(format!(
                    "edge {} references a missing node",
                    edge.id
                )));
            }
            let dedup_key = (
                edge.source_id,
                edge.target_id,
                edge.kind,
                edge.operation.clone(),
            );
            graph.edge_index.insert(edge.id, graph.edges.len());
            graph.edge_dedup.insert(dedup_key, edge.id);
            graph.out_edges.entry(edge.source_id).or_default().push(edge.id);
            graph.in_edges.entry(edge.target_id).or_default().push(edge.id);
            graph.edges.push(edge);
        }

        graph.outputs = document.outputs.into_iter().collect();
        Ok(graph)
    }

    fn push_node(&mut self, node: Node) {
        self.node_index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
    }

    fn table_key(&self, name: &str, schema: Option<&str>, database: Option<&str>) -> Arc<str> {
        let mut key = String::new();
        if let Some(database) = database {
            key.push_str(database);
            key.push('.');
        }
        if let Some(schema) = schema {
            key.push_str(schema);
            key.push('.');
        }
        key.push_str(name);
        self.canonical(&key)
    }

    fn qualified_key(&self, table: &TableNode) -> Arc<str> {
        let mut key = String::new();
        if let Some(database) = &table.database {
            key.push_str(database);
            key.push('.');
        }
        if let Some(schema) = &table.schema {
            key.push_str(schema);
            key.push('.');
        }
        key.push_str(&table.name);
        self.canonical(&key)
    }
}

impl fmt::Debug for LineageGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineageGraph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

impl Serialize for LineageGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LineageGraph {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = GraphDocument::deserialize(deserializer)?;
        Self::from_document(document, Arc::new(StringInterner::new()), false)
            .map_err(serde::de::Error::custom)
    }
}
