//! Physical operators
//!
//! Every operator implements [`PhysicalOperator`]. The leaf of each pipeline
//! is an [`ArgumentOperator`] that replays one row handed in through
//! `reset`, which lets the same operator chain run once per outer row
//! (OPTIONAL MATCH) or once per query (the root).

use super::eval::{evaluate, is_true, values_equal};
use super::{ExecContext, ExecutionError, ExecutionResult, Record, Value};
use crate::graph::{
    EntityId, GraphError, GraphId, HopRange, Label, PatternStep, PropertyMap, PropertyPatch, PropertyValue,
    RelationshipId, Traversal,
};
use crate::query::ir::{
    AggregateExpr, AggregateFunction, CreatePath, ExpandStep, Expr, SortKey, UpdateItem,
};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Physical operator trait (Volcano iterator model)
pub trait PhysicalOperator: Send {
    /// Produce the next row, or `None` when exhausted
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>>;

    /// Restart from scratch with `argument` as the single input row of the pipeline
    fn reset(&mut self, argument: &Record);
}

/// Type alias for boxed operators
pub type OperatorBox = Box<dyn PhysicalOperator>;

/// Leaf operator: yields the row it was reset with, once
#[derive(Default)]
pub struct ArgumentOperator {
    row: Option<Record>,
}

impl ArgumentOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhysicalOperator for ArgumentOperator {
    fn next(&mut self, _ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        Ok(self.row.take())
    }

    fn reset(&mut self, argument: &Record) {
        self.row = Some(argument.clone());
    }
}

/// Entity scan: MATCH (n:Person {name: 'Alice'})
pub struct ScanOperator {
    input: OperatorBox,
    variable: String,
    labels: Vec<Label>,
    properties: Vec<(String, Expr)>,
    current: Option<Record>,
    /// Property values to match, evaluated once per input row
    expected: Vec<(String, Value)>,
    candidates: VecDeque<EntityId>,
}

impl ScanOperator {
    pub fn new(input: OperatorBox, variable: String, labels: Vec<Label>, properties: Vec<(String, Expr)>) -> Self {
        Self {
            input,
            variable,
            labels,
            properties,
            current: None,
            expected: Vec::new(),
            candidates: VecDeque::new(),
        }
    }

    fn load(&mut self, row: &Record, ctx: &ExecContext<'_>) -> ExecutionResult<()> {
        let graph = ctx.graph.read();
        let ids = match self.labels.first() {
            Some(label) => graph.entity_ids_with_label(label)?,
            None => graph.entity_ids()?,
        };
        self.candidates = ids.into();
        self.expected = self
            .properties
            .iter()
            .map(|(key, expr)| Ok::<_, ExecutionError>((key.clone(), evaluate(expr, row, ctx)?)))
            .collect::<ExecutionResult<_>>()?;
        Ok(())
    }

    fn matches(&self, id: EntityId, ctx: &ExecContext<'_>) -> ExecutionResult<bool> {
        let Some(entity) = ctx.graph.read().entity(id)? else {
            return Ok(false);
        };
        if !self.labels.iter().skip(1).all(|l| entity.has_label(l)) {
            return Ok(false);
        }
        Ok(self.expected.iter().all(|(key, expected)| {
            let actual = entity.get_property(key).map(Value::from).unwrap_or(Value::Null);
            values_equal(&actual, expected) == Some(true)
        }))
    }
}

impl PhysicalOperator for ScanOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(row) = &self.current {
                while let Some(id) = self.candidates.pop_front() {
                    ctx.cancel.check()?;
                    ctx.stats.rows_scanned += 1;
                    if self.matches(id, ctx)? {
                        let mut out = row.clone();
                        out.insert(self.variable.clone(), Value::Entity(id));
                        return Ok(Some(out));
                    }
                }
            }

            match self.input.next(ctx)? {
                Some(row) => {
                    self.load(&row, ctx)?;
                    self.current = Some(row);
                }
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.current = None;
        self.expected.clear();
        self.candidates.clear();
    }
}

/// Pattern expansion: (a)-[r:KNOWS*1..3]->(b)
pub struct ExpandOperator {
    input: OperatorBox,
    start: String,
    steps: Vec<ExpandStep>,
    pending: VecDeque<Record>,
}

impl ExpandOperator {
    pub fn new(input: OperatorBox, start: String, steps: Vec<ExpandStep>) -> Self {
        Self {
            input,
            start,
            steps,
            pending: VecDeque::new(),
        }
    }

    fn expand(&mut self, row: &Record, ctx: &ExecContext<'_>) -> ExecutionResult<()> {
        let Some(Value::Entity(start)) = row.get(&self.start) else {
            return Ok(());
        };
        let pattern: Vec<PatternStep> = self
            .steps
            .iter()
            .map(|step| PatternStep {
                rel_types: step.rel_types.clone(),
                direction: step.direction,
                end_labels: step.end_labels.clone(),
                hops: step
                    .hops
                    .map(|h| h.resolve(ctx.max_hops))
                    .unwrap_or(HopRange::exactly(1)),
            })
            .collect();

        let matches = match ctx.graph.read().traverse_pattern(&[*start], &pattern, None, ctx.cancel) {
            Ok(matches) => matches,
            Err(GraphError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        'matches: for found in matches {
            let mut out = row.clone();
            for (step, binding) in self.steps.iter().zip(found.steps.iter()) {
                let rel = match step.hops {
                    None => match binding.relationships.first() {
                        Some(id) => Value::Relationship(*id),
                        None => continue 'matches,
                    },
                    Some(_) => Value::List(binding.relationships.iter().map(|id| Value::Relationship(*id)).collect()),
                };
                if !bind(&mut out, &step.rel_variable, step.rel_bound, rel) {
                    continue 'matches;
                }
                if !bind(&mut out, &step.end_variable, step.end_bound, Value::Entity(binding.entity)) {
                    continue 'matches;
                }
            }
            self.pending.push_back(out);
        }
        Ok(())
    }
}

/// Bind `name`, or check it against the existing binding when `bound`
fn bind(row: &mut Record, name: &str, bound: bool, value: Value) -> bool {
    if bound {
        if let Some(existing) = row.get(name) {
            return *existing == value;
        }
    }
    row.insert(name, value);
    true
}

impl PhysicalOperator for ExpandOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            match self.input.next(ctx)? {
                Some(row) => self.expand(&row, ctx)?,
                None => return Ok(None),
            }
        }
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.pending.clear();
    }
}

/// Left outer join against a sub-pipeline: OPTIONAL MATCH
pub struct OptionalOperator {
    input: OperatorBox,
    /// Runs once per input row, starting from its own argument leaf
    inner: OperatorBox,
    introduced: Vec<String>,
    current: Option<Record>,
    matched: bool,
}

impl OptionalOperator {
    pub fn new(input: OperatorBox, inner: OperatorBox, introduced: Vec<String>) -> Self {
        Self {
            input,
            inner,
            introduced,
            current: None,
            matched: false,
        }
    }
}

impl PhysicalOperator for OptionalOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(row) = &self.current {
                if let Some(out) = self.inner.next(ctx)? {
                    self.matched = true;
                    return Ok(Some(out));
                }
                let unmatched = !self.matched;
                let mut out = row.clone();
                self.current = None;
                if unmatched {
                    for name in &self.introduced {
                        out.insert(name.clone(), Value::Null);
                    }
                    return Ok(Some(out));
                }
            }

            match self.input.next(ctx)? {
                Some(row) => {
                    self.inner.reset(&row);
                    self.current = Some(row);
                    self.matched = false;
                }
                None => return Ok(None),
            }
        }
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.current = None;
        self.matched = false;
    }
}

/// Filter operator: WHERE n.age > 30
pub struct FilterOperator {
    input: OperatorBox,
    predicate: Expr,
}

impl FilterOperator {
    pub fn new(input: OperatorBox, predicate: Expr) -> Self {
        Self { input, predicate }
    }
}

impl PhysicalOperator for FilterOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        while let Some(row) = self.input.next(ctx)? {
            if is_true(&evaluate(&self.predicate, &row, ctx)?) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
    }
}

/// UNWIND list AS x
pub struct UnwindOperator {
    input: OperatorBox,
    expression: Expr,
    variable: String,
    current: Option<Record>,
    items: VecDeque<Value>,
}

impl UnwindOperator {
    pub fn new(input: OperatorBox, expression: Expr, variable: String) -> Self {
        Self {
            input,
            expression,
            variable,
            current: None,
            items: VecDeque::new(),
        }
    }
}

impl PhysicalOperator for UnwindOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let (Some(row), Some(item)) = (&self.current, self.items.pop_front()) {
                let mut out = row.clone();
                out.insert(self.variable.clone(), item);
                return Ok(Some(out));
            }
            let Some(row) = self.input.next(ctx)? else {
                self.current = None;
                return Ok(None);
            };
            self.items = match evaluate(&self.expression, &row, ctx)? {
                Value::List(items) => items.into(),
                Value::Null => VecDeque::new(),
                single => VecDeque::from([single]),
            };
            self.current = Some(row);
        }
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.current = None;
        self.items.clear();
    }
}

/// Projection: RETURN n.name AS name
pub struct ProjectOperator {
    input: OperatorBox,
    items: Vec<(String, Expr)>,
    /// Add the items to the input row instead of replacing it
    retain_input: bool,
}

impl ProjectOperator {
    pub fn new(input: OperatorBox, items: Vec<(String, Expr)>, retain_input: bool) -> Self {
        Self {
            input,
            items,
            retain_input,
        }
    }
}

impl PhysicalOperator for ProjectOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        // All items see the input row, not each other
        let values = self
            .items
            .iter()
            .map(|(_, expr)| evaluate(expr, &row, ctx))
            .collect::<ExecutionResult<Vec<_>>>()?;
        let mut out = if self.retain_input { row } else { Record::new() };
        for ((name, _), value) in self.items.iter().zip(values) {
            out.insert(name.clone(), value);
        }
        Ok(Some(out))
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
    }
}

/// Running state of one aggregate within one group
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumInteger(i64),
    SumFloat(f64),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
    /// sum or avg saw a non-numeric value; the group result is NULL
    NotNumeric,
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::SumInteger(0),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
            AggregateFunction::Collect => Accumulator::Collect(Vec::new()),
        }
    }

    fn update(&mut self, value: Value) -> ExecutionResult<()> {
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::SumInteger(total) => match value {
                Value::Integer(i) => {
                    *total = total
                        .checked_add(i)
                        .ok_or_else(|| ExecutionError::InvalidArgument("Integer overflow in sum".to_string()))?
                }
                Value::Float(f) => {
                    let sum = *total as f64 + f;
                    *self = Accumulator::SumFloat(sum);
                }
                _ => *self = Accumulator::NotNumeric,
            },
            Accumulator::SumFloat(total) => match value.as_float() {
                Some(f) => *total += f,
                None => *self = Accumulator::NotNumeric,
            },
            Accumulator::Avg { sum, count } => match value.as_float() {
                Some(f) => {
                    *sum += f;
                    *count += 1;
                }
                None => *self = Accumulator::NotNumeric,
            },
            Accumulator::NotNumeric => {}
            Accumulator::Min(current) => {
                if current.as_ref().map_or(true, |c| value.total_cmp(c) == Ordering::Less) {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if current.as_ref().map_or(true, |c| value.total_cmp(c) == Ordering::Greater) {
                    *current = Some(value);
                }
            }
            Accumulator::Collect(items) => items.push(value),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Integer(n),
            Accumulator::SumInteger(total) => Value::Integer(total),
            Accumulator::SumFloat(total) => Value::Float(total),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Float(sum / count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) => v.unwrap_or(Value::Null),
            Accumulator::Collect(items) => Value::List(items),
            Accumulator::NotNumeric => Value::Null,
        }
    }
}

/// One aggregate of one group, with its DISTINCT filter
struct GroupState {
    accumulator: Accumulator,
    seen: Option<FxHashSet<Value>>,
}

impl GroupState {
    fn new(aggregate: &AggregateExpr) -> Self {
        Self {
            accumulator: Accumulator::new(aggregate.function),
            seen: aggregate.distinct.then(FxHashSet::default),
        }
    }
}

/// Grouping and aggregation: RETURN n.city, count(*)
pub struct AggregateOperator {
    input: OperatorBox,
    keys: Vec<(String, Expr)>,
    aggregates: Vec<(String, AggregateExpr)>,
    output: Option<VecDeque<Record>>,
}

impl AggregateOperator {
    pub fn new(input: OperatorBox, keys: Vec<(String, Expr)>, aggregates: Vec<(String, AggregateExpr)>) -> Self {
        Self {
            input,
            keys,
            aggregates,
            output: None,
        }
    }

    fn new_group(&self) -> Vec<GroupState> {
        self.aggregates.iter().map(|(_, a)| GroupState::new(a)).collect()
    }

    fn run(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<VecDeque<Record>> {
        let mut groups: IndexMap<Vec<Value>, Vec<GroupState>> = IndexMap::new();

        while let Some(row) = self.input.next(ctx)? {
            ctx.cancel.check()?;
            let key = self
                .keys
                .iter()
                .map(|(_, expr)| evaluate(expr, &row, ctx))
                .collect::<ExecutionResult<Vec<_>>>()?;
            if !groups.contains_key(&key) {
                groups.insert(key.clone(), self.new_group());
            }
            let Some(states) = groups.get_mut(&key) else {
                continue;
            };
            for ((_, aggregate), state) in self.aggregates.iter().zip(states.iter_mut()) {
                let value = match &aggregate.argument {
                    // count(*) counts rows, NULL or not
                    None => Value::Boolean(true),
                    Some(expr) => match evaluate(expr, &row, ctx)? {
                        Value::Null => continue,
                        value => value,
                    },
                };
                if let Some(seen) = &mut state.seen {
                    if !seen.insert(value.clone()) {
                        continue;
                    }
                }
                state.accumulator.update(value)?;
            }
        }

        // Aggregating nothing without grouping keys still yields one row
        if groups.is_empty() && self.keys.is_empty() {
            groups.insert(Vec::new(), self.new_group());
        }

        Ok(groups
            .into_iter()
            .map(|(key, states)| {
                let mut row = Record::new();
                for ((name, _), value) in self.keys.iter().zip(key) {
                    row.insert(name.clone(), value);
                }
                for ((name, _), state) in self.aggregates.iter().zip(states) {
                    row.insert(name.clone(), state.accumulator.finish());
                }
                row
            })
            .collect())
    }
}

impl PhysicalOperator for AggregateOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            self.output = Some(self.run(ctx)?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.output = None;
    }
}

/// DISTINCT over whole rows
pub struct DistinctOperator {
    input: OperatorBox,
    seen: FxHashSet<Vec<Value>>,
}

impl DistinctOperator {
    pub fn new(input: OperatorBox) -> Self {
        Self {
            input,
            seen: FxHashSet::default(),
        }
    }
}

impl PhysicalOperator for DistinctOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        while let Some(row) = self.input.next(ctx)? {
            if self.seen.insert(row.to_values()) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.seen.clear();
    }
}

/// ORDER BY; stable, NULLs last in either direction
pub struct SortOperator {
    input: OperatorBox,
    keys: Vec<SortKey>,
    output: Option<VecDeque<Record>>,
}

impl SortOperator {
    pub fn new(input: OperatorBox, keys: Vec<SortKey>) -> Self {
        Self {
            input,
            keys,
            output: None,
        }
    }

    fn run(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<VecDeque<Record>> {
        let mut rows = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            ctx.cancel.check()?;
            let key = self
                .keys
                .iter()
                .map(|k| evaluate(&k.expression, &row, ctx))
                .collect::<ExecutionResult<Vec<_>>>()?;
            rows.push((key, row));
        }

        let keys = &self.keys;
        rows.sort_by(|(a, _), (b, _)| {
            for ((x, y), key) in a.iter().zip(b.iter()).zip(keys) {
                let ord = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) if key.descending => y.total_cmp(x),
                    (false, false) => x.total_cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}

impl PhysicalOperator for SortOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            self.output = Some(self.run(ctx)?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.output = None;
    }
}

/// Evaluate a SKIP or LIMIT count
fn row_count(clause: &str, expr: &Expr, ctx: &ExecContext<'_>) -> ExecutionResult<usize> {
    match evaluate(expr, &Record::new(), ctx)? {
        Value::Integer(n) if n >= 0 => Ok(n as usize),
        other => Err(ExecutionError::InvalidArgument(format!(
            "{} expects a non-negative integer, got {}",
            clause, other
        ))),
    }
}

/// SKIP n
pub struct SkipOperator {
    input: OperatorBox,
    count: Expr,
    remaining: Option<usize>,
}

impl SkipOperator {
    pub fn new(input: OperatorBox, count: Expr) -> Self {
        Self {
            input,
            count,
            remaining: None,
        }
    }
}

impl PhysicalOperator for SkipOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.remaining.is_none() {
            self.remaining = Some(row_count("SKIP", &self.count, ctx)?);
        }
        while let Some(row) = self.input.next(ctx)? {
            match &mut self.remaining {
                Some(n) if *n > 0 => *n -= 1,
                _ => return Ok(Some(row)),
            }
        }
        Ok(None)
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.remaining = None;
    }
}

/// LIMIT n
pub struct LimitOperator {
    input: OperatorBox,
    count: Expr,
    limit: Option<usize>,
    produced: usize,
}

impl LimitOperator {
    pub fn new(input: OperatorBox, count: Expr) -> Self {
        Self {
            input,
            count,
            limit: None,
            produced: 0,
        }
    }
}

impl PhysicalOperator for LimitOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        let limit = match self.limit {
            Some(limit) => limit,
            None => {
                let limit = row_count("LIMIT", &self.count, ctx)?;
                self.limit = Some(limit);
                limit
            }
        };
        if self.produced >= limit {
            return Ok(None);
        }
        let row = self.input.next(ctx)?;
        if row.is_some() {
            self.produced += 1;
        }
        Ok(row)
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.limit = None;
        self.produced = 0;
    }
}

/// Evaluate pattern properties into a map for storage; NULL values are left out
fn property_map(properties: &[(String, Expr)], row: &Record, ctx: &ExecContext<'_>) -> ExecutionResult<PropertyMap> {
    let mut map = PropertyMap::new();
    for (key, expr) in properties {
        let value = evaluate(expr, row, ctx)?;
        if !value.is_null() {
            map.insert(key.clone(), value.to_property()?);
        }
    }
    Ok(map)
}

/// Pull every remaining row out of `input`
///
/// Write operators drain their input before touching the graph, so a clause
/// never reads its own writes.
fn drain(input: &mut OperatorBox, ctx: &mut ExecContext<'_>) -> ExecutionResult<Vec<Record>> {
    let mut rows = Vec::new();
    while let Some(row) = input.next(ctx)? {
        ctx.cancel.check()?;
        rows.push(row);
    }
    Ok(rows)
}

/// CREATE (a:Person {name: 'x'})-[:KNOWS]->(b)
pub struct CreateOperator {
    input: OperatorBox,
    paths: Vec<CreatePath>,
    output: Option<VecDeque<Record>>,
}

impl CreateOperator {
    pub fn new(input: OperatorBox, paths: Vec<CreatePath>) -> Self {
        Self {
            input,
            paths,
            output: None,
        }
    }

    fn create(&self, mut row: Record, ctx: &mut ExecContext<'_>) -> ExecutionResult<Record> {
        for path in &self.paths {
            let mut nodes = Vec::with_capacity(path.nodes.len());
            for node in &path.nodes {
                if node.bound {
                    match row.get(&node.variable) {
                        Some(Value::Entity(id)) => nodes.push(*id),
                        other => {
                            return Err(ExecutionError::InvalidArgument(format!(
                                "Cannot create a relationship to `{}`: expected an entity, got {}",
                                node.variable,
                                other.map(Value::type_name).unwrap_or("nothing")
                            )))
                        }
                    }
                    continue;
                }
                let properties = property_map(&node.properties, &row, ctx)?;
                let property_count = properties.len() as u64;
                let id = ctx.graph.write()?.create_entity(node.labels.clone(), properties)?;
                ctx.stats.entities_created += 1;
                ctx.stats.properties_set += property_count;
                row.insert(node.variable.clone(), Value::Entity(id));
                nodes.push(id);
            }

            for rel in &path.relationships {
                let properties = property_map(&rel.properties, &row, ctx)?;
                let property_count = properties.len() as u64;
                let id = ctx.graph.write()?.create_relationship(
                    rel.rel_type.clone(),
                    nodes[rel.start],
                    nodes[rel.end],
                    properties,
                )?;
                ctx.stats.relationships_created += 1;
                ctx.stats.properties_set += property_count;
                row.insert(rel.variable.clone(), Value::Relationship(id));
            }
        }
        Ok(row)
    }
}

impl PhysicalOperator for CreateOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            let rows = drain(&mut self.input, ctx)?;
            let mut output = VecDeque::with_capacity(rows.len());
            for row in rows {
                output.push_back(self.create(row, ctx)?);
            }
            self.output = Some(output);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.output = None;
    }
}

/// What a SET or REMOVE item targets
enum Target {
    Skip,
    Entity(EntityId),
    Relationship(RelationshipId),
}

impl Target {
    fn resolve(row: &Record, variable: &str) -> ExecutionResult<Self> {
        match row.get(variable) {
            None | Some(Value::Null) => Ok(Target::Skip),
            Some(Value::Entity(id)) => Ok(Target::Entity(*id)),
            Some(Value::Relationship(id)) => Ok(Target::Relationship(*id)),
            Some(other) => Err(ExecutionError::InvalidArgument(format!(
                "Cannot update `{}`: expected an entity or relationship, got {}",
                variable,
                other.type_name()
            ))),
        }
    }

    fn graph_id(&self) -> Option<GraphId> {
        match self {
            Target::Skip => None,
            Target::Entity(id) => Some(GraphId::Entity(*id)),
            Target::Relationship(id) => Some(GraphId::Relationship(*id)),
        }
    }
}

fn map_argument(value: Value, clause: &str) -> ExecutionResult<Option<std::collections::BTreeMap<String, Value>>> {
    match value {
        Value::Map(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => Err(ExecutionError::InvalidArgument(format!(
            "{} expects a map, got {}",
            clause,
            other.type_name()
        ))),
    }
}

/// SET and REMOVE
pub struct UpdateOperator {
    input: OperatorBox,
    items: Vec<UpdateItem>,
    output: Option<VecDeque<Record>>,
}

impl UpdateOperator {
    pub fn new(input: OperatorBox, items: Vec<UpdateItem>) -> Self {
        Self {
            input,
            items,
            output: None,
        }
    }

    fn apply(&self, row: &Record, ctx: &mut ExecContext<'_>) -> ExecutionResult<()> {
        for item in &self.items {
            match item {
                UpdateItem::SetProperty { variable, key, value } => {
                    let Some(id) = Target::resolve(row, variable)?.graph_id() else {
                        continue;
                    };
                    let value = evaluate(value, row, ctx)?.to_property()?;
                    let mut patch = PropertyPatch::new();
                    patch.insert(key.clone(), value);
                    ctx.graph.write()?.set_properties(id, &patch)?;
                    ctx.stats.properties_set += 1;
                }
                UpdateItem::MergeProperties { variable, value } => {
                    let Some(id) = Target::resolve(row, variable)?.graph_id() else {
                        continue;
                    };
                    let Some(map) = map_argument(evaluate(value, row, ctx)?, "SET +=")? else {
                        continue;
                    };
                    let patch = map
                        .iter()
                        .map(|(k, v)| Ok::<_, ExecutionError>((k.clone(), v.to_property()?)))
                        .collect::<ExecutionResult<PropertyPatch>>()?;
                    ctx.graph.write()?.set_properties(id, &patch)?;
                    ctx.stats.properties_set += patch.len() as u64;
                }
                UpdateItem::ReplaceProperties { variable, value } => {
                    let Some(id) = Target::resolve(row, variable)?.graph_id() else {
                        continue;
                    };
                    let Some(map) = map_argument(evaluate(value, row, ctx)?, "SET =")? else {
                        continue;
                    };
                    let mut properties = PropertyMap::new();
                    for (k, v) in &map {
                        if !v.is_null() {
                            properties.insert(k.clone(), v.to_property()?);
                        }
                    }
                    let count = properties.len() as u64;
                    ctx.graph.write()?.replace_properties(id, properties)?;
                    ctx.stats.properties_set += count;
                }
                UpdateItem::RemoveProperty { variable, key } => {
                    let Some(id) = Target::resolve(row, variable)?.graph_id() else {
                        continue;
                    };
                    let mut patch = PropertyPatch::new();
                    patch.insert(key.clone(), PropertyValue::Null);
                    ctx.graph.write()?.set_properties(id, &patch)?;
                }
                UpdateItem::AddLabels { variable, labels } | UpdateItem::RemoveLabels { variable, labels } => {
                    let id = match Target::resolve(row, variable)? {
                        Target::Skip => continue,
                        Target::Entity(id) => id,
                        Target::Relationship(_) => {
                            return Err(ExecutionError::InvalidArgument(format!(
                                "`{}` is a relationship; only entities have labels",
                                variable
                            )))
                        }
                    };
                    let tx = ctx.graph.write()?;
                    if matches!(item, UpdateItem::AddLabels { .. }) {
                        tx.add_labels(id, labels)?;
                    } else {
                        tx.remove_labels(id, labels)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl PhysicalOperator for UpdateOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            let rows = drain(&mut self.input, ctx)?;
            for row in &rows {
                self.apply(row, ctx)?;
            }
            self.output = Some(rows.into());
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.output = None;
    }
}

/// DELETE and DETACH DELETE
pub struct DeleteOperator {
    input: OperatorBox,
    targets: Vec<Expr>,
    detach: bool,
    output: Option<VecDeque<Record>>,
}

impl DeleteOperator {
    pub fn new(input: OperatorBox, targets: Vec<Expr>, detach: bool) -> Self {
        Self {
            input,
            targets,
            detach,
            output: None,
        }
    }

    fn collect(
        value: Value,
        entities: &mut IndexSet<EntityId>,
        relationships: &mut IndexSet<RelationshipId>,
    ) -> ExecutionResult<()> {
        match value {
            Value::Null => {}
            Value::Entity(id) => {
                entities.insert(id);
            }
            Value::Relationship(id) => {
                relationships.insert(id);
            }
            Value::List(items) => {
                for item in items {
                    Self::collect(item, entities, relationships)?;
                }
            }
            other => {
                return Err(ExecutionError::InvalidArgument(format!(
                    "DELETE expects an entity or relationship, got {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<VecDeque<Record>> {
        let rows = drain(&mut self.input, ctx)?;
        let mut entities = IndexSet::new();
        let mut relationships = IndexSet::new();
        for row in &rows {
            for target in &self.targets {
                Self::collect(evaluate(target, row, ctx)?, &mut entities, &mut relationships)?;
            }
        }

        // Relationships first, so deleting both ends and the link in one clause works
        for id in &relationships {
            match ctx.graph.write()?.delete_relationship(*id) {
                Ok(()) => ctx.stats.relationships_deleted += 1,
                Err(err) => match ExecutionError::from(err) {
                    ExecutionError::Graph(GraphError::NotFound(_)) => {}
                    other => return Err(other),
                },
            }
        }
        for id in &entities {
            let attached = if self.detach {
                let adjacency = ctx.graph.read().adjacency(*id)?;
                adjacency.iter().map(|e| e.relationship).collect::<FxHashSet<_>>().len() as u64
            } else {
                0
            };
            match ctx.graph.write()?.delete_entity(*id, self.detach) {
                Ok(()) => {
                    ctx.stats.entities_deleted += 1;
                    ctx.stats.relationships_deleted += attached;
                }
                Err(err) => match ExecutionError::from(err) {
                    ExecutionError::Graph(GraphError::NotFound(_)) => {}
                    other => return Err(other),
                },
            }
        }
        Ok(rows.into())
    }
}

impl PhysicalOperator for DeleteOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            self.output = Some(self.run(ctx)?);
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn reset(&mut self, argument: &Record) {
        self.input.reset(argument);
        self.output = None;
    }
}

/// UNION and UNION ALL over branch pipelines
pub struct UnionOperator {
    branches: Vec<OperatorBox>,
    current: usize,
    all: bool,
    seen: FxHashSet<Vec<Value>>,
}

impl UnionOperator {
    pub fn new(branches: Vec<OperatorBox>, all: bool) -> Self {
        Self {
            branches,
            current: 0,
            all,
            seen: FxHashSet::default(),
        }
    }
}

impl PhysicalOperator for UnionOperator {
    fn next(&mut self, ctx: &mut ExecContext<'_>) -> ExecutionResult<Option<Record>> {
        while let Some(branch) = self.branches.get_mut(self.current) {
            match branch.next(ctx)? {
                Some(row) => {
                    if self.all || self.seen.insert(row.to_values()) {
                        return Ok(Some(row));
                    }
                }
                None => self.current += 1,
            }
        }
        Ok(None)
    }

    fn reset(&mut self, argument: &Record) {
        for branch in &mut self.branches {
            branch.reset(argument);
        }
        self.current = 0;
        self.seen.clear();
    }
}
