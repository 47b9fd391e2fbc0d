//! Traversal over any graph view
//!
//! Implemented once on top of [`GraphRead`], so the same code serves
//! read-only snapshots and open transactions (which see their own buffered
//! writes).
//!
//! `traverse_pattern` runs a breadth-first search over states
//! `(step, hop, entity)`. Each state is expanded at most once per start
//! candidate, so work is bounded by the number of distinct states even on
//! fully cyclic graphs. Every way of reaching a state is remembered as a
//! predecessor link, and the binding tuples are enumerated afterwards by
//! walking those links backwards. Parallel relationships therefore still
//! produce distinct tuples. A relationship is never bound twice in a tuple.

use super::error::{GraphError, GraphResult};
use super::index::AdjacencyEntry;
use super::relationship::Relationship;
use super::types::{Direction, EntityId, GraphId, Label, RelType, RelationshipId};
use super::view::GraphRead;
use crate::cancel::CancellationToken;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;

/// Inclusive range of hops a single pattern step may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopRange {
    pub min: usize,
    pub max: usize,
}

impl HopRange {
    pub fn exactly(n: usize) -> Self {
        Self { min: n, max: n }
    }

    pub fn between(min: usize, max: usize) -> Self {
        Self { min, max: max.max(min) }
    }
}

/// One step of a pattern: follow matching relationships, then check the end entity
#[derive(Debug, Clone, PartialEq)]
pub struct PatternStep {
    /// Empty means any type
    pub rel_types: Vec<RelType>,
    pub direction: Direction,
    /// Labels the entity at the end of the step must carry
    pub end_labels: Vec<Label>,
    pub hops: HopRange,
}

impl PatternStep {
    pub fn new(direction: Direction) -> Self {
        Self {
            rel_types: Vec::new(),
            direction,
            end_labels: Vec::new(),
            hops: HopRange::exactly(1),
        }
    }

    pub fn with_type(mut self, rel_type: impl Into<RelType>) -> Self {
        self.rel_types.push(rel_type.into());
        self
    }

    pub fn with_end_label(mut self, label: impl Into<Label>) -> Self {
        self.end_labels.push(label.into());
        self
    }

    pub fn with_hops(mut self, hops: HopRange) -> Self {
        self.hops = hops;
        self
    }
}

/// What one step bound: the relationships walked and the entity reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepBinding {
    pub relationships: Vec<RelationshipId>,
    pub entity: EntityId,
}

/// One binding tuple produced by `traverse_pattern`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub start: EntityId,
    pub steps: Vec<StepBinding>,
}

impl PatternMatch {
    /// The entity bound by the last step (the start for an empty pattern)
    pub fn end(&self) -> EntityId {
        self.steps.last().map(|s| s.entity).unwrap_or(self.start)
    }
}

/// A path found by `find_paths`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub entities: Vec<EntityId>,
    pub relationships: Vec<RelationshipId>,
}

impl Path {
    /// Number of relationships
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}

type State = (usize, usize, EntityId);

#[derive(Debug, Clone, Copy)]
enum Link {
    Hop { from: State, relationship: RelationshipId },
    Complete { from: State },
}

/// Traversal operations, available on every [`GraphRead`]
pub trait Traversal: GraphRead {
    /// Relationships of an entity in adjacency insertion order
    ///
    /// A self-loop is returned once for `Both`. Unknown entity ids are `NotFound`.
    fn get_relationships(
        &self,
        id: EntityId,
        direction: Direction,
        type_filter: Option<&[RelType]>,
    ) -> GraphResult<Vec<Arc<Relationship>>> {
        if self.entity(id)?.is_none() {
            return Err(GraphError::NotFound(GraphId::Entity(id)));
        }
        let entries = matching_entries(self, id, direction, type_filter.unwrap_or(&[]))?;
        let ids: Vec<RelationshipId> = entries.iter().map(|e| e.relationship).collect();
        Ok(self.relationships(&ids)?.into_iter().flatten().collect())
    }

    /// Match `steps` from every start candidate
    ///
    /// Unknown start ids simply produce no tuples. `limit` truncates silently.
    fn traverse_pattern(
        &self,
        starts: &[EntityId],
        steps: &[PatternStep],
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<PatternMatch>> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();

        for &start in starts {
            if out.len() >= limit {
                break;
            }
            cancel.check()?;
            if self.entity(start)?.is_none() {
                continue;
            }

            let mut links: IndexMap<State, Vec<Link>> = IndexMap::new();
            let mut finals = Vec::new();
            let mut queue = VecDeque::new();
            let root = (0, 0, start);
            links.insert(root, Vec::new());
            queue.push_back(root);

            while let Some(state) = queue.pop_front() {
                cancel.check()?;
                let (step_index, hop, entity) = state;
                if step_index == steps.len() {
                    finals.push(state);
                    continue;
                }
                let step = &steps[step_index];

                if hop >= step.hops.min && has_labels(self, entity, &step.end_labels)? {
                    record(&mut links, &mut queue, (step_index + 1, 0, entity), Link::Complete { from: state });
                }
                if hop < step.hops.max {
                    for entry in matching_entries(self, entity, step.direction, &step.rel_types)? {
                        record(
                            &mut links,
                            &mut queue,
                            (step_index, hop + 1, entry.neighbor),
                            Link::Hop {
                                from: state,
                                relationship: entry.relationship,
                            },
                        );
                    }
                }
            }

            let mut walk = Walk {
                links: &links,
                start,
                step_count: steps.len(),
                rels: Vec::new(),
                ends: Vec::new(),
                used: FxHashSet::default(),
                limit,
            };
            for state in finals {
                if out.len() >= limit {
                    break;
                }
                walk.collect(state, &mut out);
            }
        }

        Ok(out)
    }

    /// Breadth-first shortest paths from `start` to `end`
    ///
    /// Returns every path of minimal length, or nothing if `end` is not
    /// reachable within `max_depth` hops.
    fn find_paths(
        &self,
        start: EntityId,
        end: EntityId,
        max_depth: usize,
        direction: Direction,
        type_filter: Option<&[RelType]>,
        cancel: &CancellationToken,
    ) -> GraphResult<Vec<Path>> {
        for id in [start, end] {
            if self.entity(id)?.is_none() {
                return Err(GraphError::NotFound(GraphId::Entity(id)));
            }
        }
        if start == end {
            return Ok(vec![Path {
                entities: vec![start],
                relationships: Vec::new(),
            }]);
        }

        let types = type_filter.unwrap_or(&[]);
        // entity -> (depth, parents)
        let mut visited: IndexMap<EntityId, (usize, Vec<(EntityId, RelationshipId)>)> = IndexMap::new();
        visited.insert(start, (0, Vec::new()));
        let mut frontier = vec![start];

        for depth in 1..=max_depth {
            cancel.check()?;
            let mut next = Vec::new();
            for &current in &frontier {
                for entry in matching_entries(self, current, direction, types)? {
                    match visited.get_mut(&entry.neighbor) {
                        None => {
                            visited.insert(entry.neighbor, (depth, vec![(current, entry.relationship)]));
                            next.push(entry.neighbor);
                        }
                        Some((d, parents)) if *d == depth => parents.push((current, entry.relationship)),
                        Some(_) => {}
                    }
                }
            }
            if visited.contains_key(&end) || next.is_empty() {
                break;
            }
            frontier = next;
        }

        if !visited.contains_key(&end) {
            return Ok(Vec::new());
        }

        // Reconstruct all shortest paths backwards from `end`
        let mut paths = Vec::new();
        let mut stack = vec![(end, vec![end], Vec::<RelationshipId>::new())];
        while let Some((node, entities, rels)) = stack.pop() {
            if node == start {
                let mut entities = entities;
                let mut relationships = rels;
                entities.reverse();
                relationships.reverse();
                paths.push(Path { entities, relationships });
                continue;
            }
            if let Some((_, parents)) = visited.get(&node) {
                for (parent, rel) in parents.iter().rev() {
                    let mut entities = entities.clone();
                    let mut rels = rels.clone();
                    entities.push(*parent);
                    rels.push(*rel);
                    stack.push((*parent, entities, rels));
                }
            }
        }
        Ok(paths)
    }
}

impl<G: GraphRead + ?Sized> Traversal for G {}

/// Adjacency entries of `id` matching direction and types; self-loops once for `Both`
fn matching_entries<G: GraphRead + ?Sized>(
    graph: &G,
    id: EntityId,
    direction: Direction,
    types: &[RelType],
) -> GraphResult<Vec<AdjacencyEntry>> {
    let mut seen = FxHashSet::default();
    Ok(graph
        .adjacency(id)?
        .into_iter()
        .filter(|e| e.matches(direction))
        .filter(|e| types.is_empty() || types.contains(&e.rel_type))
        .filter(|e| direction != Direction::Both || seen.insert(e.relationship))
        .collect())
}

fn has_labels<G: GraphRead + ?Sized>(graph: &G, id: EntityId, labels: &[Label]) -> GraphResult<bool> {
    if labels.is_empty() {
        return Ok(true);
    }
    Ok(match graph.entity(id)? {
        Some(entity) => labels.iter().all(|l| entity.has_label(l)),
        None => false,
    })
}

fn record(links: &mut IndexMap<State, Vec<Link>>, queue: &mut VecDeque<State>, state: State, link: Link) {
    match links.get_mut(&state) {
        Some(parents) => parents.push(link),
        None => {
            links.insert(state, vec![link]);
            queue.push_back(state);
        }
    }
}

/// Backward enumeration of binding tuples through predecessor links
struct Walk<'a> {
    links: &'a IndexMap<State, Vec<Link>>,
    start: EntityId,
    step_count: usize,
    /// Relationships per step, innermost step first, each in reverse order
    rels: Vec<Vec<RelationshipId>>,
    /// Step end entities, last step first
    ends: Vec<EntityId>,
    used: FxHashSet<RelationshipId>,
    limit: usize,
}

impl Walk<'_> {
    fn collect(&mut self, state: State, out: &mut Vec<PatternMatch>) {
        if out.len() >= self.limit {
            return;
        }
        let Some(parents) = self.links.get(&state) else {
            return;
        };
        if parents.is_empty() {
            let steps = (0..self.step_count)
                .map(|i| {
                    let k = self.step_count - 1 - i;
                    let mut relationships = self.rels[k].clone();
                    relationships.reverse();
                    StepBinding {
                        relationships,
                        entity: self.ends[k],
                    }
                })
                .collect();
            out.push(PatternMatch {
                start: self.start,
                steps,
            });
            return;
        }

        for link in parents {
            match *link {
                Link::Complete { from } => {
                    self.ends.push(state.2);
                    self.rels.push(Vec::new());
                    self.collect(from, out);
                    self.rels.pop();
                    self.ends.pop();
                }
                Link::Hop { from, relationship } => {
                    if !self.used.insert(relationship) {
                        continue;
                    }
                    if let Some(current) = self.rels.last_mut() {
                        current.push(relationship);
                    }
                    self.collect(from, out);
                    if let Some(current) = self.rels.last_mut() {
                        current.pop();
                    }
                    self.used.remove(&relationship);
                }
            }
            if out.len() >= self.limit {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::block::MemoryBlockStore;
    use crate::graph::diff::GraphDiff;
    use crate::graph::engine::{EngineOptions, GraphEngine};
    use crate::graph::entity::Entity;
    use crate::graph::snapshot::GraphSnapshot;
    use crate::persistence::root::MemoryRootPointer;

    /// Builds a snapshot from entity labels and (start, end, type) triples
    fn graph(labels: &[&str], rels: &[(usize, usize, &str)]) -> (GraphSnapshot, Vec<EntityId>, Vec<RelationshipId>) {
        let engine = GraphEngine::open(
            Arc::new(MemoryBlockStore::new()),
            Box::new(MemoryRootPointer::new()),
            EngineOptions::default(),
        )
        .unwrap();
        let base = engine.snapshot(None).unwrap();
        let mut diff = GraphDiff::new();
        let ids: Vec<EntityId> = labels
            .iter()
            .map(|l| {
                let e = Entity::new(engine.allocate_entity_id(), *l);
                let id = e.id;
                diff.create_entity(e);
                id
            })
            .collect();
        let rel_ids: Vec<RelationshipId> = rels
            .iter()
            .map(|(s, e, t)| {
                let r = Relationship::new(engine.allocate_relationship_id(), ids[*s], ids[*e], *t);
                let id = r.id;
                diff.create_relationship(r);
                id
            })
            .collect();
        let root = engine.build_root(&base, &diff).unwrap();
        (engine.snapshot(Some(root)).unwrap(), ids, rel_ids)
    }

    #[test]
    fn test_get_relationships_order_and_direction() {
        let (g, ids, rels) = graph(&["P", "P", "P"], &[(0, 1, "KNOWS"), (2, 0, "KNOWS"), (0, 2, "LIKES")]);

        let out = g.get_relationships(ids[0], Direction::Outgoing, None).unwrap();
        assert_eq!(out.iter().map(|r| r.id).collect::<Vec<_>>(), vec![rels[0], rels[2]]);

        let incoming = g.get_relationships(ids[0], Direction::Incoming, None).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, rels[1]);

        let knows = [RelType::new("KNOWS")];
        let both = g.get_relationships(ids[0], Direction::Both, Some(&knows)).unwrap();
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn test_get_relationships_unknown_entity() {
        let (g, _, _) = graph(&["P"], &[]);
        let err = g.get_relationships(EntityId::new(999), Direction::Both, None).unwrap_err();
        assert!(matches!(err, GraphError::NotFound(GraphId::Entity(id)) if id == EntityId::new(999)));
    }

    #[test]
    fn test_self_loop_once_for_both() {
        let (g, ids, _) = graph(&["P"], &[(0, 0, "SELF")]);
        assert_eq!(g.get_relationships(ids[0], Direction::Both, None).unwrap().len(), 1);
        assert_eq!(g.get_relationships(ids[0], Direction::Outgoing, None).unwrap().len(), 1);
    }

    #[test]
    fn test_two_hop_pattern() {
        let (g, ids, _) = graph(
            &["Person", "Person", "City"],
            &[(0, 1, "KNOWS"), (1, 2, "LIVES_IN")],
        );
        let steps = vec![
            PatternStep::new(Direction::Outgoing).with_type("KNOWS"),
            PatternStep::new(Direction::Outgoing).with_type("LIVES_IN").with_end_label("City"),
        ];
        let matches = g
            .traverse_pattern(&[ids[0]], &steps, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].steps[0].entity, ids[1]);
        assert_eq!(matches[0].end(), ids[2]);
    }

    #[test]
    fn test_parallel_relationships_yield_distinct_tuples() {
        let (g, ids, rels) = graph(&["P", "P"], &[(0, 1, "KNOWS"), (0, 1, "KNOWS")]);
        let steps = vec![PatternStep::new(Direction::Outgoing).with_type("KNOWS")];
        let matches = g
            .traverse_pattern(&[ids[0]], &steps, None, &CancellationToken::new())
            .unwrap();
        let bound: Vec<RelationshipId> = matches.iter().map(|m| m.steps[0].relationships[0]).collect();
        assert_eq!(bound, rels);
    }

    #[test]
    fn test_end_label_filter() {
        let (g, ids, _) = graph(&["P", "P", "C"], &[(0, 1, "R"), (0, 2, "R")]);
        let steps = vec![PatternStep::new(Direction::Outgoing).with_end_label("C")];
        let matches = g
            .traverse_pattern(&[ids[0]], &steps, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].end(), ids[2]);
    }

    #[test]
    fn test_cyclic_graph_is_bounded() {
        // Complete directed graph on 6 nodes, both directions
        let labels = ["N"; 6];
        let mut rels = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                if i != j {
                    rels.push((i, j, "E"));
                }
            }
        }
        let (g, ids, _) = graph(&labels, &rels);
        let steps = vec![PatternStep::new(Direction::Both).with_hops(HopRange::between(1, 3))];
        let matches = g
            .traverse_pattern(&[ids[0]], &steps, Some(50), &CancellationToken::new())
            .unwrap();
        assert_eq!(matches.len(), 50);
    }

    #[test]
    fn test_variable_length_ranges() {
        // chain 0 -> 1 -> 2 -> 3
        let (g, ids, _) = graph(&["N"; 4], &[(0, 1, "NEXT"), (1, 2, "NEXT"), (2, 3, "NEXT")]);
        let steps = vec![PatternStep::new(Direction::Outgoing).with_hops(HopRange::between(2, 3))];
        let matches = g
            .traverse_pattern(&[ids[0]], &steps, None, &CancellationToken::new())
            .unwrap();
        let ends: Vec<EntityId> = matches.iter().map(|m| m.end()).collect();
        assert_eq!(ends, vec![ids[2], ids[3]]);
        assert_eq!(matches[1].steps[0].relationships.len(), 3);

        let zero = vec![PatternStep::new(Direction::Outgoing).with_hops(HopRange::between(0, 1))];
        let matches = g
            .traverse_pattern(&[ids[0]], &zero, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(matches.iter().map(|m| m.end()).collect::<Vec<_>>(), vec![ids[0], ids[1]]);
    }

    #[test]
    fn test_relationship_not_reused_in_tuple() {
        // Undirected walk a-b-a would reuse the single relationship
        let (g, ids, _) = graph(&["N", "N"], &[(0, 1, "E")]);
        let steps = vec![PatternStep::new(Direction::Both).with_hops(HopRange::exactly(2))];
        let matches = g
            .traverse_pattern(&[ids[0]], &steps, None, &CancellationToken::new())
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_cancelled_traversal() {
        let (g, ids, _) = graph(&["N", "N"], &[(0, 1, "E")]);
        let token = CancellationToken::new();
        token.cancel();
        let steps = vec![PatternStep::new(Direction::Outgoing)];
        let err = g.traverse_pattern(&[ids[0]], &steps, None, &token).unwrap_err();
        assert!(matches!(err, GraphError::Cancelled));
    }

    #[test]
    fn test_find_paths_all_shortest() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3, 0 -> 4 -> 5 -> 3
        let (g, ids, _) = graph(
            &["N"; 6],
            &[(0, 1, "E"), (1, 3, "E"), (0, 2, "E"), (2, 3, "E"), (0, 4, "E"), (4, 5, "E"), (5, 3, "E")],
        );
        let paths = g
            .find_paths(ids[0], ids[3], 5, Direction::Outgoing, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.len() == 2));
        assert_eq!(paths[0].entities, vec![ids[0], ids[1], ids[3]]);
        assert_eq!(paths[1].entities, vec![ids[0], ids[2], ids[3]]);
    }

    #[test]
    fn test_find_paths_respects_max_depth() {
        let (g, ids, _) = graph(&["N"; 4], &[(0, 1, "E"), (1, 2, "E"), (2, 3, "E")]);
        let token = CancellationToken::new();
        assert!(g.find_paths(ids[0], ids[3], 2, Direction::Outgoing, None, &token).unwrap().is_empty());
        assert_eq!(g.find_paths(ids[0], ids[3], 3, Direction::Outgoing, None, &token).unwrap().len(), 1);
        // Wrong direction: unreachable, not an error
        assert!(g.find_paths(ids[3], ids[0], 5, Direction::Outgoing, None, &token).unwrap().is_empty());
    }

    #[test]
    fn test_find_paths_terminates_on_cycle() {
        let (g, ids, _) = graph(&["N"; 3], &[(0, 1, "E"), (1, 0, "E"), (1, 2, "E"), (2, 0, "E")]);
        let paths = g
            .find_paths(ids[0], ids[2], 100, Direction::Outgoing, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].relationships.len(), 2);
    }

    #[test]
    fn test_find_paths_unknown_endpoint() {
        let (g, ids, _) = graph(&["N"], &[]);
        let err = g
            .find_paths(ids[0], EntityId::new(42), 3, Direction::Both, None, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }
}
