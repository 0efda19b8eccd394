//! Cross-domain hyperedges and breadth-first context expansion.
//!
//! A hyperedge relates two or more concepts across one or more domains. The
//! graph is bipartite: concept nodes on one side, hyperedge nodes on the
//! other, so "every concept sharing an edge with X" is two hops in petgraph.
//! Expansion walks hyperedges (any domain) and stored triples together.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::num::NonZeroU64;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::error::{NoesisResult, StoreError, ValidationError};
use crate::graph::{Triple, TripleQuery, check_unit, non_empty};
use crate::kb::KnowledgeBase;
use crate::store::{DurableStore, RecordTable, now_millis};

/// Re-observed edges never become certain.
const MAX_REINFORCED_CONFIDENCE: f32 = 0.99;
const GENERAL_DOMAIN: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct HyperEdgeId(NonZeroU64);

impl HyperEdgeId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(HyperEdgeId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for HyperEdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hyperedge:{}", self.0)
    }
}

/// An n-ary relationship between concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperEdge {
    pub id: HyperEdgeId,
    /// Source concept first, then targets, without duplicates.
    pub nodes: Vec<String>,
    pub relationship: String,
    pub domains: BTreeSet<String>,
    pub confidence: f32,
    /// How many times this relationship was asserted.
    pub observations: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl HyperEdge {
    pub fn source(&self) -> &str {
        &self.nodes[0]
    }

    fn node_set(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(String::as_str).collect()
    }
}

/// A concept reached during expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedConcept {
    pub concept: String,
    /// Hop distance from the nearest seed.
    pub depth: usize,
    /// Domains through which the concept was reached.
    pub domains: BTreeSet<String>,
}

/// A fact connecting expanded concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextFact {
    Triple(Triple),
    HyperEdge(HyperEdge),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedContext {
    /// Breadth-first order; seeds first at depth 0.
    pub concepts: Vec<ExpandedConcept>,
    pub facts: Vec<ContextFact>,
    pub depth_reached: usize,
}

impl ExpandedContext {
    pub fn contains(&self, concept: &str) -> bool {
        self.concepts.iter().any(|c| c.concept == concept)
    }

    pub fn depth_of(&self, concept: &str) -> Option<usize> {
        self.concepts
            .iter()
            .find(|c| c.concept == concept)
            .map(|c| c.depth)
    }
}

#[derive(Debug, Clone)]
enum HyperNode {
    Concept(String),
    Edge(HyperEdgeId),
}

#[derive(Debug, Default)]
struct HyperState {
    graph: UnGraph<HyperNode, ()>,
    concepts: HashMap<String, NodeIndex>,
    edges: BTreeMap<HyperEdgeId, HyperEdge>,
    next_id: u64,
}

impl HyperState {
    fn concept_node(&mut self, concept: &str) -> NodeIndex {
        if let Some(&idx) = self.concepts.get(concept) {
            return idx;
        }
        let idx = self.graph.add_node(HyperNode::Concept(concept.to_string()));
        self.concepts.insert(concept.to_string(), idx);
        idx
    }

    fn link(&mut self, edge: &HyperEdge) {
        let edge_node = self.graph.add_node(HyperNode::Edge(edge.id));
        for concept in &edge.nodes {
            let idx = self.concept_node(concept);
            self.graph.add_edge(idx, edge_node, ());
        }
    }

    /// Hyperedges touching a concept, in id order.
    fn edges_of(&self, concept: &str) -> Vec<&HyperEdge> {
        let Some(&idx) = self.concepts.get(concept) else {
            return Vec::new();
        };
        let mut ids: Vec<HyperEdgeId> = self
            .graph
            .neighbors(idx)
            .filter_map(|n| match &self.graph[n] {
                HyperNode::Edge(id) => Some(*id),
                HyperNode::Concept(_) => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids.iter().filter_map(|id| self.edges.get(id)).collect()
    }
}

/// Hyperedge storage with petgraph adjacency.
pub struct HyperGraph {
    state: RwLock<HyperState>,
    durable: Option<Arc<DurableStore>>,
}

impl HyperGraph {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HyperState {
                next_id: 1,
                ..HyperState::default()
            }),
            durable: None,
        }
    }

    /// Open a graph backed by `durable`, relinking edges in insertion order.
    pub fn open(durable: Arc<DurableStore>) -> NoesisResult<Self> {
        let mut state = HyperState {
            next_id: 1,
            ..HyperState::default()
        };
        let loaded: Vec<(u64, HyperEdge)> = durable.load_all(RecordTable::HyperEdges)?;
        for (raw, edge) in loaded {
            state.next_id = state.next_id.max(raw + 1);
            state.link(&edge);
            state.edges.insert(edge.id, edge);
        }
        tracing::info!(hyperedges = state.edges.len(), "reloaded hypergraph");
        Ok(Self {
            state: RwLock::new(state),
            durable: Some(durable),
        })
    }

    fn read(&self, op: &'static str) -> Result<RwLockReadGuard<'_, HyperState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned { op })
    }

    fn write(&self, op: &'static str) -> Result<RwLockWriteGuard<'_, HyperState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned { op })
    }

    fn persist(&self, edge: &HyperEdge) -> Result<(), StoreError> {
        if let Some(durable) = &self.durable {
            durable.put(RecordTable::HyperEdges, edge.id.get(), edge)?;
        }
        Ok(())
    }

    /// Relate `source` to `targets`. Asserting the same relationship over
    /// the same concepts again reinforces the existing edge (noisy-OR) and
    /// returns its id.
    pub fn connect_domains<S: AsRef<str>, D: AsRef<str>>(
        &self,
        source: &str,
        targets: &[S],
        relationship: &str,
        domains: &[D],
        confidence: f32,
    ) -> NoesisResult<HyperEdgeId> {
        const OP: &str = "connect_domains";
        let mut nodes = vec![non_empty(OP, "source", source)?];
        for target in targets {
            let target = non_empty(OP, "targets", target.as_ref())?;
            if !nodes.contains(&target) {
                nodes.push(target);
            }
        }
        if nodes.len() < 2 {
            return Err(ValidationError::TooFewNodes {
                op: OP,
                count: nodes.len(),
            }
            .into());
        }
        let relationship = non_empty(OP, "relationship", relationship)?;
        check_unit(OP, "confidence", confidence)?;
        let mut domains: BTreeSet<String> = domains
            .iter()
            .map(|d| d.as_ref().trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if domains.is_empty() {
            domains.insert(GENERAL_DOMAIN.to_string());
        }

        let mut state = self.write(OP)?;
        let wanted: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();
        let existing = state
            .edges_of(&nodes[0])
            .into_iter()
            .find(|e| e.relationship == relationship && e.node_set() == wanted)
            .map(|e| e.id);

        if let Some(mut updated) = existing.and_then(|id| state.edges.get(&id)).cloned() {
            let id = updated.id;
            let prior = updated.confidence;
            updated.confidence = (1.0 - (1.0 - prior) * (1.0 - confidence))
                .clamp(0.0, MAX_REINFORCED_CONFIDENCE)
                .max(prior);
            updated.observations += 1;
            updated.domains.extend(domains);
            updated.updated_at = now_millis();
            self.persist(&updated)?;
            tracing::debug!(%id, confidence = updated.confidence, "hyperedge reinforced");
            state.edges.insert(id, updated);
            return Ok(id);
        }

        let raw = state.next_id;
        let id = HyperEdgeId::new(raw).ok_or(StoreError::IdExhausted { op: OP })?;
        let now = now_millis();
        let edge = HyperEdge {
            id,
            nodes,
            relationship,
            domains,
            confidence,
            observations: 1,
            created_at: now,
            updated_at: now,
        };
        self.persist(&edge)?;
        state.link(&edge);
        state.edges.insert(id, edge);
        state.next_id = raw + 1;
        tracing::debug!(%id, "hyperedge created");
        Ok(id)
    }

    pub fn get(&self, id: HyperEdgeId) -> NoesisResult<HyperEdge> {
        const OP: &str = "get_hyperedge";
        self.read(OP)?.edges.get(&id).cloned().ok_or_else(|| {
            StoreError::NotFound {
                op: OP,
                kind: "hyperedge",
                id: id.get(),
            }
            .into()
        })
    }

    /// Hyperedges touching a concept.
    pub fn edges_of(&self, concept: &str) -> NoesisResult<Vec<HyperEdge>> {
        let state = self.read("hyperedges_of")?;
        Ok(state.edges_of(concept.trim()).into_iter().cloned().collect())
    }

    pub fn len(&self) -> NoesisResult<usize> {
        Ok(self.read("count_hyperedges")?.edges.len())
    }

    pub fn is_empty(&self) -> NoesisResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Every hyperedge in insertion order.
    pub fn all(&self) -> NoesisResult<Vec<HyperEdge>> {
        Ok(self
            .read("export_hyperedges")?
            .edges
            .values()
            .cloned()
            .collect())
    }

    /// Breadth-first expansion from `seeds` over hyperedges and stored
    /// triples, at most `max_depth` hops out, ignoring anything below
    /// `min_confidence`. Triples are restricted to `domain` unless it is
    /// empty; hyperedges are followed in every domain.
    pub fn expand_context<S: AsRef<str>>(
        &self,
        kb: &KnowledgeBase,
        seeds: &[S],
        domain: &str,
        max_depth: usize,
        min_confidence: f32,
    ) -> NoesisResult<ExpandedContext> {
        const OP: &str = "expand_context";
        let seeds: Vec<String> = seeds
            .iter()
            .map(|s| non_empty(OP, "seeds", s.as_ref()))
            .collect::<Result<_, _>>()?;
        if seeds.is_empty() {
            return Err(ValidationError::EmptyField { op: OP, field: "seeds" }.into());
        }
        check_unit(OP, "min_confidence", min_confidence)?;
        let domain = domain.trim();
        let seed_domain = if domain.is_empty() { GENERAL_DOMAIN } else { domain };
        let span = tracing::info_span!("expand_context", seeds = seeds.len(), max_depth);
        let _guard = span.enter();

        let mut concepts: Vec<ExpandedConcept> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut facts = Vec::new();
        let mut seen_triples = HashSet::new();
        let mut seen_edges = HashSet::new();

        let mut reach = |concept: &str,
                         via: &str,
                         depth: usize,
                         queue: &mut VecDeque<(String, usize)>| {
            if !visited.insert((concept.to_string(), via.to_string())) {
                return;
            }
            match position.get(concept) {
                Some(&i) => {
                    concepts[i].domains.insert(via.to_string());
                }
                None => {
                    position.insert(concept.to_string(), concepts.len());
                    concepts.push(ExpandedConcept {
                        concept: concept.to_string(),
                        depth,
                        domains: BTreeSet::from([via.to_string()]),
                    });
                    queue.push_back((concept.to_string(), depth));
                }
            }
        };

        for seed in &seeds {
            reach(seed, seed_domain, 0, &mut queue);
        }

        while let Some((concept, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let next = depth + 1;

            let edges: Vec<HyperEdge> = {
                let state = self.read(OP)?;
                state
                    .edges_of(&concept)
                    .into_iter()
                    .filter(|e| e.confidence >= min_confidence)
                    .cloned()
                    .collect()
            };
            for edge in edges {
                for node in edge.nodes.iter().filter(|n| **n != concept) {
                    for d in &edge.domains {
                        reach(node, d, next, &mut queue);
                    }
                }
                if seen_edges.insert(edge.id) {
                    facts.push(ContextFact::HyperEdge(edge));
                }
            }

            let mut outgoing = TripleQuery::new()
                .subject(concept.clone())
                .min_confidence(min_confidence);
            let mut incoming = TripleQuery::new()
                .object(concept.clone())
                .min_confidence(min_confidence);
            if !domain.is_empty() {
                outgoing = outgoing.context(domain);
                incoming = incoming.context(domain);
            }
            let mut triples = kb.fetch_stored(outgoing)?;
            triples.extend(kb.fetch_stored(incoming)?);
            for triple in triples {
                let neighbor = if triple.subject == concept {
                    &triple.object
                } else {
                    &triple.subject
                };
                let via = if triple.metadata.context.is_empty() {
                    GENERAL_DOMAIN
                } else {
                    triple.metadata.context.as_str()
                };
                reach(neighbor, via, next, &mut queue);
                if triple.id.is_some_and(|id| seen_triples.insert(id)) {
                    facts.push(ContextFact::Triple(triple));
                }
            }
        }

        let depth_reached = concepts.iter().map(|c| c.depth).max().unwrap_or(0);
        tracing::info!(concepts = concepts.len(), facts = facts.len(), depth_reached, "context expanded");
        Ok(ExpandedContext {
            concepts,
            facts,
            depth_reached,
        })
    }
}

impl Default for HyperGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HyperGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperGraph")
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewTriple;
    use crate::kb::test_kb;

    #[test]
    fn connect_validates_input() {
        let graph = HyperGraph::new();
        let err = graph
            .connect_domains::<&str, &str>("a", &["a"], "relates", &[], 0.8)
            .unwrap_err();
        assert!(err.to_string().contains("at least 2 distinct nodes"));
        assert!(graph
            .connect_domains("a", &["b"], " ", &["x"], 0.8)
            .unwrap_err()
            .is_validation());
        assert!(graph
            .connect_domains("a", &["b"], "r", &["x"], 1.2)
            .unwrap_err()
            .is_validation());
        assert!(graph.is_empty().unwrap());
    }

    #[test]
    fn reobservation_reinforces_the_same_edge() {
        let graph = HyperGraph::new();
        let first = graph
            .connect_domains("cache", &["latency", "memory"], "trades_off", &["ops"], 0.5)
            .unwrap();
        let again = graph
            .connect_domains("cache", &["memory", "latency"], "trades_off", &["perf"], 0.5)
            .unwrap();
        assert_eq!(first, again);
        let edge = graph.get(first).unwrap();
        assert!((edge.confidence - 0.75).abs() < 1e-6);
        assert_eq!(edge.observations, 2);
        assert_eq!(edge.domains.len(), 2);
        assert_eq!(edge.source(), "cache");

        let other = graph
            .connect_domains("cache", &["latency"], "trades_off", &["ops"], 0.5)
            .unwrap();
        assert_ne!(other, first);
        assert_eq!(graph.edges_of("latency").unwrap().len(), 2);
    }

    #[test]
    fn expansion_respects_depth_and_confidence() {
        let kb = test_kb();
        let graph = HyperGraph::new();
        graph
            .connect_domains("a", &["b"], "links", &["x"], 0.9)
            .unwrap();
        graph
            .connect_domains("b", &["c"], "links", &["y"], 0.9)
            .unwrap();
        graph
            .connect_domains("a", &["weak"], "links", &["x"], 0.2)
            .unwrap();
        kb.add_triple(NewTriple::new("c", "part_of", "d").with_confidence(0.9))
            .unwrap();

        let ctx = graph.expand_context(&kb, &["a"], "", 2, 0.6).unwrap();
        assert_eq!(ctx.depth_of("a"), Some(0));
        assert_eq!(ctx.depth_of("b"), Some(1));
        assert_eq!(ctx.depth_of("c"), Some(2));
        assert!(!ctx.contains("d"));
        assert!(!ctx.contains("weak"));
        assert_eq!(ctx.depth_reached, 2);
        assert!(ctx.concepts.iter().all(|c| c.depth <= 2));

        let deeper = graph.expand_context(&kb, &["a"], "", 3, 0.6).unwrap();
        assert_eq!(deeper.depth_of("d"), Some(3));
        assert!(deeper
            .facts
            .iter()
            .any(|f| matches!(f, ContextFact::Triple(t) if t.subject == "c")));
    }

    #[test]
    fn cycles_terminate() {
        let kb = test_kb();
        let graph = HyperGraph::new();
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "a")] {
            graph.connect_domains(s, &[t], "next", &["loop"], 0.9).unwrap();
        }
        let ctx = graph.expand_context(&kb, &["a"], "", 10, 0.5).unwrap();
        assert_eq!(ctx.concepts.len(), 3);
        assert_eq!(ctx.facts.len(), 3);
        assert_eq!(ctx.depth_reached, 1);
    }

    #[test]
    fn triples_respect_the_domain() {
        let kb = test_kb();
        let graph = HyperGraph::new();
        kb.add_triple(NewTriple::new("db", "uses", "disk").with_context("ops"))
            .unwrap();
        kb.add_triple(NewTriple::new("db", "owned_by", "team").with_context("org"))
            .unwrap();
        let ctx = graph.expand_context(&kb, &["db"], "ops", 2, 0.5).unwrap();
        assert!(ctx.contains("disk"));
        assert!(!ctx.contains("team"));
        assert!(graph
            .expand_context::<&str>(&kb, &[], "ops", 2, 0.5)
            .unwrap_err()
            .is_validation());
    }
}
