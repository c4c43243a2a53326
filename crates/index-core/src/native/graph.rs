//! Quantized graph: a neighbor graph navigated with PQ distances.
//!
//! Objects are appended first and indexed by an explicit `build`, in the
//! style of NGT's QBG:
//! 1. `add_with_ids` stores raw objects
//! 2. `build` trains the product quantizer on them, encodes every object and
//!    inserts each one in a seeded random order, linking it to its
//!    `out_degree` nearest linked objects with back edges
//! 3. Objects added after `build` are encoded and linked by a beam search
//!
//! Search runs a beam search scored with ADC, then reranks the beam with
//! exact distances on the stored objects. Removal leaves a tombstone that
//! is still traversed but never returned; `build` compacts tombstones away.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::{GraphParams, IndexDescriptor, MetricType, TrainParams};
use crate::distance::{distance_fn, squared_l2_distance};
use crate::error::{NativeError, NativeResult};
use crate::{Neighbor, VectorBatch, VectorId};

use super::pq::ProductQuantizer;
use super::{check_add, check_code_len, check_width, inconsistent, top_k, LiveToken, NativeIndex};

/// Beam entry ordered by distance, then node.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    node: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node.cmp(&other.node))
    }
}

/// Neighbor graph over product-quantized objects.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuantizedGraphIndex {
    dim: usize,
    metric: MetricType,
    params: GraphParams,
    train_params: TrainParams,
    pq: ProductQuantizer,
    ids: Vec<VectorId>,
    /// Raw objects, `dim` floats per node.
    vectors: Vec<f32>,
    /// `code_size` bytes per node once built.
    codes: Vec<u8>,
    neighbors: Vec<Vec<usize>>,
    deleted: Vec<bool>,
    entry: Option<usize>,
    built: bool,
    active: usize,
    #[serde(skip)]
    _live: LiveToken,
}

impl QuantizedGraphIndex {
    pub fn new(descriptor: &IndexDescriptor) -> NativeResult<Self> {
        let pq = ProductQuantizer::new(descriptor.dimension, descriptor.subvectors, descriptor.bits_per_code)?;
        if descriptor.graph.out_degree == 0 {
            return Err(NativeError::IndexError("out_degree must be positive".to_string()));
        }
        Ok(Self {
            dim: descriptor.dimension,
            metric: descriptor.metric,
            params: descriptor.graph,
            train_params: descriptor.train,
            pq,
            ids: Vec::new(),
            vectors: Vec::new(),
            codes: Vec::new(),
            neighbors: Vec::new(),
            deleted: Vec::new(),
            entry: None,
            built: false,
            active: 0,
            _live: LiveToken::default(),
        })
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn params(&self) -> GraphParams {
        self.params
    }

    fn vector(&self, node: usize) -> &[f32] {
        &self.vectors[node * self.dim..(node + 1) * self.dim]
    }

    fn code(&self, node: usize) -> &[u8] {
        let size = self.pq.code_size();
        &self.codes[node * size..(node + 1) * size]
    }

    /// Train the quantizer and link every stored object.
    ///
    /// Tombstoned objects are dropped first. Calling `build` again rebuilds
    /// from the surviving objects.
    pub fn build(&mut self) -> NativeResult<()> {
        if self.active == 0 {
            return Err(NativeError::EmptyInput);
        }

        let (ids, vectors) = self.surviving_objects();
        let points: Vec<&[f32]> = vectors.chunks_exact(self.dim).collect();
        let pq = self.pq.fit(&points, self.train_params)?;

        let codes: Vec<u8> = points.par_iter().flat_map_iter(|p| pq.encode(p)).collect();
        let neighbors = self.link_all(&points);
        let entry = medoid(&points);

        tracing::debug!(
            objects = points.len(),
            out_degree = self.params.out_degree,
            entry,
            "built quantized graph"
        );

        self.deleted = vec![false; ids.len()];
        self.active = ids.len();
        self.ids = ids;
        self.vectors = vectors;
        self.codes = codes;
        self.neighbors = neighbors;
        self.entry = Some(entry);
        self.pq = pq;
        self.built = true;
        Ok(())
    }

    fn surviving_objects(&self) -> (Vec<VectorId>, Vec<f32>) {
        let mut ids = Vec::with_capacity(self.active);
        let mut vectors = Vec::with_capacity(self.active * self.dim);
        for node in 0..self.ids.len() {
            if !self.deleted[node] {
                ids.push(self.ids[node]);
                vectors.extend_from_slice(self.vector(node));
            }
        }
        (ids, vectors)
    }

    /// Insert every object in a seeded random order, linking each one to
    /// its nearest already-linked objects.
    fn link_all(&self, points: &[&[f32]]) -> Vec<Vec<usize>> {
        let dist = distance_fn(self.metric);
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.train_params.seed));

        let mut neighbors = vec![Vec::new(); points.len()];
        let entry = order[0];
        for &node in &order[1..] {
            let beam = beam_search(
                &neighbors,
                entry,
                |other| dist(points[node], points[other]),
                self.params.insert_breadth,
                |_| false,
            );
            link(&mut neighbors, node, &beam, self.params.out_degree);
        }
        neighbors
    }

    /// Encode and link one object inserted after build.
    fn insert_node(&mut self, vector: &[f32], id: VectorId) {
        let dist = distance_fn(self.metric);
        let beam = match self.entry {
            Some(entry) => beam_search(
                &self.neighbors,
                entry,
                |node| dist(vector, self.vector(node)),
                self.params.insert_breadth,
                |_| false,
            ),
            None => Vec::new(),
        };

        let node = self.ids.len();
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
        let code = self.pq.encode(vector);
        self.codes.extend_from_slice(&code);
        self.deleted.push(false);
        self.neighbors.push(Vec::new());
        link(&mut self.neighbors, node, &beam, self.params.out_degree);

        self.entry.get_or_insert(node);
        self.active += 1;
    }

    fn search_one(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbor<f32>> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let table = self.pq.distance_table(query, self.metric);
        let beam = beam_search(
            &self.neighbors,
            entry,
            |node| self.pq.table_distance(&table, self.code(node)),
            ef,
            |node| self.deleted[node],
        );

        let dist = distance_fn(self.metric);
        let hits = beam
            .into_iter()
            .map(|c| Neighbor::new(self.ids[c.node], dist(query, self.vector(c.node))))
            .collect();
        top_k(hits, k)
    }
}

/// Connect `node` to the first `degree` entries of `beam`, with back edges
/// capped at twice the degree. The nearest entry always gets its back edge,
/// so every linked node stays reachable.
fn link(neighbors: &mut [Vec<usize>], node: usize, beam: &[Candidate], degree: usize) {
    let links: Vec<usize> = beam.iter().take(degree).map(|c| c.node).collect();
    for (rank, &other) in links.iter().enumerate() {
        if rank == 0 || neighbors[other].len() < degree * 2 {
            neighbors[other].push(node);
        }
    }
    neighbors[node] = links;
}

/// Best-first search from `entry`, keeping a beam of `ef`.
///
/// Nodes matching `hidden` are traversed but kept out of the returned beam.
fn beam_search<F, H>(neighbors: &[Vec<usize>], entry: usize, distance: F, ef: usize, hidden: H) -> Vec<Candidate>
where
    F: Fn(usize) -> f32,
    H: Fn(usize) -> bool,
{
    let ef = ef.max(1);
    let mut visited = vec![false; neighbors.len()];
    let mut frontier = BinaryHeap::new();
    let mut beam: BinaryHeap<Candidate> = BinaryHeap::new();

    let start = Candidate {
        distance: distance(entry),
        node: entry,
    };
    visited[entry] = true;
    frontier.push(Reverse(start));
    if !hidden(entry) {
        beam.push(start);
    }

    while let Some(Reverse(current)) = frontier.pop() {
        if beam.len() >= ef && beam.peek().is_some_and(|worst| current.distance > worst.distance) {
            break;
        }
        for &next in &neighbors[current.node] {
            if visited[next] {
                continue;
            }
            visited[next] = true;

            let candidate = Candidate {
                distance: distance(next),
                node: next,
            };
            let improves = beam.len() < ef || beam.peek().is_some_and(|worst| candidate.distance < worst.distance);
            if !improves {
                continue;
            }
            frontier.push(Reverse(candidate));
            if !hidden(next) {
                beam.push(candidate);
                if beam.len() > ef {
                    beam.pop();
                }
            }
        }
    }

    beam.into_sorted_vec()
}

/// Node nearest to the centroid of `points` under squared L2.
fn medoid(points: &[&[f32]]) -> usize {
    let dim = points.first().map_or(0, |p| p.len());
    let mut mean = vec![0.0f32; dim];
    for p in points {
        for (m, &x) in mean.iter_mut().zip(p.iter()) {
            *m += x;
        }
    }
    let n = points.len().max(1) as f32;
    mean.iter_mut().for_each(|m| *m /= n);

    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, squared_l2_distance(p, &mean)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

impl NativeIndex for QuantizedGraphIndex {
    type Distance = f32;

    fn dimension(&self) -> usize {
        self.dim
    }

    fn ntotal(&self) -> usize {
        self.active
    }

    fn is_trained(&self) -> bool {
        self.built
    }

    fn add_with_ids(&mut self, vectors: VectorBatch<'_>, ids: &[VectorId]) -> NativeResult<usize> {
        check_add(self.dim, &vectors, ids)?;

        if self.built {
            for (vector, &id) in vectors.rows().zip(ids) {
                self.insert_node(vector, id);
            }
        } else {
            self.ids.extend_from_slice(ids);
            self.vectors.extend_from_slice(&vectors);
            self.deleted.resize(self.ids.len(), false);
            self.active += ids.len();
        }
        Ok(self.active)
    }

    fn remove_ids(&mut self, ids: &[VectorId]) -> NativeResult<usize> {
        let targets: HashSet<VectorId> = ids.iter().copied().collect();
        let mut removed = 0;
        for (node, id) in self.ids.iter().enumerate() {
            if !self.deleted[node] && targets.contains(id) {
                self.deleted[node] = true;
                removed += 1;
            }
        }
        self.active -= removed;
        Ok(removed)
    }

    fn search(
        &self,
        queries: VectorBatch<'_>,
        k: usize,
        breadth: Option<usize>,
    ) -> NativeResult<Vec<Vec<Neighbor<f32>>>> {
        check_width(self.dim, &queries)?;
        if !self.built {
            return Err(NativeError::NotBuilt);
        }
        let ef = breadth.unwrap_or(self.params.search_breadth).max(k);

        Ok(queries
            .rows()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|q| self.search_one(q, k, ef))
            .collect())
    }

    /// The raw stored object. Available before `build` too.
    fn reconstruct(&self, id: VectorId) -> NativeResult<Vec<f32>> {
        (0..self.ids.len())
            .find(|&node| !self.deleted[node] && self.ids[node] == id)
            .map(|node| self.vector(node).to_vec())
            .ok_or(NativeError::IdNotFound(id))
    }

    fn validate(&self) -> NativeResult<()> {
        if self.dim == 0 || self.params.out_degree == 0 {
            return Err(inconsistent("graph width and out_degree must be positive"));
        }
        self.pq.validate(self.dim)?;

        let nodes = self.ids.len();
        if Some(self.vectors.len()) != nodes.checked_mul(self.dim) || self.deleted.len() != nodes {
            return Err(inconsistent(format!(
                "{nodes} ids with {} vector components and {} tombstone flags",
                self.vectors.len(),
                self.deleted.len()
            )));
        }
        let live = self.deleted.iter().filter(|&&d| !d).count();
        if live != self.active {
            return Err(inconsistent(format!("{live} live objects, ntotal is {}", self.active)));
        }

        if !self.built {
            if !self.codes.is_empty() || !self.neighbors.is_empty() || self.entry.is_some() {
                return Err(inconsistent("unbuilt graph carries codes or edges"));
            }
            return Ok(());
        }

        if !self.pq.is_trained() {
            return Err(inconsistent("built graph has an untrained quantizer"));
        }
        check_code_len("graph", &self.codes, nodes, self.pq.code_size())?;
        self.pq.validate_codes(&self.codes)?;
        if self.neighbors.len() != nodes {
            return Err(inconsistent(format!("{} adjacency lists for {nodes} nodes", self.neighbors.len())));
        }
        if let Some(bad) = self.neighbors.iter().flatten().find(|&&n| n >= nodes) {
            return Err(inconsistent(format!("edge to node {bad} of {nodes}")));
        }
        match self.entry {
            Some(entry) if entry < nodes => Ok(()),
            entry => Err(inconsistent(format!("entry {entry:?} outside {nodes} nodes"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four separated clusters of distinct points.
    fn clustered(n_per_cluster: usize) -> Vec<f32> {
        let mut data = Vec::new();
        for cluster in 0..4 {
            for i in 0..n_per_cluster {
                for d in 0..4 {
                    let base = if d == cluster { 20.0 } else { 0.0 };
                    data.push(base + i as f32 * 0.1 + d as f32 * 0.01);
                }
            }
        }
        data
    }

    fn flood(neighbors: &[Vec<usize>], start: usize) -> Vec<bool> {
        let mut reached = vec![false; neighbors.len()];
        let mut stack = vec![start];
        reached[start] = true;
        while let Some(node) = stack.pop() {
            for &next in &neighbors[node] {
                if !reached[next] {
                    reached[next] = true;
                    stack.push(next);
                }
            }
        }
        reached
    }

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor::quantized_graph(4, 2, 4, MetricType::L2).with_graph_params(GraphParams::fast())
    }

    #[test]
    fn test_search_before_build() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(10);
        let batch = VectorBatch::new(&data, 4).unwrap();
        let ids: Vec<VectorId> = (0..40).collect();
        assert_eq!(index.add_with_ids(batch, &ids).unwrap(), 40);
        assert!(!index.is_trained());

        let err = index.search(VectorBatch::new(batch.row(0), 4).unwrap(), 1, None).unwrap_err();
        assert_eq!(err, NativeError::NotBuilt);
    }

    #[test]
    fn test_build_needs_objects() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        assert_eq!(index.build(), Err(NativeError::EmptyInput));

        let data = clustered(2);
        let ids: Vec<VectorId> = (0..8).collect();
        index.add_with_ids(VectorBatch::new(&data, 4).unwrap(), &ids).unwrap();
        assert!(matches!(
            index.build(),
            Err(NativeError::InsufficientTrainingData { need: 16, got: 8 })
        ));
        assert!(!index.is_built());
    }

    #[test]
    fn test_build_and_search() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(30);
        let batch = VectorBatch::new(&data, 4).unwrap();
        let ids: Vec<VectorId> = (100..220).collect();
        index.add_with_ids(batch, &ids).unwrap();
        index.build().unwrap();

        let query = batch.row(65).to_vec();
        let results = index.search(VectorBatch::new(&query, 4).unwrap(), 5, Some(40)).unwrap();
        assert_eq!(results[0].len(), 5);
        assert_eq!(results[0][0].id, 165);
        assert_eq!(results[0][0].distance, 0.0);
        for n in &results[0] {
            assert!((160..190).contains(&n.id), "expected cluster 2, got {}", n.id);
        }
    }

    #[test]
    fn test_graph_is_connected() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(30);
        let ids: Vec<VectorId> = (0..120).collect();
        index.add_with_ids(VectorBatch::new(&data, 4).unwrap(), &ids).unwrap();
        index.build().unwrap();

        let reached = flood(&index.neighbors, index.entry.unwrap());
        assert!(reached.iter().all(|&r| r));
    }

    #[test]
    fn test_add_after_build_is_searchable() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(30);
        let ids: Vec<VectorId> = (0..120).collect();
        index.add_with_ids(VectorBatch::new(&data, 4).unwrap(), &ids).unwrap();
        index.build().unwrap();

        let extra = [20.0, 1.0, 2.0, 0.0];
        assert_eq!(index.add_with_ids(VectorBatch::new(&extra, 4).unwrap(), &[999]).unwrap(), 121);

        let results = index.search(VectorBatch::new(&extra, 4).unwrap(), 1, Some(60)).unwrap();
        assert_eq!(results[0][0].id, 999);
    }

    #[test]
    fn test_removed_ids_are_never_returned() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(30);
        let batch = VectorBatch::new(&data, 4).unwrap();
        let ids: Vec<VectorId> = (0..120).collect();
        index.add_with_ids(batch, &ids).unwrap();
        index.build().unwrap();

        let removed: Vec<VectorId> = (0..30).collect();
        assert_eq!(index.remove_ids(&removed).unwrap(), 30);
        assert_eq!(index.remove_ids(&removed).unwrap(), 0);
        assert_eq!(index.ntotal(), 90);

        let query = batch.row(0).to_vec();
        let results = index.search(VectorBatch::new(&query, 4).unwrap(), 10, Some(120)).unwrap();
        assert_eq!(results[0].len(), 10);
        assert!(results[0].iter().all(|n| n.id >= 30));

        index.build().unwrap();
        assert_eq!(index.ids.len(), 90);
    }

    #[test]
    fn test_reconstruct_returns_raw_object() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(10);
        let batch = VectorBatch::new(&data, 4).unwrap();
        let ids: Vec<VectorId> = (0..40).collect();
        index.add_with_ids(batch, &ids).unwrap();

        assert_eq!(index.reconstruct(12).unwrap(), batch.row(12));
        index.build().unwrap();
        assert_eq!(index.reconstruct(12).unwrap(), batch.row(12));

        index.remove_ids(&[12]).unwrap();
        assert_eq!(index.reconstruct(12), Err(NativeError::IdNotFound(12)));
    }

    #[test]
    fn test_validate_rejects_dangling_edges() {
        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(10);
        let ids: Vec<VectorId> = (0..40).collect();
        index.add_with_ids(VectorBatch::new(&data, 4).unwrap(), &ids).unwrap();
        assert!(index.validate().is_ok());
        index.build().unwrap();
        assert!(index.validate().is_ok());

        let entry = index.entry.unwrap();
        index.neighbors[entry].push(9999);
        assert!(matches!(index.validate(), Err(NativeError::Inconsistent(_))));
    }

    #[test]
    fn test_corrupt_graph_file_fails_to_load() {
        use crate::error::HandleError;
        use crate::handle::NativeKind;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.index");

        let mut index = QuantizedGraphIndex::new(&descriptor()).unwrap();
        let data = clustered(10);
        let ids: Vec<VectorId> = (0..40).collect();
        index.add_with_ids(VectorBatch::new(&data, 4).unwrap(), &ids).unwrap();
        index.build().unwrap();
        let entry = index.entry.unwrap();
        index.neighbors[entry].push(9999);

        crate::persist::write_index(&path, &NativeKind::QuantizedGraph(Box::new(index))).unwrap();
        let err = crate::persist::read_index(&path, crate::MethodType::QuantizedGraph).unwrap_err();
        assert!(matches!(err, HandleError::FormatMismatch { .. }), "{err}");
    }
}
