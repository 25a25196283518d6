//! Density-based clustering (HDBSCAN) over precomputed cosine distances.
//!
//! # Algorithm Details
//! 1. Core distance of each point: distance to its `min_samples`-th nearest
//!    other point (sorted row index `min_samples`, where index 0 is the
//!    point itself), capped at the farthest point for small inputs.
//! 2. Mutual reachability: `max(core[a], core[b], d(a, b))`.
//! 3. Minimum spanning tree over mutual reachability (dense Prim, O(n²)).
//! 4. Single-linkage dendrogram from the sorted MST edges.
//! 5. Condensed tree: splits where both sides hold at least
//!    `min_cluster_size` points create two new clusters; smaller sides
//!    fall out of their parent cluster as points.
//! 6. Excess-of-mass selection, with the root never selectable.
//! 7. Optional epsilon selection: clusters born below
//!    `cluster_selection_epsilon` are replaced by their nearest ancestor
//!    born at or above it.
//!
//! Points not inside any selected cluster are labeled [`ClusterLabel::NOISE`].

use std::collections::VecDeque;

use tracing::debug;

use crate::cluster::{ClusterMap, UnionFind};
use crate::error::{ClusterError, ClusterResult};
use crate::vector::{ClusterLabel, DistanceMatrix, EmbeddingSet, pairwise_distance_matrix};

/// Distances below this are treated as this value when taking `1 / d`.
const MIN_DISTANCE: f64 = 1e-12;

/// Parameters for the density policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityParams {
    pub min_cluster_size: usize,
    /// Defaults to `min_cluster_size` when `None`.
    pub min_samples: Option<usize>,
    pub cluster_selection_epsilon: f64,
}

impl Default for DensityParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            min_samples: None,
            cluster_selection_epsilon: 0.0,
        }
    }
}

impl DensityParams {
    pub fn validate(&self) -> ClusterResult<()> {
        if self.min_cluster_size < 2 {
            return Err(ClusterError::Config {
                reason: format!(
                    "min_cluster_size must be at least 2, got {}",
                    self.min_cluster_size
                ),
            });
        }
        if self.min_samples == Some(0) {
            return Err(ClusterError::Config {
                reason: "min_samples must be at least 1".to_string(),
            });
        }
        if !self.cluster_selection_epsilon.is_finite() || self.cluster_selection_epsilon < 0.0 {
            return Err(ClusterError::Config {
                reason: format!(
                    "cluster_selection_epsilon must be non-negative, got {}",
                    self.cluster_selection_epsilon
                ),
            });
        }
        Ok(())
    }
}

/// Clusters `set` with HDBSCAN over cosine distances.
///
/// Every image appears in the result, unassigned ones under the noise label.
pub fn density_clusters(set: &EmbeddingSet, params: &DensityParams) -> ClusterResult<ClusterMap> {
    params.validate()?;
    let distances = pairwise_distance_matrix(&set.vectors());
    let labels = hdbscan(&distances, params)?;

    let mut map = ClusterMap::new();
    for (id, label) in set.ids().into_iter().zip(labels) {
        map.insert(label, id);
    }
    Ok(map)
}

/// Labels each row of `distances`. Cluster labels are `0..k`, noise is `-1`.
pub fn hdbscan(distances: &DistanceMatrix, params: &DensityParams) -> ClusterResult<Vec<ClusterLabel>> {
    params.validate()?;
    let n = distances.len();
    if n < 2 {
        return Ok(vec![ClusterLabel::NOISE; n]);
    }

    let min_samples = params.min_samples.unwrap_or(params.min_cluster_size);
    let core = core_distances(distances, min_samples);
    let mst = minimum_spanning_tree(distances, &core);
    let dendrogram = Dendrogram::single_linkage(n, mst);
    let tree = CondensedTree::build(&dendrogram, params.min_cluster_size);

    let mut selected = tree.select_excess_of_mass();
    if params.cluster_selection_epsilon > 0.0 {
        selected = tree.select_epsilon(&selected, params.cluster_selection_epsilon);
    }

    let labels = tree.label_points(&selected);
    debug!(
        "HDBSCAN selected {} clusters, {} noise points out of {}",
        selected.iter().filter(|&&s| s).count(),
        labels.iter().filter(|l| l.is_noise()).count(),
        n
    );
    Ok(labels)
}

fn core_distances(distances: &DistanceMatrix, min_samples: usize) -> Vec<f64> {
    let n = distances.len();
    let kth = min_samples.min(n - 1);
    (0..n)
        .map(|i| {
            let mut row = distances.row(i).to_vec();
            row.select_nth_unstable_by(kth, f64::total_cmp);
            row[kth]
        })
        .collect()
}

/// Prim's algorithm over the dense mutual reachability graph.
///
/// Returns `n - 1` edges `(in_tree, added, weight)` sorted by weight.
fn minimum_spanning_tree(distances: &DistanceMatrix, core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.len();
    let reachability = |a: usize, b: usize| distances.get(a, b).max(core[a]).max(core[b]);

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[current] = true;
    for _ in 1..n {
        for other in 0..n {
            if in_tree[other] {
                continue;
            }
            let weight = reachability(current, other);
            if weight < best[other] {
                best[other] = weight;
                from[other] = current;
            }
        }

        let mut next = usize::MAX;
        let mut next_weight = f64::INFINITY;
        for other in 0..n {
            if !in_tree[other] && (next == usize::MAX || best[other] < next_weight) {
                next = other;
                next_weight = best[other];
            }
        }

        in_tree[next] = true;
        edges.push((from[next], next, next_weight));
        current = next;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

/// Binary merge tree. Nodes `0..n` are points, `n..2n-1` are merges.
struct Dendrogram {
    points: usize,
    children: Vec<(usize, usize)>,
    distance: Vec<f64>,
    size: Vec<usize>,
}

impl Dendrogram {
    fn single_linkage(points: usize, edges: Vec<(usize, usize, f64)>) -> Self {
        let mut sets = UnionFind::new(points);
        let mut node_of_set: Vec<usize> = (0..points).collect();
        let mut size = vec![1usize; points];
        let mut children = Vec::with_capacity(points - 1);
        let mut distance = Vec::with_capacity(points - 1);

        for (a, b, weight) in edges {
            let (root_a, root_b) = (sets.find(a), sets.find(b));
            let (left, right) = (node_of_set[root_a], node_of_set[root_b]);
            let node = points + children.len();

            children.push((left, right));
            distance.push(weight);
            size.push(size[left] + size[right]);

            let root = sets.union(root_a, root_b);
            node_of_set[root] = node;
        }

        Self {
            points,
            children,
            distance,
            size,
        }
    }

    fn root(&self) -> usize {
        self.points + self.children.len() - 1
    }

    fn split(&self, node: usize) -> (usize, usize, f64) {
        let (left, right) = self.children[node - self.points];
        (left, right, self.distance[node - self.points])
    }

    fn leaves(&self, node: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current < self.points {
                leaves.push(current);
            } else {
                let (left, right) = self.children[current - self.points];
                stack.push(right);
                stack.push(left);
            }
        }
        leaves
    }
}

#[derive(Debug)]
struct CondensedCluster {
    parent: Option<usize>,
    children: Vec<usize>,
    /// Distance of the split that created this cluster (infinite for the root).
    birth_distance: f64,
    birth_lambda: f64,
    size: usize,
}

/// Condensed cluster tree. Cluster `0` is the root; children always have
/// larger ids than their parents.
struct CondensedTree {
    clusters: Vec<CondensedCluster>,
    /// For each point, the cluster it fell out of and the lambda at which it did.
    exits: Vec<(usize, f64)>,
}

impl CondensedTree {
    fn build(dendrogram: &Dendrogram, min_cluster_size: usize) -> Self {
        let mut clusters = vec![CondensedCluster {
            parent: None,
            children: Vec::new(),
            birth_distance: f64::INFINITY,
            birth_lambda: 0.0,
            size: dendrogram.points,
        }];
        let mut exits = vec![(0usize, 0.0f64); dendrogram.points];

        let mut queue = VecDeque::from([(dendrogram.root(), 0usize)]);
        while let Some((node, cluster)) = queue.pop_front() {
            let (left, right, distance) = dendrogram.split(node);
            let lambda = 1.0 / distance.max(MIN_DISTANCE);
            let left_big = dendrogram.size[left] >= min_cluster_size;
            let right_big = dendrogram.size[right] >= min_cluster_size;

            let mut fall_out = |child: usize| {
                for point in dendrogram.leaves(child) {
                    exits[point] = (cluster, lambda);
                }
            };

            match (left_big, right_big) {
                (true, true) => {
                    for child in [left, right] {
                        let id = clusters.len();
                        clusters.push(CondensedCluster {
                            parent: Some(cluster),
                            children: Vec::new(),
                            birth_distance: distance,
                            birth_lambda: lambda,
                            size: dendrogram.size[child],
                        });
                        clusters[cluster].children.push(id);
                        queue.push_back((child, id));
                    }
                }
                (true, false) => {
                    fall_out(right);
                    queue.push_back((left, cluster));
                }
                (false, true) => {
                    fall_out(left);
                    queue.push_back((right, cluster));
                }
                (false, false) => {
                    fall_out(left);
                    fall_out(right);
                }
            }
        }

        Self { clusters, exits }
    }

    /// Sum over members of how long they persisted after the cluster's birth.
    fn stabilities(&self) -> Vec<f64> {
        let mut stability = vec![0.0f64; self.clusters.len()];
        for &(cluster, lambda) in &self.exits {
            stability[cluster] += lambda - self.clusters[cluster].birth_lambda;
        }
        for (id, node) in self.clusters.iter().enumerate() {
            if let Some(parent) = node.parent {
                let persisted = node.birth_lambda - self.clusters[parent].birth_lambda;
                stability[parent] += persisted * self.clusters[id].size as f64;
            }
        }
        stability
    }

    fn select_excess_of_mass(&self) -> Vec<bool> {
        let mut stability = self.stabilities();
        let mut selected = vec![false; self.clusters.len()];

        for id in (1..self.clusters.len()).rev() {
            let subtree: f64 = self.clusters[id]
                .children
                .iter()
                .map(|&child| stability[child])
                .sum();
            if subtree > stability[id] {
                stability[id] = subtree;
            } else {
                selected[id] = true;
                for descendant in self.descendants(id) {
                    selected[descendant] = false;
                }
            }
        }
        selected
    }

    fn select_epsilon(&self, selected: &[bool], epsilon: f64) -> Vec<bool> {
        let mut result = vec![false; self.clusters.len()];
        let mut processed = vec![false; self.clusters.len()];

        for id in (0..self.clusters.len()).filter(|&id| selected[id]) {
            if processed[id] {
                continue;
            }
            let chosen = if self.clusters[id].birth_distance < epsilon {
                self.ancestor_born_above(id, epsilon)
            } else {
                id
            };
            result[chosen] = true;
            for descendant in self.descendants(chosen) {
                processed[descendant] = true;
            }
        }

        // A raised cluster absorbs anything already chosen beneath it
        for id in 0..self.clusters.len() {
            if result[id] {
                for descendant in self.descendants(id) {
                    result[descendant] = false;
                }
            }
        }
        result
    }

    /// First ancestor of `id` born at a distance above `epsilon`, never the root.
    fn ancestor_born_above(&self, id: usize, epsilon: f64) -> usize {
        let mut current = id;
        loop {
            match self.clusters[current].parent {
                Some(parent) if self.clusters[parent].parent.is_some() => {
                    if self.clusters[parent].birth_distance > epsilon {
                        return parent;
                    }
                    current = parent;
                }
                _ => return current,
            }
        }
    }

    fn descendants(&self, id: usize) -> Vec<usize> {
        let mut found = Vec::new();
        let mut stack = self.clusters[id].children.clone();
        while let Some(current) = stack.pop() {
            found.push(current);
            stack.extend(self.clusters[current].children.iter().copied());
        }
        found
    }

    /// Labels each point by its nearest selected ancestor, renumbered `0..k`
    /// in cluster id order.
    fn label_points(&self, selected: &[bool]) -> Vec<ClusterLabel> {
        let mut renumbered = vec![None; self.clusters.len()];
        let mut next = 0i64;
        for id in 0..self.clusters.len() {
            if selected[id] {
                renumbered[id] = Some(ClusterLabel::new(next));
                next += 1;
            }
        }

        self.exits
            .iter()
            .map(|&(cluster, _)| {
                let mut current = Some(cluster);
                while let Some(id) = current {
                    if let Some(label) = renumbered[id] {
                        return label;
                    }
                    current = self.clusters[id].parent;
                }
                ClusterLabel::NOISE
            })
            .collect()
    }
}
