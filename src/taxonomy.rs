//! Ingredient taxonomy as an arena of parallel arrays.
//!
//! The hierarchy (base spirit → sub-style → brand) arrives as a flat table of
//! `(id, parent_id, weight)` rows. It is stored indexed by the dense registry
//! index:
//!
//! - `parent[i]`: parent index, `None` for roots
//! - `weight[i]`: weight of the edge from `i` to its parent (for roots, the edge
//!   to an implicit super-root joining the forest)
//! - `depth[i]`: number of edges from the root of `i`'s tree
//! - `ancestors[i]`: chain from the root down to `i`, inclusive
//!
//! Distances are tree-metric: sum of edge weights on the path through the lowest
//! common ancestor. Nodes in different trees meet at the super-root.
//!
//! # Examples
//!
//! ```
//! use cocktailspace::taxonomy::{IngredientNode, IngredientTree};
//!
//! let nodes = vec![
//!     IngredientNode::new(1, None, Some(1.0)),
//!     IngredientNode::new(2, Some(1), Some(0.5)),
//!     IngredientNode::new(3, Some(2), Some(0.2)),
//! ];
//! let tree = IngredientTree::build(&nodes, 1.0).unwrap();
//! assert!((tree.distance(0, 2) - 0.7).abs() < 1e-12);
//! ```

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};
use crate::registry::IndexRegistry;
use crate::EntityId;

/// One row of the ingredient table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngredientNode {
    pub id: EntityId,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    /// Substitutability cost of the edge to the parent; null takes the configured default.
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IngredientNode {
    pub fn new(id: EntityId, parent_id: Option<EntityId>, weight: Option<f64>) -> Self {
        Self {
            id,
            parent_id,
            weight,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct IngredientTree {
    pub registry: IndexRegistry<EntityId>,
    pub parent: Vec<Option<usize>>,
    pub weight: Vec<f64>,
    pub depth: Vec<usize>,
    pub ancestors: Vec<Vec<usize>>,
    pub names: Vec<Option<String>>,
}

impl IngredientTree {
    /// Build the arena from the flat ingredient table.
    ///
    /// Fails with `UnknownParent` if a parent id is not in the table and with
    /// `CyclicHierarchy` if following parents does not reach a root within `n` hops.
    /// Negative or non-finite weights are rejected as configuration errors.
    pub fn build(nodes: &[IngredientNode], default_weight: f64) -> Result<Self> {
        if nodes.is_empty() {
            return Err(SimilarityError::EmptyTaxonomy);
        }
        info!("Building ingredient tree from {} nodes", nodes.len());

        let registry = IndexRegistry::from_ids(nodes.iter().map(|n| n.id))
            .map_err(SimilarityError::DuplicateId)?;
        let n = registry.len();

        let mut parent = Vec::with_capacity(n);
        let mut weight = Vec::with_capacity(n);
        let mut names = Vec::with_capacity(n);
        for node in nodes {
            let p = match node.parent_id {
                Some(pid) => Some(registry.id_to_index(&pid).ok_or(
                    SimilarityError::UnknownParent {
                        id: node.id,
                        parent_id: pid,
                    },
                )?),
                None => None,
            };
            let w = node.weight.unwrap_or(default_weight);
            if !w.is_finite() || w < 0.0 {
                return Err(SimilarityError::InvalidConfig(format!(
                    "ingredient {} has invalid edge weight {}",
                    node.id, w
                )));
            }
            parent.push(p);
            weight.push(w);
            names.push(node.name.clone());
        }

        let mut ancestors = Vec::with_capacity(n);
        let mut depth = Vec::with_capacity(n);
        for i in 0..n {
            let chain = Self::chain_to_root(&parent, i).ok_or_else(|| {
                SimilarityError::CyclicHierarchy {
                    id: registry.ids()[i],
                }
            })?;
            depth.push(chain.len() - 1);
            ancestors.push(chain);
        }

        let n_roots = parent.iter().filter(|p| p.is_none()).count();
        let max_depth = depth.iter().copied().max().unwrap_or(0);
        debug!(
            "Ingredient tree built: {} nodes, {} roots, max depth {}",
            n, n_roots, max_depth
        );

        Ok(Self {
            registry,
            parent,
            weight,
            depth,
            ancestors,
            names,
        })
    }

    /// Root-first chain ending at `i`, or `None` if no root is reached within `n` hops.
    fn chain_to_root(parent: &[Option<usize>], i: usize) -> Option<Vec<usize>> {
        let n = parent.len();
        let mut chain = vec![i];
        let mut cur = i;
        for _ in 0..n {
            match parent[cur] {
                Some(p) => {
                    chain.push(p);
                    cur = p;
                }
                None => {
                    chain.reverse();
                    return Some(chain);
                }
            }
        }
        trace!("Parent walk from node {} exceeded {} hops", i, n);
        None
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Position in both chains of the lowest common ancestor, `None` if the
    /// nodes live in different trees.
    pub fn lca_depth(&self, a: usize, b: usize) -> Option<usize> {
        let ca = &self.ancestors[a];
        let cb = &self.ancestors[b];
        let common = ca.iter().zip(cb.iter()).take_while(|(x, y)| x == y).count();
        if common == 0 {
            None
        } else {
            Some(common - 1)
        }
    }

    pub fn lca(&self, a: usize, b: usize) -> Option<usize> {
        self.lca_depth(a, b).map(|d| self.ancestors[a][d])
    }

    /// Weighted path length between nodes `a` and `b` (dense indices).
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        if a == b {
            return 0.0;
        }
        // In different trees the path crosses both root edges to the super-root.
        let start = match self.lca_depth(a, b) {
            Some(d) => d + 1,
            None => 0,
        };
        self.path_weight(a, start) + self.path_weight(b, start)
    }

    /// Sum of edge weights of chain nodes from position `from` down to the node.
    fn path_weight(&self, node: usize, from: usize) -> f64 {
        self.ancestors[node][from..]
            .iter()
            .rev()
            .map(|&i| self.weight[i])
            .sum()
    }

    /// Distance by database id.
    pub fn distance_by_id(&self, a: EntityId, b: EntityId) -> Result<f64> {
        let ia = self.registry.require_index(&a)?;
        let ib = self.registry.require_index(&b)?;
        Ok(self.distance(ia, ib))
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).and_then(|n| n.as_deref())
    }
}
