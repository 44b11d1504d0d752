//! Image dependency graph.
//!
//! Nodes live in a petgraph arena and are identified by [`NodeId`], so a node
//! reached through several parents is recognised by index rather than by name.
//! Edges always point from a parent (base image) to a child.
//!
//! Every walk visits each node at most once, starting from the roots in the
//! order they were added and following children in insertion order:
//! - [`Graph::walk`], [`Graph::walk_mut`], [`Graph::walk_err`]: sequential pre-order
//! - [`Graph::walk_in_depth`]: sequential post-order
//! - [`Graph::walk_async_err`]: one task per node, fire all then join all
//! - [`Graph::walk_parallel`]: one task per node, each waiting for all its parents

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::image::Image;

/// Stable identity of a node in a [`Graph`].
pub type NodeId = NodeIndex;

/// Structural errors of the graph.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("dependency cycle detected involving image {image}")]
  Cycle { image: String },
}

/// What a [`Graph::walk_parallel`] task sees once all its parents are done.
#[derive(Debug, Clone)]
pub struct ParallelVisit<T> {
  pub id: NodeId,
  pub image: Image,
  /// Each parent with the value its task published, `None` if that task died.
  pub parents: Vec<(Image, Option<T>)>,
}

/// A forest of images linked by base-image dependencies.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  dag: DiGraph<Image, ()>,
  roots: Vec<NodeId>,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a node without linking it anywhere.
  pub fn add_node(&mut self, image: Image) -> NodeId {
    self.dag.add_node(image)
  }

  /// Append a root. Adding the same root twice is a no-op.
  pub fn add_root(&mut self, id: NodeId) {
    if !self.roots.contains(&id) {
      self.roots.push(id);
    }
  }

  /// Link `child` under `parent`. Duplicate links are suppressed.
  pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
    if self.dag.find_edge(parent, child).is_none() {
      self.dag.add_edge(parent, child, ());
    }
  }

  pub fn roots(&self) -> &[NodeId] {
    &self.roots
  }

  /// Children of a node, in insertion order.
  pub fn children(&self, id: NodeId) -> Vec<NodeId> {
    self.neighbors(id, Direction::Outgoing)
  }

  /// Parents of a node, in insertion order.
  pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
    self.neighbors(id, Direction::Incoming)
  }

  fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
    let mut edges: Vec<_> = self
      .dag
      .edges_directed(id, direction)
      .map(|edge| {
        let other = match direction {
          Direction::Outgoing => edge.target(),
          Direction::Incoming => edge.source(),
        };
        (edge.id(), other)
      })
      .collect();
    edges.sort_by_key(|(edge, _)| edge.index());
    edges.into_iter().map(|(_, other)| other).collect()
  }

  pub fn len(&self) -> usize {
    self.dag.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.dag.node_count() == 0
  }

  /// All images, in insertion order.
  pub fn images(&self) -> impl Iterator<Item = &Image> {
    self.dag.node_weights()
  }

  /// Look up a node by its fully-qualified image name.
  pub fn find(&self, name: &str) -> Option<NodeId> {
    self.dag.node_indices().find(|id| self.dag[*id].name == name)
  }

  /// Fail if the parent/child relation contains a cycle.
  pub fn verify_acyclic(&self) -> Result<(), GraphError> {
    toposort(&self.dag, None).map(|_| ()).map_err(|cycle| GraphError::Cycle {
      image: self.dag[cycle.node_id()].name.clone(),
    })
  }

  /// Node ids in pre-order: each node before its children, each node once.
  pub fn walk_order(&self) -> Vec<NodeId> {
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(self.len());

    for &root in &self.roots {
      let mut stack = vec![root];
      while let Some(id) = stack.pop() {
        if !visited.insert(id) {
          continue;
        }
        order.push(id);
        // Reversed so the first child is popped first.
        stack.extend(self.children(id).into_iter().rev());
      }
    }

    order
  }

  /// Node ids in post-order: every child before its parent, each node once.
  fn depth_order(&self) -> Vec<NodeId> {
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(self.len());

    for &root in &self.roots {
      let mut stack = vec![(root, false)];
      while let Some((id, expanded)) = stack.pop() {
        if expanded {
          order.push(id);
          continue;
        }
        if !visited.insert(id) {
          continue;
        }
        stack.push((id, true));
        stack.extend(self.children(id).into_iter().rev().map(|child| (child, false)));
      }
    }

    order
  }

  /// Visit every node once, parents before children along the walk.
  pub fn walk<F>(&self, mut visitor: F)
  where
    F: FnMut(NodeId, &Image),
  {
    for id in self.walk_order() {
      visitor(id, &self.dag[id]);
    }
  }

  /// Like [`Graph::walk`], with write access to each image.
  pub fn walk_mut<F>(&mut self, mut visitor: F)
  where
    F: FnMut(NodeId, &mut Image),
  {
    for id in self.walk_order() {
      visitor(id, &mut self.dag[id]);
    }
  }

  /// Like [`Graph::walk_mut`], stopping at the first error.
  pub fn walk_err<E, F>(&mut self, mut visitor: F) -> Result<(), E>
  where
    F: FnMut(NodeId, &mut Image) -> Result<(), E>,
  {
    for id in self.walk_order() {
      visitor(id, &mut self.dag[id])?;
    }
    Ok(())
  }

  /// Visit every node once, children fully before their parent.
  pub fn walk_in_depth<F>(&self, mut visitor: F)
  where
    F: FnMut(NodeId, &Image),
  {
    for id in self.depth_order() {
      visitor(id, &self.dag[id]);
    }
  }

  /// Launch one task per node and wait for all of them.
  ///
  /// The visitor is called in walk order to create each task; tasks then run
  /// with no ordering between them. Every task is awaited even after a
  /// failure. Returns the values of all tasks, or the error of the earliest
  /// failing node in walk order.
  pub async fn walk_async_err<T, E, F, Fut>(&self, visitor: F) -> Result<HashMap<NodeId, T>, E>
  where
    F: Fn(NodeId, &Image) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
  {
    let order = self.walk_order();
    let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();

    let mut join_set = JoinSet::new();
    for &id in &order {
      let task = visitor(id, &self.dag[id]);
      join_set.spawn(async move { (id, task.await) });
    }

    let mut values = HashMap::with_capacity(order.len());
    let mut first_error: Option<(usize, E)> = None;

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((id, Ok(value))) => {
          values.insert(id, value);
        }
        Ok((id, Err(e))) => {
          let pos = position.get(&id).copied().unwrap_or(usize::MAX);
          if first_error.as_ref().is_none_or(|(first, _)| pos < *first) {
            first_error = Some((pos, e));
          }
        }
        Err(e) => {
          error!(error = %e, "graph task panicked");
        }
      }
    }

    match first_error {
      Some((_, e)) => Err(e),
      None => Ok(values),
    }
  }

  /// Run one task per node, each starting only once all its parents are done.
  ///
  /// Roots start immediately. Each task receives a snapshot of its image and
  /// of its parents, along with the value every parent task published.
  /// Returns the value of every task that completed.
  pub async fn walk_parallel<T, F, Fut>(&self, visitor: F) -> HashMap<NodeId, T>
  where
    T: Clone + Send + Sync + 'static,
    F: Fn(ParallelVisit<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    let visitor = Arc::new(visitor);
    let order = self.walk_order();

    let mut senders: HashMap<NodeId, watch::Sender<Option<T>>> = order
      .iter()
      .map(|id| {
        let (tx, _) = watch::channel(None);
        (*id, tx)
      })
      .collect();

    let mut waits = Vec::with_capacity(order.len());
    for &id in &order {
      let parents: Vec<(Image, watch::Receiver<Option<T>>)> = self
        .parents(id)
        .into_iter()
        .filter_map(|parent| {
          senders
            .get(&parent)
            .map(|tx| (self.dag[parent].clone(), tx.subscribe()))
        })
        .collect();
      waits.push((id, parents));
    }

    let mut join_set = JoinSet::new();
    for (id, parents) in waits {
      let Some(done) = senders.remove(&id) else {
        continue;
      };
      let image = self.dag[id].clone();
      let visitor = Arc::clone(&visitor);

      join_set.spawn(async move {
        let mut resolved = Vec::with_capacity(parents.len());
        for (parent, mut rx) in parents {
          let value = match rx.wait_for(Option::is_some).await {
            Ok(published) => published.clone(),
            Err(_) => None,
          };
          resolved.push((parent, value));
        }

        debug!(image = %image.name, "parents done, visiting");
        let value = visitor(ParallelVisit {
          id,
          image,
          parents: resolved,
        })
        .await;

        done.send_replace(Some(value.clone()));
        (id, value)
      });
    }

    let mut values = HashMap::with_capacity(order.len());
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((id, value)) => {
          values.insert(id, value);
        }
        Err(e) => {
          error!(error = %e, "graph task panicked");
        }
      }
    }

    values
  }

  /// Copy of the graph restricted to the images matching `predicate`.
  ///
  /// Edges between retained nodes are kept. A retained node none of whose
  /// parents is retained becomes a root. Node ids are not preserved.
  pub fn filter<P>(&self, predicate: P) -> Graph
  where
    P: Fn(&Image) -> bool,
  {
    let mut filtered = Graph::new();
    let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();

    for id in self.walk_order() {
      if predicate(&self.dag[id]) {
        let new_id = filtered.add_node(self.dag[id].clone());
        mapping.insert(id, new_id);
      }
    }

    for id in self.walk_order() {
      let Some(&new_child) = mapping.get(&id) else {
        continue;
      };
      let mut has_parent = false;
      for parent in self.parents(id) {
        if let Some(&new_parent) = mapping.get(&parent) {
          filtered.add_child(new_parent, new_child);
          has_parent = true;
        }
      }
      if !has_parent {
        filtered.add_root(new_child);
      }
    }

    filtered
  }
}

impl Index<NodeId> for Graph {
  type Output = Image;

  fn index(&self, id: NodeId) -> &Image {
    &self.dag[id]
  }
}

impl IndexMut<NodeId> for Graph {
  fn index_mut(&mut self, id: NodeId) -> &mut Image {
    &mut self.dag[id]
  }
}
