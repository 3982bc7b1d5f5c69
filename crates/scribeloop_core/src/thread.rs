//! crates/scribeloop_core/src/thread.rs
//!
//! Rebuilds reply trees from the flat, parent-referencing annotation list.

use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::domain::Annotation;

/// Deepest reply level a thread holds, the root being level 0. Replies past
/// it are refused on creation and left out when assembling.
pub const MAX_THREAD_DEPTH: usize = 64;

/// An annotation with its replies, each reply carrying its own replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationThread {
    pub annotation: Annotation,
    /// Direct replies, oldest first.
    pub replies: Vec<AnnotationThread>,
}

impl AnnotationThread {
    /// Total number of replies at every depth.
    pub fn reply_count(&self) -> usize {
        self.replies
            .iter()
            .map(|reply| 1 + reply.reply_count())
            .sum()
    }

    /// Depth-first listing with depths, the root at depth 0. This is the
    /// order a sidebar renders the thread in.
    pub fn flatten(&self) -> Vec<(usize, &Annotation)> {
        let mut out = Vec::new();
        self.flatten_into(0, &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a Annotation)>) {
        out.push((depth, &self.annotation));
        for reply in &self.replies {
            reply.flatten_into(depth + 1, out);
        }
    }
}

/// Children of every annotation, indexed once up front.
struct ChildIndex<'a> {
    annotations: &'a [Annotation],
    children: HashMap<Uuid, Vec<usize>>,
}

impl<'a> ChildIndex<'a> {
    fn new(annotations: &'a [Annotation]) -> Self {
        let mut children: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for (index, annotation) in annotations.iter().enumerate() {
            if let Some(parent_id) = annotation.parent_id {
                children.entry(parent_id).or_default().push(index);
            }
        }
        // Stable sort: equal timestamps keep their list order.
        for siblings in children.values_mut() {
            siblings.sort_by_key(|index| annotations[*index].created_at);
        }
        Self {
            annotations,
            children,
        }
    }

    /// Expands `index`, found at `depth`, into a thread. `visited` guards
    /// against duplicated ids and malformed parent cycles.
    fn expand(&self, index: usize, depth: usize, visited: &mut HashSet<Uuid>) -> AnnotationThread {
        let annotation = &self.annotations[index];
        let mut replies = Vec::new();
        let children = self.children.get(&annotation.id);

        if depth >= MAX_THREAD_DEPTH {
            if children.is_some_and(|c| !c.is_empty()) {
                debug!(
                    "Annotation {} is {} levels deep, not expanding its replies",
                    annotation.id, depth
                );
            }
            return AnnotationThread {
                annotation: annotation.clone(),
                replies,
            };
        }

        for child in children.into_iter().flatten() {
            let reply = &self.annotations[*child];
            if !visited.insert(reply.id) {
                debug!("Annotation {} already threaded, skipping", reply.id);
                continue;
            }
            replies.push(self.expand(*child, depth + 1, visited));
        }

        AnnotationThread {
            annotation: annotation.clone(),
            replies,
        }
    }
}

/// Builds the thread rooted at `root_id`, or `None` when that annotation is
/// not in the list (for instance because it was deleted meanwhile).
pub fn assemble_thread(annotations: &[Annotation], root_id: Uuid) -> Option<AnnotationThread> {
    let root = annotations.iter().position(|a| a.id == root_id)?;
    let index = ChildIndex::new(annotations);
    let mut visited = HashSet::from([root_id]);
    Some(index.expand(root, 0, &mut visited))
}

/// Builds one thread per root annotation, ordered by start offset (roots
/// without offsets last) and then creation time. Replies whose ancestor
/// chain does not reach a root are dropped.
pub fn assemble_threads(annotations: &[Annotation]) -> Vec<AnnotationThread> {
    let index = ChildIndex::new(annotations);
    let mut roots: Vec<usize> = annotations
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_root())
        .map(|(i, _)| i)
        .collect();
    roots.sort_by_key(|i| {
        let a = &annotations[*i];
        (a.start_offset.is_none(), a.start_offset, a.created_at)
    });

    let mut visited = HashSet::new();
    roots
        .into_iter()
        .filter(|i| visited.insert(annotations[*i].id))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|i| index.expand(i, 0, &mut visited))
        .collect()
}

/// Number of ancestors above `annotation_id`: 0 for a root, `None` if the
/// id is unknown. A broken or cyclic parent chain stops the count.
pub fn depth_of(annotations: &[Annotation], annotation_id: Uuid) -> Option<usize> {
    let parents: HashMap<Uuid, Option<Uuid>> =
        annotations.iter().map(|a| (a.id, a.parent_id)).collect();

    let mut current = *parents.get(&annotation_id)?;
    let mut seen = HashSet::from([annotation_id]);
    let mut depth = 0;
    while let Some(parent_id) = current {
        if !seen.insert(parent_id) {
            break;
        }
        let Some(next) = parents.get(&parent_id) else {
            break;
        };
        depth += 1;
        current = *next;
    }
    Some(depth)
}

/// The annotation and all of its transitive replies: exactly what a cascade
/// delete of `annotation_id` removes. Empty if the id is unknown.
pub fn cascade_scope(annotations: &[Annotation], annotation_id: Uuid) -> Vec<Uuid> {
    if !annotations.iter().any(|a| a.id == annotation_id) {
        return Vec::new();
    }

    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for annotation in annotations {
        if let Some(parent_id) = annotation.parent_id {
            children.entry(parent_id).or_default().push(annotation.id);
        }
    }

    let mut scope = vec![annotation_id];
    let mut seen = HashSet::from([annotation_id]);
    let mut next = 0;
    while next < scope.len() {
        let current = scope[next];
        next += 1;
        for child in children.get(&current).into_iter().flatten() {
            if seen.insert(*child) {
                scope.push(*child);
            }
        }
    }
    scope
}
