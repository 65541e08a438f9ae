//! Sequence grouping for one batch of time-ordered events.
//!
//! Related events inside a bounded look window are merged into connected
//! components with a [`DisjointSet`]. Each component keeps one survivor, the
//! most complete query, and every other member becomes a duplicate.
//!
//! A component can chain further than one time window (`a` near `b`, `b`
//! near `c`, `a` far from `c`). The survivor then only claims the members
//! within the time window of itself; the rest are re-partitioned along the
//! original relatedness edges and resolved on their own. That keeps every
//! flagged duplicate within one time window of the event that replaced it.

pub mod dsu;

pub use dsu::DisjointSet;

use std::collections::VecDeque;

use tracing::trace;

use crate::config::CollapseConfig;
use crate::model::{normalize, EventId, QueryEvent};
use crate::relatedness::Relatedness;

/// Default number of neighbouring rows compared in each direction
pub const DEFAULT_LOOK_WINDOW: usize = 10;

/// One resolved typing sequence inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGroup {
    /// Batch positions of every member, ascending
    pub members: Vec<usize>,
    /// Batch position of the kept event
    pub survivor: usize,
    /// Ids of every member except the survivor
    pub duplicates: Vec<EventId>,
}

impl SequenceGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Windowed union-find grouper
#[derive(Debug, Clone)]
pub struct SequenceGrouper {
    classifier: Relatedness,
    look_window: usize,
}

impl Default for SequenceGrouper {
    fn default() -> Self {
        Self::new(Relatedness::default(), DEFAULT_LOOK_WINDOW)
    }
}

impl SequenceGrouper {
    pub fn new(classifier: Relatedness, look_window: usize) -> Self {
        Self {
            classifier,
            look_window,
        }
    }

    pub fn from_config(config: &CollapseConfig) -> Self {
        Self::new(Relatedness::from_config(config), config.look_window)
    }

    pub fn classifier(&self) -> &Relatedness {
        &self.classifier
    }

    pub fn look_window(&self) -> usize {
        self.look_window
    }

    /// Ids to flag as duplicates in this batch
    ///
    /// `events` must be ordered by `(created_at, query length)`.
    pub fn duplicate_ids(&self, events: &[QueryEvent]) -> Vec<EventId> {
        self.group(events)
            .into_iter()
            .flat_map(|group| group.duplicates)
            .collect()
    }

    /// Partition the batch into typing sequences with two or more members
    pub fn group(&self, events: &[QueryEvent]) -> Vec<SequenceGroup> {
        if events.len() < 2 {
            return Vec::new();
        }

        let normalized: Vec<String> = events.iter().map(|e| normalize(&e.query)).collect();
        let lengths: Vec<usize> = normalized.iter().map(|q| q.chars().count()).collect();
        let mut dsu = DisjointSet::new(events.len());
        let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); events.len()];

        // Pairs are symmetric: the look-ahead of `i` is the look-behind of `j`,
        // so each pair within `look_window` positions is classified once.
        for i in 0..events.len() {
            let end = (i + self.look_window).min(events.len() - 1);
            for j in (i + 1)..=end {
                if !self
                    .classifier
                    .within_window(&events[i].created_at, &events[j].created_at)
                {
                    // time-ordered input: every later row is further away
                    break;
                }
                if self.classifier.related_text(&normalized[i], &normalized[j]) {
                    dsu.union(i, j);
                    neighbours[i].push(j);
                    neighbours[j].push(i);
                }
            }
        }

        let mut groups = Vec::new();
        for component in dsu.sets() {
            if component.len() < 2 {
                continue;
            }
            self.resolve_component(events, &lengths, &neighbours, component, &mut groups);
        }
        groups.sort_by_key(|group| group.members[0]);

        trace!(
            batch = events.len(),
            groups = groups.len(),
            "grouped typing sequences"
        );
        groups
    }

    fn resolve_component(
        &self,
        events: &[QueryEvent],
        lengths: &[usize],
        neighbours: &[Vec<usize>],
        component: Vec<usize>,
        groups: &mut Vec<SequenceGroup>,
    ) {
        let mut pending = vec![component];

        while let Some(members) = pending.pop() {
            if members.len() < 2 {
                continue;
            }
            let Some(survivor) = pick_survivor(events, lengths, &members) else {
                continue;
            };
            let survivor_at = events[survivor].created_at;

            let (claimed, rest): (Vec<usize>, Vec<usize>) = members
                .into_iter()
                .filter(|&m| m != survivor)
                .partition(|&m| self.classifier.within_window(&survivor_at, &events[m].created_at));

            if !claimed.is_empty() {
                let mut group_members = claimed.clone();
                group_members.push(survivor);
                group_members.sort_unstable();
                groups.push(SequenceGroup {
                    members: group_members,
                    survivor,
                    duplicates: claimed.iter().map(|&m| events[m].id).collect(),
                });
            }

            if rest.len() >= 2 {
                pending.extend(connected_subsets(&rest, neighbours, events.len()));
            }
        }
    }
}

/// Longest normalized query wins; ties go to the earliest event, then the
/// earliest batch position.
fn pick_survivor(events: &[QueryEvent], lengths: &[usize], members: &[usize]) -> Option<usize> {
    members.iter().copied().min_by(|&a, &b| {
        lengths[b]
            .cmp(&lengths[a])
            .then_with(|| events[a].created_at.cmp(&events[b].created_at))
            .then_with(|| a.cmp(&b))
    })
}

/// Split `subset` into the pieces still connected through `neighbours` edges
/// that stay inside `subset`.
fn connected_subsets(subset: &[usize], neighbours: &[Vec<usize>], len: usize) -> Vec<Vec<usize>> {
    let mut inside = vec![false; len];
    for &m in subset {
        inside[m] = true;
    }

    let mut pieces = Vec::new();
    let mut queue = VecDeque::new();
    for &start in subset {
        if !inside[start] {
            continue;
        }
        inside[start] = false;
        queue.push_back(start);
        let mut piece = Vec::new();
        while let Some(node) = queue.pop_front() {
            piece.push(node);
            for &next in &neighbours[node] {
                if inside[next] {
                    inside[next] = false;
                    queue.push_back(next);
                }
            }
        }
        piece.sort_unstable();
        pieces.push(piece);
    }
    pieces
}
