//! Parent/child tree reconstruction for one workflow-state bucket.
//!
//! The board renders exactly one level of nesting. Given the flat list of
//! issues in a column, [`HierarchyResolver::resolve`] decides which issues are
//! shown as top-level cards, which are nested under their parent, and which
//! are only counted.
//!
//! Placement rules, for an issue `x` in the bucket:
//! - no parent, or a parent outside the bucket: `x` is a root
//! - parent in the bucket, grandparent not: `x` is nested under its parent
//! - parent and grandparent both in the bucket: `x` is hidden
//!
//! Descendant counts come from the tracker's own child trees and are not
//! limited to the bucket.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::error::EngineError;
use crate::linear::types::Issue;

/// Deepest sub-issue tree walked before the data is rejected.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Descendants of one issue grouped by depth and by workflow state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescendantBreakdown {
  /// Direct children
  pub level1: usize,
  /// Grandchildren
  pub level2: usize,
  /// Everything deeper
  pub level3_plus: usize,
  /// All descendants keyed by state name
  pub by_state: BTreeMap<String, usize>,
}

impl DescendantBreakdown {
  pub fn total(&self) -> usize {
    self.level1 + self.level2 + self.level3_plus
  }

  fn record(&mut self, depth: usize, state: &str) {
    match depth {
      1 => self.level1 += 1,
      2 => self.level2 += 1,
      _ => self.level3_plus += 1,
    }
    *self.by_state.entry(state.to_string()).or_default() += 1;
  }
}

/// One card on the board.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
  pub issue: Issue,
  /// Direct children in the same bucket. Always empty below the first level.
  pub visible_children: Vec<HierarchyNode>,
  pub descendant_count: usize,
  pub breakdown: DescendantBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
  Root,
  ChildOf(usize),
  Hidden,
}

#[derive(Debug, Clone)]
pub struct HierarchyResolver {
  max_depth: usize,
}

impl Default for HierarchyResolver {
  fn default() -> Self {
    Self {
      max_depth: DEFAULT_MAX_DEPTH,
    }
  }
}

impl HierarchyResolver {
  pub fn new(max_depth: usize) -> Self {
    Self { max_depth }
  }

  /// Build the visible tree for one bucket. Input order is kept for roots and
  /// for the children under each root.
  pub fn resolve(&self, issues: Vec<Issue>) -> Result<Vec<HierarchyNode>, EngineError> {
    let issues = dedupe(issues);

    let placements: Vec<Placement> = {
      let index: HashMap<&str, usize> = issues
        .iter()
        .enumerate()
        .map(|(i, issue)| (issue.id.as_str(), i))
        .collect();

      check_parent_chains(&issues, &index)?;

      issues
        .iter()
        .map(|issue| place(issue, &issues, &index))
        .collect()
    };

    let mut slots: Vec<Option<HierarchyNode>> = Vec::with_capacity(issues.len());
    for issue in issues {
      slots.push(Some(self.annotate(issue)?));
    }

    let mut children: HashMap<usize, Vec<HierarchyNode>> = HashMap::new();
    for (i, placement) in placements.iter().enumerate() {
      if let Placement::ChildOf(parent) = placement {
        if let Some(node) = slots[i].take() {
          children.entry(*parent).or_default().push(node);
        }
      }
    }

    let mut roots = Vec::new();
    for (i, placement) in placements.iter().enumerate() {
      if *placement == Placement::Root {
        if let Some(mut node) = slots[i].take() {
          node.visible_children = children.remove(&i).unwrap_or_default();
          roots.push(node);
        }
      }
    }

    Ok(roots)
  }

  /// Wrap an issue with its full-depth descendant statistics.
  fn annotate(&self, issue: Issue) -> Result<HierarchyNode, EngineError> {
    let mut breakdown = DescendantBreakdown::default();
    {
      let mut path = HashSet::from([issue.id.as_str()]);
      self.walk(&issue, 1, &mut path, &mut breakdown)?;
    }

    Ok(HierarchyNode {
      descendant_count: breakdown.total(),
      breakdown,
      visible_children: Vec::new(),
      issue,
    })
  }

  fn walk<'a>(
    &self,
    issue: &'a Issue,
    depth: usize,
    path: &mut HashSet<&'a str>,
    breakdown: &mut DescendantBreakdown,
  ) -> Result<(), EngineError> {
    for child in &issue.children {
      if depth > self.max_depth {
        return Err(EngineError::MalformedData(format!(
          "sub-issue tree under {} is deeper than {}",
          issue.id, self.max_depth
        )));
      }
      if !path.insert(child.id.as_str()) {
        return Err(EngineError::MalformedData(format!(
          "issue {} is its own ancestor",
          child.id
        )));
      }

      breakdown.record(depth, &child.state.name);
      self.walk(child, depth + 1, path, breakdown)?;
      path.remove(child.id.as_str());
    }
    Ok(())
  }
}

/// Drop repeated ids, keeping the first occurrence.
fn dedupe(issues: Vec<Issue>) -> Vec<Issue> {
  let mut seen = HashSet::new();
  let mut unique = Vec::with_capacity(issues.len());
  for issue in issues {
    if seen.insert(issue.id.clone()) {
      unique.push(issue);
    } else {
      warn!(issue = %issue.id, "duplicate issue in state bucket, keeping first");
    }
  }
  unique
}

/// Reject parent links that loop back within the bucket.
fn check_parent_chains(issues: &[Issue], index: &HashMap<&str, usize>) -> Result<(), EngineError> {
  for issue in issues {
    let mut seen = HashSet::from([issue.id.as_str()]);
    let mut current = issue;
    while let Some(parent_idx) = current.parent_id().and_then(|id| index.get(id)) {
      current = &issues[*parent_idx];
      if !seen.insert(current.id.as_str()) {
        return Err(EngineError::MalformedData(format!(
          "parent chain of issue {} forms a cycle",
          issue.id
        )));
      }
    }
  }
  Ok(())
}

fn place(issue: &Issue, issues: &[Issue], index: &HashMap<&str, usize>) -> Placement {
  let Some(&parent_idx) = issue.parent_id().and_then(|id| index.get(id)) else {
    return Placement::Root;
  };

  let grandparent_in_bucket = issues[parent_idx]
    .parent_id()
    .is_some_and(|id| index.contains_key(id));

  if grandparent_in_bucket {
    Placement::Hidden
  } else {
    Placement::ChildOf(parent_idx)
  }
}
