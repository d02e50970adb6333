//! Org chart construction and layout.
//!
//! People link to their manager via `manager_id`; this module turns
//! those links into a forest for the chart view, validates
//! re-parenting (drag-and-drop moves must not create cycles), and
//! computes a deterministic row/column layout.

use crate::models::Person;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Errors from org chart operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrgChartError {
    /// The manager chain loops back on itself.
    #[error("Manager chain contains a cycle involving person {0}")]
    Cycle(Uuid),

    /// A person referenced as manager is not in the set.
    #[error("Person not found: {0}")]
    PersonNotFound(Uuid),
}

/// One node of the org chart tree.
#[derive(Debug, Clone, Serialize)]
pub struct OrgChartNode {
    /// The person at this node.
    pub person_id: Uuid,
    /// Display name.
    pub name: String,
    /// Job title.
    pub job_title: Option<String>,
    /// Team membership.
    pub team_id: Option<Uuid>,
    /// Direct reports, sorted by name.
    pub children: Vec<OrgChartNode>,
}

/// A positioned node in the rendered chart.
#[derive(Debug, Clone, Serialize)]
pub struct ChartPlacement {
    /// The person at this position.
    pub person_id: Uuid,
    /// Depth in the tree (0 = top).
    pub row: u32,
    /// Horizontal position; leaves get consecutive integer columns,
    /// parents sit centered over their subtree.
    pub col: f64,
}

/// Builds the org chart forest from manager links.
///
/// People whose manager is unset, departed, or outside the given set
/// become roots. Returns an error if the manager chain contains a
/// cycle.
pub fn build_forest(persons: &[Person]) -> Result<Vec<OrgChartNode>, OrgChartError> {
    let by_id: HashMap<Uuid, &Person> = persons.iter().map(|p| (p.id, p)).collect();

    detect_cycles(persons, &by_id)?;

    let mut children_of: HashMap<Uuid, Vec<&Person>> = HashMap::new();
    let mut roots: Vec<&Person> = Vec::new();

    for person in persons {
        match person.manager_id.filter(|m| by_id.contains_key(m)) {
            Some(manager_id) => children_of.entry(manager_id).or_default().push(person),
            None => roots.push(person),
        }
    }

    roots.sort_by(|a, b| a.full_name().cmp(&b.full_name()));

    Ok(roots
        .into_iter()
        .map(|root| build_node(root, &children_of))
        .collect())
}

fn build_node(person: &Person, children_of: &HashMap<Uuid, Vec<&Person>>) -> OrgChartNode {
    let mut children: Vec<&Person> = children_of.get(&person.id).cloned().unwrap_or_default();
    children.sort_by(|a, b| a.full_name().cmp(&b.full_name()));

    OrgChartNode {
        person_id: person.id,
        name: person.full_name(),
        job_title: person.job_title.clone(),
        team_id: person.team_id,
        children: children
            .into_iter()
            .map(|c| build_node(c, children_of))
            .collect(),
    }
}

/// Walks every manager chain looking for a loop.
fn detect_cycles(
    persons: &[Person],
    by_id: &HashMap<Uuid, &Person>,
) -> Result<(), OrgChartError> {
    let mut cleared: HashSet<Uuid> = HashSet::new();

    for person in persons {
        if cleared.contains(&person.id) {
            continue;
        }

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut current = Some(person.id);

        while let Some(id) = current {
            if cleared.contains(&id) {
                break;
            }
            if !seen.insert(id) {
                return Err(OrgChartError::Cycle(id));
            }
            current = by_id
                .get(&id)
                .and_then(|p| p.manager_id)
                .filter(|m| by_id.contains_key(m));
        }

        cleared.extend(seen);
    }

    Ok(())
}

/// Checks whether re-parenting `person_id` under `new_manager_id`
/// would create a cycle (the new manager is the person themselves or
/// one of their current reports, transitively).
pub fn would_create_cycle(
    persons: &[Person],
    person_id: Uuid,
    new_manager_id: Uuid,
) -> Result<bool, OrgChartError> {
    if person_id == new_manager_id {
        return Ok(true);
    }

    let by_id: HashMap<Uuid, &Person> = persons.iter().map(|p| (p.id, p)).collect();
    if !by_id.contains_key(&person_id) {
        return Err(OrgChartError::PersonNotFound(person_id));
    }
    if !by_id.contains_key(&new_manager_id) {
        return Err(OrgChartError::PersonNotFound(new_manager_id));
    }

    // Walk up from the proposed manager; hitting the person means the
    // manager is in the person's subtree.
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut current = Some(new_manager_id);
    while let Some(id) = current {
        if id == person_id {
            return Ok(true);
        }
        if !seen.insert(id) {
            // Pre-existing loop above the proposed manager
            return Err(OrgChartError::Cycle(id));
        }
        current = by_id
            .get(&id)
            .and_then(|p| p.manager_id)
            .filter(|m| by_id.contains_key(m));
    }

    Ok(false)
}

/// Lays out the forest: depth-first, leaves get consecutive columns,
/// parents are centered over their children.
pub fn layout_forest(forest: &[OrgChartNode]) -> Vec<ChartPlacement> {
    let mut placements = Vec::new();
    let mut next_leaf_col = 0.0;
    for root in forest {
        layout_node(root, 0, &mut next_leaf_col, &mut placements);
    }
    placements
}

fn layout_node(
    node: &OrgChartNode,
    row: u32,
    next_leaf_col: &mut f64,
    out: &mut Vec<ChartPlacement>,
) -> f64 {
    let col = if node.children.is_empty() {
        let col = *next_leaf_col;
        *next_leaf_col += 1.0;
        col
    } else {
        let child_cols: Vec<f64> = node
            .children
            .iter()
            .map(|c| layout_node(c, row + 1, next_leaf_col, out))
            .collect();
        (child_cols[0] + child_cols[child_cols.len() - 1]) / 2.0
    };

    out.push(ChartPlacement {
        person_id: node.person_id,
        row,
        col,
    });
    col
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Person;

    fn person(name: &str, manager: Option<Uuid>) -> Person {
        let mut p = Person::new(
            Uuid::new_v4(),
            name,
            "",
            format!("{}@example.com", name.to_lowercase()),
        );
        p.manager_id = manager;
        p
    }

    #[test]
    fn test_forest_single_root() {
        let ceo = person("Ceo", None);
        let eng = person("Eng", Some(ceo.id));
        let ops = person("Ops", Some(ceo.id));
        let dev = person("Dev", Some(eng.id));

        let forest = build_forest(&[ceo.clone(), eng.clone(), ops, dev]).unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].person_id, ceo.id);
        assert_eq!(forest[0].children.len(), 2);
        // Children sorted by name: Eng before Ops
        assert_eq!(forest[0].children[0].person_id, eng.id);
        assert_eq!(forest[0].children[0].children.len(), 1);
    }

    #[test]
    fn test_forest_dangling_manager_becomes_root() {
        let orphan = person("Orphan", Some(Uuid::new_v4()));
        let forest = build_forest(&[orphan.clone()]).unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].person_id, orphan.id);
    }

    #[test]
    fn test_forest_detects_cycle() {
        let mut a = person("Aa", None);
        let mut b = person("Bb", None);
        a.manager_id = Some(b.id);
        b.manager_id = Some(a.id);

        assert!(matches!(
            build_forest(&[a, b]),
            Err(OrgChartError::Cycle(_))
        ));
    }

    #[test]
    fn test_would_create_cycle_self() {
        let a = person("Aa", None);
        assert!(would_create_cycle(std::slice::from_ref(&a), a.id, a.id).unwrap());
    }

    #[test]
    fn test_would_create_cycle_descendant() {
        let ceo = person("Ceo", None);
        let eng = person("Eng", Some(ceo.id));
        let dev = person("Dev", Some(eng.id));
        let all = vec![ceo.clone(), eng.clone(), dev.clone()];

        // Moving the CEO under their own report's report loops
        assert!(would_create_cycle(&all, ceo.id, dev.id).unwrap());
        // Moving a leaf under the root does not
        assert!(!would_create_cycle(&all, dev.id, ceo.id).unwrap());
        // Reassigning between branches does not
        assert!(!would_create_cycle(&all, dev.id, ceo.id).unwrap());
    }

    #[test]
    fn test_would_create_cycle_unknown_person() {
        let a = person("Aa", None);
        assert!(matches!(
            would_create_cycle(std::slice::from_ref(&a), a.id, Uuid::new_v4()),
            Err(OrgChartError::PersonNotFound(_))
        ));
    }

    #[test]
    fn test_layout_rows_and_columns() {
        let ceo = person("Ceo", None);
        let eng = person("Eng", Some(ceo.id));
        let ops = person("Ops", Some(ceo.id));
        let all = vec![ceo.clone(), eng.clone(), ops.clone()];

        let forest = build_forest(&all).unwrap();
        let placements = layout_forest(&forest);
        assert_eq!(placements.len(), 3);

        let by_id: HashMap<Uuid, &ChartPlacement> =
            placements.iter().map(|p| (p.person_id, p)).collect();
        assert_eq!(by_id[&ceo.id].row, 0);
        assert_eq!(by_id[&eng.id].row, 1);
        assert_eq!(by_id[&ops.id].row, 1);
        // Leaves at columns 0 and 1; parent centered at 0.5
        assert_eq!(by_id[&ceo.id].col, 0.5);
    }

    #[test]
    fn test_layout_deterministic() {
        let ceo = person("Ceo", None);
        let eng = person("Eng", Some(ceo.id));
        let ops = person("Ops", Some(ceo.id));
        let all = vec![ops.clone(), eng.clone(), ceo.clone()];

        let a = layout_forest(&build_forest(&all).unwrap());
        let b = layout_forest(&build_forest(&all).unwrap());
        let cols_a: Vec<(Uuid, f64)> = a.iter().map(|p| (p.person_id, p.col)).collect();
        let cols_b: Vec<(Uuid, f64)> = b.iter().map(|p| (p.person_id, p.col)).collect();
        assert_eq!(cols_a, cols_b);
    }
}
