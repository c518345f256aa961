//! Ordering of resource dependency graphs.

use std::collections::HashMap;

use hashlinks_types::ResourceDependency;

use crate::error::{CacheError, CacheResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Return `resources` in an order where every node follows its
/// dependencies.
///
/// The whole graph is checked before anything is returned: duplicate ids,
/// dependencies on ids outside the list, and cycles are all errors. Among
/// independent nodes the input order is kept.
pub fn load_order(resources: &[ResourceDependency]) -> CacheResult<Vec<&ResourceDependency>> {
    let mut by_id: HashMap<&str, &ResourceDependency> = HashMap::with_capacity(resources.len());
    for resource in resources {
        if by_id.insert(resource.id.as_str(), resource).is_some() {
            return Err(CacheError::DuplicateResource(resource.id.clone()));
        }
    }
    for resource in resources {
        if let Some(missing) = resource
            .depends_on
            .iter()
            .find(|dep| !by_id.contains_key(dep.as_str()))
        {
            return Err(CacheError::UnknownDependency {
                id: resource.id.clone(),
                dependency: missing.clone(),
            });
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(resources.len());
    let mut order = Vec::with_capacity(resources.len());
    let mut stack = Vec::new();
    for resource in resources {
        visit(resource, &by_id, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    node: &'a ResourceDependency,
    by_id: &HashMap<&str, &'a ResourceDependency>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    order: &mut Vec<&'a ResourceDependency>,
) -> CacheResult<()> {
    match marks.get(node.id.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = stack
                .iter()
                .position(|id| *id == node.id)
                .unwrap_or_default();
            let mut path: Vec<String> = stack[start..].iter().map(|id| id.to_string()).collect();
            path.push(node.id.clone());
            return Err(CacheError::DependencyCycle { path });
        }
        None => {}
    }

    marks.insert(&node.id, Mark::Visiting);
    stack.push(&node.id);
    for dep in &node.depends_on {
        if let Some(child) = by_id.get(dep.as_str()) {
            visit(*child, by_id, marks, stack, order)?;
        }
    }
    stack.pop();
    marks.insert(&node.id, Mark::Done);
    order.push(node);
    Ok(())
}
