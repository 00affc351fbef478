//! Dependency layering
//!
//! Groups named entities into layers so that every entity sits in a layer
//! strictly after all of its dependencies. Names and dependencies are visited
//! in lexicographic order, which makes the result independent of the order
//! the caller asked for them in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayeringError {
    #[error("Found a dependency cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Stack '{wanted_by}' depends on unknown stack '{name}'")]
    Unknown { name: String, wanted_by: String },

    #[error("No such stack '{0}'")]
    Missing(String),
}

/// Ordered layers of `(name, entity)` pairs
pub type Layers<'a, T> = Vec<Vec<(&'a str, &'a T)>>;

/// Layers `names` (and everything they depend on) from `all`
///
/// `deps` reports the direct dependencies of an entity. Dependencies are
/// pulled into the result even when they were not asked for.
pub fn layered<'a, T, S, F>(
    all: &'a BTreeMap<String, T>,
    names: impl IntoIterator<Item = S>,
    deps: F,
) -> Result<Layers<'a, T>, LayeringError>
where
    S: AsRef<str>,
    F: Fn(&T) -> Vec<String>,
{
    let wanted: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();

    let mut layering = Layering {
        all,
        deps,
        accounted: HashMap::new(),
        layers: Vec::new(),
    };

    for name in &wanted {
        let (key, _) = all
            .get_key_value(name.as_str())
            .ok_or_else(|| LayeringError::Missing(name.clone()))?;
        layering.visit(key, &mut Vec::new())?;
    }

    Ok(layering.layers)
}

/// Index of the layer holding `name`, if any
pub fn layer_index<T>(layers: &Layers<'_, T>, name: &str) -> Option<usize> {
    layers
        .iter()
        .position(|layer| layer.iter().any(|(n, _)| *n == name))
}

struct Layering<'a, T, F> {
    all: &'a BTreeMap<String, T>,
    deps: F,
    accounted: HashMap<&'a str, usize>,
    layers: Layers<'a, T>,
}

impl<'a, T, F> Layering<'a, T, F>
where
    F: Fn(&T) -> Vec<String>,
{
    fn visit(&mut self, name: &'a str, chain: &mut Vec<&'a str>) -> Result<usize, LayeringError> {
        if let Some(index) = self.accounted.get(name) {
            return Ok(*index);
        }

        let all = self.all;
        let entity = &all[name];

        let mut deps = (self.deps)(entity);
        deps.sort();
        deps.dedup();

        chain.push(name);
        let mut index = 0;
        for dep in deps {
            if chain.iter().any(|n| *n == dep) {
                let mut cycle: Vec<String> = chain.iter().map(|n| n.to_string()).collect();
                cycle.push(dep);
                return Err(LayeringError::Cycle { chain: cycle });
            }

            let (dep_key, _) = all
                .get_key_value(dep.as_str())
                .ok_or_else(|| LayeringError::Unknown {
                    name: dep.clone(),
                    wanted_by: name.to_string(),
                })?;

            index = index.max(self.visit(dep_key, chain)? + 1);
        }
        chain.pop();

        if self.layers.len() <= index {
            self.layers.resize_with(index + 1, Vec::new);
        }
        self.layers[index].push((name, entity));
        self.accounted.insert(name, index);

        Ok(index)
    }
}
