//! Generators and services (§3, §4.3): attribute values computed from other
//! attributes, resolved in topological dependency order and applied to a
//! schema-checked entry.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::checked::SchemaCheckedEntry;
use crate::entry::EntryLike;
use crate::result::{GenerationError, LocalError};

pub type GeneratorFn = Rc<dyn Fn(&dyn EntryLike) -> Result<Vec<Vec<u8>>, String>>;

/// A function producing an attribute's values from other attributes.
/// `name` is the attribute it produces — the same name a `Service` lists in
/// its `generate` set (§3: "generate: list<generator-name>").
#[derive(Clone)]
pub struct Generator {
    pub name: String,
    pub required: Vec<String>,
    pub func: GeneratorFn,
}

impl Generator {
    pub fn new(name: impl Into<String>, required: Vec<String>, func: GeneratorFn) -> Generator {
        Generator { name: name.into(), required, func }
    }
}

/// A named bundle of static attributes, generator names and service
/// dependencies (§3).
#[derive(Clone, Default)]
pub struct Service {
    pub name: String,
    pub static_attrs: Vec<(String, Vec<Vec<u8>>)>,
    pub generate: Vec<String>,
    pub depends: Vec<String>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Service {
        Service { name: name.into(), ..Default::default() }
    }
}

/// Holds both registries by name (§3).
#[derive(Default)]
pub struct Registry {
    generators: HashMap<String, Generator>,
    services: HashMap<String, Service>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register_generator(&mut self, generator: Generator) {
        self.generators.insert(generator.name.clone(), generator);
    }

    pub fn register_service(&mut self, service: Service) {
        self.services.insert(service.name.clone(), service);
    }

    pub fn generator(&self, name: &str) -> Option<&Generator> {
        self.generators.get(name)
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }
}

/// Filters a service's static attributes and generated attributes down to
/// those not already present on `entry`, so adding a service to an
/// already-populated entry doesn't clobber existing values (§4.3).
pub fn adapt_service(entry: &dyn EntryLike, service: &Service) -> Service {
    Service {
        name: service.name.clone(),
        static_attrs: service.static_attrs.iter().filter(|(attr, _)| entry.get_value(attr).is_none()).cloned().collect(),
        generate: service.generate.iter().filter(|attr| entry.get_value(attr).is_none()).cloned().collect(),
        depends: service.depends.clone(),
    }
}

/// A schema-checked entry augmented with generator/service resolution.
pub struct AccountEntry {
    checked: SchemaCheckedEntry,
    registry: Rc<Registry>,
    pending_generate: Vec<String>,
    pending_static: Vec<(String, Vec<Vec<u8>>)>,
}

impl AccountEntry {
    pub fn new(checked: SchemaCheckedEntry, registry: Rc<Registry>) -> AccountEntry {
        AccountEntry { checked, registry, pending_generate: Vec::new(), pending_static: Vec::new() }
    }

    pub fn checked(&self) -> &SchemaCheckedEntry {
        &self.checked
    }

    pub fn into_checked(self) -> SchemaCheckedEntry {
        self.checked
    }

    fn reachable(&self, attr: &str, in_flight: &[String]) -> bool {
        self.checked.entry().exists(attr)
            || self.pending_generate.iter().any(|a| a == attr)
            || in_flight.iter().any(|a| a == attr)
    }

    /// Marks an attribute as to be generated; it must be produced by a
    /// registered generator (§4.3).
    pub fn add_generate(&mut self, attr: &str) -> Result<(), LocalError> {
        if self.registry.generator(attr).is_none() {
            return Err(LocalError::NoGenerator(attr.to_string()));
        }
        if !self.pending_generate.iter().any(|a| a == attr) {
            self.pending_generate.push(attr.to_string());
        }
        Ok(())
    }

    /// Enqueues a service: validates its dependency chain and every
    /// generator's reachability before queuing static attributes and
    /// generated attributes (§4.3).
    pub fn add_service(&mut self, name: &str) -> Result<(), LocalError> {
        let service = self.registry.service(name).ok_or_else(|| LocalError::NoService(name.to_string()))?.clone();

        for dep in &service.depends {
            if self.registry.service(dep).is_none() {
                return Err(LocalError::ServiceDepUnsatisfiable { service: name.to_string(), dep: dep.clone() });
            }
        }

        let adapted = adapt_service(self.checked.entry(), &service);

        for attr in &adapted.generate {
            let generator = self
                .registry
                .generator(attr)
                .ok_or_else(|| LocalError::NoGenerator(attr.clone()))?;
            for req in &generator.required {
                if !self.reachable(req, &adapted.generate) {
                    return Err(LocalError::GeneratorDepUnsatisfiable { service: name.to_string(), attr: req.clone() });
                }
            }
        }

        for attr in &adapted.generate {
            if !self.pending_generate.iter().any(|a| a == attr) {
                self.pending_generate.push(attr.clone());
            }
        }
        self.pending_static.extend(adapted.static_attrs);
        Ok(())
    }

    /// Runs the topological generation algorithm of §4.3.
    pub fn generate(&mut self) -> Result<(), LocalError> {
        for (attr, values) in self.pending_static.drain(..).collect::<Vec<_>>() {
            self.checked.replace(&(attr, values)).map_err(|e| match e {
                LocalError::SingleValue(a) => LocalError::SingleValue(a),
                other => other,
            })?;
        }

        let pending = self.pending_generate.clone();
        let order = topo_sort(&pending, |attr| {
            self.registry
                .generator(attr)
                .map(|g| g.required.iter().filter(|r| pending.contains(r)).cloned().collect())
                .unwrap_or_default()
        })?;

        for attr in order {
            let generator = self.registry.generator(&attr).expect("validated at add time").clone();
            for req in &generator.required {
                let has_value = self.checked.entry().get_value(req).map(|v| !v.is_empty()).unwrap_or(false);
                if !has_value {
                    return Err(LocalError::GenerationFailed { attr: attr.clone(), source: GenerationError::MissingRequired(req.clone()) });
                }
            }
            let values = (generator.func)(self.checked.entry())
                .map_err(|msg| LocalError::GenerationFailed { attr: attr.clone(), source: GenerationError::GeneratorError(msg) })?;
            self.checked.replace(&(attr.clone(), values))?;
        }

        self.pending_generate.clear();
        Ok(())
    }
}

/// Kahn's algorithm: `a` must run after every `b` in `deps(a)`. Returns the
/// remaining (unsortable) set on a cycle, per `Cannot_sort_dependancies`.
fn topo_sort<F: Fn(&str) -> Vec<String>>(nodes: &[String], deps: F) -> Result<Vec<String>, LocalError> {
    let set: HashSet<&str> = nodes.iter().map(String::as_str).collect();
    let mut indegree: HashMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in nodes {
        for dep in deps(node) {
            if set.contains(dep.as_str()) {
                *indegree.get_mut(node.as_str()).unwrap() += 1;
            }
        }
    }
    for node in nodes {
        for dep in deps(node) {
            if let Some(dep_ref) = set.get(dep.as_str()) {
                dependents.entry(dep_ref).or_default().push(node.as_str());
            }
        }
    }

    let mut queue: Vec<&str> = nodes.iter().map(String::as_str).filter(|n| indegree[n] == 0).collect();
    let mut order = Vec::new();
    while let Some(n) = queue.pop() {
        order.push(n.to_string());
        if let Some(next) = dependents.get(n) {
            for &m in next {
                let d = indegree.get_mut(m).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push(m);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let remaining: Vec<String> = nodes.iter().filter(|n| !order.contains(n)).cloned().collect();
        return Err(LocalError::CannotSortDependancies(remaining));
    }
    Ok(order)
}
