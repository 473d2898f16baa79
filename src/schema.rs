//! Parsed representation of a directory server's schema (§3, §4.2): attribute
//! types and object classes keyed by both OID and case-folded name, with
//! alias resolution. The raw RFC 4512 schema-string grammar is an external
//! collaborator (§6) — this module is what its parser hands back, and what
//! `schema()` (§4.4) hands to `SchemaCheckedEntry`/`AccountEntry`.

use std::collections::{HashMap, HashSet};

use crate::oid::Oid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClassKind {
    Structural,
    Auxiliary,
    Abstract,
}

/// One attribute-type definition, as the schema parser would build it from a
/// server's `attributeTypes` values.
#[derive(Clone, Debug)]
pub struct AttributeTypeDef {
    pub oid: Oid,
    /// Canonical name first, followed by any aliases.
    pub names: Vec<String>,
    pub single_value: bool,
    pub syntax: Option<Oid>,
}

/// One object-class definition, as the schema parser would build it from a
/// server's `objectClasses` values. `sup`/`must`/`may` reference other
/// classes/attributes *by name*; `Schema::new` resolves them to OIDs.
#[derive(Clone, Debug)]
pub struct ObjectClassDef {
    pub oid: Oid,
    pub names: Vec<String>,
    pub sup: Vec<String>,
    pub must: Vec<String>,
    pub may: Vec<String>,
    pub kind: ObjectClassKind,
}

#[derive(Debug)]
struct AttributeType {
    oid: Oid,
    primary_name: String,
    single_value: bool,
    #[allow(dead_code)]
    syntax: Option<Oid>,
}

#[derive(Debug)]
struct ObjectClass {
    oid: Oid,
    primary_name: String,
    sup: Vec<Oid>,
    must: Vec<Oid>,
    may: Vec<Oid>,
    #[allow(dead_code)]
    kind: ObjectClassKind,
}

/// Two indexes per kind (OID→definition, name→OID), with alias resolution,
/// per §3.
#[derive(Debug)]
pub struct Schema {
    attrs_by_oid: HashMap<Oid, AttributeType>,
    attrs_by_name: HashMap<String, Oid>,
    ocs_by_oid: HashMap<Oid, ObjectClass>,
    ocs_by_name: HashMap<String, Oid>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Schema {
    pub fn new(attrs: Vec<AttributeTypeDef>, ocs: Vec<ObjectClassDef>) -> Schema {
        let mut attrs_by_oid = HashMap::new();
        let mut attrs_by_name = HashMap::new();
        for def in attrs {
            for name in &def.names {
                attrs_by_name.insert(fold(name), def.oid.clone());
            }
            let primary_name = def.names.first().cloned().unwrap_or_else(|| def.oid.to_string());
            attrs_by_oid.insert(
                def.oid.clone(),
                AttributeType { oid: def.oid, primary_name, single_value: def.single_value, syntax: def.syntax },
            );
        }

        let mut ocs_by_name = HashMap::new();
        for def in &ocs {
            for name in &def.names {
                ocs_by_name.insert(fold(name), def.oid.clone());
            }
        }

        let resolve_attr_names = |names: &[String], attrs_by_name: &HashMap<String, Oid>| -> Vec<Oid> {
            names.iter().filter_map(|n| attrs_by_name.get(&fold(n)).cloned()).collect()
        };
        let resolve_oc_names = |names: &[String]| -> Vec<Oid> {
            names.iter().filter_map(|n| ocs_by_name.get(&fold(n)).cloned()).collect()
        };

        let mut ocs_by_oid = HashMap::new();
        for def in ocs {
            let primary_name = def.names.first().cloned().unwrap_or_else(|| def.oid.to_string());
            let sup = resolve_oc_names(&def.sup);
            let must = resolve_attr_names(&def.must, &attrs_by_name);
            let may = resolve_attr_names(&def.may, &attrs_by_name);
            ocs_by_oid.insert(def.oid.clone(), ObjectClass { oid: def.oid, primary_name, sup, must, may, kind: def.kind });
        }

        Schema { attrs_by_oid, attrs_by_name, ocs_by_oid, ocs_by_name }
    }

    /// Resolve an attribute name (any case, any alias) to its OID.
    pub fn resolve_attr(&self, name: &str) -> Option<Oid> {
        self.attrs_by_name.get(&fold(name)).cloned()
    }

    /// Resolve an object-class name (any case, any alias) to its OID.
    pub fn resolve_oc(&self, name: &str) -> Option<Oid> {
        self.ocs_by_name.get(&fold(name)).cloned()
    }

    pub fn attr_name(&self, oid: &Oid) -> Option<&str> {
        self.attrs_by_oid.get(oid).map(|a| a.primary_name.as_str())
    }

    pub fn oc_name(&self, oid: &Oid) -> Option<&str> {
        self.ocs_by_oid.get(oid).map(|o| o.primary_name.as_str())
    }

    pub fn is_single_value(&self, oid: &Oid) -> bool {
        self.attrs_by_oid.get(oid).map(|a| a.single_value).unwrap_or(false)
    }

    /// `equateAttrs` of §8 S2: two names denote the same attribute iff the
    /// schema maps them to the same OID.
    pub fn equate_attrs(&self, a: &str, b: &str) -> bool {
        match (self.resolve_attr(a), self.resolve_attr(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Transitive SUP closure of a set of object-class OIDs, themselves
    /// included.
    pub fn sup_closure(&self, classes: &[Oid]) -> HashSet<Oid> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Oid> = classes.to_vec();
        while let Some(oid) = stack.pop() {
            if seen.insert(oid.clone()) {
                if let Some(oc) = self.ocs_by_oid.get(&oid) {
                    stack.extend(oc.sup.iter().cloned());
                }
            }
        }
        seen
    }

    /// MUST/MAY union over the transitive SUP closure of `classes`
    /// (invariant 8, §8).
    pub fn must_may(&self, classes: &[Oid]) -> (HashSet<Oid>, HashSet<Oid>) {
        let closure = self.sup_closure(classes);
        let mut must = HashSet::new();
        let mut may = HashSet::new();
        for oid in &closure {
            if let Some(oc) = self.ocs_by_oid.get(oid) {
                must.extend(oc.must.iter().cloned());
                may.extend(oc.may.iter().cloned());
            }
        }
        (must, may)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn test_schema() -> Schema {
        let attrs = vec![
            AttributeTypeDef { oid: oid("0.9.2342.19200300.100.1.1"), names: vec!["uid".into(), "userID".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("2.5.4.4"), names: vec!["sn".into(), "surname".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("2.5.4.3"), names: vec!["cn".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("0.9.2342.19200300.100.1.3"), names: vec!["mail".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("1.2.3.4"), names: vec!["single".into()], single_value: true, syntax: None },
        ];
        let ocs = vec![
            ObjectClassDef {
                oid: oid("2.5.6.6"),
                names: vec!["person".into()],
                sup: vec![],
                must: vec!["sn".into(), "cn".into()],
                may: vec![],
                kind: ObjectClassKind::Structural,
            },
            ObjectClassDef {
                oid: oid("2.16.840.1.113730.3.2.2"),
                names: vec!["inetOrgPerson".into()],
                sup: vec!["person".into()],
                must: vec![],
                may: vec!["mail".into(), "uid".into()],
                kind: ObjectClassKind::Structural,
            },
        ];
        Schema::new(attrs, ocs)
    }

    #[test]
    fn alias_equality_s2() {
        let schema = test_schema();
        assert!(schema.equate_attrs("uid", "userID"));
        assert!(schema.equate_attrs("UID", "userid"));
        assert!(!schema.equate_attrs("uid", "sn"));
    }

    #[test]
    fn must_closure_over_sup_invariant_8() {
        let schema = test_schema();
        let inet = schema.resolve_oc("inetOrgPerson").unwrap();
        let (must, may) = schema.must_may(&[inet]);
        assert!(must.contains(&schema.resolve_attr("sn").unwrap()));
        assert!(must.contains(&schema.resolve_attr("cn").unwrap()));
        assert!(may.contains(&schema.resolve_attr("mail").unwrap()));
        assert!(may.contains(&schema.resolve_attr("uid").unwrap()));
    }
}
