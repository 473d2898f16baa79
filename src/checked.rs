//! A schema-checked entry (§3, §4.2): binds an `Entry` to a `Schema`,
//! validates attribute/object-class legality and tracks required/allowed/
//! present/missing attribute sets, recomputed on every mutation.

use std::collections::HashSet;
use std::rc::Rc;

use crate::entry::{ChangeType, Entry, EntryLike, ModOp, Op, Record};
use crate::oid::Oid;
use crate::result::LocalError;
use crate::schema::Schema;

/// Schema-check strictness (§3 glossary: "Flavor").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// Unknown classes/attributes are silently dropped from the checked view.
    Optimistic,
    /// Unknown classes/attributes are rejected outright.
    Pessimistic,
}

#[derive(Debug)]
pub struct SchemaCheckedEntry {
    entry: Entry,
    schema: Rc<Schema>,
    flavor: Flavor,
    must: HashSet<Oid>,
    may: HashSet<Oid>,
    present: HashSet<Oid>,
    missing: HashSet<Oid>,
    disallowed: Vec<String>,
}

fn object_classes(entry: &Entry) -> Vec<String> {
    entry
        .get_value("objectClass")
        .map(|vs| vs.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect())
        .unwrap_or_default()
}

impl SchemaCheckedEntry {
    pub fn of_entry(flavor: Flavor, schema: Rc<Schema>, entry: Entry) -> Result<SchemaCheckedEntry, LocalError> {
        let mut checked = SchemaCheckedEntry {
            entry,
            schema,
            flavor,
            must: HashSet::new(),
            may: HashSet::new(),
            present: HashSet::new(),
            missing: HashSet::new(),
            disallowed: Vec::new(),
        };
        checked.recompute()?;
        Ok(checked)
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn into_entry(self) -> Entry {
        self.entry
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn recompute(&mut self) -> Result<(), LocalError> {
        let mut classes = Vec::new();
        for name in object_classes(&self.entry) {
            match self.schema.resolve_oc(&name) {
                Some(oid) => classes.push(oid),
                None => {
                    if self.flavor == Flavor::Pessimistic {
                        return Err(LocalError::InvalidObjectClass(name));
                    }
                }
            }
        }

        let (must, may) = self.schema.must_may(&classes);
        let cover: HashSet<Oid> = must.union(&may).cloned().collect();

        let mut present = HashSet::new();
        let mut disallowed = Vec::new();
        for name in self.entry.attributes() {
            if name.eq_ignore_ascii_case("objectClass") {
                continue;
            }
            match self.schema.resolve_attr(name) {
                Some(oid) if cover.contains(&oid) => {
                    present.insert(oid);
                }
                Some(_) | None => {
                    // Unknown to the schema, or known but not covered by the
                    // chosen classes: optimistic drops it from the view,
                    // pessimistic rejects.
                    if self.flavor == Flavor::Pessimistic {
                        return Err(LocalError::InvalidAttribute(name.to_string()));
                    }
                    disallowed.push(name.to_string());
                }
            }
        }

        let missing: HashSet<Oid> = must.difference(&present).cloned().collect();

        self.must = must;
        self.may = may;
        self.present = present;
        self.missing = missing;
        self.disallowed = disallowed;
        Ok(())
    }

    fn check_single_value(&self, attr: &str, count: usize) -> Result<(), LocalError> {
        if let Some(oid) = self.schema.resolve_attr(attr) {
            if self.schema.is_single_value(&oid) && count > 1 {
                return Err(LocalError::SingleValue(attr.to_string()));
            }
        }
        Ok(())
    }

    pub fn add(&mut self, op: &Op) -> Result<(), LocalError> {
        let existing = self.entry.get_value(&op.0).map(|v| v.len()).unwrap_or(0);
        let added = op.1.iter().filter(|v| !self.entry.get_value(&op.0).map(|have| have.contains(v)).unwrap_or(false)).count();
        self.check_single_value(&op.0, existing + added)?;
        self.entry.add(op);
        self.recompute()
    }

    pub fn delete(&mut self, op: &Op) -> Result<(), LocalError> {
        self.entry.delete(op);
        self.recompute()
    }

    pub fn replace(&mut self, op: &Op) -> Result<(), LocalError> {
        self.check_single_value(&op.0, op.1.len())?;
        self.entry.replace(op);
        self.recompute()
    }

    pub fn modify(&mut self, records: &[Record]) -> Result<(), LocalError> {
        for (kind, attr, values) in records {
            let o = (attr.clone(), values.clone());
            match kind {
                ModOp::Add => self.add(&o)?,
                ModOp::Delete => self.delete(&o)?,
                ModOp::Replace => self.replace(&o)?,
            }
        }
        Ok(())
    }

    pub fn is_allowed(&self, attr: &str) -> bool {
        match self.schema.resolve_attr(attr) {
            Some(oid) => self.must.contains(&oid) || self.may.contains(&oid),
            None => false,
        }
    }

    pub fn is_missing(&self, attr: &str) -> bool {
        match self.schema.resolve_attr(attr) {
            Some(oid) => self.missing.contains(&oid),
            None => false,
        }
    }

    fn names(&self, oids: &HashSet<Oid>) -> Vec<String> {
        oids.iter().filter_map(|o| self.schema.attr_name(o)).map(str::to_string).collect()
    }

    pub fn list_allowed(&self) -> Vec<String> {
        self.names(&self.must.union(&self.may).cloned().collect())
    }

    pub fn list_missing(&self) -> Vec<String> {
        self.names(&self.missing)
    }

    pub fn list_present(&self) -> Vec<String> {
        self.names(&self.present)
    }

    pub fn list_must(&self) -> Vec<String> {
        self.names(&self.must)
    }

    pub fn list_disallowed(&self) -> &[String] {
        &self.disallowed
    }

    /// Raises `Objectclass_is_required` if no `objectClass` attribute is
    /// present and a commit is attempted (§4.2).
    pub fn validate_for_commit(&self) -> Result<(), LocalError> {
        if object_classes(&self.entry).is_empty() {
            return Err(LocalError::ObjectclassIsRequired);
        }
        Ok(())
    }

    pub fn changes(&self) -> &[Record] {
        self.entry.changes()
    }

    pub fn flush_changes(&mut self) {
        self.entry.flush_changes()
    }

    pub fn dn(&self) -> &str {
        self.entry.dn()
    }

    pub fn set_dn(&mut self, dn: impl Into<String>) {
        self.entry.set_dn(dn)
    }

    pub fn changetype(&self) -> ChangeType {
        self.entry.changetype()
    }
}

impl EntryLike for SchemaCheckedEntry {
    fn attribute_names(&self) -> Vec<&str> {
        self.entry.attributes()
    }

    fn get_value(&self, attr: &str) -> Option<&[Vec<u8>]> {
        self.entry.get_value(attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeTypeDef, ObjectClassDef, ObjectClassKind};

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn schema() -> Rc<Schema> {
        let attrs = vec![
            AttributeTypeDef { oid: oid("2.5.4.3"), names: vec!["cn".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("2.5.4.4"), names: vec!["sn".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("0.9.2342.19200300.100.1.3"), names: vec!["mail".into()], single_value: false, syntax: None },
            AttributeTypeDef { oid: oid("9.9.9.9"), names: vec!["badAttr".into()], single_value: false, syntax: None },
        ];
        let ocs = vec![ObjectClassDef {
            oid: oid("2.16.840.1.113730.3.2.2"),
            names: vec!["inetOrgPerson".into()],
            sup: vec![],
            must: vec!["cn".into(), "sn".into()],
            may: vec!["mail".into()],
            kind: ObjectClassKind::Structural,
        }];
        Rc::new(Schema::new(attrs, ocs))
    }

    fn entry_with(oc: &str, attrs: &[(&str, &str)]) -> Entry {
        let mut e = Entry::new("cn=x,dc=y", ChangeType::Modify);
        e.add(&("objectClass".to_string(), vec![oc.as_bytes().to_vec()]));
        for (name, value) in attrs {
            e.add(&(name.to_string(), vec![value.as_bytes().to_vec()]));
        }
        e
    }

    /// S3, §8: pessimistic rejection of a disallowed attribute.
    #[test]
    fn s3_pessimistic_rejects_disallowed_attribute() {
        let e = entry_with("inetOrgPerson", &[("cn", "a"), ("sn", "b"), ("badAttr", "x")]);
        let err = SchemaCheckedEntry::of_entry(Flavor::Pessimistic, schema(), e).unwrap_err();
        assert!(matches!(err, LocalError::InvalidAttribute(a) if a == "badAttr"));
    }

    #[test]
    fn optimistic_drops_unknown_silently() {
        let e = entry_with("inetOrgPerson", &[("cn", "a"), ("sn", "b"), ("badAttr", "x")]);
        let checked = SchemaCheckedEntry::of_entry(Flavor::Optimistic, schema(), e).unwrap();
        assert!(!checked.list_present().iter().any(|n| n == "badAttr"));
        assert_eq!(checked.list_disallowed(), &["badAttr".to_string()]);
        // still present in the raw entry
        assert!(checked.entry().exists("badAttr"));
    }

    #[test]
    fn pessimistic_rejects_unknown_objectclass() {
        let e = entry_with("noSuchClass", &[]);
        let err = SchemaCheckedEntry::of_entry(Flavor::Pessimistic, schema(), e).unwrap_err();
        assert!(matches!(err, LocalError::InvalidObjectClass(c) if c == "noSuchClass"));
    }

    #[test]
    fn missing_must_tracked() {
        let e = entry_with("inetOrgPerson", &[("cn", "a")]);
        let checked = SchemaCheckedEntry::of_entry(Flavor::Optimistic, schema(), e).unwrap();
        assert!(checked.is_missing("sn"));
        assert!(!checked.is_missing("cn"));
    }

    #[test]
    fn objectclass_required_on_commit() {
        let e = Entry::new("cn=x,dc=y", ChangeType::Modify);
        let checked = SchemaCheckedEntry::of_entry(Flavor::Optimistic, schema(), e).unwrap();
        assert!(matches!(checked.validate_for_commit(), Err(LocalError::ObjectclassIsRequired)));
    }

    #[test]
    fn alias_resolution_in_queries() {
        let e = entry_with("inetOrgPerson", &[("cn", "a"), ("sn", "b")]);
        let checked = SchemaCheckedEntry::of_entry(Flavor::Optimistic, schema(), e).unwrap();
        assert!(checked.is_allowed("mail"));
        assert!(checked.is_allowed("CN"));
    }
}
