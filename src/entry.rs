//! The directory-entry object model and its change-log algebra (§3, §4.1).
//!
//! `Entry` maintains a present attribute map plus a change log: mutations
//! accumulate log records without contacting a server, and `changes()` is
//! the authoritative description of what must be sent to reconcile the
//! entry with server state. The log is never compacted (§9): a replay must
//! reproduce server-side ordering, which a minimal present-map diff cannot
//! generally guarantee.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    ModRdn,
    ModDn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// `(attr, values)`, as taken by the primitive operations.
pub type Op = (String, Vec<Vec<u8>>);
/// `(kind, attr, values)`, as taken by `modify`/produced by `changes`/`diff`.
pub type Record = (ModOp, String, Vec<Vec<u8>>);

#[derive(Clone, Debug)]
struct Attribute {
    /// Display name as most recently set; lookups are case-insensitive.
    name: String,
    values: Vec<Vec<u8>>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// The read-only capability `diff` needs: enumerate attributes, read values.
/// Kept as a trait (rather than hardwired to `Entry`) per §9, so schema-aware
/// wrappers can diff against each other without exposing their full API.
pub trait EntryLike {
    fn attribute_names(&self) -> Vec<&str>;
    fn get_value(&self, attr: &str) -> Option<&[Vec<u8>]>;
}

/// One directory object: DN, change-type tag, present attribute map and
/// change log (§3).
#[derive(Clone, Debug, Default)]
pub struct Entry {
    dn: String,
    changetype: Option<ChangeType>,
    present: HashMap<String, Attribute>,
    log: Vec<Record>,
    new_rdn: Option<String>,
    new_superior: Option<String>,
}

impl Entry {
    pub fn new(dn: impl Into<String>, changetype: ChangeType) -> Entry {
        Entry { dn: dn.into(), changetype: Some(changetype), present: HashMap::new(), log: Vec::new(), new_rdn: None, new_superior: None }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: impl Into<String>) {
        self.dn = dn.into();
    }

    pub fn changetype(&self) -> ChangeType {
        self.changetype.unwrap_or(ChangeType::Modify)
    }

    pub fn set_changetype(&mut self, changetype: ChangeType) {
        self.changetype = Some(changetype);
    }

    /// New RDN for a ModRdn/ModDn entry (§4.4 `modrdn`).
    pub fn set_new_rdn(&mut self, rdn: impl Into<String>, new_superior: Option<String>) {
        self.new_rdn = Some(rdn.into());
        self.new_superior = new_superior;
    }

    pub fn new_rdn(&self) -> Option<&str> {
        self.new_rdn.as_deref()
    }

    pub fn new_superior(&self) -> Option<&str> {
        self.new_superior.as_deref()
    }

    pub fn exists(&self, attr: &str) -> bool {
        self.present.contains_key(&fold(attr))
    }

    pub fn get_value(&self, attr: &str) -> Option<&[Vec<u8>]> {
        self.present.get(&fold(attr)).map(|a| a.values.as_slice())
    }

    pub fn attributes(&self) -> Vec<&str> {
        self.present.values().map(|a| a.name.as_str()).collect()
    }

    pub fn changes(&self) -> &[Record] {
        &self.log
    }

    /// Empties the change log without touching the present map; used after a
    /// successful commit, or to treat the entry as freshly read (§3).
    pub fn flush_changes(&mut self) {
        self.log.clear();
    }

    fn append_log(&mut self, changetype: ChangeType, op: ModOp, attr: &str, values: Vec<Vec<u8>>) {
        if changetype != ChangeType::Delete {
            self.log.push((op, attr.to_string(), values));
        }
    }

    /// ADD(attr, vs): union `vs` into the attribute's value set, creating it
    /// if absent. ADD of an empty `vs` to an attribute that doesn't exist yet
    /// is a no-op: nothing is created and nothing is logged.
    pub fn add(&mut self, op: &Op) {
        let (attr, values) = op;
        if values.is_empty() && !self.exists(attr) {
            return;
        }
        let key = fold(attr);
        let entry = self.present.entry(key).or_insert_with(|| Attribute { name: attr.clone(), values: Vec::new() });
        entry.name = attr.clone();
        for v in values {
            if !entry.values.contains(v) {
                entry.values.push(v.clone());
            }
        }
        self.append_log(self.changetype(), ModOp::Add, attr, values.clone());
    }

    /// DELETE(attr, vs): empty `vs` removes the attribute entirely; a
    /// non-empty `vs` removes those values only, leaving a value-level
    /// delete recorded even if the attribute ends up empty (§4.1: the
    /// server — not this entry — is the authority on whether that's legal).
    pub fn delete(&mut self, op: &Op) {
        let (attr, values) = op;
        let key = fold(attr);
        if values.is_empty() {
            self.present.remove(&key);
        } else if let Some(entry) = self.present.get_mut(&key) {
            entry.values.retain(|v| !values.contains(v));
            if entry.values.is_empty() {
                self.present.remove(&key);
            }
        }
        self.append_log(self.changetype(), ModOp::Delete, attr, values.clone());
    }

    /// REPLACE(attr, vs): overwrite the value set; an empty `vs` deletes the
    /// attribute.
    pub fn replace(&mut self, op: &Op) {
        let (attr, values) = op;
        let key = fold(attr);
        if values.is_empty() {
            self.present.remove(&key);
        } else {
            self.present.insert(key, Attribute { name: attr.clone(), values: values.clone() });
        }
        self.append_log(self.changetype(), ModOp::Replace, attr, values.clone());
    }

    /// Applies each record in order; equivalent to the matching primitive
    /// calls run in sequence.
    pub fn modify(&mut self, records: &[Record]) {
        for (kind, attr, values) in records {
            let op = (attr.clone(), values.clone());
            match kind {
                ModOp::Add => self.add(&op),
                ModOp::Delete => self.delete(&op),
                ModOp::Replace => self.replace(&op),
            }
        }
    }

    /// Minimal record list to transform `other`'s present state into this
    /// entry's present state (§4.1, invariants 5/6).
    pub fn diff(&self, other: &Entry) -> Vec<Record> {
        diff(self, other)
    }

    /// Exports the present attribute map for the wire (change log ignored).
    pub fn to_wire(&self) -> (String, HashMap<String, Vec<Vec<u8>>>) {
        let attrs = self.present.values().map(|a| (a.name.clone(), a.values.clone())).collect();
        (self.dn.clone(), attrs)
    }

    /// Builds a fresh entry from a wire search result. A referral becomes an
    /// entry carrying its URLs under the `ref` attribute and a sentinel DN
    /// (§4.1, §9 open questions).
    pub fn of_wire(object_name: String, attributes: HashMap<String, Vec<Vec<u8>>>) -> Entry {
        let mut e = Entry::new(object_name, ChangeType::Modify);
        for (name, values) in attributes {
            e.present.insert(fold(&name), Attribute { name, values });
        }
        e
    }

    pub fn of_referral(urls: Vec<String>) -> Entry {
        let mut e = Entry::new("", ChangeType::Modify);
        let values = urls.into_iter().map(String::into_bytes).collect();
        e.present.insert("ref".to_string(), Attribute { name: "ref".to_string(), values });
        e
    }
}

impl EntryLike for Entry {
    fn attribute_names(&self) -> Vec<&str> {
        self.attributes()
    }

    fn get_value(&self, attr: &str) -> Option<&[Vec<u8>]> {
        Entry::get_value(self, attr)
    }
}

/// Free function per §9: `diff` only needs the ability to enumerate
/// attributes and read values, not the full `Entry` API.
pub fn diff<A: EntryLike + ?Sized, B: EntryLike + ?Sized>(wanted: &A, current: &B) -> Vec<Record> {
    let mut records = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for name in wanted.attribute_names() {
        seen.insert(fold(name));
        let want = wanted.get_value(name).unwrap_or(&[]);
        match current.get_value(name) {
            None => records.push((ModOp::Add, name.to_string(), want.to_vec())),
            Some(have) => {
                if !same_set(want, have) {
                    records.push((ModOp::Replace, name.to_string(), want.to_vec()));
                }
            }
        }
    }
    for name in current.attribute_names() {
        if seen.insert(fold(name)) {
            records.push((ModOp::Delete, name.to_string(), vec![]));
        }
    }
    records
}

fn same_set(a: &[Vec<u8>], b: &[Vec<u8>]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|v| b.contains(v)) && b.iter().all(|v| a.contains(v))
}
