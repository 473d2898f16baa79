//! Search scope/alias-deref enums and the wire→`Entry` decode side of a
//! search response (§4.1, §4.4). Request construction lives in
//! `protocol::search_request`; dispatch and cursor bookkeeping live in
//! `conn`.

use std::collections::HashMap;

use lber::structure::StructureTag;

use crate::entry::Entry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Base = 0,
    OneLevel = 1,
    Subtree = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerefAliases {
    Never = 0,
    InSearch = 1,
    FindingBaseObject = 2,
    Always = 3,
}

/// One `SearchResultEntry` or `SearchResultReference` PDU.
#[derive(Clone, Debug)]
pub enum SearchItem {
    Entry(Entry),
    Referral(Vec<String>),
}

fn decode_attributes(tags: Vec<StructureTag>) -> HashMap<String, Vec<Vec<u8>>> {
    let mut map = HashMap::new();
    for tag in tags {
        let mut inner = match tag.expect_constructed() {
            Some(i) => i,
            None => continue,
        };
        if inner.len() != 2 {
            continue;
        }
        let values = inner.pop().unwrap();
        let key = inner.pop().unwrap();
        let valuev: Vec<Vec<u8>> = values.expect_constructed().unwrap_or_default().into_iter().filter_map(|t| t.expect_primitive()).collect();
        if let Some(keybytes) = key.expect_primitive() {
            map.insert(String::from_utf8_lossy(&keybytes).into_owned(), valuev);
        }
    }
    map
}

/// Decodes a `SearchResultEntry`'s `protocolOp` payload (object name +
/// attribute-value assertions) into an `Entry` freshly loaded from the
/// wire (§4.1 `of_wire`).
pub fn decode_entry(t: StructureTag) -> Option<Entry> {
    let mut tags = t.expect_constructed()?;
    if tags.len() != 2 {
        return None;
    }
    let attributes = tags.pop()?;
    let object_name = tags.pop()?;
    let dn = String::from_utf8_lossy(&object_name.expect_primitive()?).into_owned();
    let attrs = decode_attributes(attributes.expect_constructed().unwrap_or_default());
    Some(Entry::of_wire(dn, attrs))
}

/// Decodes a `SearchResultReference`'s payload (a `SEQUENCE OF LDAPURL`).
pub fn decode_referral(t: StructureTag) -> Vec<String> {
    t.expect_constructed()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|u| u.expect_primitive())
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lber::common::TagClass;
    use lber::structure::PL;

    fn octet(s: &[u8]) -> StructureTag {
        StructureTag { class: TagClass::Universal, id: 4, payload: PL::P(s.to_vec()) }
    }

    fn seq(inner: Vec<StructureTag>) -> StructureTag {
        StructureTag { class: TagClass::Universal, id: 16, payload: PL::C(inner) }
    }

    #[test]
    fn decodes_entry_with_multivalued_attribute() {
        let attrs = seq(vec![seq(vec![octet(b"cn"), seq(vec![octet(b"a"), octet(b"b")])])]);
        let entry_tag = seq(vec![octet(b"cn=x,dc=y"), attrs]);
        let entry = decode_entry(entry_tag).unwrap();
        assert_eq!(entry.dn(), "cn=x,dc=y");
        assert_eq!(entry.get_value("cn").unwrap().len(), 2);
    }

    #[test]
    fn decodes_referral_urls() {
        let t = seq(vec![octet(b"ldap://a.example/"), octet(b"ldap://b.example/")]);
        let urls = decode_referral(t);
        assert_eq!(urls, vec!["ldap://a.example/".to_string(), "ldap://b.example/".to_string()]);
    }
}
