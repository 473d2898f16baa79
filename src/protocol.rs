//! BER encode/decode for the LDAPMessage envelope and the nine PDUs listed
//! in §6. This is the concrete implementation of the "BER codec" external
//! collaborator, built on the teacher's own `lber` primitives; it is kept to
//! exactly the shapes the connection manager needs, not a general ASN.1
//! toolkit.

use std::collections::HashMap;
use std::io;

use lber::common::TagClass;
use lber::structure::StructureTag;
use lber::structures::{ASNTag, Boolean, Enumerated, Integer, Null, OctetString, Sequence, Set, Tag};
use lber::write;

use crate::entry::ModOp;
use crate::result::{LdapResult, ResultCode};
use crate::search::{DerefAliases, Scope};
use crate::transport::Transport;

pub const TAG_BIND_REQUEST: u64 = 0;
pub const TAG_UNBIND_REQUEST: u64 = 2;
pub const TAG_SEARCH_REQUEST: u64 = 3;
pub const TAG_SEARCH_RESULT_ENTRY: u64 = 4;
pub const TAG_SEARCH_RESULT_DONE: u64 = 5;
pub const TAG_MODIFY_REQUEST: u64 = 6;
pub const TAG_ADD_REQUEST: u64 = 8;
pub const TAG_DELETE_REQUEST: u64 = 10;
pub const TAG_MODDN_REQUEST: u64 = 12;
pub const TAG_COMPARE_REQUEST: u64 = 14;
pub const TAG_ABANDON_REQUEST: u64 = 16;
pub const TAG_SEARCH_RESULT_REFERENCE: u64 = 19;

fn octet_string(class: TagClass, id: u64, s: &[u8]) -> Tag {
    Tag::OctetString(OctetString { id, class, inner: s.to_vec() })
}

fn univ_string(s: &[u8]) -> Tag {
    octet_string(TagClass::Universal, 4, s)
}

fn app_octet_string(id: u64, s: &[u8]) -> Tag {
    octet_string(TagClass::Application, id, s)
}

fn seq(id: u64, class: TagClass, inner: Vec<Tag>) -> Tag {
    Tag::Sequence(Sequence { id, class, inner })
}

/// Wraps a protocol operation in the LDAPMessage envelope of §6
/// (`messageID`, `protocolOp`; no controls).
pub fn encode_message(msgid: i32, op: Tag) -> Vec<u8> {
    let msg = seq(
        16,
        TagClass::Universal,
        vec![Tag::Integer(Integer { inner: msgid as i64, ..Default::default() }), op],
    );
    let mut buf = bytes::BytesMut::new();
    write::encode_into(&mut buf, msg.into_structure()).expect("encoding into a BytesMut cannot fail");
    buf.to_vec()
}

pub fn bind_request(version: u8, dn: &str, password: &str) -> Tag {
    seq(
        TAG_BIND_REQUEST,
        TagClass::Application,
        vec![
            Tag::Integer(Integer { inner: version as i64, ..Default::default() }),
            univ_string(dn.as_bytes()),
            octet_string(TagClass::Context, 0, password.as_bytes()),
        ],
    )
}

pub fn unbind_request() -> Tag {
    Tag::Null(Null { id: TAG_UNBIND_REQUEST, class: TagClass::Application, inner: () })
}

pub fn search_request(base: &str, scope: Scope, deref: DerefAliases, filter: Tag, attrs: &[String], attrs_only: bool) -> Tag {
    seq(
        TAG_SEARCH_REQUEST,
        TagClass::Application,
        vec![
            univ_string(base.as_bytes()),
            Tag::Enumerated(Enumerated { inner: scope as i64, ..Default::default() }),
            Tag::Enumerated(Enumerated { inner: deref as i64, ..Default::default() }),
            Tag::Integer(Integer { inner: 0, ..Default::default() }),
            Tag::Integer(Integer { inner: 0, ..Default::default() }),
            Tag::Boolean(Boolean { inner: attrs_only, ..Default::default() }),
            filter,
            Tag::Sequence(Sequence { inner: attrs.iter().map(|a| univ_string(a.as_bytes())).collect(), ..Default::default() }),
        ],
    )
}

pub fn modify_request(dn: &str, mods: &[(ModOp, String, Vec<Vec<u8>>)]) -> Tag {
    seq(
        TAG_MODIFY_REQUEST,
        TagClass::Application,
        vec![
            univ_string(dn.as_bytes()),
            Tag::Sequence(Sequence {
                inner: mods
                    .iter()
                    .map(|(op, attr, values)| {
                        let num = match op {
                            ModOp::Add => 0,
                            ModOp::Delete => 1,
                            ModOp::Replace => 2,
                        };
                        seq(
                            16,
                            TagClass::Universal,
                            vec![
                                Tag::Enumerated(Enumerated { inner: num, ..Default::default() }),
                                seq(
                                    16,
                                    TagClass::Universal,
                                    vec![
                                        univ_string(attr.as_bytes()),
                                        Tag::Set(Set { inner: values.iter().map(|v| univ_string(v)).collect(), ..Default::default() }),
                                    ],
                                ),
                            ],
                        )
                    })
                    .collect(),
                ..Default::default()
            }),
        ],
    )
}

pub fn add_request(dn: &str, attrs: &HashMap<String, Vec<Vec<u8>>>) -> Tag {
    seq(
        TAG_ADD_REQUEST,
        TagClass::Application,
        vec![
            univ_string(dn.as_bytes()),
            Tag::Sequence(Sequence {
                inner: attrs
                    .iter()
                    .map(|(name, values)| {
                        seq(
                            16,
                            TagClass::Universal,
                            vec![
                                univ_string(name.as_bytes()),
                                Tag::Set(Set { inner: values.iter().map(|v| univ_string(v)).collect(), ..Default::default() }),
                            ],
                        )
                    })
                    .collect(),
                ..Default::default()
            }),
        ],
    )
}

pub fn delete_request(dn: &str) -> Tag {
    app_octet_string(TAG_DELETE_REQUEST, dn.as_bytes())
}

pub fn moddn_request(dn: &str, new_rdn: &str, delete_old_rdn: bool, new_superior: Option<&str>) -> Tag {
    let mut inner = vec![univ_string(dn.as_bytes()), univ_string(new_rdn.as_bytes()), Tag::Boolean(Boolean { inner: delete_old_rdn, ..Default::default() })];
    if let Some(sup) = new_superior {
        inner.push(octet_string(TagClass::Context, 0, sup.as_bytes()));
    }
    seq(TAG_MODDN_REQUEST, TagClass::Application, inner)
}

pub fn compare_request(dn: &str, attr: &str, value: &[u8]) -> Tag {
    seq(
        TAG_COMPARE_REQUEST,
        TagClass::Application,
        vec![univ_string(dn.as_bytes()), seq(16, TagClass::Universal, vec![univ_string(attr.as_bytes()), univ_string(value)])],
    )
}

pub fn abandon_request(msgid: i32) -> Tag {
    Tag::Integer(Integer { id: TAG_ABANDON_REQUEST, class: TagClass::Application, inner: msgid as i64 })
}

/// One LDAPMessage received from the server: its message-id and the
/// decoded `protocolOp`.
pub struct ServerMessage {
    pub msgid: i32,
    pub op: StructureTag,
}

fn be_uint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// A decoded LDAPResult component, found at the tail of every response PDU:
/// resultCode [ENUM], matchedDN [OCTET STRING], diagnosticMessage
/// [OCTET STRING], with any trailing referrals ignored.
pub fn parse_ldap_result(mut fields: Vec<StructureTag>) -> Option<LdapResult> {
    if fields.len() < 3 {
        return None;
    }
    fields.truncate(3);
    let message = String::from_utf8_lossy(&fields.pop()?.expect_primitive()?).into_owned();
    let matched_dn = String::from_utf8_lossy(&fields.pop()?.expect_primitive()?).into_owned();
    let code = be_uint(&fields.pop()?.expect_primitive()?);
    Some(LdapResult { rc: ResultCode::from_wire(code), matched_dn, message })
}

/// Reads exactly one BER element off `transport`, growing `buf` as needed
/// (blocking reads, per §5's synchronous suspension points). `buf` is the
/// connection's persistent read buffer: a single `read` can return more
/// than one pipelined LDAPMessage, and the bytes past the first must
/// survive to the next call rather than being discarded.
pub fn read_message(transport: &mut dyn Transport, buf: &mut Vec<u8>) -> io::Result<ServerMessage> {
    let mut chunk = [0u8; 4096];
    loop {
        match lber::parse::parse_tag(&buf[..]) {
            Ok((rest, tag)) => {
                let consumed = buf.len() - rest.len();
                buf.drain(..consumed);
                let mut fields = tag.expect_constructed().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed LDAPMessage"))?;
                if fields.len() < 2 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed LDAPMessage"));
                }
                let op = fields.remove(fields.len() - 1);
                let msgid_bytes = fields.remove(0).expect_primitive().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed message-id"))?;
                let msgid = be_uint(&msgid_bytes) as i32;
                return Ok(ServerMessage { msgid, op });
            }
            Err(nom::Err::Incomplete(_)) => {
                let n = transport.read(&mut chunk)?;
                if n == 0 {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(_) => return Err(io::Error::new(io::ErrorKind::InvalidData, "BER decoding error")),
        }
    }
}

pub fn write_message(transport: &mut dyn Transport, msgid: i32, op: Tag) -> io::Result<()> {
    let bytes = encode_message(msgid, op);
    transport.write_all(&bytes)
}
