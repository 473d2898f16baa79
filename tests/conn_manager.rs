//! Connection-manager integration tests (§8 S5/S6, §8 invariants 11/12)
//! against a small hand-rolled LDAP responder on `std::net::TcpListener`.
//!
//! There's no directory server available in this environment, so the
//! responder below speaks just enough of the wire protocol (LDAPMessage
//! envelope, BindResponse, SearchResultEntry, SearchResultDone,
//! AbandonRequest) to drive the connection manager through failover and
//! streaming-cursor abandon without a real `slapd`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use dirclient::conn::{LdapConn, LdapConnSettings};
use dirclient::entry::{ChangeType, Entry};
use dirclient::search::{DerefAliases, Scope};

const TAG_BIND_RESPONSE: u8 = 0x61;
const TAG_SEARCH_REQUEST: u8 = 0x63;
const TAG_SEARCH_RESULT_ENTRY: u8 = 0x64;
const TAG_SEARCH_RESULT_DONE: u8 = 0x65;
const TAG_ABANDON_REQUEST: u8 = 0x50;
const TAG_DELETE_REQUEST: u8 = 0x4a;
const TAG_DELETE_RESPONSE: u8 = 0x6b;

fn read_tlv(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head)?;
    let len = if head[1] & 0x80 == 0 {
        head[1] as usize
    } else {
        let n = (head[1] & 0x7f) as usize;
        let mut len_bytes = vec![0u8; n];
        stream.read_exact(&mut len_bytes)?;
        len_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
    };
    let mut content = vec![0u8; len];
    stream.read_exact(&mut content)?;
    Ok((head[0], content))
}

/// Reads one LDAPMessage and returns its `protocolOp` tag byte, assuming
/// (as every request this suite sends does) a short-form messageID length.
fn read_message_op(stream: &mut TcpStream) -> std::io::Result<u8> {
    let (tag, content) = read_tlv(stream)?;
    assert_eq!(tag, 0x30, "expected LDAPMessage SEQUENCE");
    let msgid_len = content[1] as usize;
    Ok(content[2 + msgid_len])
}

fn len_bytes(len: usize) -> Vec<u8> {
    assert!(len < 128);
    vec![len as u8]
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(len_bytes(content.len()));
    out.extend_from_slice(content);
    out
}

fn ldap_message(op: Vec<u8>) -> Vec<u8> {
    let msgid = tlv(0x02, &[0x01]);
    let mut content = msgid;
    content.extend(op);
    tlv(0x30, &content)
}

fn ldap_result(tag: u8) -> Vec<u8> {
    let code = tlv(0x0A, &[0x00]);
    let matched_dn = tlv(0x04, &[]);
    let message = tlv(0x04, &[]);
    let mut content = code;
    content.extend(matched_dn);
    content.extend(message);
    tlv(tag, &content)
}

fn search_result_entry(dn: &str) -> Vec<u8> {
    let object_name = tlv(0x04, dn.as_bytes());
    let attributes = tlv(0x30, &[]);
    let mut content = object_name;
    content.extend(attributes);
    tlv(TAG_SEARCH_RESULT_ENTRY, &content)
}

fn attribute_value_assertion(name: &str, values: &[&str]) -> Vec<u8> {
    let type_tlv = tlv(0x04, name.as_bytes());
    let mut vals = Vec::new();
    for v in values {
        vals.extend(tlv(0x04, v.as_bytes()));
    }
    let mut content = type_tlv;
    content.extend(tlv(0x31, &vals));
    tlv(0x30, &content)
}

fn search_result_entry_with_attrs(dn: &str, attrs: &[(&str, &[&str])]) -> Vec<u8> {
    let object_name = tlv(0x04, dn.as_bytes());
    let mut attrs_content = Vec::new();
    for (name, values) in attrs {
        attrs_content.extend(attribute_value_assertion(name, values));
    }
    let mut content = object_name;
    content.extend(tlv(0x30, &attrs_content));
    tlv(TAG_SEARCH_RESULT_ENTRY, &content)
}

/// Binds to an ephemeral port and immediately releases it, so a subsequent
/// connect attempt to the same port is refused (S5's "down" endpoint).
fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn s5_failover_to_second_endpoint() {
    let down_port = dead_port();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let up_port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, 0x60, "expected BindRequest");
        stream.write_all(&ldap_message(ldap_result(TAG_BIND_RESPONSE))).unwrap();

        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_SEARCH_REQUEST);
        stream.write_all(&ldap_message(ldap_result(TAG_SEARCH_RESULT_DONE))).unwrap();
    });

    let settings = LdapConnSettings::new().set_connect_timeout(Duration::from_millis(500));
    let down_url = format!("ldap://127.0.0.1:{}", down_port);
    let up_url = format!("ldap://127.0.0.1:{}", up_port);
    let mut conn = LdapConn::with_settings(settings, &[&down_url, &up_url]).unwrap();

    let bind_result = conn.simple_bind("", "").unwrap();
    assert_eq!(bind_result.rc, dirclient::result::ResultCode::Success);

    let (entries, referrals, result) = conn.search("dc=example", Scope::Subtree, DerefAliases::Never, "(objectClass=*)", &[]).unwrap();
    assert!(entries.is_empty());
    assert!(referrals.is_empty());
    assert_eq!(result.rc, dirclient::result::ResultCode::Success);

    server.join().unwrap();
}

#[test]
fn s6_streaming_abandon_then_reuse() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_SEARCH_REQUEST, "first search request");
        stream.write_all(&ldap_message(search_result_entry("cn=a,dc=x"))).unwrap();
        stream.write_all(&ldap_message(search_result_entry("cn=b,dc=x"))).unwrap();

        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_ABANDON_REQUEST, "client should abandon after two entries");

        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_SEARCH_REQUEST, "second search request on the reused connection");
        stream.write_all(&ldap_message(ldap_result(TAG_SEARCH_RESULT_DONE))).unwrap();
    });

    let settings = LdapConnSettings::new().set_connect_timeout(Duration::from_millis(500));
    let url = format!("ldap://127.0.0.1:{}", port);
    let mut conn = LdapConn::with_settings(settings, &[&url]).unwrap();

    {
        let mut stream = conn.search_a("dc=example", Scope::Subtree, DerefAliases::Never, "(objectClass=*)", &[]).unwrap();
        let first = stream.next().unwrap();
        assert!(first.is_some());
        let second = stream.next().unwrap();
        assert!(second.is_some());
        stream.abandon().unwrap();
    }

    let (entries, _, result) = conn.search("dc=example", Scope::Subtree, DerefAliases::Never, "(objectClass=*)", &[]).unwrap();
    assert!(entries.is_empty());
    assert_eq!(result.rc, dirclient::result::ResultCode::Success);

    server.join().unwrap();
}

/// `update_entry` must dispatch on the entry's change-type rather than
/// always sending a Modify: a Delete-changetype entry has an empty change
/// log by construction, so the old always-Modify path reported fake success
/// without ever contacting the server.
#[test]
fn update_entry_dispatches_delete_changetype() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_DELETE_REQUEST, "update_entry should issue a Delete for a Delete-changetype entry");
        stream.write_all(&ldap_message(ldap_result(TAG_DELETE_RESPONSE))).unwrap();
    });

    let settings = LdapConnSettings::new().set_connect_timeout(Duration::from_millis(500));
    let url = format!("ldap://127.0.0.1:{}", port);
    let mut conn = LdapConn::with_settings(settings, &[&url]).unwrap();

    let mut entry = Entry::new("cn=doomed,dc=x", ChangeType::Delete);
    let result = conn.update_entry(&mut entry).unwrap();
    assert_eq!(result.rc, dirclient::result::ResultCode::Success);

    server.join().unwrap();
}

/// `schema()` performs the root-DSE `subschemaSubentry` lookup followed by
/// a base-scope read of the schema entry, parses the definitions, and
/// memoizes the result so a second call never touches the server again.
#[test]
fn schema_two_step_fetch_and_memoize() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_SEARCH_REQUEST, "root DSE lookup");
        stream.write_all(&ldap_message(search_result_entry_with_attrs("", &[("subschemaSubentry", &["cn=schema"])]))).unwrap();
        stream.write_all(&ldap_message(ldap_result(TAG_SEARCH_RESULT_DONE))).unwrap();

        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_SEARCH_REQUEST, "subschema entry lookup");
        let attr_type = "( 2.5.4.3 NAME 'cn' )";
        let oc = "( 2.5.6.6 NAME 'person' MUST ( sn $ cn ) )";
        stream
            .write_all(&ldap_message(search_result_entry_with_attrs(
                "cn=schema",
                &[("attributeTypes", &[attr_type]), ("objectClasses", &[oc])],
            )))
            .unwrap();
        stream.write_all(&ldap_message(ldap_result(TAG_SEARCH_RESULT_DONE))).unwrap();
    });

    let settings = LdapConnSettings::new().set_connect_timeout(Duration::from_millis(500));
    let url = format!("ldap://127.0.0.1:{}", port);
    let mut conn = LdapConn::with_settings(settings, &[&url]).unwrap();

    let schema = conn.schema().unwrap();
    assert!(schema.resolve_attr("cn").is_some());
    assert!(schema.resolve_oc("person").is_some());

    let schema_again = conn.schema().unwrap();
    assert!(std::rc::Rc::ptr_eq(&schema, &schema_again), "second schema() call must be memoized, not re-fetched");

    server.join().unwrap();
}

/// A transient failure mid-operation (not just at connect time, as in
/// `s5_failover_to_second_endpoint`) is retried exactly once: the server
/// accepts the SearchRequest and then drops the connection without
/// responding, and the retried attempt on a freshly reconnected transport
/// succeeds.
#[test]
fn search_retries_once_after_mid_operation_transient_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        {
            let (mut stream, _) = listener.accept().unwrap();
            let op = read_message_op(&mut stream).unwrap();
            assert_eq!(op, TAG_SEARCH_REQUEST, "first attempt");
        }
        let (mut stream, _) = listener.accept().unwrap();
        let op = read_message_op(&mut stream).unwrap();
        assert_eq!(op, TAG_SEARCH_REQUEST, "retried attempt on the reconnected transport");
        stream.write_all(&ldap_message(ldap_result(TAG_SEARCH_RESULT_DONE))).unwrap();
    });

    let settings = LdapConnSettings::new().set_connect_timeout(Duration::from_millis(500));
    let url = format!("ldap://127.0.0.1:{}", port);
    let mut conn = LdapConn::with_settings(settings, &[&url]).unwrap();

    let (entries, _, result) = conn.search("dc=example", Scope::Subtree, DerefAliases::Never, "(objectClass=*)", &[]).unwrap();
    assert!(entries.is_empty());
    assert_eq!(result.rc, dirclient::result::ResultCode::Success);

    server.join().unwrap();
}
