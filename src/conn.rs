//! The connection manager (§4.4): resolves a pool of URLs into endpoints,
//! connects with round-robin failover, replays bind state on reconnect,
//! retries exactly once on a transient transport failure, and exposes
//! bind/search/update_entry/modrdn/compare/unbind. Single-threaded and
//! synchronous throughout (§5): every public method here blocks until it
//! has an answer or gives up.

use std::net::ToSocketAddrs;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, trace, warn};
use url::Url;

use lber::structures::Tag;

use crate::protocol;
use crate::result::{LdapError, LdapResult};
use crate::schema::{AttributeTypeDef, ObjectClassDef, Schema};
use crate::transport::{self, Endpoint, Transport};

/// Builder-style connection settings, named and shaped after the teacher's
/// own `LdapConnSettings` (§10.3).
#[derive(Clone, Debug)]
pub struct LdapConnSettings {
    connect_timeout: Duration,
    version: u8,
    no_tls_verify: bool,
}

impl LdapConnSettings {
    pub fn new() -> LdapConnSettings {
        LdapConnSettings { connect_timeout: Duration::from_secs(10), version: 3, no_tls_verify: false }
    }

    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn set_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn set_no_tls_verify(mut self, no_verify: bool) -> Self {
        self.no_tls_verify = no_verify;
        self
    }
}

impl Default for LdapConnSettings {
    fn default() -> Self {
        LdapConnSettings::new()
    }
}

fn resolve_url(url: &str) -> Result<Vec<Endpoint>, LdapError> {
    let parsed = Url::parse(url).map_err(|e| LdapError::Url(e.to_string()))?;
    let tls = match parsed.scheme() {
        "ldap" => false,
        "ldaps" => true,
        other => return Err(LdapError::Url(format!("unsupported scheme: {}", other))),
    };
    let host = parsed.host_str().ok_or_else(|| LdapError::Url("missing host".to_string()))?.to_string();
    let port = parsed.port().unwrap_or(if tls { 636 } else { 389 });
    let addrs = (host.as_str(), port).to_socket_addrs().map_err(|e| LdapError::Url(format!("{}: {}", url, e)))?;
    Ok(addrs.map(|addr| Endpoint { addr, host: host.clone(), tls }).collect())
}

/// A connection to one or more directory servers, with round-robin failover
/// over the resolved URL pool (§4.4).
pub struct LdapConn {
    endpoints: Vec<Endpoint>,
    cursor: usize,
    transport: Option<(Box<dyn Transport>, usize)>,
    settings: LdapConnSettings,
    next_msgid: i32,
    bound: Option<(String, String)>,
    search_cursor_open: bool,
    schema: Option<Rc<Schema>>,
    /// Persistent read buffer: reset whenever the transport is (re)opened,
    /// since any bytes left over belong to a connection that no longer
    /// exists.
    read_buf: Vec<u8>,
}

impl LdapConn {
    /// Resolves `urls` into the connection manager's address pool. One URL
    /// may expand into several endpoints if its hostname has multiple
    /// addresses (§4.4).
    pub fn with_settings(settings: LdapConnSettings, urls: &[&str]) -> Result<LdapConn, LdapError> {
        let mut endpoints = Vec::new();
        for url in urls {
            endpoints.extend(resolve_url(url)?);
        }
        if endpoints.is_empty() {
            return Err(LdapError::PoolExhausted);
        }
        Ok(LdapConn {
            endpoints,
            cursor: 0,
            transport: None,
            settings,
            next_msgid: 1,
            bound: None,
            search_cursor_open: false,
            schema: None,
            read_buf: Vec::new(),
        })
    }

    pub fn new(urls: &[&str]) -> Result<LdapConn, LdapError> {
        LdapConn::with_settings(LdapConnSettings::new(), urls)
    }

    fn fresh_msgid(&mut self) -> i32 {
        let id = self.next_msgid;
        self.next_msgid += 1;
        id
    }

    /// Connects to the next endpoint in round-robin order, replaying the
    /// stored bind state (§4.4) if there is one. Tries every endpoint in the
    /// pool once before giving up with `PoolExhausted`.
    fn connect_any(&mut self) -> Result<(), LdapError> {
        let n = self.endpoints.len();
        let mut last_err = None;
        for _ in 0..n {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) % n;
            let endpoint = &self.endpoints[idx];
            trace!("connecting to {:?}", endpoint.addr);
            match transport::connect(endpoint, self.settings.connect_timeout, self.settings.no_tls_verify) {
                Ok(t) => {
                    self.transport = Some((t, idx));
                    self.read_buf.clear();
                    if let Some((dn, pw)) = self.bound.clone() {
                        debug!("replaying bind after reconnect");
                        self.do_bind(&dn, &pw)?;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!("connect to {:?} failed: {}", endpoint.addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(LdapError::server_down(format!("no reachable endpoint in pool of {}: {:?}", n, last_err)))
    }

    fn ensure_connected(&mut self) -> Result<(), LdapError> {
        if self.transport.is_none() {
            self.connect_any()?;
        }
        Ok(())
    }

    /// Sends one request and reads back exactly one response message
    /// (§4.4, §5: one blocking round trip).
    fn exchange(&mut self, op: Tag) -> Result<protocol::ServerMessage, LdapError> {
        self.ensure_connected()?;
        let msgid = self.fresh_msgid();
        let transport = &mut self.transport.as_mut().unwrap().0;
        if let Err(e) = protocol::write_message(transport.as_mut(), msgid, op.clone()) {
            self.transport = None;
            return Err(e.into());
        }
        match protocol::read_message(transport.as_mut(), &mut self.read_buf) {
            Ok(msg) => {
                trace!("received message {}", msg.msgid);
                Ok(msg)
            }
            Err(e) => {
                self.transport = None;
                Err(e.into())
            }
        }
    }

    /// The one-retry-on-transient-failure wrapper (§4.4, §7, invariant 11):
    /// if the first attempt fails with a transient transport error,
    /// reconnect to the next pool endpoint and retry exactly once.
    fn dispatch(&mut self, op: Tag) -> Result<protocol::ServerMessage, LdapError> {
        match self.exchange(op.clone()) {
            Ok(msg) => Ok(msg),
            Err(e) if e.is_transient() => {
                warn!("transient error, retrying once: {}", e);
                self.transport = None;
                self.connect_any()?;
                self.exchange(op)
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch_result(&mut self, op: Tag) -> Result<LdapResult, LdapError> {
        let msg = self.dispatch(op)?;
        let fields = msg.op.expect_constructed().ok_or_else(|| LdapError::decoding_error("malformed response"))?;
        protocol::parse_ldap_result(fields).ok_or_else(|| LdapError::decoding_error("malformed LDAPResult"))
    }

    fn do_bind(&mut self, dn: &str, pw: &str) -> Result<(), LdapError> {
        let op = protocol::bind_request(self.settings.version, dn, pw);
        let msg = self.exchange(op)?;
        let fields = msg.op.expect_constructed().ok_or_else(|| LdapError::decoding_error("malformed bind response"))?;
        protocol::parse_ldap_result(fields).ok_or_else(|| LdapError::decoding_error("malformed LDAPResult"))?.success()?;
        Ok(())
    }

    /// Simple bind. The (dn, password) pair is stored and replayed
    /// automatically after any reconnect (§4.4).
    pub fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult, LdapError> {
        let op = protocol::bind_request(self.settings.version, bind_dn, bind_pw);
        let result = self.dispatch_result(op)?;
        if result.rc == crate::result::ResultCode::Success {
            self.bound = Some((bind_dn.to_string(), bind_pw.to_string()));
        }
        Ok(result)
    }

    pub fn add(&mut self, entry: &crate::entry::Entry) -> Result<LdapResult, LdapError> {
        let (dn, attrs) = entry.to_wire();
        let op = protocol::add_request(&dn, &attrs);
        self.dispatch_result(op)
    }

    pub fn delete(&mut self, dn: &str) -> Result<LdapResult, LdapError> {
        self.dispatch_result(protocol::delete_request(dn))
    }

    pub fn modify(&mut self, dn: &str, mods: &[crate::entry::Record]) -> Result<LdapResult, LdapError> {
        let wire: Vec<_> = mods.iter().map(|(op, attr, values)| (*op, attr.clone(), values.clone())).collect();
        self.dispatch_result(protocol::modify_request(dn, &wire))
    }

    /// Dispatches on `entry.changetype()` (§4.4 `update_entry`, invariant 7):
    /// ADD issues `add`, DELETE issues `delete`, MODRDN/MODDN issues `modrdn`
    /// with the stored new-rdn/new-superior, and MODIFY (the default) sends
    /// the pending change log as a single Modify request. On success the
    /// change log is flushed.
    pub fn update_entry(&mut self, entry: &mut crate::entry::Entry) -> Result<LdapResult, LdapError> {
        use crate::entry::ChangeType;
        let result = match entry.changetype() {
            ChangeType::Add => self.add(entry)?,
            ChangeType::Delete => self.delete(entry.dn())?,
            ChangeType::ModRdn | ChangeType::ModDn => {
                let new_rdn = entry.new_rdn().unwrap_or("").to_string();
                let new_superior = entry.new_superior().map(str::to_string);
                self.modrdn(entry.dn(), &new_rdn, true, new_superior.as_deref())?
            }
            ChangeType::Modify => {
                let changes = entry.changes().to_vec();
                if changes.is_empty() {
                    LdapResult { rc: crate::result::ResultCode::Success, matched_dn: entry.dn().to_string(), message: String::new() }
                } else {
                    self.modify(entry.dn(), &changes)?
                }
            }
        };
        if result.rc == crate::result::ResultCode::Success {
            entry.flush_changes();
        }
        Ok(result)
    }

    /// `new_sup` requires protocol version 3 (§4.4 invariant, RFC 4511 §4.9).
    pub fn modrdn(&mut self, dn: &str, new_rdn: &str, delete_old_rdn: bool, new_sup: Option<&str>) -> Result<LdapResult, LdapError> {
        if new_sup.is_some() && self.settings.version < 3 {
            return Err(LdapError::UnsupportedVersion(self.settings.version));
        }
        self.dispatch_result(protocol::moddn_request(dn, new_rdn, delete_old_rdn, new_sup))
    }

    pub fn compare(&mut self, dn: &str, attr: &str, value: &[u8]) -> Result<crate::result::CompareResult, LdapError> {
        let result = self.dispatch_result(protocol::compare_request(dn, attr, value))?;
        Ok(crate::result::CompareResult(result))
    }

    pub fn abandon(&mut self, msgid: i32) -> Result<(), LdapError> {
        self.ensure_connected()?;
        let next_id = self.fresh_msgid();
        let transport = &mut self.transport.as_mut().unwrap().0;
        protocol::write_message(transport.as_mut(), next_id, protocol::abandon_request(msgid))?;
        self.search_cursor_open = false;
        Ok(())
    }

    pub fn unbind(&mut self) -> Result<(), LdapError> {
        let next_id = self.fresh_msgid();
        if let Some((transport, _)) = self.transport.as_mut() {
            let _ = protocol::write_message(transport.as_mut(), next_id, protocol::unbind_request());
            let _ = transport.close();
        }
        self.transport = None;
        self.bound = None;
        Ok(())
    }

    /// Buffered search (§4.4): collects every result entry/referral until
    /// `SearchResultDone`, blocking for the whole operation. Runs inside the
    /// one-retry wrapper (§4.4, §7, invariant 11) like every other operation.
    pub fn search(
        &mut self,
        base: &str,
        scope: crate::search::Scope,
        deref: crate::search::DerefAliases,
        filter: &str,
        attrs: &[String],
    ) -> Result<(Vec<crate::entry::Entry>, Vec<Vec<String>>, LdapResult), LdapError> {
        if self.search_cursor_open {
            return Err(LdapError::Busy);
        }
        match self.search_once(base, scope, deref, filter, attrs) {
            Ok(v) => Ok(v),
            Err(e) if e.is_transient() => {
                warn!("transient error in search, retrying once: {}", e);
                self.transport = None;
                self.connect_any()?;
                self.search_once(base, scope, deref, filter, attrs)
            }
            Err(e) => Err(e),
        }
    }

    fn search_once(
        &mut self,
        base: &str,
        scope: crate::search::Scope,
        deref: crate::search::DerefAliases,
        filter: &str,
        attrs: &[String],
    ) -> Result<(Vec<crate::entry::Entry>, Vec<Vec<String>>, LdapResult), LdapError> {
        self.write_search_request(base, scope, deref, filter, attrs)?;

        let mut entries = Vec::new();
        let mut referrals = Vec::new();
        loop {
            let msg = {
                let transport = &mut self.transport.as_mut().unwrap().0;
                match protocol::read_message(transport.as_mut(), &mut self.read_buf) {
                    Ok(m) => m,
                    Err(e) => {
                        self.transport = None;
                        return Err(e.into());
                    }
                }
            };
            match msg.op.id {
                protocol::TAG_SEARCH_RESULT_ENTRY => {
                    if let Some(entry) = crate::search::decode_entry(msg.op) {
                        entries.push(entry);
                    }
                }
                protocol::TAG_SEARCH_RESULT_REFERENCE => {
                    referrals.push(crate::search::decode_referral(msg.op));
                }
                protocol::TAG_SEARCH_RESULT_DONE => {
                    let fields = msg.op.expect_constructed().ok_or_else(|| LdapError::decoding_error("malformed SearchResultDone"))?;
                    let result = protocol::parse_ldap_result(fields).ok_or_else(|| LdapError::decoding_error("malformed LDAPResult"))?;
                    return Ok((entries, referrals, result));
                }
                other => return Err(LdapError::decoding_error(format!("unexpected tag {} in search response", other))),
            }
        }
    }

    /// Opens a streaming search cursor (§4.4, §5 invariant 12): at most one
    /// may be open on a connection at a time, enforced by `search_cursor_open`.
    /// Opening the cursor (connect + write the SearchRequest) runs inside the
    /// one-retry wrapper; once the cursor is open, further transient errors
    /// surface through `SearchStream::next` without a second retry, since a
    /// retry there would mean silently reissuing a request the caller has
    /// already partially consumed results from.
    pub fn search_a(
        &mut self,
        base: &str,
        scope: crate::search::Scope,
        deref: crate::search::DerefAliases,
        filter: &str,
        attrs: &[String],
    ) -> Result<SearchStream<'_>, LdapError> {
        if self.search_cursor_open {
            return Err(LdapError::Busy);
        }
        let msgid = match self.write_search_request(base, scope, deref, filter, attrs) {
            Ok(id) => id,
            Err(e) if e.is_transient() => {
                warn!("transient error opening search_a, retrying once: {}", e);
                self.transport = None;
                self.connect_any()?;
                self.write_search_request(base, scope, deref, filter, attrs)?
            }
            Err(e) => return Err(e),
        };
        self.search_cursor_open = true;
        Ok(SearchStream { conn: self, msgid, done: false })
    }

    /// Connects if necessary and writes a SearchRequest, returning its
    /// message-id. Shared by `search_once`/`search_a`'s retry wrappers.
    fn write_search_request(
        &mut self,
        base: &str,
        scope: crate::search::Scope,
        deref: crate::search::DerefAliases,
        filter: &str,
        attrs: &[String],
    ) -> Result<i32, LdapError> {
        let filter_tag = crate::filter::parse(filter).map_err(|_| LdapError::decoding_error(format!("invalid filter: {}", filter)))?;
        let op = protocol::search_request(base, scope, deref, filter_tag, attrs, false);

        self.ensure_connected()?;
        let msgid = self.fresh_msgid();
        let transport = &mut self.transport.as_mut().unwrap().0;
        if let Err(e) = protocol::write_message(transport.as_mut(), msgid, op) {
            self.transport = None;
            return Err(e.into());
        }
        Ok(msgid)
    }

    /// Root-DSE `subschemaSubentry` lookup followed by a base-scope read of
    /// that entry's `attributeTypes`/`objectClasses` values (§4.4 `schema()`).
    /// Both searches run through `search`, so this orchestration gets the
    /// same one-retry-on-transient-failure treatment as every other
    /// operation; only the RFC 4512 definition-string grammar itself is left
    /// to a separate collaborator (`schema_parse`).
    pub fn rawschema(&mut self) -> Result<(Vec<String>, Vec<String>), LdapError> {
        let (root_entries, _, root_result) =
            self.search("", crate::search::Scope::Base, crate::search::DerefAliases::Never, "(objectClass=*)", &["subschemaSubentry".to_string()])?;
        root_result.success()?;
        let subschema_dn = root_entries
            .first()
            .and_then(|e| e.get_value("subschemaSubentry"))
            .and_then(|vs| vs.first())
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .ok_or_else(|| LdapError::operations_error("root DSE has no subschemaSubentry attribute"))?;

        let (schema_entries, _, schema_result) = self.search(
            &subschema_dn,
            crate::search::Scope::Base,
            crate::search::DerefAliases::Never,
            "(objectClass=subschema)",
            &["attributeTypes".to_string(), "objectClasses".to_string()],
        )?;
        schema_result.success()?;
        let entry = schema_entries.first().ok_or_else(|| LdapError::operations_error("subschema entry not found"))?;
        let attribute_types = entry.get_value("attributeTypes").map(|vs| vs.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect()).unwrap_or_default();
        let object_classes = entry.get_value("objectClasses").map(|vs| vs.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect()).unwrap_or_default();
        Ok((attribute_types, object_classes))
    }

    /// `rawschema()` plus parsing via `schema_parse`, memoized for the life
    /// of the connection (§4.4 "schema fetch + cache"). Definitions that
    /// fail to parse are skipped rather than failing the whole fetch, since
    /// one malformed definition among hundreds shouldn't make the schema
    /// unusable.
    pub fn schema(&mut self) -> Result<Rc<Schema>, LdapError> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let (attr_strs, oc_strs) = self.rawschema()?;
        let attrs: Vec<AttributeTypeDef> = attr_strs.iter().filter_map(|s| crate::schema_parse::parse_attribute_type(s).ok()).collect();
        let ocs: Vec<ObjectClassDef> = oc_strs.iter().filter_map(|s| crate::schema_parse::parse_object_class(s).ok()).collect();
        let schema = Rc::new(Schema::new(attrs, ocs));
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    /// Seeds the memoized schema directly, bypassing `rawschema()`/
    /// `schema_parse` — useful when a caller already has schema definitions
    /// from elsewhere (tests, a cached fetch from a previous connection).
    pub fn set_schema(&mut self, attrs: Vec<AttributeTypeDef>, ocs: Vec<ObjectClassDef>) -> Rc<Schema> {
        let schema = Rc::new(Schema::new(attrs, ocs));
        self.schema = Some(schema.clone());
        schema
    }
}

/// A single in-flight search cursor (§4.4, invariant 12: at most one open
/// per connection). Dropping it before the result stream is exhausted sends
/// `AbandonRequest` so the connection is left usable.
pub struct SearchStream<'a> {
    conn: &'a mut LdapConn,
    msgid: i32,
    done: bool,
}

impl<'a> SearchStream<'a> {
    /// Reads the next `SearchResultEntry`/`SearchResultReference`, or `None`
    /// once `SearchResultDone` closes the cursor.
    pub fn next(&mut self) -> Result<Option<crate::search::SearchItem>, LdapError> {
        if self.done {
            return Ok(None);
        }
        let transport = &mut self.conn.transport.as_mut().unwrap().0;
        let msg = match protocol::read_message(transport.as_mut(), &mut self.conn.read_buf) {
            Ok(m) => m,
            Err(e) => {
                self.conn.transport = None;
                self.done = true;
                self.conn.search_cursor_open = false;
                return Err(e.into());
            }
        };
        match msg.op.id {
            protocol::TAG_SEARCH_RESULT_ENTRY => Ok(crate::search::decode_entry(msg.op).map(crate::search::SearchItem::Entry)),
            protocol::TAG_SEARCH_RESULT_REFERENCE => Ok(Some(crate::search::SearchItem::Referral(crate::search::decode_referral(msg.op)))),
            protocol::TAG_SEARCH_RESULT_DONE => {
                self.done = true;
                self.conn.search_cursor_open = false;
                let fields = msg.op.expect_constructed().ok_or_else(|| LdapError::decoding_error("malformed SearchResultDone"))?;
                protocol::parse_ldap_result(fields).ok_or_else(|| LdapError::decoding_error("malformed LDAPResult"))?.success()?;
                Ok(None)
            }
            other => {
                self.done = true;
                self.conn.search_cursor_open = false;
                Err(LdapError::decoding_error(format!("unexpected tag {} in search response", other)))
            }
        }
    }

    /// Abandons the search explicitly (§4.4 `abandon`), instead of waiting
    /// for `Drop` to do it implicitly.
    pub fn abandon(mut self) -> Result<(), LdapError> {
        self.abandon_inner()
    }

    fn abandon_inner(&mut self) -> Result<(), LdapError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        self.conn.search_cursor_open = false;
        if let Some((transport, _)) = self.conn.transport.as_mut() {
            let next_id = self.conn.next_msgid;
            self.conn.next_msgid += 1;
            protocol::write_message(transport.as_mut(), next_id, protocol::abandon_request(self.msgid))?;
        }
        Ok(())
    }
}

impl<'a> Drop for SearchStream<'a> {
    fn drop(&mut self) {
        let _ = self.abandon_inner();
    }
}
