//! The RFC 4512 schema-description string grammar (§4.4 `schema()`): turns
//! the raw `attributeTypes`/`objectClasses` values a subschema subentry
//! returns on the wire into the [`AttributeTypeDef`]/[`ObjectClassDef`]
//! structures `Schema::new` consumes. Not in the teacher (`yvf-rust-ldap3`
//! never fetches or parses schema); the tokenizer shape below is grounded on
//! `ldapvi`'s `src/schema.rs`, the one repo in the pack that actually reads
//! a directory's published schema.

use crate::oid::Oid;
use crate::schema::{AttributeTypeDef, ObjectClassDef, ObjectClassKind};

struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Tokenizer { input: input.as_bytes(), pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Next token: `(`, `)`, `$`, a quoted string (unquoted), or a bare word.
    fn next_token(&mut self) -> Option<String> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return None;
        }
        match self.input[self.pos] {
            b'(' | b')' | b'$' => {
                let c = self.input[self.pos] as char;
                self.pos += 1;
                Some(c.to_string())
            }
            b'\'' => {
                self.pos += 1;
                let start = self.pos;
                while self.pos < self.input.len() && self.input[self.pos] != b'\'' {
                    self.pos += 1;
                }
                let s = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                if self.pos < self.input.len() {
                    self.pos += 1;
                }
                Some(s)
            }
            _ => {
                let start = self.pos;
                while self.pos < self.input.len() {
                    let c = self.input[self.pos];
                    if c.is_ascii_whitespace() || c == b'(' || c == b')' || c == b'\'' || c == b'$' {
                        break;
                    }
                    self.pos += 1;
                }
                Some(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
            }
        }
    }

    /// A single value or a `( v1 $ v2 ... )` list.
    fn name_list(&mut self) -> Vec<String> {
        self.skip_whitespace();
        if self.pos < self.input.len() && self.input[self.pos] == b'(' {
            self.next_token();
            let mut out = Vec::new();
            while let Some(tok) = self.next_token() {
                if tok == ")" {
                    break;
                }
                if tok == "$" {
                    continue;
                }
                out.push(tok);
            }
            out
        } else {
            self.next_token().into_iter().filter(|v| v != ")").collect()
        }
    }

    /// Skips a keyword's value when the keyword isn't one we track: a
    /// quoted string, a parenthesized group, or a single bare word.
    fn skip_value(&mut self) {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return;
        }
        match self.input[self.pos] {
            b'(' => {
                self.next_token();
                let mut depth = 1;
                while depth > 0 {
                    match self.next_token() {
                        Some(t) if t == "(" => depth += 1,
                        Some(t) if t == ")" => depth -= 1,
                        None => break,
                        _ => {}
                    }
                }
            }
            b'\'' => {
                self.next_token();
            }
            _ => {
                let saved = self.pos;
                if let Some(tok) = self.next_token() {
                    if tok == ")" || tok.chars().all(|c| c.is_ascii_uppercase() || c == '-') {
                        self.pos = saved;
                    }
                }
            }
        }
    }
}

/// Parses one `attributeTypes` value into an [`AttributeTypeDef`]. Unknown
/// keywords (`DESC`, `EQUALITY`, `ORDERING`, `SUBSTR`, `USAGE`, ...) are
/// skipped; only `NAME`, `SYNTAX` and `SINGLE-VALUE` are tracked, since
/// those are all `Schema` needs.
pub fn parse_attribute_type(s: &str) -> Result<AttributeTypeDef, String> {
    let mut tok = Tokenizer::new(s);
    match tok.next_token() {
        Some(t) if t == "(" => {}
        _ => return Err("expected '('".to_string()),
    }
    let oid: Oid = tok.next_token().ok_or("expected OID")?.parse().map_err(|_| "invalid OID".to_string())?;

    let mut names = Vec::new();
    let mut syntax = None;
    let mut single_value = false;

    loop {
        let keyword = match tok.next_token() {
            Some(t) if t == ")" => break,
            Some(t) => t,
            None => break,
        };
        match keyword.as_str() {
            "NAME" => names = tok.name_list(),
            "SYNTAX" => {
                if let Some(raw) = tok.next_token() {
                    let oid_part = raw.split('{').next().unwrap_or(&raw);
                    syntax = oid_part.parse().ok();
                }
            }
            "SINGLE-VALUE" => single_value = true,
            _ => tok.skip_value(),
        }
    }

    Ok(AttributeTypeDef { oid, names, single_value, syntax })
}

/// Parses one `objectClasses` value into an [`ObjectClassDef`]. `STRUCTURAL`
/// is RFC 4512's default kind when none is given.
pub fn parse_object_class(s: &str) -> Result<ObjectClassDef, String> {
    let mut tok = Tokenizer::new(s);
    match tok.next_token() {
        Some(t) if t == "(" => {}
        _ => return Err("expected '('".to_string()),
    }
    let oid: Oid = tok.next_token().ok_or("expected OID")?.parse().map_err(|_| "invalid OID".to_string())?;

    let mut names = Vec::new();
    let mut sup = Vec::new();
    let mut must = Vec::new();
    let mut may = Vec::new();
    let mut kind = ObjectClassKind::Structural;

    loop {
        let keyword = match tok.next_token() {
            Some(t) if t == ")" => break,
            Some(t) => t,
            None => break,
        };
        match keyword.as_str() {
            "NAME" => names = tok.name_list(),
            "SUP" => sup = tok.name_list(),
            "MUST" => must = tok.name_list(),
            "MAY" => may = tok.name_list(),
            "ABSTRACT" => kind = ObjectClassKind::Abstract,
            "STRUCTURAL" => kind = ObjectClassKind::Structural,
            "AUXILIARY" => kind = ObjectClassKind::Auxiliary,
            _ => tok.skip_value(),
        }
    }

    Ok(ObjectClassDef { oid, names, sup, must, may, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attribute_type_with_aliases_and_single_value() {
        let def = parse_attribute_type("( 0.9.2342.19200300.100.1.1 NAME ( 'uid' 'userid' ) EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{256} SINGLE-VALUE )").unwrap();
        assert_eq!(def.oid.to_string(), "0.9.2342.19200300.100.1.1");
        assert_eq!(def.names, vec!["uid".to_string(), "userid".to_string()]);
        assert!(def.single_value);
        assert_eq!(def.syntax.unwrap().to_string(), "1.3.6.1.4.1.1466.115.121.1.15");
    }

    #[test]
    fn parses_attribute_type_with_single_name_and_no_syntax() {
        let def = parse_attribute_type("( 2.5.4.3 NAME 'cn' SUP name )").unwrap();
        assert_eq!(def.names, vec!["cn".to_string()]);
        assert!(!def.single_value);
        assert!(def.syntax.is_none());
    }

    #[test]
    fn parses_object_class_with_sup_must_may() {
        let def = parse_object_class(
            "( 2.16.840.1.113730.3.2.2 NAME 'inetOrgPerson' SUP organizationalPerson STRUCTURAL MAY ( mail $ uid ) )",
        )
        .unwrap();
        assert_eq!(def.names, vec!["inetOrgPerson".to_string()]);
        assert_eq!(def.sup, vec!["organizationalPerson".to_string()]);
        assert_eq!(def.kind, ObjectClassKind::Structural);
        assert_eq!(def.may, vec!["mail".to_string(), "uid".to_string()]);
    }

    #[test]
    fn defaults_to_structural_when_kind_omitted() {
        let def = parse_object_class("( 2.5.6.0 NAME 'top' MUST objectClass ABSTRACT )").unwrap();
        assert_eq!(def.kind, ObjectClassKind::Abstract);
        assert_eq!(def.must, vec!["objectClass".to_string()]);
    }
}
