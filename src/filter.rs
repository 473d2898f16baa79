//! RFC 4515 filter-string-to-BER-tag parser (§6's filter-parsing external
//! collaborator), built on `nom`'s current combinator style rather than the
//! teacher's old `named!`/`do_parse!` macros. Extensible match is not
//! supported (see DESIGN.md).

use std::default::Default;

use lber::common::TagClass;
use lber::structures::{ExplicitTag, OctetString, Sequence, Tag};

use nom::branch::alt;
use nom::bytes::complete::{tag as ntag, take_while, take_while1};
use nom::character::complete::char;
use nom::character::{is_alphabetic, is_alphanumeric, is_hex_digit};
use nom::combinator::{map, map_res, recognize, verify};
use nom::multi::{fold_many0, many0};
use nom::number::complete::u8 as any_u8;
use nom::sequence::{delimited, preceded};
use nom::IResult;

pub fn parse(input: &str) -> Result<Tag, ()> {
    match filtexpr(input.as_bytes()) {
        Ok(([], t)) => Ok(t),
        _ => Err(()),
    }
}

const AND_FILT: u64 = 0;
const OR_FILT: u64 = 1;
const NOT_FILT: u64 = 2;

const EQ_MATCH: u64 = 3;
const SUBSTR_MATCH: u64 = 4;
const GTE_MATCH: u64 = 5;
const LTE_MATCH: u64 = 6;
const PRES_MATCH: u64 = 7;
const APPROX_MATCH: u64 = 8;

const SUB_INITIAL: u64 = 0;
const SUB_ANY: u64 = 1;
const SUB_FINAL: u64 = 2;

fn filtexpr(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((filter, item))(i)
}

fn filter(i: &[u8]) -> IResult<&[u8], Tag> {
    delimited(char('('), filtercomp, char(')'))(i)
}

fn filtercomp(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((and, or, not, item))(i)
}

fn filterlist(i: &[u8]) -> IResult<&[u8], Vec<Tag>> {
    many0(filter)(i)
}

fn and(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(char('&'), filterlist), |inner| Tag::Sequence(Sequence { class: TagClass::Context, id: AND_FILT, inner }))(i)
}

fn or(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(char('|'), filterlist), |inner| Tag::Sequence(Sequence { class: TagClass::Context, id: OR_FILT, inner }))(i)
}

fn not(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(char('!'), filter), |t| Tag::ExplicitTag(ExplicitTag { class: TagClass::Context, id: NOT_FILT, inner: Box::new(t) }))(i)
}

fn item(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((eq, non_eq))(i)
}

enum Unescaper {
    WantFirst,
    WantSecond(u8),
    Value(u8),
    Error,
}

impl Unescaper {
    fn feed(&self, c: u8) -> Unescaper {
        fn hex_val(c: u8) -> u8 {
            c - if c <= b'9' { b'0' } else { (c & 0x20) + b'A' - 10 }
        }
        match *self {
            Unescaper::Error => Unescaper::Error,
            Unescaper::WantFirst => {
                if is_hex_digit(c) {
                    Unescaper::WantSecond(hex_val(c))
                } else {
                    Unescaper::Error
                }
            }
            Unescaper::WantSecond(partial) => {
                if is_hex_digit(c) {
                    Unescaper::Value((partial << 4) + hex_val(c))
                } else {
                    Unescaper::Error
                }
            }
            Unescaper::Value(_) => {
                if c != b'\\' {
                    Unescaper::Value(c)
                } else {
                    Unescaper::WantFirst
                }
            }
        }
    }
}

fn is_value_char(c: u8) -> bool {
    c != 0 && c != b'(' && c != b')' && c != b'*'
}

fn unescaped(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map_res(
        fold_many0(verify(any_u8, |c: &u8| is_value_char(*c)), || (Unescaper::Value(0), Vec::new()), |(u, mut vec): (Unescaper, Vec<u8>), c: u8| {
            let u = u.feed(c);
            if let Unescaper::Value(c) = u {
                vec.push(c);
            }
            (u, vec)
        }),
        |(u, vec): (Unescaper, Vec<u8>)| if let Unescaper::Value(_) = u { Ok(vec) } else { Err(()) },
    )(i)
}

fn filterop_tag(op: &[u8]) -> u64 {
    match op {
        b">=" => GTE_MATCH,
        b"<=" => LTE_MATCH,
        b"~=" => APPROX_MATCH,
        _ => unreachable!(),
    }
}

fn non_eq(i: &[u8]) -> IResult<&[u8], Tag> {
    let (i, attr) = attributedescription(i)?;
    let (i, op) = alt((ntag(">="), ntag("<="), ntag("~=")))(i)?;
    let (i, value) = unescaped(i)?;
    Ok((
        i,
        Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: filterop_tag(op),
            inner: vec![
                Tag::OctetString(OctetString { inner: attr.to_vec(), ..Default::default() }),
                Tag::OctetString(OctetString { inner: value, ..Default::default() }),
            ],
        }),
    ))
}

fn eq(i: &[u8]) -> IResult<&[u8], Tag> {
    let (i, attr) = attributedescription(i)?;
    let (i, _) = char('=')(i)?;
    let (i, initial) = unescaped(i)?;
    let (i, mid_final) = map_res(many0(preceded(ntag("*"), unescaped)), |v: Vec<Vec<u8>>| -> Result<Vec<Vec<u8>>, ()> {
        // an empty element may only occur as the last one; otherwise two adjacent asterisks.
        if v.iter().enumerate().any(|(n, ve)| ve.is_empty() && n + 1 != v.len()) {
            Err(())
        } else {
            Ok(v)
        }
    })(i)?;

    let tag = if mid_final.is_empty() {
        Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: EQ_MATCH,
            inner: vec![
                Tag::OctetString(OctetString { inner: attr.to_vec(), ..Default::default() }),
                Tag::OctetString(OctetString { inner: initial, ..Default::default() }),
            ],
        })
    } else if initial.is_empty() && mid_final.len() == 1 && mid_final[0].is_empty() {
        Tag::OctetString(OctetString { class: TagClass::Context, id: PRES_MATCH, inner: attr.to_vec() })
    } else {
        let mut inner = vec![];
        if !initial.is_empty() {
            inner.push(Tag::OctetString(OctetString { class: TagClass::Context, id: SUB_INITIAL, inner: initial }));
        }
        let n = mid_final.len();
        for (idx, sub_elem) in mid_final.into_iter().enumerate() {
            if sub_elem.is_empty() {
                break;
            }
            inner.push(Tag::OctetString(OctetString { class: TagClass::Context, id: if idx + 1 != n { SUB_ANY } else { SUB_FINAL }, inner: sub_elem }));
        }
        Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: SUBSTR_MATCH,
            inner: vec![
                Tag::OctetString(OctetString { inner: attr.to_vec(), ..Default::default() }),
                Tag::Sequence(Sequence { inner, ..Default::default() }),
            ],
        })
    };
    Ok((i, tag))
}

fn is_alnum_hyphen(c: u8) -> bool {
    is_alphanumeric(c) || c == b'-'
}

fn attributedescription(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(|i| -> IResult<&[u8], ()> {
        let (i, _) = attributetype(i)?;
        let (i, _) = many0(preceded(char(';'), take_while1(is_alnum_hyphen)))(i)?;
        Ok((i, ()))
    })(i)
}

fn attributetype(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((numericoid, descr))(i)
}

fn numericoid(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(|i| -> IResult<&[u8], ()> {
        let (i, _) = number(i)?;
        let (i, _) = many0(preceded(char('.'), number))(i)?;
        Ok((i, ()))
    })(i)
}

fn number(i: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(take_while1(|c: u8| c.is_ascii_digit()), |d: &[u8]| d.len() == 1 || d[0] != b'0')(i)
}

fn descr(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(|i| -> IResult<&[u8], ()> {
        let (i, _) = verify(any_u8, |c: &u8| is_alphabetic(*c))(i)?;
        let (i, _) = take_while(is_alnum_hyphen)(i)?;
        Ok((i, ()))
    })(i)
}
