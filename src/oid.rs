//! Dotted-numeric object identifiers, the canonical key for schema elements
//! (§3, §9 "shared schema").

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for Oid {
    type Err = ();

    fn from_str(s: &str) -> Result<Oid, ()> {
        if s.is_empty() {
            return Err(());
        }
        let mut arcs = Vec::new();
        for part in s.split('.') {
            arcs.push(part.parse::<u32>().map_err(|_| ())?);
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_compares_structurally() {
        let a: Oid = "0.9.2342.19200300.100.1.1".parse().unwrap();
        let b: Oid = "0.9.2342.19200300.100.1.1".parse().unwrap();
        let c: Oid = "2.5.4.3".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "0.9.2342.19200300.100.1.1");
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Oid>().is_err());
        assert!("1.x.3".parse::<Oid>().is_err());
    }
}
