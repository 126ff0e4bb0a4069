//! Read-only state inspection.
//!
//! Components expose their state to debuggers through dotted query paths.
//! Queries never affect emulation state.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A dynamically-typed query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// Signed cycle counts.
    I32(i32),
    String(String),
    Array(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "${v:02X}"),
            Self::U16(v) => write!(f, "${v:04X}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i32 => I32,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// A component whose state can be inspected.
pub trait Observable {
    /// Query one property by dotted path (`pc`, `flags.z`, `memory.4000`).
    ///
    /// Returns `None` for unknown paths.
    fn query(&self, path: &str) -> Option<Value>;

    /// The fixed paths `query` answers. Parameterised paths such as memory
    /// addresses are not listed.
    fn query_paths(&self) -> &'static [&'static str];

    /// Every listed path with its current value.
    fn dump(&self) -> BTreeMap<String, Value> {
        self.query_paths()
            .iter()
            .filter_map(|path| self.query(path).map(|v| ((*path).to_string(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl Observable for Probe {
        fn query(&self, path: &str) -> Option<Value> {
            match path {
                "a" => Some(0x3Cu8.into()),
                "cc" => Some((-12i32).into()),
                _ => None,
            }
        }

        fn query_paths(&self) -> &'static [&'static str] {
            &["a", "cc", "missing"]
        }
    }

    #[test]
    fn dump_skips_unanswered_paths() {
        let dump = Probe.dump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump["a"], Value::U8(0x3C));
        assert_eq!(dump["cc"].to_string(), "-12");
    }

    #[test]
    fn values_format_as_hex_for_bytes_and_words() {
        assert_eq!(Value::U8(0x0A).to_string(), "$0A");
        assert_eq!(Value::U16(0x4000).to_string(), "$4000");
        let list = Value::Array(vec![true.into(), "x".into()]);
        assert_eq!(list.to_string(), "[true, x]");
    }
}
