//! Minimal CPython `marshal` codec (format version 4).
//!
//! Covers the object types that appear in a profiler stats dump: `None`,
//! booleans, ints, floats, strings, tuples and dicts. The writer never
//! emits references; the reader resolves the `FLAG_REF` / `r` references
//! that CPython itself writes for interned strings and repeated tuples.

use crate::utils::error::MarshalError;

const TYPE_NULL: u8 = b'0';
const TYPE_NONE: u8 = b'N';
const TYPE_FALSE: u8 = b'F';
const TYPE_TRUE: u8 = b'T';
const TYPE_INT: u8 = b'i';
const TYPE_LONG: u8 = b'l';
const TYPE_BINARY_FLOAT: u8 = b'g';
const TYPE_STRING: u8 = b's';
const TYPE_INTERNED: u8 = b't';
const TYPE_REF: u8 = b'r';
const TYPE_TUPLE: u8 = b'(';
const TYPE_LIST: u8 = b'[';
const TYPE_DICT: u8 = b'{';
const TYPE_UNICODE: u8 = b'u';
const TYPE_ASCII: u8 = b'a';
const TYPE_ASCII_INTERNED: u8 = b'A';
const TYPE_SMALL_TUPLE: u8 = b')';
const TYPE_SHORT_ASCII: u8 = b'z';
const TYPE_SHORT_ASCII_INTERNED: u8 = b'Z';

const FLAG_REF: u8 = 0x80;

/// Digits of a marshalled long are base 2**15
const PYLONG_SHIFT: u32 = 15;
const PYLONG_MASK: u64 = (1 << PYLONG_SHIFT) - 1;

/// A decoded (or to-be-encoded) marshal object
#[derive(Debug, Clone, PartialEq)]
pub enum MarshalValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<MarshalValue>),
    /// Pairs in encoding order
    Dict(Vec<(MarshalValue, MarshalValue)>),
}

impl MarshalValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Floats, and ints where a float is expected
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[MarshalValue]> {
        match self {
            Self::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(MarshalValue, MarshalValue)]> {
        match self {
            Self::Dict(pairs) => Some(pairs),
            Self::None => Some(&[]),
            _ => None,
        }
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
        }
    }
}

/// Encode a value
///
/// **Public** - the inverse of [`loads`]
pub fn dumps(value: &MarshalValue) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &MarshalValue) {
    match value {
        MarshalValue::None => out.push(TYPE_NONE),
        MarshalValue::Bool(true) => out.push(TYPE_TRUE),
        MarshalValue::Bool(false) => out.push(TYPE_FALSE),
        MarshalValue::Int(v) => write_int(out, *v),
        MarshalValue::Float(v) => {
            out.push(TYPE_BINARY_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        MarshalValue::Str(s) => write_str(out, s),
        MarshalValue::Tuple(items) => {
            match u8::try_from(items.len()) {
                Ok(n) => {
                    out.push(TYPE_SMALL_TUPLE);
                    out.push(n);
                }
                Err(_) => {
                    out.push(TYPE_TUPLE);
                    write_len(out, items.len());
                }
            }
            for item in items {
                write_value(out, item);
            }
        }
        MarshalValue::Dict(pairs) => {
            out.push(TYPE_DICT);
            for (k, v) in pairs {
                write_value(out, k);
                write_value(out, v);
            }
            out.push(TYPE_NULL);
        }
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    // marshal lengths are signed 32-bit
    let len = i32::try_from(len).unwrap_or(i32::MAX);
    out.extend_from_slice(&len.to_le_bytes());
}

fn write_int(out: &mut Vec<u8>, v: i64) {
    if let Ok(small) = i32::try_from(v) {
        out.push(TYPE_INT);
        out.extend_from_slice(&small.to_le_bytes());
        return;
    }

    let mut magnitude = v.unsigned_abs();
    let mut digits = Vec::new();
    while magnitude > 0 {
        digits.push((magnitude & PYLONG_MASK) as u16);
        magnitude >>= PYLONG_SHIFT;
    }
    let n = digits.len() as i32;
    out.push(TYPE_LONG);
    out.extend_from_slice(&(if v < 0 { -n } else { n }).to_le_bytes());
    for digit in digits {
        out.extend_from_slice(&digit.to_le_bytes());
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    if s.is_ascii() {
        if let Ok(n) = u8::try_from(bytes.len()) {
            out.push(TYPE_SHORT_ASCII);
            out.push(n);
        } else {
            out.push(TYPE_ASCII);
            write_len(out, bytes.len());
        }
    } else {
        out.push(TYPE_UNICODE);
        write_len(out, bytes.len());
    }
    out.extend_from_slice(bytes);
}

/// Decode one value from the start of `data`
///
/// # Errors
/// * `MarshalError::UnexpectedEof` - data ends inside an object
/// * `MarshalError::UnsupportedType` - an object type outside the stats subset
/// * `MarshalError::InvalidReference` - a back-reference to an unknown slot
/// * `MarshalError::InvalidString` - a `u`/`t` string that is not UTF-8
pub fn loads(data: &[u8]) -> Result<MarshalValue, MarshalError> {
    Reader {
        data,
        pos: 0,
        refs: Vec::new(),
    }
    .read_value()
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<Option<MarshalValue>>,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MarshalError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(MarshalError::UnexpectedEof(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, MarshalError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    fn len(&mut self) -> Result<usize, MarshalError> {
        let offset = self.pos;
        usize::try_from(self.i32()?).map_err(|_| MarshalError::UnexpectedEof(offset))
    }

    fn string(&mut self, n: usize, offset: usize) -> Result<MarshalValue, MarshalError> {
        let bytes = self.take(n)?;
        std::str::from_utf8(bytes)
            .map(|s| MarshalValue::Str(s.to_string()))
            .map_err(|_| MarshalError::InvalidString(offset))
    }

    fn read_value(&mut self) -> Result<MarshalValue, MarshalError> {
        let offset = self.pos;
        let byte = self.u8()?;
        let code = byte & !FLAG_REF;

        if code == TYPE_REF {
            let index = self.len()?;
            return self
                .refs
                .get(index)
                .cloned()
                .flatten()
                .ok_or(MarshalError::InvalidReference(index));
        }

        // Reserve the slot before reading children, as CPython numbers them
        let slot = if byte & FLAG_REF != 0 {
            self.refs.push(None);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let value = match code {
            TYPE_NONE => MarshalValue::None,
            TYPE_TRUE => MarshalValue::Bool(true),
            TYPE_FALSE => MarshalValue::Bool(false),
            TYPE_INT => MarshalValue::Int(i64::from(self.i32()?)),
            TYPE_LONG => self.long(offset)?,
            TYPE_BINARY_FLOAT => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(self.take(8)?);
                MarshalValue::Float(f64::from_le_bytes(buf))
            }
            TYPE_SHORT_ASCII | TYPE_SHORT_ASCII_INTERNED => {
                let n = usize::from(self.u8()?);
                self.string(n, offset)?
            }
            TYPE_ASCII | TYPE_ASCII_INTERNED | TYPE_UNICODE | TYPE_INTERNED | TYPE_STRING => {
                let n = self.len()?;
                self.string(n, offset)?
            }
            TYPE_SMALL_TUPLE => {
                let n = usize::from(self.u8()?);
                self.items(n)?
            }
            TYPE_TUPLE | TYPE_LIST => {
                let n = self.len()?;
                self.items(n)?
            }
            TYPE_DICT => {
                let mut pairs = Vec::new();
                loop {
                    if self.data.get(self.pos) == Some(&TYPE_NULL) {
                        self.pos += 1;
                        break;
                    }
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    pairs.push((key, value));
                }
                MarshalValue::Dict(pairs)
            }
            _ => return Err(MarshalError::UnsupportedType { code, offset }),
        };

        if let Some(slot) = slot {
            self.refs[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn items(&mut self, n: usize) -> Result<MarshalValue, MarshalError> {
        let mut items = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            items.push(self.read_value()?);
        }
        Ok(MarshalValue::Tuple(items))
    }

    fn long(&mut self, offset: usize) -> Result<MarshalValue, MarshalError> {
        let n = self.i32()?;
        let mut magnitude: u64 = 0;
        for i in 0..n.unsigned_abs() {
            let mut buf = [0u8; 2];
            buf.copy_from_slice(self.take(2)?);
            let digit = u64::from(u16::from_le_bytes(buf));
            let shifted = digit
                .checked_shl(i * PYLONG_SHIFT)
                .filter(|s| s >> (i * PYLONG_SHIFT) == digit)
                .ok_or(MarshalError::UnsupportedType {
                    code: TYPE_LONG,
                    offset,
                })?;
            magnitude |= shifted;
        }
        let value = i64::try_from(magnitude).map_err(|_| MarshalError::UnsupportedType {
            code: TYPE_LONG,
            offset,
        })?;
        Ok(MarshalValue::Int(if n < 0 { -value } else { value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        // Bytes as produced by CPython's marshal.dumps
        assert_eq!(dumps(&MarshalValue::Int(1)), b"i\x01\x00\x00\x00");
        assert_eq!(dumps(&MarshalValue::Str("ab".into())), b"z\x02ab");
        assert_eq!(
            dumps(&MarshalValue::Tuple(vec![MarshalValue::None, MarshalValue::Bool(true)])),
            b")\x02NT"
        );
        assert_eq!(
            dumps(&MarshalValue::Dict(vec![(MarshalValue::Int(0), MarshalValue::None)])),
            b"{i\x00\x00\x00\x00N0"
        );
        assert_eq!(
            dumps(&MarshalValue::Float(0.5)),
            [b"g".as_slice(), &0.5f64.to_le_bytes()].concat()
        );
    }

    #[test]
    fn test_long_integers() {
        // 2**31 == 0x8000_0000, digits 0, 0, 2 in base 2**15
        let encoded = dumps(&MarshalValue::Int(1 << 31));
        assert_eq!(encoded, b"l\x03\x00\x00\x00\x00\x00\x00\x00\x02\x00");
        assert_eq!(loads(&encoded).unwrap(), MarshalValue::Int(1 << 31));

        let negative = dumps(&MarshalValue::Int(-(1 << 40)));
        assert_eq!(loads(&negative).unwrap(), MarshalValue::Int(-(1 << 40)));
    }

    #[test]
    fn test_non_ascii_string() {
        let value = MarshalValue::Str("żółw.sh".into());
        let encoded = dumps(&value);
        assert_eq!(encoded[0], TYPE_UNICODE);
        assert_eq!(loads(&encoded).unwrap(), value);
    }

    #[test]
    fn test_references_resolve() {
        // (FLAG_REF | 'Z') "ab", then a back-reference to slot 0
        let data = b")\x02\xda\x02abr\x00\x00\x00\x00";
        let value = loads(data).unwrap();
        assert_eq!(
            value,
            MarshalValue::Tuple(vec![
                MarshalValue::Str("ab".into()),
                MarshalValue::Str("ab".into())
            ])
        );
    }

    #[test]
    fn test_errors() {
        assert!(matches!(loads(b"i\x01"), Err(MarshalError::UnexpectedEof(1))));
        assert!(matches!(
            loads(b"c"),
            Err(MarshalError::UnsupportedType { code: b'c', offset: 0 })
        ));
        assert!(matches!(
            loads(b"r\x05\x00\x00\x00"),
            Err(MarshalError::InvalidReference(5))
        ));
        assert!(matches!(loads(b"u\x01\x00\x00\x00\xff"), Err(MarshalError::InvalidString(0))));
    }
}
