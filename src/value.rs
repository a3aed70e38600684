use crate::object::ObjRef;

// ── NaN-boxed value ─────────────────────────────────────────────────
//
// Numbers are stored as their raw IEEE-754 bits. Everything else lives in
// the quiet-NaN space:
//
//   null/false/true: QNAN | 1..3
//   object:          SIGN | QNAN | arena index (low 32 bits)

const QNAN: u64 = 0x7FFC_0000_0000_0000;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const TAG_NULL: u64 = QNAN | 1;
const TAG_FALSE: u64 = QNAN | 2;
const TAG_TRUE: u64 = QNAN | 3;
const TAG_OBJ: u64 = SIGN_BIT | QNAN;
const INDEX_MASK: u64 = 0x0000_0000_FFFF_FFFF;
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000; // outside our tag space

#[derive(Clone, Copy)]
pub struct Value(u64);

impl Value {
    pub const NULL: Value = Value(TAG_NULL);

    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            Value(CANONICAL_NAN)
        } else {
            Value(n.to_bits())
        }
    }

    #[inline]
    pub fn boolean(b: bool) -> Self {
        Value(if b { TAG_TRUE } else { TAG_FALSE })
    }

    #[inline]
    pub fn object(r: ObjRef) -> Self {
        Value(TAG_OBJ | r.index() as u64)
    }

    #[inline]
    pub fn is_number(self) -> bool {
        (self.0 & QNAN) != QNAN
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == TAG_NULL
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        (self.0 | 1) == TAG_TRUE
    }

    #[inline]
    pub fn is_object(self) -> bool {
        (self.0 & TAG_OBJ) == TAG_OBJ
    }

    #[inline]
    pub fn as_number(self) -> Option<f64> {
        self.is_number().then(|| f64::from_bits(self.0))
    }

    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        self.is_bool().then_some(self.0 == TAG_TRUE)
    }

    #[inline]
    pub fn as_object(self) -> Option<ObjRef> {
        self.is_object().then(|| ObjRef::from_index((self.0 & INDEX_MASK) as u32))
    }

    /// Raw encoding. Distinguishes `0` from `-0`, unlike `==`.
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0
    }

    /// `null` and `false` are falsy, everything else (including `0` and `""`) is truthy.
    #[inline]
    pub fn is_falsey(self) -> bool {
        self.0 == TAG_NULL || self.0 == TAG_FALSE
    }

    /// Type name of a non-object value. Objects are named by the heap, which
    /// knows their variant.
    pub fn primitive_type_name(self) -> Option<&'static str> {
        if self.is_number() {
            Some("number")
        } else if self.is_bool() {
            Some("bool")
        } else if self.is_null() {
            Some("null")
        } else {
            None
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self.0 == other.0,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(n) = self.as_number() {
            write!(f, "Number({})", format_number(n))
        } else if let Some(b) = self.as_bool() {
            write!(f, "Bool({b})")
        } else if self.is_null() {
            write!(f, "Null")
        } else {
            write!(f, "Object(#{})", (self.0 & INDEX_MASK))
        }
    }
}

/// Shortest round-trip digits; exponent form outside `[1e-7, 1e21)`.
pub fn format_number(n: f64) -> String {
    let magnitude = n.abs();
    if n.is_finite() && (magnitude >= 1e21 || (magnitude != 0.0 && magnitude < 1e-7)) {
        let text = format!("{n:e}");
        return match text.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => text,
        };
    }
    if n == (n as i64) as f64 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
