//! Replacement values for literal, constant and array element mutations.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{ConstValue, TypeRef};

/// Seedable source of replacement values.
///
/// Every value it hands out differs from the value it replaces.
#[derive(Debug)]
pub struct ValueGenerator {
    rng: StdRng,
}

const ATTEMPTS: usize = 16;

macro_rules! different_int {
    ($rng:expr, $original:expr, $t:ty, $variant:ident) => {{
        let original: $t = $original;
        let boundaries: [$t; 5] = [
            0,
            1,
            <$t>::MIN,
            <$t>::MAX,
            original.wrapping_sub(1),
        ];
        let mut chosen = original.wrapping_add(1);
        for _ in 0..ATTEMPTS {
            let candidate: $t = if $rng.random_bool(0.5) {
                boundaries[$rng.random_range(0..boundaries.len())]
            } else {
                $rng.random()
            };
            if candidate != original {
                chosen = candidate;
                break;
            }
        }
        ConstValue::$variant(chosen)
    }};
}

macro_rules! different_float {
    ($rng:expr, $original:expr, $t:ty, $variant:ident) => {{
        let original: $t = $original;
        let boundaries: [$t; 5] = [0.0, 1.0, -1.0, <$t>::MIN, <$t>::MAX];
        let mut chosen: $t = if original == 0.0 { 1.0 } else { 0.0 };
        for _ in 0..ATTEMPTS {
            let candidate: $t = if $rng.random_bool(0.5) {
                boundaries[$rng.random_range(0..boundaries.len())]
            } else {
                $rng.random_range(-1000.0..1000.0)
            };
            if candidate.to_bits() != original.to_bits() && candidate != original {
                chosen = candidate;
                break;
            }
        }
        ConstValue::$variant(chosen)
    }};
}

impl ValueGenerator {
    /// A fixed seed makes analysis reproducible; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }

    /// A value of the same type as `original` that is never equal to it.
    ///
    /// Booleans flip; numbers favour boundaries (0, 1, min, max, n-1) half
    /// of the time and are uniformly random otherwise; strings become a
    /// random UUID.
    pub fn different(&mut self, original: &ConstValue) -> ConstValue {
        let rng = &mut self.rng;
        match original {
            ConstValue::Bool(v) => ConstValue::Bool(!v),
            ConstValue::Char(v) => different_int!(rng, *v, u16, Char),
            ConstValue::I8(v) => different_int!(rng, *v, i8, I8),
            ConstValue::U8(v) => different_int!(rng, *v, u8, U8),
            ConstValue::I16(v) => different_int!(rng, *v, i16, I16),
            ConstValue::U16(v) => different_int!(rng, *v, u16, U16),
            ConstValue::I32(v) => different_int!(rng, *v, i32, I32),
            ConstValue::U32(v) => different_int!(rng, *v, u32, U32),
            ConstValue::I64(v) => different_int!(rng, *v, i64, I64),
            ConstValue::U64(v) => different_int!(rng, *v, u64, U64),
            ConstValue::F32(v) => different_float!(rng, *v, f32, F32),
            ConstValue::F64(v) => different_float!(rng, *v, f64, F64),
            ConstValue::String(s) => ConstValue::String(self.surrogate_string(s)),
        }
    }

    /// Fresh array element of type `ty`, different from `original` when it is known.
    pub fn element(&mut self, ty: &TypeRef, original: Option<&ConstValue>) -> Option<ConstValue> {
        let original = match original {
            Some(v) => v.clone(),
            None => zero(ty)?,
        };
        Some(self.different(&original))
    }

    /// Random UUID text; never equal to `original`.
    pub fn surrogate_string(&mut self, original: &str) -> String {
        loop {
            let bytes: [u8; 16] = self.rng.random();
            let candidate = uuid::Builder::from_random_bytes(bytes)
                .into_uuid()
                .to_string();
            if candidate != original {
                return candidate;
            }
        }
    }
}

/// Default (zero) value of a primitive type.
pub fn zero(ty: &TypeRef) -> Option<ConstValue> {
    let v = match ty {
        TypeRef::Bool => ConstValue::Bool(false),
        TypeRef::Char => ConstValue::Char(0),
        TypeRef::I8 => ConstValue::I8(0),
        TypeRef::U8 => ConstValue::U8(0),
        TypeRef::I16 => ConstValue::I16(0),
        TypeRef::U16 => ConstValue::U16(0),
        TypeRef::I32 => ConstValue::I32(0),
        TypeRef::U32 => ConstValue::U32(0),
        TypeRef::I64 => ConstValue::I64(0),
        TypeRef::U64 => ConstValue::U64(0),
        TypeRef::F32 => ConstValue::F32(0.0),
        TypeRef::F64 => ConstValue::F64(0.0),
        _ => return None,
    };
    Some(v)
}
