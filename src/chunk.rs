//! Typed, nullable column storage.
//!
//! Chunk storage is a tagged sum of fixed-width typed slabs and a string
//! slab (offsets + bytes) rather than a pointer-to-trait-object table: the
//! per-row hot paths (hashing, comparing, pruning) switch on the tag once
//! per call and then run branch-predictable inner loops, mirroring how
//! `read_buffer`'s column encodings specialise per physical type.

use std::cmp::Ordering;
use std::fmt;

use snafu::{ensure, Snafu};

use crate::bitmap::Bitmap;
use crate::value::{Dtype, Scalar};

#[derive(Debug, Snafu)]
pub enum ChunkError {
    #[snafu(display("cannot append chunks of different dtypes: {a} vs {b}"))]
    DtypeMismatch { a: Dtype, b: Dtype },
    #[snafu(display("truths() called on non-bool chunk of dtype {dtype}"))]
    NotBool { dtype: Dtype },
}

#[derive(Debug, Clone)]
enum ChunkData {
    /// Every row is the SQL NULL literal; carries no values.
    Null,
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Date(Vec<i32>),
    /// Nanoseconds since epoch. `precision` is the highest sub-second
    /// literal precision (0..=9) observed across all values ever merged
    /// into this chunk via `append`; it governs display only.
    Datetime { nanos: Vec<i64>, precision: u32 },
    String { offsets: Vec<u32>, bytes: Vec<u8> },
}

/// A length-`N` slice of a single column, with an optional null bitmap.
#[derive(Debug, Clone)]
pub struct Chunk {
    len: usize,
    dtype: Dtype,
    nullable: bool,
    /// `Some` iff `nullable`; bit set at `i` means row `i` is null. The
    /// underlying value at a null position is unspecified.
    null_mask: Option<Bitmap>,
    data: ChunkData,
}

const NULL_HASH: u64 = 0xDEAD_BEEF_CAFE_F00D;
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

impl Chunk {
    fn new(len: usize, dtype: Dtype, nullable: bool, null_mask: Option<Bitmap>, data: ChunkData) -> Self {
        if let Some(m) = &null_mask {
            assert_eq!(m.len(), len, "null mask length must equal chunk length");
        }
        assert_eq!(nullable, null_mask.is_some());
        Self { len, dtype, nullable, null_mask, data }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_null(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        match &self.data {
            ChunkData::Null => true,
            _ => self.null_mask.as_ref().map(|m| m.get(i)).unwrap_or(false),
        }
    }

    /// A fully-null chunk of dtype `Null` (the evaluation of the `NULL`
    /// literal).
    pub fn all_null(len: usize) -> Self {
        Self::new(len, Dtype::Null, true, Some(Bitmap::all_ones(len)), ChunkData::Null)
    }

    pub fn from_bools(values: Vec<bool>, nulls: Option<Bitmap>) -> Self {
        let len = values.len();
        let nullable = nulls.is_some();
        Self::new(len, Dtype::Bool, nullable, nulls, ChunkData::Bool(values))
    }

    pub fn from_ints(values: Vec<i64>, nulls: Option<Bitmap>) -> Self {
        let len = values.len();
        let nullable = nulls.is_some();
        Self::new(len, Dtype::Int, nullable, nulls, ChunkData::Int(values))
    }

    pub fn from_floats(values: Vec<f64>, nulls: Option<Bitmap>) -> Self {
        let len = values.len();
        let nullable = nulls.is_some();
        Self::new(len, Dtype::Float, nullable, nulls, ChunkData::Float(values))
    }

    pub fn from_dates(values: Vec<i32>, nulls: Option<Bitmap>) -> Self {
        let len = values.len();
        let nullable = nulls.is_some();
        Self::new(len, Dtype::Date, nullable, nulls, ChunkData::Date(values))
    }

    pub fn from_datetimes(values: Vec<i64>, precision: u32, nulls: Option<Bitmap>) -> Self {
        let len = values.len();
        let nullable = nulls.is_some();
        Self::new(
            len,
            Dtype::Datetime,
            nullable,
            nulls,
            ChunkData::Datetime { nanos: values, precision },
        )
    }

    pub fn from_strings(values: Vec<String>, nulls: Option<Bitmap>) -> Self {
        let mut offsets = Vec::with_capacity(values.len() + 1);
        let mut bytes = Vec::new();
        offsets.push(0u32);
        for v in &values {
            bytes.extend_from_slice(v.as_bytes());
            offsets.push(bytes.len() as u32);
        }
        let len = values.len();
        let nullable = nulls.is_some();
        Self::new(len, Dtype::String, nullable, nulls, ChunkData::String { offsets, bytes })
    }

    /// A constant chunk of length `len` holding `value` (or null) in every
    /// row. Used to materialise literal expression nodes.
    pub fn constant(dtype: Dtype, nullable: bool, value: Option<&Scalar>, len: usize) -> Self {
        match value {
            None => {
                if dtype == Dtype::Null {
                    return Self::all_null(len);
                }
                let mask = Bitmap::all_ones(len);
                let data = match dtype {
                    Dtype::Bool => ChunkData::Bool(vec![false; len]),
                    Dtype::Int => ChunkData::Int(vec![0; len]),
                    Dtype::Float => ChunkData::Float(vec![0.0; len]),
                    Dtype::Date => ChunkData::Date(vec![0; len]),
                    Dtype::Datetime => ChunkData::Datetime { nanos: vec![0; len], precision: 0 },
                    Dtype::String => {
                        ChunkData::String { offsets: vec![0; len + 1], bytes: Vec::new() }
                    }
                    Dtype::Null => unreachable!(),
                };
                Self::new(len, dtype, true, Some(mask), data)
            }
            Some(scalar) => {
                let null_mask = if nullable { Some(Bitmap::new(len)) } else { None };
                let data = match scalar {
                    Scalar::Bool(b) => ChunkData::Bool(vec![*b; len]),
                    Scalar::Int(v) => ChunkData::Int(vec![*v; len]),
                    Scalar::Float(v) => ChunkData::Float(vec![*v; len]),
                    Scalar::Date(v) => ChunkData::Date(vec![*v; len]),
                    Scalar::Datetime(v, p) => {
                        ChunkData::Datetime { nanos: vec![*v; len], precision: *p }
                    }
                    Scalar::String(s) => Self::from_strings(vec![s.clone(); len], None).data,
                };
                Self::new(len, dtype, nullable, null_mask, data)
            }
        }
    }

    /// Materialise the scalar at row `i`, or `None` if null.
    pub fn get_scalar(&self, i: usize) -> Option<Scalar> {
        if self.is_null(i) {
            return None;
        }
        Some(match &self.data {
            ChunkData::Null => return None,
            ChunkData::Bool(v) => Scalar::Bool(v[i]),
            ChunkData::Int(v) => Scalar::Int(v[i]),
            ChunkData::Float(v) => Scalar::Float(v[i]),
            ChunkData::Date(v) => Scalar::Date(v[i]),
            ChunkData::Datetime { nanos, precision } => Scalar::Datetime(nanos[i], *precision),
            ChunkData::String { offsets, bytes } => {
                let s = &bytes[offsets[i] as usize..offsets[i + 1] as usize];
                Scalar::String(String::from_utf8_lossy(s).into_owned())
            }
        })
    }

    pub fn get_str(&self, i: usize) -> Option<&str> {
        match &self.data {
            ChunkData::String { offsets, bytes } if !self.is_null(i) => {
                Some(std::str::from_utf8(&bytes[offsets[i] as usize..offsets[i + 1] as usize]).unwrap())
            }
            _ => None,
        }
    }

    pub fn get_bool(&self, i: usize) -> Option<bool> {
        match &self.data {
            ChunkData::Bool(v) if !self.is_null(i) => Some(v[i]),
            _ => None,
        }
    }

    pub fn get_int(&self, i: usize) -> Option<i64> {
        match &self.data {
            ChunkData::Int(v) if !self.is_null(i) => Some(v[i]),
            _ => None,
        }
    }

    pub fn get_float(&self, i: usize) -> Option<f64> {
        match &self.data {
            ChunkData::Float(v) if !self.is_null(i) => Some(v[i]),
            _ => None,
        }
    }

    /// Concatenate `other` after `self`. Dtypes must match exactly; the
    /// result is nullable if either input is.
    pub fn append(&self, other: &Chunk) -> Result<Chunk, ChunkError> {
        ensure!(self.dtype == other.dtype, DtypeMismatchSnafu { a: self.dtype, b: other.dtype });

        let nullable = self.nullable || other.nullable;
        let total_len = self.len + other.len;

        let null_mask = if nullable {
            let mut bits = Vec::with_capacity(total_len);
            for i in 0..self.len {
                bits.push(self.is_null(i));
            }
            for i in 0..other.len {
                bits.push(other.is_null(i));
            }
            Some(Bitmap::from_ones(total_len, bits.into_iter().enumerate().filter(|(_, b)| *b).map(|(i, _)| i)))
        } else {
            None
        };

        let data = match (&self.data, &other.data) {
            (ChunkData::Null, ChunkData::Null) => ChunkData::Null,
            (ChunkData::Bool(a), ChunkData::Bool(b)) => {
                ChunkData::Bool(a.iter().chain(b.iter()).copied().collect())
            }
            (ChunkData::Int(a), ChunkData::Int(b)) => {
                ChunkData::Int(a.iter().chain(b.iter()).copied().collect())
            }
            (ChunkData::Float(a), ChunkData::Float(b)) => {
                ChunkData::Float(a.iter().chain(b.iter()).copied().collect())
            }
            (ChunkData::Date(a), ChunkData::Date(b)) => {
                ChunkData::Date(a.iter().chain(b.iter()).copied().collect())
            }
            (
                ChunkData::Datetime { nanos: a, precision: pa },
                ChunkData::Datetime { nanos: b, precision: pb },
            ) => ChunkData::Datetime {
                nanos: a.iter().chain(b.iter()).copied().collect(),
                precision: (*pa).max(*pb),
            },
            (
                ChunkData::String { offsets: oa, bytes: ba },
                ChunkData::String { offsets: ob, bytes: bb },
            ) => {
                let mut offsets = Vec::with_capacity(oa.len() + ob.len() - 1);
                offsets.extend_from_slice(oa);
                let base = *oa.last().unwrap();
                offsets.extend(ob.iter().skip(1).map(|o| o + base));
                let mut bytes = ba.clone();
                bytes.extend_from_slice(bb);
                ChunkData::String { offsets, bytes }
            }
            _ => unreachable!("dtype check above guarantees matching variants"),
        };

        Ok(Chunk::new(total_len, self.dtype, nullable, null_mask, data))
    }

    /// New chunk of length `mask.count()` keeping only the rows selected by
    /// `mask`, in original order.
    pub fn prune(&self, mask: &Bitmap) -> Chunk {
        assert_eq!(mask.len(), self.len, "mask length must equal chunk length");
        let kept: Vec<usize> = mask.iter_ones().collect();
        self.gather(&kept)
    }

    /// New chunk of length `order.len()` built by reading row `order[j]` of
    /// `self` into output row `j`. Unlike `prune`, `order` may repeat or
    /// reorder indices; used to materialise a sort permutation.
    pub fn take(&self, order: &[usize]) -> Chunk {
        self.gather(order)
    }

    fn gather(&self, indices: &[usize]) -> Chunk {
        let new_len = indices.len();

        let null_mask = self
            .null_mask
            .as_ref()
            .map(|m| Bitmap::from_ones(new_len, indices.iter().enumerate().filter(|(_, &i)| m.get(i)).map(|(j, _)| j)));

        let data = match &self.data {
            ChunkData::Null => ChunkData::Null,
            ChunkData::Bool(v) => ChunkData::Bool(indices.iter().map(|&i| v[i]).collect()),
            ChunkData::Int(v) => ChunkData::Int(indices.iter().map(|&i| v[i]).collect()),
            ChunkData::Float(v) => ChunkData::Float(indices.iter().map(|&i| v[i]).collect()),
            ChunkData::Date(v) => ChunkData::Date(indices.iter().map(|&i| v[i]).collect()),
            ChunkData::Datetime { nanos, precision } => ChunkData::Datetime {
                nanos: indices.iter().map(|&i| nanos[i]).collect(),
                precision: *precision,
            },
            ChunkData::String { offsets, bytes } => {
                let mut new_offsets = Vec::with_capacity(new_len + 1);
                let mut new_bytes = Vec::new();
                new_offsets.push(0u32);
                for &i in indices {
                    let slice = &bytes[offsets[i] as usize..offsets[i + 1] as usize];
                    new_bytes.extend_from_slice(slice);
                    new_offsets.push(new_bytes.len() as u32);
                }
                ChunkData::String { offsets: new_offsets, bytes: new_bytes }
            }
        };

        Chunk::new(new_len, self.dtype, self.nullable, null_mask, data)
    }

    fn base_hash(&self, i: usize) -> u64 {
        if self.is_null(i) {
            return NULL_HASH;
        }
        match &self.data {
            ChunkData::Null => NULL_HASH,
            ChunkData::Bool(v) => v[i] as u64,
            ChunkData::Int(v) => fnv1a(&v[i].to_le_bytes()),
            ChunkData::Float(v) => fnv1a(&v[i].to_bits().to_le_bytes()),
            ChunkData::Date(v) => fnv1a(&v[i].to_le_bytes()),
            ChunkData::Datetime { nanos, .. } => fnv1a(&nanos[i].to_le_bytes()),
            ChunkData::String { offsets, bytes } => {
                fnv1a(&bytes[offsets[i] as usize..offsets[i + 1] as usize])
            }
        }
    }

    /// Combine this column's per-row hashes into `hashes`, mixing in
    /// `column_position` so that column order is significant and two
    /// independent computations over the same ordered key set produce equal
    /// accumulators for equal row tuples.
    pub fn hash_combine(&self, column_position: usize, hashes: &mut [u64]) {
        assert_eq!(hashes.len(), self.len, "hash buffer length must equal chunk length");
        let pos_salt = (column_position as u64).wrapping_mul(GOLDEN);
        for (i, h) in hashes.iter_mut().enumerate() {
            let mixed = self.base_hash(i) ^ pos_salt;
            *h = h.rotate_left(1) ^ mixed;
        }
    }

    /// Is row `i` a float NaN? Always false for non-float chunks.
    fn is_nan(&self, i: usize) -> bool {
        matches!(&self.data, ChunkData::Float(v) if !self.is_null(i) && v[i].is_nan())
    }

    /// Total-order three-way comparison of rows `i` and `j`, honouring
    /// `asc`/`nulls_first`. NaN is treated as occupying the same end of the
    /// order as null (first or last per `nulls_first`), independent of
    /// `asc` — see DESIGN.md for the rationale.
    pub fn compare(&self, asc: bool, nulls_first: bool, i: usize, j: usize) -> i8 {
        let end_class = |chunk: &Chunk, idx: usize| -> bool { chunk.is_null(idx) || chunk.is_nan(idx) };
        let (ei, ej) = (end_class(self, i), end_class(self, j));
        match (ei, ej) {
            (true, true) => 0,
            (true, false) => if nulls_first { -1 } else { 1 },
            (false, true) => if nulls_first { 1 } else { -1 },
            (false, false) => {
                let a = self.get_scalar(i).expect("non-null, non-nan value");
                let b = self.get_scalar(j).expect("non-null, non-nan value");
                let ord = a.total_cmp(&b);
                let ord = if asc { ord } else { ord.reverse() };
                match ord {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }
            }
        }
    }

    /// Bool chunks only: a fresh bitmap with one bit set per non-null TRUE
    /// row. Always a clone, never aliases this chunk's storage.
    pub fn truths(&self) -> Result<Bitmap, ChunkError> {
        let ChunkData::Bool(values) = &self.data else {
            return NotBoolSnafu { dtype: self.dtype }.fail();
        };
        let ones = (0..self.len).filter(|&i| !self.is_null(i) && values[i]);
        Ok(Bitmap::from_ones(self.len, ones))
    }

    /// `(text, present)`. `present == false` means the JSON value is `null`
    /// and `text` is empty.
    pub fn json_literal(&self, i: usize) -> (String, bool) {
        if self.is_null(i) {
            return (String::new(), false);
        }
        match self.get_scalar(i) {
            None => (String::new(), false),
            Some(scalar) => (scalar.canonical_text(), true),
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk[{} rows, dtype={}, nullable={}]", self.len, self.dtype, self.nullable)
    }
}
