// SPDX-License-Identifier: AGPL-3.0

//! 256-bit machine words for symbolic EVM execution.
//!
//! Every quantity the executor touches (registers, memory bytes, storage
//! slots, return data) is a [`Word`]: either a concrete nonnegative
//! integer below `2^size` or a Z3 bit-vector expression of the same width.
//! Operators lift concrete operands to symbolic ones as needed and reduce
//! back to concrete when both sides are concrete.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};
use std::fmt;
use z3::ast::{Ast, Bool as Z3Bool, BV};
use z3::Context;

use conkas_errors::{ExecError, ExecResult};

/// Width of an EVM word in bits.
pub const WORD_SIZE: u32 = 256;

/// Mask of all ones for the given bit width.
pub fn mask(bit_size: u32) -> BigUint {
    if bit_size == 0 {
        BigUint::zero()
    } else {
        (BigUint::one() << bit_size as usize) - BigUint::one()
    }
}

/// `2^256`, the modulus of unsigned word arithmetic.
pub fn word_ceiling() -> BigUint {
    BigUint::one() << WORD_SIZE as usize
}

/// Largest value representable as a nonnegative signed word.
pub fn max_svalue() -> BigUint {
    (BigUint::one() << (WORD_SIZE as usize - 1)) - BigUint::one()
}

fn normalize(value: BigUint, bit_size: u32) -> BigUint {
    if bit_size == 0 {
        BigUint::zero()
    } else {
        value & mask(bit_size)
    }
}

/// Two's-complement view of an unsigned value of the given width.
pub fn to_signed(value: &BigUint, bit_size: u32) -> BigInt {
    if bit_size == 0 {
        return BigInt::zero();
    }
    let sign_bit = BigUint::one() << (bit_size as usize - 1);
    if value < &sign_bit {
        BigInt::from(value.clone())
    } else {
        let modulus = BigUint::one() << bit_size as usize;
        BigInt::from_biguint(Sign::Minus, modulus - value)
    }
}

/// Unsigned view of a signed value, wrapping into `[0, 2^bit_size)`.
pub fn to_unsigned(value: &BigInt, bit_size: u32) -> BigUint {
    match value.sign() {
        Sign::NoSign => BigUint::zero(),
        Sign::Plus => normalize(value.to_biguint().unwrap(), bit_size),
        Sign::Minus => {
            let magnitude = (-value.clone()).to_biguint().unwrap();
            let modulus = BigUint::one() << bit_size as usize;
            normalize(modulus - (magnitude & mask(bit_size)), bit_size)
        }
    }
}

fn biguint_to_bv<'ctx>(ctx: &'ctx Context, value: &BigUint, bit_size: u32) -> BV<'ctx> {
    assert!(bit_size > 0, "bit size must be greater than zero");

    if let Some(small) = value.to_u64() {
        return BV::from_u64(ctx, small, bit_size);
    }

    // Build the bit-vector byte by byte so arbitrary widths work.
    let num_bytes = (bit_size as usize + 7) / 8;
    let mut bytes = value.to_bytes_be();
    if bytes.len() < num_bytes {
        let mut padded = vec![0u8; num_bytes - bytes.len()];
        padded.extend_from_slice(&bytes);
        bytes = padded;
    } else if bytes.len() > num_bytes {
        bytes = bytes[bytes.len() - num_bytes..].to_vec();
    }

    let mut iter = bytes.into_iter();
    let first = iter.next().unwrap_or(0);
    let mut acc = BV::from_u64(ctx, first as u64, 8);
    for byte in iter {
        acc = acc.concat(&BV::from_u64(ctx, byte as u64, 8));
    }

    if bit_size % 8 == 0 {
        acc
    } else {
        acc.extract(bit_size - 1, 0)
    }
}

/// A concrete or symbolic boolean, as produced by word comparisons.
#[derive(Clone, PartialEq)]
pub enum SymBool<'ctx> {
    Concrete(bool),
    Symbolic(Z3Bool<'ctx>),
}

impl<'ctx> SymBool<'ctx> {
    /// Wrap a Z3 boolean, collapsing to concrete when it simplifies.
    pub fn from_z3(value: Z3Bool<'ctx>) -> Self {
        if let Some(simplified) = value.simplify().as_bool() {
            Self::Concrete(simplified)
        } else {
            Self::Symbolic(value)
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete(_))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Self::Concrete(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Self::Concrete(false))
    }

    /// Lift to a Z3 boolean term.
    pub fn to_z3(&self, ctx: &'ctx Context) -> Z3Bool<'ctx> {
        match self {
            Self::Concrete(b) => Z3Bool::from_bool(ctx, *b),
            Self::Symbolic(b) => b.clone(),
        }
    }

    pub fn not(&self) -> Self {
        match self {
            Self::Concrete(b) => Self::Concrete(!b),
            Self::Symbolic(b) => Self::from_z3(b.not()),
        }
    }

    /// Materialise as a word: 1 when true, 0 when false, `If(p, 1, 0)`
    /// when symbolic.
    pub fn to_word(&self, ctx: &'ctx Context) -> Word<'ctx> {
        match self {
            Self::Concrete(b) => Word::from_u64(*b as u64, WORD_SIZE),
            Self::Symbolic(b) => {
                let one = BV::from_u64(ctx, 1, WORD_SIZE);
                let zero = BV::from_u64(ctx, 0, WORD_SIZE);
                Word::from_bv(b.ite(&one, &zero))
            }
        }
    }
}

impl<'ctx> fmt::Debug for SymBool<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(b) => write!(f, "Bool({})", b),
            Self::Symbolic(b) => write!(f, "Bool({})", b),
        }
    }
}

/// A concrete or symbolic bit-vector value.
#[derive(Clone, PartialEq)]
pub enum Word<'ctx> {
    Concrete { value: BigUint, size: u32 },
    Symbolic { expr: BV<'ctx>, size: u32 },
}

impl<'ctx> Word<'ctx> {
    pub fn from_biguint(value: BigUint, size: u32) -> Self {
        Self::Concrete {
            value: normalize(value, size),
            size,
        }
    }

    pub fn from_u64(value: u64, size: u32) -> Self {
        Self::from_biguint(BigUint::from(value), size)
    }

    /// Big-endian bytes to a concrete word.
    pub fn from_bytes(bytes: &[u8], size: u32) -> Self {
        Self::from_biguint(BigUint::from_bytes_be(bytes), size)
    }

    pub fn from_bv(expr: BV<'ctx>) -> Self {
        let size = expr.get_size();
        Self::Symbolic { expr, size }
    }

    /// A fresh symbolic variable with the given textual name.
    ///
    /// Names are wire-level: the vulnerability analyses parse them back,
    /// so generation must stay deterministic.
    pub fn symbol(ctx: &'ctx Context, name: &str, size: u32) -> Self {
        Self::Symbolic {
            expr: BV::new_const(ctx, name, size),
            size,
        }
    }

    pub fn zero(size: u32) -> Self {
        Self::from_u64(0, size)
    }

    pub fn size(&self) -> u32 {
        match self {
            Self::Concrete { size, .. } => *size,
            Self::Symbolic { size, .. } => *size,
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete { .. })
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::Symbolic { .. })
    }

    pub fn all_concrete(words: &[&Word<'ctx>]) -> bool {
        words.iter().all(|w| w.is_concrete())
    }

    /// Concrete zero test; a symbolic word is never "known zero".
    pub fn is_concrete_zero(&self) -> bool {
        matches!(self, Self::Concrete { value, .. } if value.is_zero())
    }

    pub fn as_biguint(&self) -> ExecResult<BigUint> {
        match self {
            Self::Concrete { value, .. } => Ok(value.clone()),
            Self::Symbolic { .. } => Err(ExecError::NotConcrete("word is symbolic".to_string())),
        }
    }

    pub fn as_u64(&self) -> ExecResult<u64> {
        let value = self.as_biguint()?;
        value
            .to_u64()
            .ok_or_else(|| ExecError::NotConcrete("value too large for u64".to_string()))
    }

    pub fn as_usize(&self) -> ExecResult<usize> {
        let value = self.as_biguint()?;
        value
            .to_usize()
            .ok_or_else(|| ExecError::NotConcrete("value too large for usize".to_string()))
    }

    /// Lift to a Z3 bit-vector term.
    pub fn to_bv(&self, ctx: &'ctx Context) -> BV<'ctx> {
        match self {
            Self::Concrete { value, size } => biguint_to_bv(ctx, value, *size),
            Self::Symbolic { expr, .. } => expr.clone(),
        }
    }

    /// Canonical big-endian encoding, `size / 8` bytes wide.
    pub fn to_bytes(&self) -> ExecResult<Vec<u8>> {
        match self {
            Self::Concrete { value, size } => {
                let target_len = (*size as usize + 7) / 8;
                let bytes = value.to_bytes_be();
                let mut out = vec![0u8; target_len];
                let start = target_len - bytes.len().min(target_len);
                out[start..].copy_from_slice(&bytes[bytes.len() - (target_len - start)..]);
                Ok(out)
            }
            Self::Symbolic { .. } => Err(ExecError::NotConcrete(
                "cannot encode symbolic word as bytes".to_string(),
            )),
        }
    }

    /// Idempotent, satisfiability-preserving simplification.
    pub fn simplify(&self) -> Self {
        match self {
            Self::Concrete { .. } => self.clone(),
            Self::Symbolic { expr, size } => {
                let simplified = expr.simplify();
                if let Some(v) = simplified.as_u64() {
                    // Numerals that fit in a machine word collapse back to
                    // the concrete form.
                    Self::from_u64(v, *size)
                } else {
                    Self::Symbolic {
                        expr: simplified,
                        size: *size,
                    }
                }
            }
        }
    }

    /// Addition modulo `2^size`.
    pub fn add(&self, other: &Self, ctx: &'ctx Context) -> Self {
        debug_assert_eq!(self.size(), other.size());
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a + b, *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvadd(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Subtraction modulo `2^size`.
    pub fn sub(&self, other: &Self, ctx: &'ctx Context) -> Self {
        debug_assert_eq!(self.size(), other.size());
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                if a >= b {
                    Self::from_biguint(a - b, *size)
                } else {
                    let modulus = BigUint::one() << *size as usize;
                    Self::from_biguint(modulus - (b - a), *size)
                }
            }
            _ => Self::from_bv(self.to_bv(ctx).bvsub(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Multiplication modulo `2^size`.
    pub fn mul(&self, other: &Self, ctx: &'ctx Context) -> Self {
        debug_assert_eq!(self.size(), other.size());
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a * b, *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvmul(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Unsigned division. Division by a concrete zero is handled by the
    /// opcode layer; the symbolic form keeps Z3's total `bvudiv`.
    pub fn udiv(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                if b.is_zero() {
                    Self::from_u64(0, *size)
                } else {
                    Self::from_biguint(a / b, *size)
                }
            }
            _ => Self::from_bv(self.to_bv(ctx).bvudiv(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Unsigned remainder.
    pub fn urem(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                if b.is_zero() {
                    Self::from_u64(0, *size)
                } else {
                    Self::from_biguint(a % b, *size)
                }
            }
            _ => Self::from_bv(self.to_bv(ctx).bvurem(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Signed division, truncated toward zero.
    pub fn sdiv(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                if b.is_zero() {
                    return Self::from_u64(0, *size);
                }
                let quotient = to_signed(a, *size) / to_signed(b, *size);
                Self::from_biguint(to_unsigned(&quotient, *size), *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvsdiv(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Signed remainder; the sign follows the dividend.
    pub fn srem(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                if b.is_zero() {
                    return Self::from_u64(0, *size);
                }
                let remainder = to_signed(a, *size) % to_signed(b, *size);
                Self::from_biguint(to_unsigned(&remainder, *size), *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvsrem(&other.to_bv(ctx)).simplify()),
        }
    }

    pub fn bitand(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a & b, *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvand(&other.to_bv(ctx)).simplify()),
        }
    }

    pub fn bitor(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a | b, *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvor(&other.to_bv(ctx)).simplify()),
        }
    }

    pub fn bitxor(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a ^ b, *size)
            }
            _ => Self::from_bv(self.to_bv(ctx).bvxor(&other.to_bv(ctx)).simplify()),
        }
    }

    /// Bitwise complement, equal to `2^size − 1 − x`.
    pub fn not(&self, _ctx: &'ctx Context) -> Self {
        match self {
            Self::Concrete { value, size } => Self::from_biguint(mask(*size) ^ value, *size),
            Self::Symbolic { expr, .. } => Self::from_bv(expr.bvnot().simplify()),
        }
    }

    /// Shift left; concrete shifts of `size` bits or more collapse to 0.
    pub fn shl(&self, shift: &Self, ctx: &'ctx Context) -> Self {
        match (self, shift) {
            (Self::Concrete { value, size }, Self::Concrete { value: amount, .. }) => {
                match amount.to_u32() {
                    Some(n) if n < *size => Self::from_biguint(value << n as usize, *size),
                    _ => Self::from_u64(0, *size),
                }
            }
            _ => Self::from_bv(self.to_bv(ctx).bvshl(&shift.to_bv(ctx)).simplify()),
        }
    }

    /// Logical shift right.
    pub fn lshr(&self, shift: &Self, ctx: &'ctx Context) -> Self {
        match (self, shift) {
            (Self::Concrete { value, size }, Self::Concrete { value: amount, .. }) => {
                match amount.to_u32() {
                    Some(n) if n < *size => Self::from_biguint(value >> n as usize, *size),
                    _ => Self::from_u64(0, *size),
                }
            }
            _ => Self::from_bv(self.to_bv(ctx).bvlshr(&shift.to_bv(ctx)).simplify()),
        }
    }

    /// Arithmetic shift right; the sign bit fills vacated positions.
    pub fn ashr(&self, shift: &Self, ctx: &'ctx Context) -> Self {
        match (self, shift) {
            (Self::Concrete { value, size }, Self::Concrete { value: amount, .. }) => {
                let sign_bit = BigUint::one() << (*size as usize - 1);
                let negative = value >= &sign_bit;
                match amount.to_u32() {
                    Some(n) if n < *size => {
                        let shifted = value >> n as usize;
                        if negative {
                            let fill = ((BigUint::one() << n as usize) - BigUint::one())
                                << (*size - n) as usize;
                            Self::from_biguint(shifted | fill, *size)
                        } else {
                            Self::from_biguint(shifted, *size)
                        }
                    }
                    _ => {
                        if negative {
                            Self::from_biguint(mask(*size), *size)
                        } else {
                            Self::from_u64(0, *size)
                        }
                    }
                }
            }
            _ => Self::from_bv(self.to_bv(ctx).bvashr(&shift.to_bv(ctx)).simplify()),
        }
    }

    pub fn eq(&self, other: &Self, ctx: &'ctx Context) -> SymBool<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, .. }, Self::Concrete { value: b, .. }) => {
                SymBool::Concrete(a == b)
            }
            _ => SymBool::from_z3(self.to_bv(ctx)._eq(&other.to_bv(ctx))),
        }
    }

    pub fn eq_zero(&self, ctx: &'ctx Context) -> SymBool<'ctx> {
        self.eq(&Word::zero(self.size()), ctx)
    }

    pub fn ult(&self, other: &Self, ctx: &'ctx Context) -> SymBool<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, .. }, Self::Concrete { value: b, .. }) => {
                SymBool::Concrete(a < b)
            }
            _ => SymBool::from_z3(self.to_bv(ctx).bvult(&other.to_bv(ctx))),
        }
    }

    pub fn ugt(&self, other: &Self, ctx: &'ctx Context) -> SymBool<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, .. }, Self::Concrete { value: b, .. }) => {
                SymBool::Concrete(a > b)
            }
            _ => SymBool::from_z3(self.to_bv(ctx).bvugt(&other.to_bv(ctx))),
        }
    }

    pub fn slt(&self, other: &Self, ctx: &'ctx Context) -> SymBool<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                SymBool::Concrete(to_signed(a, *size) < to_signed(b, *size))
            }
            _ => SymBool::from_z3(self.to_bv(ctx).bvslt(&other.to_bv(ctx))),
        }
    }

    pub fn sgt(&self, other: &Self, ctx: &'ctx Context) -> SymBool<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                SymBool::Concrete(to_signed(a, *size) > to_signed(b, *size))
            }
            _ => SymBool::from_z3(self.to_bv(ctx).bvsgt(&other.to_bv(ctx))),
        }
    }

    /// `self` becomes the high bits, `other` the low bits.
    pub fn concat(&self, other: &Self, ctx: &'ctx Context) -> Self {
        let new_size = self.size() + other.size();
        match (self, other) {
            (Self::Concrete { value: a, .. }, Self::Concrete { value: b, size: b_size }) => {
                Self::from_biguint((a << *b_size as usize) | b, new_size)
            }
            _ => Self::from_bv(self.to_bv(ctx).concat(&other.to_bv(ctx))),
        }
    }

    /// The `index`-th byte of the low `count` bytes, big-endian order
    /// (`index = 0` is the most significant of that window). The result is
    /// an 8-bit word.
    pub fn be_byte(&self, index: usize, count: usize) -> Self {
        debug_assert!(index < count);
        debug_assert!(count * 8 <= self.size() as usize);
        match self {
            Self::Concrete { value, .. } => {
                let shift = (count - 1 - index) * 8;
                let byte = (value >> shift) & BigUint::from(0xffu32);
                Self::from_biguint(byte, 8)
            }
            Self::Symbolic { expr, .. } => {
                let hi = (count * 8 - 1 - index * 8) as u32;
                Self::from_bv(expr.extract(hi, hi - 7))
            }
        }
    }
}

impl<'ctx> fmt::Debug for Word<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete { value, size } => write!(f, "Word({}, {})", value, size),
            Self::Symbolic { expr, size } => write!(f, "Word({}, {})", expr, size),
        }
    }
}
