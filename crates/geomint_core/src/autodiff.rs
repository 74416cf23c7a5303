use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number for forward mode AD.
/// val: real part
/// eps: derivative part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// Seeds `values` as dual numbers with unit derivative in coordinate `seed`.
    pub fn seeded(values: &[f64], seed: Option<usize>, out: &mut [Dual]) {
        for (i, (slot, &v)) in out.iter_mut().zip(values).enumerate() {
            *slot = Self::new(v, if Some(i) == seed { 1.0 } else { 0.0 });
        }
    }

    /// Applies `f` with derivative `df`, both evaluated at `val`.
    fn chain(self, f: f64, df: f64) -> Self {
        Self::new(f, df * self.eps)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / (rhs.val * rhs.val),
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d/dx (x mod c) = 1 away from the jumps
        Self::new(self.val % rhs.val, self.eps)
    }
}

macro_rules! assign_via_binary {
    ($($trait:ident :: $method:ident => $op:tt),* $(,)?) => {
        $(impl $trait for Dual {
            fn $method(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        })*
    };
}

assign_via_binary! {
    AddAssign::add_assign => +,
    SubAssign::sub_assign => -,
    MulAssign::mul_assign => *,
    DivAssign::div_assign => /,
    RemAssign::rem_assign => %,
}

impl Num for Dual {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

// Value-only parts of `Float`, read off the real part.
macro_rules! lift_constants {
    ($($name:ident => $value:expr),* $(,)?) => {
        $(fn $name() -> Self {
            Self::constant($value)
        })*
    };
}

macro_rules! inspect_value {
    ($($name:ident),* $(,)?) => {
        $(fn $name(self) -> bool {
            self.val.$name()
        })*
    };
}

macro_rules! step_functions {
    ($($name:ident),* $(,)?) => {
        $(fn $name(self) -> Self {
            Self::constant(self.val.$name())
        })*
    };
}

impl Float for Dual {
    lift_constants! {
        nan => f64::NAN,
        infinity => f64::INFINITY,
        neg_infinity => f64::NEG_INFINITY,
        min_value => f64::MIN,
        min_positive_value => f64::MIN_POSITIVE,
        max_value => f64::MAX,
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, -0.0)
    }

    inspect_value! {
        is_nan, is_infinite, is_finite, is_normal, is_sign_positive, is_sign_negative,
    }
    fn classify(self) -> std::num::FpCategory {
        self.val.classify()
    }
    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }

    // Piecewise constant functions have zero derivative.
    step_functions! { floor, ceil, round, trunc, signum }
    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.eps)
    }

    fn abs(self) -> Self {
        if self.val >= 0.0 {
            self
        } else {
            -self
        }
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }

    fn powi(self, n: i32) -> Self {
        self.chain(self.val.powi(n), n as f64 * self.val.powi(n - 1))
    }
    fn powf(self, n: Self) -> Self {
        if n.eps == 0.0 {
            // constant exponent; also valid for negative bases
            return self.chain(self.val.powf(n.val), n.val * self.val.powf(n.val - 1.0));
        }
        // x^y = exp(y ln x)
        let value = self.val.powf(n.val);
        Self::new(
            value,
            value * (n.eps * self.val.ln() + n.val * self.eps / self.val),
        )
    }
    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        self.chain(s, 0.5 / s)
    }
    fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        self.chain(c, 1.0 / (3.0 * c * c))
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }
    fn exp2(self) -> Self {
        let e = self.val.exp2();
        self.chain(e, e * std::f64::consts::LN_2)
    }
    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln(self) -> Self {
        self.chain(self.val.ln(), 1.0 / self.val)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.val.log2(), 1.0 / (self.val * std::f64::consts::LN_2))
    }
    fn log10(self) -> Self {
        self.chain(self.val.log10(), 1.0 / (self.val * std::f64::consts::LN_10))
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), 1.0 / (1.0 + self.val))
    }

    fn max(self, other: Self) -> Self {
        if self.val > other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val < other.val {
            self
        } else {
            other
        }
    }
    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }

    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
    fn asin(self) -> Self {
        self.chain(self.val.asin(), 1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn acos(self) -> Self {
        self.chain(self.val.acos(), -1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn atan(self) -> Self {
        self.chain(self.val.atan(), 1.0 / (1.0 + self.val * self.val))
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }

    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        self.chain(self.val.asinh(), 1.0 / (self.val * self.val + 1.0).sqrt())
    }
    fn acosh(self) -> Self {
        self.chain(self.val.acosh(), 1.0 / (self.val * self.val - 1.0).sqrt())
    }
    fn atanh(self) -> Self {
        self.chain(self.val.atanh(), 1.0 / (1.0 - self.val * self.val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derivative(f: impl Fn(Dual) -> Dual, x: f64) -> f64 {
        f(Dual::new(x, 1.0)).eps
    }

    #[test]
    fn product_and_quotient_rules() {
        let x = 1.3;
        assert!((derivative(|d| d * d * d, x) - 3.0 * x * x).abs() < 1e-12);
        assert!((derivative(|d| Dual::one() / d, x) + 1.0 / (x * x)).abs() < 1e-12);
    }

    #[test]
    fn elementary_functions_match_closed_forms() {
        let x = 0.4;
        assert!((derivative(Float::sin, x) - x.cos()).abs() < 1e-15);
        assert!((derivative(Float::exp, x) - x.exp()).abs() < 1e-15);
        assert!((derivative(Float::ln, x) - 1.0 / x).abs() < 1e-15);
        assert!((derivative(Float::atan, x) - 1.0 / (1.0 + x * x)).abs() < 1e-15);
        assert!((derivative(Float::tanh, x) - (1.0 - x.tanh().powi(2))).abs() < 1e-15);
        assert!((derivative(Float::log10, x) - 1.0 / (x * std::f64::consts::LN_10)).abs() < 1e-14);
    }

    #[test]
    fn constant_power_of_negative_base() {
        let d = Dual::new(-2.0, 1.0).powf(Dual::constant(2.0));
        assert_eq!(d.val, 4.0);
        assert_eq!(d.eps, -4.0);
    }

    #[test]
    fn value_only_functions_drop_the_derivative() {
        let d = Dual::new(2.7, 1.0);
        assert_eq!(d.floor(), Dual::constant(2.0));
        assert_eq!(d.signum(), Dual::constant(1.0));
        assert!(Dual::nan().is_nan());
        assert!(!Dual::infinity().is_finite());
        let mut acc = d;
        acc *= Dual::new(2.0, 0.0);
        acc -= Dual::one();
        assert_eq!(acc, Dual::new(4.4, 2.0));
    }

    #[test]
    fn seeding_marks_one_coordinate() {
        let mut out = [Dual::zero(); 3];
        Dual::seeded(&[1.0, 2.0, 3.0], Some(1), &mut out);
        assert_eq!(out[0], Dual::new(1.0, 0.0));
        assert_eq!(out[1], Dual::new(2.0, 1.0));
        assert_eq!(out[2], Dual::new(3.0, 0.0));
    }
}
