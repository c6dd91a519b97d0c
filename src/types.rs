// Scalars and subranges compare structurally (same name and bounds mean the
// same type); references and arrays compare by identity, since two
// `array[1..3] of int` declarations are different types even though they
// look alike.

use std::rc::Rc;

pub type Ty = Rc<TypeKind>;

// A single overload candidate: `name(argType) -> resultType`.
#[derive(Clone, Debug)]
pub struct OperatorTy {
    pub symbol: String,
    pub arg: Ty,
    pub result: Ty,
}

#[derive(Clone, Debug)]
pub enum TypeKind {
    Error,
    Scalar { name: Rc<str>, size: u32, lower: i64, upper: i64 },
    Subrange { base: Ty, lower: i64, upper: i64 },
    Reference(Ty),
    Array { index: Ty, element: Ty },
    Product(Vec<Ty>),
    Function { arg: Ty, result: Ty },
    Intersection(Vec<OperatorTy>),
}

impl PartialEq for TypeKind {
    fn eq(&self, other: &Self) -> bool {
        use TypeKind::*;
        match (self, other) {
            (Error, Error) => true,
            (
                Scalar { name: n1, size: s1, lower: l1, upper: u1 },
                Scalar { name: n2, size: s2, lower: l2, upper: u2 },
            ) => n1 == n2 && s1 == s2 && l1 == l2 && u1 == u2,
            (
                Subrange { base: b1, lower: l1, upper: u1 },
                Subrange { base: b2, lower: l2, upper: u2 },
            ) => b1 == b2 && l1 == l2 && u1 == u2,
            (Reference(a), Reference(b)) => Rc::ptr_eq(a, b),
            (Array { index: i1, element: e1 }, Array { index: i2, element: e2 }) => {
                Rc::ptr_eq(i1, i2) && Rc::ptr_eq(e1, e2)
            }
            (Product(a), Product(b)) => a == b,
            (Function { arg: a1, result: r1 }, Function { arg: a2, result: r2 }) => {
                a1 == a2 && r1 == r2
            }
            _ => false,
        }
    }
}

// `integer` is the widest scalar: every subrange silently widens to it.
pub fn integer() -> Ty {
    Rc::new(TypeKind::Scalar { name: Rc::from("integer"), size: 1, lower: i64::MIN, upper: i64::MAX })
}

pub fn boolean() -> Ty {
    Rc::new(TypeKind::Scalar { name: Rc::from("boolean"), size: 1, lower: 0, upper: 1 })
}

pub fn error_ty() -> Ty {
    Rc::new(TypeKind::Error)
}

#[must_use]
pub fn is_error(ty: &Ty) -> bool {
    matches!(**ty, TypeKind::Error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompatibleTypes;

pub trait Coercible: Sized {
    fn ty(&self) -> &Ty;
    fn wrap_dereference(self) -> Self;
    fn wrap_narrow(self, target: &Ty) -> Self;
    fn wrap_widen(self) -> Self;
}

// At most one conversion: exact match, dereference, dereference of a
// coercible base, narrow, or widen.
pub fn coerce_to_type<E: Coercible>(target: &Ty, expr: E) -> Result<E, IncompatibleTypes> {
    use TypeKind::*;
    if expr.ty().as_ref() == target.as_ref() {
        return Ok(expr);
    }
    if let Reference(inner) = expr.ty().as_ref() {
        if inner.as_ref() == target.as_ref() {
            return Ok(expr.wrap_dereference());
        }
        let inner = inner.clone();
        if coerce_to_type(target, Probe(inner.clone())).is_ok() {
            return coerce_to_type(target, expr.wrap_dereference());
        }
    }
    if let Subrange { base, .. } = target.as_ref() {
        if coerce_to_type(base, Probe(expr.ty().clone())).is_ok() {
            return Ok(expr.wrap_narrow(target));
        }
    }
    if let Subrange { base, .. } = expr.ty().as_ref() {
        if coerce_to_type(target, Probe(base.clone())).is_ok() {
            return Ok(expr.wrap_widen());
        }
    }
    Err(IncompatibleTypes)
}

// A type-only stand-in for `Coercible`, used to probe whether a coercion
// would succeed without constructing a real expression wrapper.
pub(crate) struct Probe(pub Ty);

impl Coercible for Probe {
    fn ty(&self) -> &Ty { &self.0 }
    fn wrap_dereference(self) -> Self {
        match self.0.as_ref() {
            TypeKind::Reference(inner) => Probe(inner.clone()),
            _ => self,
        }
    }
    fn wrap_narrow(self, _target: &Ty) -> Self { self }
    fn wrap_widen(self) -> Self { self }
}

pub fn coercible(target: &Ty, from: &Ty) -> bool {
    coerce_to_type(target, Probe(from.clone())).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Wrap {
        Plain(Ty),
        Dereference(Ty),
        Narrow(Ty),
        Widen(Ty),
    }

    impl Coercible for Wrap {
        fn ty(&self) -> &Ty {
            match self {
                Wrap::Plain(t) | Wrap::Dereference(t) | Wrap::Narrow(t) | Wrap::Widen(t) => t,
            }
        }
        fn wrap_dereference(self) -> Self {
            match self {
                Wrap::Plain(t) => match t.as_ref() {
                    TypeKind::Reference(inner) => Wrap::Dereference(inner.clone()),
                    _ => Wrap::Plain(t),
                },
                other => other,
            }
        }
        fn wrap_narrow(self, target: &Ty) -> Self {
            Wrap::Narrow(target.clone())
        }
        fn wrap_widen(self) -> Self {
            let base = match self.ty().as_ref() {
                TypeKind::Subrange { base, .. } => base.clone(),
                _ => self.ty().clone(),
            };
            Wrap::Widen(base)
        }
    }

    #[test]
    fn exact_match_is_a_no_op() {
        let int = integer();
        let result = coerce_to_type(&int, Wrap::Plain(int.clone())).unwrap();
        assert_eq!(result, Wrap::Plain(int));
    }

    #[test]
    fn reference_to_same_base_dereferences() {
        let int = integer();
        let reference = Rc::new(TypeKind::Reference(int.clone()));
        let result = coerce_to_type(&int, Wrap::Plain(reference)).unwrap();
        assert_eq!(result, Wrap::Dereference(int));
    }

    #[test]
    fn subrange_target_narrows_a_coercible_source() {
        let int = integer();
        let subrange = Rc::new(TypeKind::Subrange { base: int.clone(), lower: 2, upper: 5 });
        let result = coerce_to_type(&subrange, Wrap::Plain(int)).unwrap();
        assert_eq!(result, Wrap::Narrow(subrange));
    }

    #[test]
    fn subrange_source_widens_to_a_coercible_target() {
        let int = integer();
        let subrange = Rc::new(TypeKind::Subrange { base: int.clone(), lower: 2, upper: 5 });
        let result = coerce_to_type(&int, Wrap::Plain(subrange)).unwrap();
        assert_eq!(result, Wrap::Widen(int));
    }

    #[test]
    fn incompatible_types_fail() {
        let int = integer();
        let boolean_ty = boolean();
        assert!(coerce_to_type(&boolean_ty, Wrap::Plain(int)).is_err());
    }

    #[test]
    fn coercible_matches_coerce_to_type() {
        let int = integer();
        let subrange = Rc::new(TypeKind::Subrange { base: int.clone(), lower: 2, upper: 5 });
        assert!(coercible(&subrange, &int));
        assert!(!coercible(&boolean(), &int));
    }
}
