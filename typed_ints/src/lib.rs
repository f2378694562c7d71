use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Integer types usable as the storage of a table index.
pub trait IndexBase: Copy {
    fn to_usize(self) -> usize;
    fn from_usize(value: usize) -> Self;
}

macro_rules! index_base {
    ($($ty:ty),*) => {
        $(
            impl IndexBase for $ty {
                fn to_usize(self) -> usize {
                    self as usize
                }
                fn from_usize(value: usize) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

index_base!(u8, u16, u32, u64, usize);

#[derive(Clone, Debug)]
pub struct TypedEnumerate<I, B, X> {
    iter: I,
    count: usize,
    _tag: PhantomData<(B, X)>,
}

impl<I, B, X> TypedEnumerate<I, B, X> {
    pub fn new(iter: I, first: usize) -> TypedEnumerate<I, B, X> {
        TypedEnumerate {
            iter,
            count: first,
            _tag: PhantomData,
        }
    }
}

impl<I, B, X> Iterator for TypedEnumerate<I, B, X>
where
    I: Iterator,
    B: IndexBase,
{
    type Item = (TypedInt<B, X>, <I as Iterator>::Item);

    fn next(&mut self) -> Option<Self::Item> {
        let a = self.iter.next()?;
        let i = TypedInt::from_index(self.count);
        self.count += 1;
        Some((i, a))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
    fn count(self) -> usize {
        self.iter.count()
    }
    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let a = self.iter.nth(n)?;
        self.count += n;
        let i = TypedInt::from_index(self.count);
        self.count += 1;
        Some((i, a))
    }
}

/// Enumerate an iterator with typed indices instead of `usize`.
pub trait TypedEnum
where
    Self: Sized,
{
    fn typed_enumerate<B, X>(self) -> TypedEnumerate<Self, B, X> {
        TypedEnumerate::new(self, 0)
    }
}

impl<I: Iterator> TypedEnum for I {}

#[derive(Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct TypedInt<B, X>(B, PhantomData<X>)
where
    B: Copy;

impl<B, X> Copy for TypedInt<B, X> where B: Copy {}

impl<B, X> Clone for TypedInt<B, X>
where
    B: Copy,
{
    fn clone(&self) -> Self {
        Self(self.0, PhantomData)
    }
}

impl<B, X> Default for TypedInt<B, X>
where
    B: Default + Copy,
{
    fn default() -> Self {
        Self(B::default(), PhantomData)
    }
}

impl<B, X> Hash for TypedInt<B, X>
where
    B: Hash + Copy,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<B, X> Display for TypedInt<B, X>
where
    B: Display + Copy,
{
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<B, X> From<B> for TypedInt<B, X>
where
    B: Copy,
{
    fn from(inner: B) -> Self {
        Self(inner, PhantomData)
    }
}

impl<B, X> TypedInt<B, X>
where
    B: Copy,
{
    pub fn new(inner: B) -> Self {
        Self::from(inner)
    }
    pub fn into_inner(self) -> B {
        self.0
    }
    pub fn inner(&self) -> &B {
        &self.0
    }
    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.0
    }
}

impl<B, X> TypedInt<B, X>
where
    B: IndexBase,
{
    /// Position of this index in its table.
    pub fn index(self) -> usize {
        self.0.to_usize()
    }
    pub fn from_index(index: usize) -> Self {
        Self(B::from_usize(index), PhantomData)
    }
}

impl<B, A, X> Add<A> for TypedInt<B, X>
where
    B: Add<A, Output = B> + Copy,
{
    type Output = Self;
    fn add(self, rhs: A) -> Self::Output {
        Self(self.0.add(rhs), PhantomData)
    }
}

impl<B, A, X> AddAssign<A> for TypedInt<B, X>
where
    B: AddAssign<A> + Copy,
{
    fn add_assign(&mut self, rhs: A) {
        self.0.add_assign(rhs);
    }
}

impl<B, A, X> Sub<A> for TypedInt<B, X>
where
    B: Sub<A, Output = B> + Copy,
{
    type Output = Self;
    fn sub(self, rhs: A) -> Self::Output {
        Self(self.0.sub(rhs), PhantomData)
    }
}

impl<B, A, X> SubAssign<A> for TypedInt<B, X>
where
    B: SubAssign<A> + Copy,
{
    fn sub_assign(&mut self, rhs: A) {
        self.0.sub_assign(rhs);
    }
}

#[macro_export]
macro_rules! typed_int {
    ($name:ident, $tag:ident, $base:ty) => {
        #[derive(Debug, Eq, Ord, PartialOrd, PartialEq)]
        pub struct $tag(usize);
        pub type $name = TypedInt<$base, $tag>;
    };
}
