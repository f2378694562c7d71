use crate::types::*;
use bytes::{Buf, BufMut};
use std::mem::size_of;
use typed_ints::{IndexBase, TypedInt};

/// Format revision written at the head of every serialized model.
pub const MODEL_FORMAT_VERSION: u32 = 1;

pub struct Version {
    pub model: u32,
}

impl Version {
    pub fn new() -> Version {
        Version {
            model: MODEL_FORMAT_VERSION,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.model >= 1 && self.model <= MODEL_FORMAT_VERSION
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::new()
    }
}

pub trait Readable<T> {
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<T>;
}

pub trait Writable<T> {
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()>;
}

pub fn read_vec_fn<T, F>(
    from: &mut dyn Buf,
    version: &mut Version,
    read_func: F,
) -> BspResult<Vec<T>>
where
    F: Fn(&mut dyn Buf, &mut Version) -> BspResult<T>,
{
    let length = u32::read(from, version)?;
    // Every element takes at least a byte; reject lengths the stream cannot hold.
    if length as usize > from.remaining() {
        return Err(BspError::from("Vector length exceeds stream"));
    }

    let mut result: Vec<T> = Vec::with_capacity(length as usize);
    for _ in 0..length {
        result.push(read_func(from, version)?);
    }

    Ok(result)
}

pub fn write_vec_fn<'a, T: 'a, F>(
    vec: &'a [T],
    to: &mut dyn BufMut,
    version: &Version,
    write_func: F,
) -> BspResult<()>
where
    F: Fn(&'a T, &mut dyn BufMut, &Version) -> BspResult<()>,
{
    (vec.len() as u32).write(to, version)?;
    for item in vec {
        write_func(item, to, version)?;
    }

    Ok(())
}

impl<T> Readable<Vec<T>> for Vec<T>
where
    T: Readable<T>,
{
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<Vec<T>> {
        read_vec_fn(from, version, |from, version| T::read(from, version))
    }
}

impl<T> Writable<Vec<T>> for Vec<T>
where
    T: Writable<T>,
{
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
        write_vec_fn(self, to, version, |item, to, version| item.write(to, version))
    }
}

impl<T, const N: usize> Readable<[T; N]> for [T; N]
where
    T: Readable<T> + Default + Copy,
{
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<[T; N]> {
        let mut result = [T::default(); N];
        for item in result.iter_mut() {
            *item = T::read(from, version)?;
        }
        Ok(result)
    }
}

impl<T, const N: usize> Writable<[T; N]> for [T; N]
where
    T: Writable<T>,
{
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
        for item in self.iter() {
            item.write(to, version)?;
        }
        Ok(())
    }
}

macro_rules! primitive_readable {
    ($ty: ty, $read_fn: ident) => {
        impl Readable<$ty> for $ty {
            fn read(from: &mut dyn Buf, _version: &mut Version) -> BspResult<Self> {
                if from.remaining() < size_of::<Self>() {
                    return Err(BspError::from("EOF"));
                }
                Ok(from.$read_fn())
            }
        }
    };
}

macro_rules! primitive_writable {
    ($ty: ty, $write_fn: ident) => {
        impl Writable<$ty> for $ty {
            fn write(&self, to: &mut dyn BufMut, _version: &Version) -> BspResult<()> {
                Ok(to.$write_fn(*self))
            }
        }
    };
}

primitive_readable!(u8, get_u8);
primitive_readable!(u16, get_u16_le);
primitive_readable!(u32, get_u32_le);
primitive_readable!(u64, get_u64_le);

primitive_readable!(i32, get_i32_le);

primitive_readable!(f32, get_f32_le);
primitive_readable!(f64, get_f64_le);

primitive_writable!(u8, put_u8);
primitive_writable!(u16, put_u16_le);
primitive_writable!(u32, put_u32_le);
primitive_writable!(u64, put_u64_le);

primitive_writable!(i32, put_i32_le);

primitive_writable!(f32, put_f32_le);
primitive_writable!(f64, put_f64_le);

impl Readable<bool> for bool {
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<bool> {
        Ok(u8::read(from, version)? != 0)
    }
}

impl Writable<bool> for bool {
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
        (*self as u8).write(to, version)
    }
}

impl<T, X> Readable<TypedInt<T, X>> for TypedInt<T, X>
where
    T: Readable<T> + Copy,
{
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<TypedInt<T, X>> {
        T::read(from, version).map(|b| Self::from(b))
    }
}

impl<T, X> Writable<TypedInt<T, X>> for TypedInt<T, X>
where
    T: Writable<T> + Copy,
{
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
        self.inner().write(to, version)
    }
}

// Optional indices are stored as a signed index with -1 for none.
impl<T, X> Readable<Option<TypedInt<T, X>>> for Option<TypedInt<T, X>>
where
    T: IndexBase,
{
    fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<Option<TypedInt<T, X>>> {
        let raw = i32::read(from, version)?;
        match raw {
            -1 => Ok(None),
            x if x >= 0 => Ok(Some(TypedInt::from_index(x as usize))),
            _ => Err(BspError::from("Invalid index")),
        }
    }
}

impl<T, X> Writable<Option<TypedInt<T, X>>> for Option<TypedInt<T, X>>
where
    T: IndexBase,
{
    fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
        match self {
            Some(index) => (index.index() as i32).write(to, version),
            None => (-1i32).write(to, version),
        }
    }
}

/// Reads and writes a `bitflags` set through its raw bits, dropping unknown bits.
#[macro_export]
macro_rules! bitflags_io {
    ($flags: ty, $bits: ty) => {
        impl Readable<$flags> for $flags {
            fn read(from: &mut dyn Buf, version: &mut Version) -> BspResult<Self> {
                Ok(<$flags>::from_bits_truncate(<$bits>::read(from, version)?))
            }
        }

        impl Writable<$flags> for $flags {
            fn write(&self, to: &mut dyn BufMut, version: &Version) -> BspResult<()> {
                self.bits().write(to, version)
            }
        }
    };
}
