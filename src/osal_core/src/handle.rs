//! Object handles
use core::{fmt, num::NonZeroU32};

use crate::error::InvalidHandleError;

/// The number of bits used to store the slot index in a handle.
pub const INDEX_BITS: u32 = 10;

/// The number of bits used to store the generation counter in a handle.
pub const GENERATION_BITS: u32 = 16;

/// The number of bits used to store the object class in a handle.
pub const CLASS_BITS: u32 = 32 - INDEX_BITS - GENERATION_BITS;

/// The maximum capacity of a single object table.
pub const MAX_OBJECTS_PER_CLASS: usize = 1 << INDEX_BITS;

const INDEX_SHIFT: u32 = GENERATION_BITS;
const CLASS_SHIFT: u32 = GENERATION_BITS + INDEX_BITS;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// The generation value at which a slot is retired instead of being reused.
pub const GENERATION_LIMIT: u16 = u16::MAX;

macro_rules! define_object_class {
    (
        $( #[$meta:meta] )*
        pub enum ObjectClass {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ObjectClass {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ObjectClass {
            /// All object classes, in the order of their numeric values.
            pub const ALL: &'static [Self] = &[$(Self::$vname),*];

            /// Get the class with the specified numeric value.
            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $(
                        x if x == Self::$vname as u32 => Some(Self::$vname),
                    )*
                    _ => None,
                }
            }

            /// Get the name of the class.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }
        }
    };
}

define_object_class! {
    /// The kind of an object.
    ///
    /// Each class has an independent object table. Zero is not a valid class
    /// value so that a zeroed handle never decodes.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
    #[repr(u8)]
    pub enum ObjectClass {
        BinSem = 1,
        CountSem = 2,
        Mutex = 3,
        Queue = 4,
        TimeBase = 5,
        Timer = 6,
        File = 7,
        Dir = 8,
        FileSys = 9,
    }
}

impl ObjectClass {
    /// The number of object classes.
    pub const COUNT: usize = Self::ALL.len();

    /// Get a zero-based dense index suitable for indexing per-class arrays.
    #[inline]
    pub fn ordinal(self) -> usize {
        self as usize - 1
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque identifier of an object.
///
/// A handle packs the object class, the slot index, and the slot's
/// generation at the time the object was created. A slot's generation
/// changes every time the slot is released, so a handle stops decoding to a
/// live object as soon as the object is deleted, even if the slot is reused
/// by another object later.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(NonZeroU32);

impl Handle {
    /// Construct a handle from its components.
    ///
    /// Returns `None` if `index` does not fit the index field.
    #[inline]
    pub fn encode(class: ObjectClass, index: usize, generation: u16) -> Option<Self> {
        if index >= MAX_OBJECTS_PER_CLASS {
            return None;
        }
        let raw = ((class as u32) << CLASS_SHIFT)
            | ((index as u32) << INDEX_SHIFT)
            | (generation as u32 & GENERATION_MASK);
        // The class field is never zero
        NonZeroU32::new(raw).map(Self)
    }

    /// Split a handle into its components.
    #[inline]
    pub fn decode(self) -> Result<(ObjectClass, usize, u16), InvalidHandleError> {
        let raw = self.0.get();
        let class = ObjectClass::from_raw(raw >> CLASS_SHIFT)
            .ok_or(InvalidHandleError::InvalidHandle)?;
        let index = ((raw >> INDEX_SHIFT) & INDEX_MASK) as usize;
        let generation = (raw & GENERATION_MASK) as u16;
        Ok((class, index, generation))
    }

    /// Reinterpret a raw value as a handle.
    ///
    /// This does not check the value; [`Self::decode`] or an object table
    /// lookup will reject it if it is meaningless.
    #[inline]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Get the raw value of the handle.
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0.get()
    }

    /// Get the object class encoded in the handle.
    #[inline]
    pub fn class(self) -> Option<ObjectClass> {
        self.decode().ok().map(|(class, _, _)| class)
    }

    /// Get the slot index encoded in the handle.
    #[inline]
    pub fn index(self) -> usize {
        ((self.0.get() >> INDEX_SHIFT) & INDEX_MASK) as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.decode() {
            Ok((class, index, generation)) => {
                write!(f, "Handle({class}#{index}@{generation})")
            }
            Err(_) => write!(f, "Handle({:#010x})", self.0),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
