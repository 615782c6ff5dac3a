//! Attribute bit sets for types and traits.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

macro_rules! attribute_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// No attributes set
            pub const NONE: $name = $name(0);
            $($(#[$fmeta])* pub const $flag: $name = $name(1 << $bit);)*

            /// Returns true if every bit of `other` is set.
            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            /// Sets the bits of `other`.
            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            /// Clears the bits of `other`.
            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }

            /// Returns true when no bit is set.
            pub fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

attribute_set! {
    /// Attributes of a runtime type.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_types::TypeAttributes;
    ///
    /// let attrs = TypeAttributes::FINAL | TypeAttributes::HAS_CONSTRUCTOR;
    /// assert!(attrs.contains(TypeAttributes::FINAL));
    /// assert!(!attrs.contains(TypeAttributes::INTERFACE));
    /// ```
    TypeAttributes {
        /// Implemented natively
        NATIVE = 0,
        /// Cannot be subclassed
        FINAL = 1,
        /// Interface type
        INTERFACE = 2,
        /// Instances may gain and lose properties
        DYNAMIC_INSTANCE = 3,
        /// Declares a constructor
        HAS_CONSTRUCTOR = 4,
        /// Declares an instance initializer
        HAS_INITIALIZER = 5,
        /// Declares a static initializer
        HAS_STATIC_INITIALIZER = 6,
        /// Constructor calls its base constructor
        CALLS_SUPER = 7,
    }
}

attribute_set! {
    /// Attributes of one property slot (its trait).
    TraitAttributes {
        /// Slot holds a getter
        GETTER = 0,
        /// Slot holds a setter
        SETTER = 1,
        /// Static member
        STATIC = 2,
        /// Read only
        READONLY = 3,
        /// Null is not an acceptable value
        NOT_NULLABLE = 4,
        /// Not enumerable
        HIDDEN = 5,
        /// Native member
        NATIVE = 6,
        /// Overrides a base member
        OVERRIDE = 7,
        /// Copied from a base or implemented type
        INHERITED = 8,
    }
}
