//! Newtypes for backend identifiers to avoid stringly-typed call sites.

use std::fmt;
use std::ops::Deref;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, PartialEq)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider identifier, trimming surrounding whitespace.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into().trim().to_owned())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Opaque identifier for a block-storage volume.
    VolumeRef
);
newtype!(
    /// Opaque identifier for a compute instance.
    InstanceRef
);
newtype!(
    /// Host-visible path of an attached block device (for example `/dev/vdb`).
    DevicePath
);
