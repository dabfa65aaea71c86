use std::fmt;

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            pub const fn index(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}@{}", stringify!($name), self.0)
            }
        }
    };
}

index_type!(
    /// index into the string ids
    StringIndex
);
index_type!(
    /// index into the type ids
    TypeIndex
);
index_type!(
    /// index into the proto ids, resolves to a method type
    ProtoIndex
);
index_type!(FieldIndex);
index_type!(MethodIndex);
index_type!(CallSiteIndex);

/// Index space sizes of a loaded dex file. Owned by whoever parsed the file,
/// the cache only uses it for sizing and bounds checks.
#[derive(Debug, Clone, Default)]
pub struct DexFile {
    pub location: String,
    pub num_string_ids: u32,
    pub num_type_ids: u32,
    pub num_proto_ids: u32,
    pub num_field_ids: u32,
    pub num_method_ids: u32,
    pub num_call_site_ids: u32,
}

impl DexFile {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn with_strings(mut self, count: u32) -> Self {
        self.num_string_ids = count;
        self
    }

    pub fn with_types(mut self, count: u32) -> Self {
        self.num_type_ids = count;
        self
    }

    pub fn with_protos(mut self, count: u32) -> Self {
        self.num_proto_ids = count;
        self
    }

    pub fn with_fields(mut self, count: u32) -> Self {
        self.num_field_ids = count;
        self
    }

    pub fn with_methods(mut self, count: u32) -> Self {
        self.num_method_ids = count;
        self
    }

    pub fn with_call_sites(mut self, count: u32) -> Self {
        self.num_call_site_ids = count;
        self
    }
}
